//! Relay API token resolution.
//!
//! A token can come from three places, checked in this order:
//!
//! 1. an inline value in the config (`api_token`), handy for local testing
//! 2. a file (`api_token_file`), e.g. a mounted container secret
//! 3. an environment variable named by `api_token_env`
//!
//! Empty strings count as "not configured" at every level.

use std::path::PathBuf;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No token source configured (need one of: inline value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read token from file '{}': {source}", path.display())]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token file '{}' is empty", path.display())]
    EmptyFile { path: PathBuf },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

fn configured(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Resolves a secret from the first configured source.
///
/// A configured source that fails (unreadable file, unset variable) is an
/// error; resolution does not fall through to the next source.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = configured(direct) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = configured(file_path) {
        return read_secret_file(path);
    }

    if let Some(name) = configured(env_var) {
        return read_secret_env(name);
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but an unconfigured secret is `Ok(None)`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    configured(direct).is_some() || configured(file_path).is_some() || configured(env_var).is_some()
}

fn read_secret_file(path: &str) -> Result<SecretString> {
    let path = expand_home(path);
    let content = std::fs::read_to_string(&path).map_err(|source| SecretError::FileReadError {
        path: path.clone(),
        source,
    })?;

    let token = content.trim();
    if token.is_empty() {
        return Err(SecretError::EmptyFile { path });
    }
    Ok(SecretString::from(token.to_string()))
}

fn read_secret_env(name: &str) -> Result<SecretString> {
    match std::env::var(name) {
        // Values exported from files often carry a trailing newline
        Ok(value) => Ok(SecretString::from(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
            name: name.to_string(),
        }),
        Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
            name: name.to_string(),
        }),
    }
}

/// Expands a leading `~` or `~/` to the current user's home directory.
///
/// `~user/...` is left untouched.
fn expand_home(path: &str) -> PathBuf {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return PathBuf::from(path),
    };

    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_inline_value_wins() {
        std::env::set_var("GENJOB_TEST_TOKEN_1", "from-env");
        let token = resolve_secret(Some("inline"), None, Some("GENJOB_TEST_TOKEN_1")).unwrap();
        assert_eq!(token.expose_secret(), "inline");
        std::env::remove_var("GENJOB_TEST_TOKEN_1");
    }

    #[test]
    #[serial]
    fn test_file_wins_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        std::env::set_var("GENJOB_TEST_TOKEN_2", "from-env");

        let token = resolve_secret(
            None,
            Some(file.path().to_str().unwrap()),
            Some("GENJOB_TEST_TOKEN_2"),
        )
        .unwrap();
        assert_eq!(token.expose_secret(), "from-file");
        std::env::remove_var("GENJOB_TEST_TOKEN_2");
    }

    #[test]
    #[serial]
    fn test_env_fallback_is_trimmed() {
        std::env::set_var("GENJOB_TEST_TOKEN_3", "from-env\n");
        let token = resolve_secret(Some(""), Some(""), Some("GENJOB_TEST_TOKEN_3")).unwrap();
        assert_eq!(token.expose_secret(), "from-env");
        std::env::remove_var("GENJOB_TEST_TOKEN_3");
    }

    #[test]
    fn test_nothing_configured() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(resolve_secret_optional(None, Some(""), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = resolve_secret_optional(None, Some("/nonexistent/genjob/token"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_blank_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "   ").unwrap();
        let result = resolve_secret(None, Some(file.path().to_str().unwrap()), None);
        assert!(matches!(result, Err(SecretError::EmptyFile { .. })));
    }

    #[test]
    fn test_unset_env_var() {
        let result = resolve_secret(None, None, Some("GENJOB_DEFINITELY_UNSET_98765"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_has_secret_source() {
        assert!(has_secret_source(None, None, Some("TOKEN")));
        assert!(!has_secret_source(Some(""), None, None));
        assert!(!has_secret_source(None, None, None));
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/token"), home.join("token"));
        }
        assert_eq!(expand_home("/run/secrets/token"), PathBuf::from("/run/secrets/token"));
        assert_eq!(expand_home("~alice/token"), PathBuf::from("~alice/token"));
    }
}
