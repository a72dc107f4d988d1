//! Mapping provider result payloads into [`GenerationResult`].
//!
//! Providers disagree on field names (`url`, `imageUrl`, `output[0]`,
//! `images[].url`, ...). Only the main URL is mandatory; every other field is
//! best effort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MaterializeError;
use crate::job::GenerationKind;
use crate::provider::StatusPayload;

const URL_KEYS: &[&str] = &[
    "url",
    "imageUrl",
    "image_url",
    "videoUrl",
    "video_url",
    "audioUrl",
    "audio_url",
    "output",
];
const THUMBNAIL_KEYS: &[&str] = &["thumbnail", "thumbnailUrl", "thumbnail_url", "snapshotUrl"];
const DURATION_KEYS: &[&str] = &["duration", "durationSecs", "duration_seconds"];

/// A finished generation in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub kind: GenerationKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Additional outputs beyond `url` (e.g. the other images of a batch).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn new(kind: GenerationKind, url: &str) -> Self {
        Self {
            kind,
            url: url.to_string(),
            thumbnail: None,
            duration_secs: None,
            seed: None,
            variants: vec![],
            created_at: Utc::now(),
        }
    }
}

/// Converts a succeeded status payload into a [`GenerationResult`].
///
/// Fails only when no result URL can be found.
pub fn materialize(
    kind: GenerationKind,
    job_id: &str,
    payload: &StatusPayload,
) -> Result<GenerationResult, MaterializeError> {
    let fields = &payload.fields;

    let mut urls = find_urls(fields);
    if urls.is_empty() {
        return Err(MaterializeError::MissingUrl {
            job_id: job_id.to_string(),
        });
    }
    let url = urls.remove(0);

    let mut result = GenerationResult::new(kind, &url);
    result.variants = urls;
    result.thumbnail = first_string(fields, THUMBNAIL_KEYS);
    result.duration_secs = DURATION_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(as_seconds));
    result.seed = fields.get("seed").and_then(as_seed).or_else(|| {
        fields
            .get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .and_then(|image| image.get("seed"))
            .and_then(as_seed)
    });

    Ok(result)
}

/// Collects result URLs, main URL first.
fn find_urls(fields: &Map<String, Value>) -> Vec<String> {
    for key in URL_KEYS {
        let urls = match fields.get(*key) {
            Some(value) => urls_from(value),
            None => continue,
        };
        if !urls.is_empty() {
            return urls;
        }
    }

    fields.get("images").map(urls_from).unwrap_or_default()
}

/// Accepts a string, an object with a `url`, or an array of either.
fn urls_from(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        Value::Object(map) => map
            .get("url")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        Value::Array(items) => items.iter().flat_map(urls_from).collect(),
        _ => vec![],
    }
}

fn first_string(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        fields
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

fn as_seconds(value: &Value) -> Option<f64> {
    let secs = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

fn as_seed(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(fields: Value) -> StatusPayload {
        let mut payload: StatusPayload = serde_json::from_value(fields).unwrap();
        payload.status = "succeeded".to_string();
        payload
    }

    #[test]
    fn test_plain_url() {
        let result = materialize(
            GenerationKind::Image,
            "job-42",
            &payload(json!({ "url": "https://x/img.png" })),
        )
        .unwrap();

        assert_eq!(result.url, "https://x/img.png");
        assert_eq!(result.kind, GenerationKind::Image);
        assert!(result.thumbnail.is_none());
        assert!(result.duration_secs.is_none());
        assert!(result.seed.is_none());
        assert!(result.variants.is_empty());
    }

    #[test]
    fn test_image_batch_with_seeds() {
        let result = materialize(
            GenerationKind::Image,
            "job-1",
            &payload(json!({
                "images": [
                    { "url": "https://x/a.png", "seed": 11 },
                    { "url": "https://x/b.png", "seed": 12 }
                ]
            })),
        )
        .unwrap();

        assert_eq!(result.url, "https://x/a.png");
        assert_eq!(result.variants, vec!["https://x/b.png".to_string()]);
        assert_eq!(result.seed, Some(11));
    }

    #[test]
    fn test_output_array() {
        let result = materialize(
            GenerationKind::Video,
            "job-2",
            &payload(json!({ "output": ["https://x/clip.mp4"] })),
        )
        .unwrap();
        assert_eq!(result.url, "https://x/clip.mp4");
    }

    #[test]
    fn test_video_fields() {
        let result = materialize(
            GenerationKind::Video,
            "job-3",
            &payload(json!({
                "videoUrl": "https://x/clip.mp4",
                "thumbnailUrl": "https://x/clip.jpg",
                "duration": "12.5"
            })),
        )
        .unwrap();

        assert_eq!(result.url, "https://x/clip.mp4");
        assert_eq!(result.thumbnail.as_deref(), Some("https://x/clip.jpg"));
        assert_eq!(result.duration_secs, Some(12.5));
    }

    #[test]
    fn test_audio_fields() {
        let result = materialize(
            GenerationKind::Music,
            "job-4",
            &payload(json!({ "audio_url": "https://x/track.mp3", "durationSecs": 30 })),
        )
        .unwrap();

        assert_eq!(result.url, "https://x/track.mp3");
        assert_eq!(result.duration_secs, Some(30.0));
    }

    #[test]
    fn test_malformed_optional_fields_ignored() {
        let result = materialize(
            GenerationKind::Music,
            "job-5",
            &payload(json!({
                "url": "https://x/track.mp3",
                "duration": "unknown",
                "seed": -4,
                "thumbnail": 17
            })),
        )
        .unwrap();

        assert_eq!(result.url, "https://x/track.mp3");
        assert!(result.duration_secs.is_none());
        assert!(result.seed.is_none());
        assert!(result.thumbnail.is_none());
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let err = materialize(
            GenerationKind::Image,
            "job-6",
            &payload(json!({ "seed": 3, "url": "" })),
        )
        .unwrap_err();

        assert_eq!(
            err,
            MaterializeError::MissingUrl {
                job_id: "job-6".to_string()
            }
        );
    }
}
