use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use genjob::{
    default_config_path, init_logging, load_config, GenerationKind, GenerationRequest,
    GenerationTracker, JobStatus, LogFormat, TrackerConfig,
};

/// Submit a generation job and follow it until it finishes.
#[derive(Parser, Debug)]
#[command(name = "genjob")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ~/.genjob/config.json when present)
    #[arg(short, long, global = true, env = "GENJOB_CONFIG")]
    config: Option<PathBuf>,

    /// Relay base URL, overrides the config file
    #[arg(long, global = true, env = "GENJOB_BASE_URL")]
    base_url: Option<String>,

    /// Poll only, never open the push channel
    #[arg(long, global = true)]
    no_push: bool,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Print the finished job as JSON instead of just the result URL
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an image
    Image(GenerateArgs),
    /// Generate a video
    Video(GenerateArgs),
    /// Generate a music track
    Music(GenerateArgs),
}

impl Command {
    fn kind(&self) -> GenerationKind {
        match self {
            Command::Image(_) => GenerationKind::Image,
            Command::Video(_) => GenerationKind::Video,
            Command::Music(_) => GenerationKind::Music,
        }
    }

    fn args(&self) -> &GenerateArgs {
        match self {
            Command::Image(args) | Command::Video(args) | Command::Music(args) => args,
        }
    }
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Text prompt
    #[arg(short, long)]
    prompt: String,

    /// Client the generation belongs to
    #[arg(long, env = "GENJOB_CLIENT")]
    client: Option<String>,

    #[arg(long, requires = "height")]
    width: Option<u32>,

    #[arg(long, requires = "width")]
    height: Option<u32>,

    #[arg(long)]
    style: Option<String>,

    #[arg(long)]
    negative_prompt: Option<String>,

    /// Length in seconds (video and music only)
    #[arg(long)]
    duration: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,
}

impl GenerateArgs {
    fn to_request(&self, kind: GenerationKind) -> GenerationRequest {
        let mut request = GenerationRequest::new(kind, &self.prompt);
        if let Some(client) = &self.client {
            request = request.client(client);
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            request = request.dimensions(width, height);
        }
        if let Some(style) = &self.style {
            request = request.style(style);
        }
        if let Some(negative_prompt) = &self.negative_prompt {
            request = request.negative_prompt(negative_prompt);
        }
        if let Some(duration) = self.duration {
            request = request.duration(duration);
        }
        if let Some(seed) = self.seed {
            request = request.seed(seed);
        }
        request
    }
}

fn resolve_config(cli: &Cli) -> Result<TrackerConfig, genjob::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                info!("Using config file {}", path.display());
                load_config(path)?
            }
            None => {
                debug!("No config file found, using defaults");
                TrackerConfig::default()
            }
        },
    };

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if cli.no_push {
        config.push.enabled = false;
    }
    if !config.has_api_token() {
        warn!("No API token configured, relay requests are sent without authorization");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let tracker = match GenerationTracker::from_config(config) {
        Ok(tracker) => tracker,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tracker.start_push() {
        warn!("Push channel unavailable, polling only: {}", e);
    }

    let mut events = tracker.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => eprintln!("[{}] {} {}%", event.job_id, event.status, event.progress),
                Err(RecvError::Lagged(n)) => debug!("Progress printer missed {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let kind = cli.command.kind();
    let request = cli.command.args().to_request(kind);
    let handle = match tracker.submit(request).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    eprintln!("Submitted {} job {}", kind, handle.job_id());

    let finished = tokio::select! {
        job = handle.wait() => job,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelled");
            tracker.shutdown();
            return ExitCode::from(130);
        }
    };

    let job = match finished {
        Some(job) => job,
        None => {
            eprintln!("Job was cancelled");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&job) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to encode job: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    match (job.status, &job.result) {
        (JobStatus::Succeeded, Some(result)) => {
            if !cli.json {
                println!("{}", result.url);
            }
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!(
                "{}",
                job.error.as_deref().unwrap_or("Generation did not succeed")
            );
            ExitCode::FAILURE
        }
    }
}
