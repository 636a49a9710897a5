mod config;
mod report;
mod retry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vidgen_comfyui::ComfyUIApi;
use vidgen_core::job::JobId;
use vidgen_core::mode::GenerationMode;
use vidgen_core::request::{normalize_output_prefix, GenerationParams, DEFAULT_OUTPUT_PREFIX, DEFAULT_TIMEOUT_SECS};
use vidgen_pipeline::audit::FileAuditLog;
use vidgen_pipeline::backend::{ArtifactFetcher, LocalOutputDir};
use vidgen_pipeline::templates::TemplateStore;
use vidgen_pipeline::{GenerationError, JobClient};

use crate::config::ClientConfig;
use crate::retry::{submit_with_retry, RetryConfig};

#[derive(Parser, Debug)]
#[command(name = "vidgen")]
#[command(about = "Generate videos and images on a ComfyUI server")]
#[command(version)]
struct Cli {
    /// Text prompt for generation
    #[arg(short, long, required_unless_present = "resume")]
    prompt: Option<String>,

    /// Input image (switches to i2v unless --mode says otherwise)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Generation mode: t2v, i2v or i2i. Derived from --image if omitted.
    #[arg(short, long)]
    mode: Option<GenerationMode>,

    /// Negative prompt (mode-specific default)
    #[arg(short, long)]
    negative: Option<String>,

    /// Output file name prefix, without directory or extension
    #[arg(short, long, default_value = DEFAULT_OUTPUT_PREFIX)]
    output: String,

    /// Width in pixels (480 for video, 1024 for i2i)
    #[arg(long)]
    width: Option<u32>,

    /// Height in pixels (320 for video, 1024 for i2i)
    #[arg(long)]
    height: Option<u32>,

    /// Number of frames, video modes only (default 100, ~6s at 16fps)
    #[arg(long)]
    frames: Option<u32>,

    /// Sampling steps (8 for t2v, 20 for i2v, 25 for i2i)
    #[arg(long)]
    steps: Option<u32>,

    /// Guidance scale (1.0 for video, 7.0 for i2i)
    #[arg(long)]
    cfg: Option<f64>,

    /// Seed (left to the backend if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Seconds to wait for completion, counted from submission
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Submit and exit without waiting
    #[arg(long, conflicts_with = "resume")]
    queue: bool,

    /// Wait for an already submitted job and fetch its output
    #[arg(long, value_name = "JOB_ID")]
    resume: Option<String>,

    /// ComfyUI server URL [env: COMFYUI_URL]
    #[arg(long)]
    server: Option<String>,

    /// Directory for retrieved outputs [env: VIDGEN_OUTPUT_DIR]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory with t2v.json / i2v.json / i2i.json [env: VIDGEN_TEMPLATE_DIR]
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn params(&self, prompt: String) -> GenerationParams {
        GenerationParams {
            mode: self.mode,
            prompt,
            negative_prompt: self.negative.clone(),
            width: self.width,
            height: self.height,
            frame_count: self.frames,
            step_count: self.steps,
            guidance_scale: self.cfg,
            seed: self.seed,
            image_path: self.image.clone(),
            output_prefix: Some(self.output.clone()),
            timeout_seconds: Some(self.timeout),
        }
    }

    fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.templates {
            config.template_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<GenerationError>() {
            Some(failure) => {
                eprintln!("{}", report::failure(failure));
                ExitCode::from(exit_status(failure.exit_code()))
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("vidgen={level},vidgen_pipeline={level},vidgen_comfyui={level}").into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env().context("invalid configuration")?;
    cli.apply_overrides(&mut config);

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let api = Arc::new(ComfyUIApi::with_client(http, config.server_url.clone()));
    let fetcher: Arc<dyn ArtifactFetcher> = match &config.backend_output_dir {
        Some(dir) => Arc::new(LocalOutputDir::new(dir)),
        None => api.clone(),
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let client = JobClient::new(api, fetcher, Arc::new(FileAuditLog::new(&config.audit_log)))
        .with_templates(TemplateStore::from_dir(&config.template_dir))
        .with_output_dir(&config.output_dir)
        .with_poll_interval(config.poll_interval)
        .with_cancellation(cancel.clone());

    if let Some(job_id) = &cli.resume {
        let prefix = normalize_output_prefix(&cli.output).map_err(GenerationError::from)?;
        let files = client
            .resume(JobId::new(job_id.clone()), &prefix, Duration::from_secs(cli.timeout))
            .await?;
        print_saved(&files);
        return Ok(());
    }

    // clap enforces --prompt whenever --resume is absent.
    let prompt = cli.prompt.clone().unwrap_or_default();
    let request = cli.params(prompt).resolve().map_err(GenerationError::from)?;
    eprintln!("{}", report::banner(&request, &config.server_url));

    let prepared = client.prepare(request).await?;
    if let Some(reference) = &prepared.image_ref {
        tracing::info!(reference = %reference, "Image uploaded");
    }

    let retry = RetryConfig {
        retries: config.submit_retries,
        ..Default::default()
    };
    let submitted = submit_with_retry(&client, &prepared, &retry, &cancel).await?;
    let job_id = &submitted.job.id;

    if cli.queue {
        println!("{job_id}");
        eprintln!(
            "Queued. Fetch the result later with: vidgen --resume {job_id} -o {}",
            submitted.job.request.output_prefix
        );
        return Ok(());
    }

    eprintln!("Queued as {job_id}, waiting for completion...");
    let files = client.complete(&submitted).await?;
    print_saved(&files);
    Ok(())
}

fn print_saved(files: &[PathBuf]) {
    for file in files {
        println!("{}", file.display());
    }
}

/// Cancel `token` on the first Ctrl-C. The backend job is not touched.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, no longer waiting");
            token.cancel();
        }
    });
}
