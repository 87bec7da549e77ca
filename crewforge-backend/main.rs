mod agents;
mod api;
mod artifacts;
mod config;
mod jobs;

use anyhow::{Context, Result, bail};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::agents::llm::{HttpLlmClient, LlmClient};
use crate::config::Config;
use crate::jobs::events::{EventPayload, JobEvent};
use crate::jobs::registry::JobRegistry;
use crate::jobs::runner::JobRunner;
use crate::jobs::{GenerationRequest, JobStatus};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "crewforge", about = "Multi-agent code generation service")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Run one generation job in-process and write its files to disk
    Generate {
        /// What to build
        #[arg(long)]
        requirements: String,
        #[arg(long)]
        framework: String,
        #[arg(long)]
        language: String,
        /// Output directory for the generated files
        #[arg(long, default_value = "./generated")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but keep --help and --version.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve
    } else {
        Cli::parse()
    };

    let config = Config::from_env();
    init_tracing();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    match cli {
        Cli::Serve => run_server(config).await,
        Cli::Generate {
            requirements,
            framework,
            language,
            out,
        } => {
            let request = GenerationRequest {
                requirements,
                framework,
                language,
            };
            run_generate(config, request, out).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crewforge=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();
}

fn build_runner(config: &Config, registry: Arc<JobRegistry>) -> Result<Arc<JobRunner>> {
    let llm: Option<Arc<dyn LlmClient>> = match config.llm_settings() {
        Some(settings) => {
            tracing::info!(model = %settings.model, base_url = %settings.base_url, "using language model");
            let client = HttpLlmClient::new(settings).context("failed to build model client")?;
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("no LLM_API_KEY or OPENAI_API_KEY set, stages will use canned responses");
            None
        }
    };

    let (events_tx, _) = tokio::sync::broadcast::channel::<JobEvent>(256);
    Ok(Arc::new(JobRunner::new(
        registry,
        llm,
        events_tx,
        config.max_requirements_length,
    )))
}

async fn run_server(config: Config) -> Result<()> {
    let registry = Arc::new(JobRegistry::new(config.job_retention));
    tokio::spawn(Arc::clone(&registry).sweep_loop(SWEEP_INTERVAL));

    let runner = build_runner(&config, registry)?;

    let app_state = api::AppState {
        runner,
        static_dir: config.static_dir.clone(),
    };

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn run_generate(config: Config, request: GenerationRequest, out: PathBuf) -> Result<()> {
    let registry = Arc::new(JobRegistry::new(config.job_retention));
    let runner = build_runner(&config, registry)?;

    let written = generate(&runner, request, &out).await?;
    for path in &written {
        println!("{}", path.display());
    }
    tracing::info!(files = written.len(), out = %out.display(), "✓ Generation complete");
    Ok(())
}

/// Submit one job, log its events until it finishes and write its files to `out`.
async fn generate(
    runner: &Arc<JobRunner>,
    request: GenerationRequest,
    out: &Path,
) -> Result<Vec<PathBuf>> {
    let mut events_rx = runner.subscribe();
    let job_id = runner.submit(request).await?;

    let log_job_id = job_id.clone();
    let log_events = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            if event.job_id != log_job_id {
                continue;
            }
            log_event(&event);
            if event.event_type.is_terminal() {
                break;
            }
        }
    });

    let handle = runner
        .registry()
        .get(&job_id)
        .await
        .context("job vanished right after submission")?;
    let mut state_rx = handle.subscribe();
    let job = state_rx
        .wait_for(|job| job.status.is_terminal())
        .await
        .context("job state channel closed")?
        .clone();
    if let Err(e) = log_events.await {
        tracing::warn!(error = %e, "event logger task died");
    }

    match job.status {
        JobStatus::Completed => {
            let artifacts = job.artifacts.unwrap_or_default();
            artifacts::write_artifacts(&artifacts, out)
        }
        status => bail!(
            "job {job_id} {status}: {}",
            job.error.as_deref().unwrap_or("no reason given")
        ),
    }
}

fn log_event(event: &JobEvent) {
    match &event.payload {
        EventPayload::JobStarted(request) => {
            tracing::info!(framework = %request.framework, language = %request.language, "job started")
        }
        EventPayload::StageStarted {
            role, description, ..
        } => tracing::info!(%role, "{description}"),
        EventPayload::StageCompleted {
            role, duration_ms, ..
        } => tracing::info!(%role, duration_ms, "stage completed"),
        EventPayload::StageFailed { role, error, .. } => {
            tracing::error!(%role, %error, "stage failed")
        }
        EventPayload::JobCompleted {
            artifacts,
            duration_ms,
            ..
        } => tracing::info!(files = artifacts.len(), duration_ms, "job completed"),
        EventPayload::JobFailed { error } => tracing::error!(%error, "job failed"),
    }
}
