#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use weaver_forge::blueprint::{FileCategory, Tier};
use weaver_forge::gateway::{ModelClient, ModelRoster, ProviderGateway, TracingUsageSink};
use weaver_forge::templates::fallback_content;
use weaver_forge::{Planner, Submission, TaskEvent, TaskStatus, WeaverConfig, WeaverService};

#[derive(Parser)]
#[command(name = "weaver", version, about = "Blueprint-driven application scaffold generator")]
struct Cli {
    /// JSON config file; `WEAVER_*` env vars override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one generation task to completion, streaming its events
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Plan a blueprint and print it as JSON
    Plan {
        #[arg(long)]
        prompt: String,
    },
    /// Print the fallback template for a path (offline)
    Fallback {
        #[arg(long, value_enum)]
        tier: CliTier,
        #[arg(long)]
        path: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliTier {
    Backend,
    Frontend,
}

impl From<CliTier> for Tier {
    fn from(t: CliTier) -> Self {
        match t {
            CliTier::Backend => Tier::Backend,
            CliTier::Frontend => Tier::Frontend,
        }
    }
}

fn echo(event: &TaskEvent) {
    match event {
        TaskEvent::Progress { message, percent } => eprintln!("[weaver] {percent:>3}% {message}"),
        TaskEvent::Log { message, level } => eprintln!("[weaver] {}: {message}", level.as_str()),
        TaskEvent::Error { message } => eprintln!("[weaver] error: {message}"),
        TaskEvent::Completion {
            preview_url,
            download_url,
        } => eprintln!("[weaver] done: preview {preview_url} download {download_url}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fallback { tier, path } => {
            let tier = Tier::from(tier);
            let category = FileCategory::classify(tier, &path);
            eprintln!("[weaver] {tier}/{path} -> {}", category.as_str());
            print!("{}", fallback_content(tier, category, &path));
        }
        Commands::Plan { prompt } => {
            let config = WeaverConfig::load(cli.config.as_deref())?;
            config.validate()?;
            let gateway =
                ProviderGateway::from_env(Arc::new(TracingUsageSink), config.gateway_config())?;
            let client = ModelClient::new(Arc::new(gateway), ModelRoster::from_config(&config));
            let outcome = Planner::new(client, config.planner_max_tokens)
                .plan(&prompt, None)
                .await;
            if let Some(reason) = &outcome.fallback_reason {
                eprintln!("[weaver] planner fell back: {reason}");
            }
            eprintln!(
                "[weaver] {} files, blueprint quality {:.2}",
                outcome.blueprint.len(),
                outcome.quality
            );
            println!("{}", outcome.blueprint.to_json_pretty());
        }
        Commands::Generate { prompt, output_dir } => {
            let mut config = WeaverConfig::load(cli.config.as_deref())?;
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            let mut service = WeaverService::from_env(config)?;
            service.start();

            let Submission {
                task_id,
                mut events,
                mut handle,
            } = service.submit_and_subscribe(&prompt)?;
            eprintln!("[weaver] task {task_id} submitted");

            let joined = loop {
                tokio::select! {
                    Some(event) = events.recv() => echo(&event),
                    joined = &mut handle => break joined,
                }
            };
            while let Ok(event) = events.try_recv() {
                echo(&event);
            }
            service.shutdown().await;

            let summary = joined??;
            eprintln!(
                "[weaver] {} files ({} accepted) in {}",
                summary.attempted(),
                summary.accepted(),
                summary.output_dir.display()
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.status != TaskStatus::Completed {
                return Err(format!("task {task_id} finished as {}", summary.status).into());
            }
        }
    }

    Ok(())
}
