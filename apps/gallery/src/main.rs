use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{GenerationClient, Workflow};
use shared::domain::AspectRatio;
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod shell;

#[derive(Parser, Debug)]
#[command(name = "gallery", about = "Local prompt-to-image gallery")]
struct Cli {
    /// Settings file; defaults to ./gallery.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Generation endpoint, e.g. http://127.0.0.1:9360/generate
    #[arg(long, global = true)]
    endpoint: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every stored image, oldest first.
    List,
    /// Generate new images from a prompt.
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long)]
        aspect: Option<AspectRatio>,
    },
    /// Regenerate an image in place, keeping its seed.
    Edit {
        #[arg(long)]
        index: usize,
        /// Replacement prompt; the stored prompt is reused when omitted.
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        aspect: Option<AspectRatio>,
    },
    /// Regenerate an image in place with a fresh seed.
    Retry {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        aspect: Option<AspectRatio>,
    },
    Delete {
        #[arg(long)]
        index: usize,
    },
    /// Write an image's picture bytes to disk.
    Export {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print an image's prompt and seed.
    Prompt {
        #[arg(long)]
        index: usize,
    },
    /// Interactive session over stdin.
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    if let Some(endpoint) = cli.endpoint {
        settings.endpoint_url = endpoint;
    }
    config::validate(&settings)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let database_url = config::prepare_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open image store at '{database_url}'"))?;
    let generator =
        GenerationClient::new(settings.endpoint_url.clone(), settings.request_timeout())?;
    info!(endpoint = generator.endpoint(), "generation client ready");

    let workflow = Workflow::new(Arc::new(storage), Arc::new(generator))
        .with_base_width(settings.base_width);
    workflow.hydrate().await?;

    let default_aspect = settings.default_aspect;
    match cli.command {
        Command::List => {
            print!("{}", commands::render_list(&workflow.snapshot().await));
        }
        Command::Generate {
            prompt,
            quantity,
            aspect,
        } => {
            let outcome = workflow
                .submit(&prompt, quantity, aspect.unwrap_or(default_aspect))
                .await?;
            println!("{}", commands::describe_outcome(&outcome));
            commands::ensure_progress(&outcome)?;
        }
        Command::Edit {
            index,
            prompt,
            aspect,
        } => {
            let outcome = commands::edit_at(
                &workflow,
                index,
                prompt.as_deref(),
                aspect.unwrap_or(default_aspect),
            )
            .await?;
            println!("{}", commands::describe_outcome(&outcome));
            commands::ensure_progress(&outcome)?;
        }
        Command::Retry { index, aspect } => {
            commands::select_position(&workflow, index).await?;
            let image = workflow.retry(aspect.unwrap_or(default_aspect)).await?;
            println!("regenerated #{index} (id {}) with seed {}", image.id, image.seed);
        }
        Command::Delete { index } => {
            commands::select_position(&workflow, index).await?;
            let image_id = workflow.delete_current().await?;
            println!("deleted #{index} (id {image_id})");
        }
        Command::Export { index, out } => {
            commands::select_position(&workflow, index).await?;
            let path = commands::export_selected(&workflow, index, out).await?;
            println!("wrote {}", path.display());
        }
        Command::Prompt { index } => {
            commands::select_position(&workflow, index).await?;
            println!("{}", commands::describe_selected(&workflow.snapshot().await));
        }
        Command::Shell => {
            shell::run(&workflow, default_aspect).await?;
        }
    }

    Ok(())
}
