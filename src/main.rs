//! weaviate-mcp CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use weaviate_mcp::{
    config::Config,
    error::Result,
    images::ImageStore,
    mcp::McpServer,
    vertex::{ImageEmbedder, VertexEmbedder},
    weaviate::WeaviateClient,
};

#[derive(Parser)]
#[command(name = "weaviate-mcp")]
#[command(version, about = "Streamable-HTTP MCP server exposing Weaviate search tools", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP HTTP server
    Serve {
        /// Bind address (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,

        /// MCP endpoint path (overrides MCP_PATH)
        #[arg(long)]
        path: Option<String>,
    },

    /// Check whether the configured Weaviate cluster is ready
    Check,

    /// Print the sanitized configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Handle completions command (doesn't need config)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "weaviate-mcp", &mut std::io::stdout());
        return Ok(());
    }

    // Load configuration from the environment
    let mut config = Config::from_env()?;

    if let Commands::Serve { host, port, path } = &cli.command {
        if let Some(host) = host {
            config.host = host.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
        if let Some(path) = path {
            config.mcp_path = weaviate_mcp::config::normalize_mcp_path(path)?;
        }
    }

    // Initialize components
    let weaviate = Arc::new(WeaviateClient::new(
        &config.weaviate_url,
        &config.weaviate_api_key,
    )?);
    let images = Arc::new(ImageStore::new(config.image_ttl, config.max_image_bytes)?);
    let embedder: Option<Arc<dyn ImageEmbedder>> = match &config.vertex {
        Some(vertex) => Some(Arc::new(VertexEmbedder::new(vertex)?)),
        None => None,
    };
    let config = Arc::new(config);

    match cli.command {
        Commands::Serve { .. } => {
            let server = McpServer::new(config, weaviate, images, embedder);
            server.run().await?;
        }

        Commands::Check => {
            let ready = weaviate.is_ready().await.unwrap_or(false);

            if cli.json {
                println!("{}", serde_json::json!({ "ready": ready }));
            } else if ready {
                println!("✓ Weaviate cluster is ready");
            } else {
                println!("✗ Weaviate cluster is not reachable");
            }

            if !ready {
                std::process::exit(1);
            }
        }

        Commands::Config => {
            let summary = config.sanitized_summary(embedder.is_some());
            if cli.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }

        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
