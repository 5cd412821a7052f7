use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use glootie_execution::{
    purge_stale_scratch, EngineConfig, ExecutionEngine, PoolConfig, TaskStore, TaskStoreConfig,
    WorkerPool,
};
use glootie_mcp::{tool_catalog, GlootieToolRegistry, RequestHandler, StdioServer};

#[derive(Parser)]
#[command(name = "glootie-mcp")]
#[command(about = "Code execution MCP server with background task promotion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio
    Serve {
        /// Number of worker slots
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// List available tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // logs go to stderr; stdout belongs to the protocol
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { workers } => serve(workers).await,
        Commands::Tools => {
            tools_command();
            Ok(())
        }
    }
}

async fn serve(workers: usize) -> Result<(), Box<dyn std::error::Error>> {
    let pool_config = PoolConfig {
        worker_count: workers,
        ..Default::default()
    };

    let purged = purge_stale_scratch(&pool_config.runner.scratch_prefix);
    if purged > 0 {
        info!(purged, "removed stale scratch directories");
    }

    let store = Arc::new(TaskStore::new(TaskStoreConfig::default()));
    store.start().await;

    let pool = Arc::new(WorkerPool::new(pool_config, store.clone()));
    pool.start().await;

    let engine = Arc::new(ExecutionEngine::new(pool, store, EngineConfig::default()));
    let registry = Arc::new(GlootieToolRegistry::new(engine.clone()));
    let server = StdioServer::new(RequestHandler::new(registry), engine);

    info!(workers, "glootie MCP server ready on stdio");
    server.run().await?;

    info!("glootie MCP server stopped");
    Ok(())
}

fn tools_command() {
    println!("Available MCP tools:");
    println!();
    for tool in tool_catalog() {
        println!("  {} - {}", tool.name, tool.description);
    }
}
