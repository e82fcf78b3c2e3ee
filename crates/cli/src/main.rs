use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sti_engine::AppConfig;
use sti_storage::SqliteStore;

#[derive(Parser)]
#[command(name = "sti", about = "Study task intelligence backend", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (overrides STI_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// REST port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Weekly productivity maintenance
    Weekly {
        #[command(subcommand)]
        action: WeeklyAction,
    },
}

#[derive(Subcommand)]
enum WeeklyAction {
    /// Recompute the weekly productivity aggregate from tasks and sessions
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.bind_host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            sti_server::start_server(config).await?;
            Ok(())
        }

        Commands::Weekly { action } => match action {
            WeeklyAction::Refresh => {
                let store = SqliteStore::open(&Path::new(&config.data_dir).join("sti.db"))?;
                let result = store.refresh_weekly()?;
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }
        },
    }
}
