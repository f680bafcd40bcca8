use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use intake::{
    config::Config,
    logging,
    record::ApplicationRecord,
    schema::SchemaManager,
    storage::{RecordStore, StorageContext},
};

#[derive(Debug, Parser)]
#[command(name = "intake")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision storage and serve the intake endpoint.
    Serve {
        /// Optional path to config TOML. If omitted, default discovery is used.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the storage namespace.
        #[arg(long)]
        namespace: Option<String>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Create the namespace and record table if absent, then exit.
    Provision {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Inspect or clear stored applications.
    Records {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        namespace: Option<String>,
        #[command(subcommand)]
        action: RecordsCommand,
    },
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
enum RecordsCommand {
    /// Print every application, newest first, as JSON.
    List,
    /// Permanently delete every application.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordsCommandOutcome {
    Listed(Vec<ApplicationRecord>),
    Cleared { removed: usize },
}

fn load_config(path: Option<PathBuf>, namespace: Option<&str>) -> anyhow::Result<Config> {
    let mut config = Config::load(path.as_deref())?;
    config.apply_namespace_override(namespace)?;
    Ok(config)
}

async fn provision(config: &Config) -> anyhow::Result<StorageContext> {
    let context = StorageContext::from_config(&config.storage)?;
    SchemaManager::new(context.clone()).provision().await?;
    Ok(context)
}

async fn run_records_command(
    config: &Config,
    command: RecordsCommand,
) -> anyhow::Result<RecordsCommandOutcome> {
    let store = RecordStore::with_random_ref_ids(provision(config).await?);

    match command {
        RecordsCommand::List => Ok(RecordsCommandOutcome::Listed(store.list_all().await?)),
        RecordsCommand::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every application without `--yes`");
            }
            let removed = store.clear_all().await?;
            Ok(RecordsCommandOutcome::Cleared { removed })
        }
    }
}

fn print_records_command_outcome(outcome: RecordsCommandOutcome) -> anyhow::Result<()> {
    match outcome {
        RecordsCommandOutcome::Listed(records) => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        RecordsCommandOutcome::Cleared { removed } => {
            println!("cleared {removed} application(s)");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            namespace,
            log_level,
        } => {
            let config = load_config(config, namespace.as_deref())?;
            logging::init(&config, log_level.as_deref())?;
            let server = intake::server::serve(&config).await?;
            eprintln!("{}", startup_summary(&config, server.listen_addr));
            tokio::signal::ctrl_c().await?;
            server.shutdown().await;
        }
        Command::Provision { config, namespace } => {
            let config = load_config(config, namespace.as_deref())?;
            let context = provision(&config).await?;
            println!("storage ready at {}", context.db_path().display());
        }
        Command::Records {
            config,
            namespace,
            action,
        } => {
            let config = load_config(config, namespace.as_deref())?;
            let outcome = run_records_command(&config, action).await?;
            print_records_command_outcome(outcome)?;
        }
    }

    Ok(())
}

fn startup_summary(config: &Config, listen_addr: std::net::SocketAddr) -> String {
    let index_file = config
        .server
        .index_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "none".to_owned());

    format!(
        "startup config: listen={}, storage_path={}, namespace={}, index_file={}, clear_token={}, config={}",
        listen_addr,
        config.storage.path.display(),
        config.storage.namespace,
        index_file,
        redact_if_present(config.server.clear_token.as_deref()),
        config
            .source_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "defaults".to_owned()),
    )
}

fn redact_if_present(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "[REDACTED]"
    } else {
        "none"
    }
}
