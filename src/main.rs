use clap::{Args, Parser, Subcommand};
use pulsehub::config::{HostOptions, DEFAULT_UPDATE_RATE_MS};
use pulsehub::host::PluginHost;
use pulsehub::logger::init_tracing;
use std::{env, fs, path::PathBuf, process};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pulsehub", about = "Process-local plugin host", version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the plugin host
    Run(RunArgs),

    /// Initialize a fresh layout
    Init,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Host root directory (defaults to $PULSEHUB_ROOT, then ./pulsehub)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Load only this producer package (non-producer packages still load)
    #[arg(long)]
    producer: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_UPDATE_RATE_MS.to_string())]
    update_rate: String,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write daily-rolling log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Resolve the host root directory from the environment or use default.
fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("PULSEHUB_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./pulsehub")
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs {
        root: None,
        producer: None,
        update_rate: DEFAULT_UPDATE_RATE_MS.to_string(),
        log_level: "info".to_string(),
        log_dir: None,
    })) {
        Commands::Run(args) => {
            let _guard = init_tracing(&args.log_level, args.log_dir.as_deref())?;
            let root = args.root.unwrap_or_else(resolve_root_dir);

            let mut pairs = vec![("UpdateRate", args.update_rate.as_str())];
            if let Some(producer) = args.producer.as_deref() {
                pairs.push(("Producer", producer));
            }
            let options = HostOptions::from_pairs(pairs);

            let host = PluginHost::new(root, options);
            let scheduler = host.bootstrap().await?;

            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            host.shutdown().await;
            scheduler.await?;
            Ok(())
        }
        Commands::Init => {
            let root = resolve_root_dir();
            fs::create_dir_all(root.join("plugins"))?;
            fs::create_dir_all(root.join("logs"))?;
            println!("Initialized pulsehub layout at {}", root.display());
            process::exit(0);
        }
    }
}
