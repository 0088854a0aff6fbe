use clap::{Parser, Subcommand};
use parley::llm::{AzureOpenAiClient, Completion, CompletionBackend};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley — Discord to chat-completion relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay host: HTTP trigger, keep-alive timer, and the Discord session they start.
    Serve {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 7071)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send one message to the completion service and print the reply (checks endpoint and key).
    Ask {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Message text
        message: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, message }) => {
            if let Err(e) = run_ask(config, message).await {
                log::error!("ask failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(parley::config::default_config_path);
    let dir = parley::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = parley::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!(
        "starting host on {}:{} (config {})",
        config.server.bind,
        config.server.port,
        path.display()
    );
    parley::host::run_host(config).await
}

async fn run_ask(config_path: Option<std::path::PathBuf>, message: String) -> anyhow::Result<()> {
    let (config, _) = parley::config::load_config(config_path)?;
    let client = AzureOpenAiClient::from_config(&config);
    match client.complete(message.trim()).await {
        Completion::Reply(text) => {
            println!("{}", text.trim());
            Ok(())
        }
        Completion::Empty => {
            println!("(empty response)");
            Ok(())
        }
        Completion::Failed(e) => Err(e.into()),
    }
}
