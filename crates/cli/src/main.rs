mod config_commands;
mod push_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Push subscription client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./courier.toml and ~/.config/courier/).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the channel store (overrides config value).
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe a channel and print its subscription info.
    Subscribe {
        /// Channel id; a random UUID when omitted.
        channel_id: Option<String>,
        /// Restrict the channel to this application server (VAPID) key.
        #[arg(long)]
        key: Option<String>,
    },
    /// Unsubscribe one channel, or all of them.
    Unsubscribe {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        channel_id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Push a new native registration token for every channel.
    Update { token: String },
    /// Check the server still knows our channels, re-registering if not.
    Verify,
    /// List subscribed channel ids.
    List,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    let config = config_commands::load(cli.config.as_deref(), cli.data_dir.clone())?;

    match cli.command {
        Commands::Subscribe { channel_id, key } => {
            let channel_id = channel_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            push_commands::subscribe(config, &channel_id, key.as_deref()).await
        },
        Commands::Unsubscribe { channel_id, all } => match channel_id {
            Some(channel_id) if !all => push_commands::unsubscribe(config, &channel_id).await,
            _ => push_commands::unsubscribe_all(config).await,
        },
        Commands::Update { token } => push_commands::update(config, &token).await,
        Commands::Verify => push_commands::verify(config).await,
        Commands::List => push_commands::list(config).await,
        Commands::Config { action } => config_commands::handle_config(&config, action),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unsubscribe_needs_id_or_all() {
        assert!(Cli::try_parse_from(["courier", "unsubscribe"]).is_err());
        assert!(Cli::try_parse_from(["courier", "unsubscribe", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["courier", "unsubscribe", "chan-A", "--all"]).is_err());

        let cli = Cli::try_parse_from(["courier", "unsubscribe", "chan-A"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Unsubscribe { channel_id: Some(ref id), all: false } if id == "chan-A"
        ));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["courier", "list", "--log-level", "debug", "--json-logs"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(cli.json_logs);
    }
}
