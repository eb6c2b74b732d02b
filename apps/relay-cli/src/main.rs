//! Operator console: send commands to a device and collect its media streams.

use std::{io::Write as _, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use device_relay_command::{AwaitOutcome, CommandClient, parse_params};
use device_relay_core::{Backend, CorrelationMode, MediatedStore, RelayConfig, WaitMode};
use device_relay_ingest::{IngestConfig, StreamIngestor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type Store = Arc<dyn MediatedStore>;

#[derive(Parser, Debug)]
#[command(
    name = "relay-cli",
    version,
    about = "Send commands to a device agent and save its media streams"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target device id
    #[arg(long = "user", global = true)]
    user: Option<String>,

    /// Store backend
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendArg>,

    /// Realtime Database URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Database secret or ID token
    #[arg(long, global = true)]
    auth_token: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch one command and wait for its response
    Send {
        /// Action name, e.g. GET_LOCATION
        action: String,
        /// Parameters as a JSON object
        params: Option<String>,
        /// Seconds to wait for the response
        #[arg(long)]
        timeout: Option<u64>,
        /// Match the response by action name instead of by key
        #[arg(long)]
        by_action: bool,
        /// Wait on change notifications instead of polling
        #[arg(long)]
        watch: bool,
        /// Print the command key and exit without waiting
        #[arg(long)]
        no_wait: bool,
    },
    /// Save streamed media chunks until Ctrl-C
    Watch {
        /// Directory receiving the files
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Read `ACTION [PARAMS_JSON]` lines from stdin
    Interactive,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Memory,
    Firebase,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => Self::Memory,
            BackendArg::Firebase => Self::Firebase,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    init_tracing(&config.log_level);

    let store = device_relay_store::connect(&config)
        .await
        .context("Failed to connect to the store")?;
    info!(user_id = %config.user_id, backend = ?config.backend, "Connected");

    match cli.command {
        Command::Send {
            action,
            params,
            no_wait,
            ..
        } => {
            let work = send(store, &config, &action, params.as_deref(), no_wait);
            until_interrupted(work, tokio::signal::ctrl_c()).await
        }
        Command::Watch { .. } => watch(store, &config).await,
        Command::Interactive => {
            until_interrupted(interactive(store, &config), tokio::signal::ctrl_c()).await
        }
    }
}

/// Run `work` unless `interrupt` resolves first. An interrupt is a clean exit.
async fn until_interrupted<W, I>(work: W, interrupt: I) -> Result<()>
where
    W: Future<Output = Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        res = work => res,
        res = interrupt => {
            res.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
            Ok(())
        }
    }
}

/// File and environment first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config =
        RelayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(user) = &cli.user {
        config.user_id.clone_from(user);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(token) = &cli.auth_token {
        config.auth_token = Some(token.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level.clone_from(level);
    }

    match &cli.command {
        Command::Send {
            timeout,
            by_action,
            watch,
            ..
        } => {
            if let Some(secs) = timeout {
                config.response_timeout_secs = *secs;
            }
            if *by_action {
                config.correlation = CorrelationMode::Action;
            }
            if *watch {
                config.wait_strategy = WaitMode::Watch;
            }
        }
        Command::Watch {
            output_dir: Some(dir),
        } => config.output_dir.clone_from(dir),
        Command::Watch { output_dir: None } | Command::Interactive => {}
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();
}

async fn send(
    store: Store,
    config: &RelayConfig,
    action: &str,
    params: Option<&str>,
    no_wait: bool,
) -> Result<()> {
    let params = parse_params(params.unwrap_or_default()).context("Invalid parameters")?;
    let client = CommandClient::new(store, config);

    if no_wait {
        let key = client.dispatch(action, Some(params)).await?;
        println!("{key}");
        return Ok(());
    }

    let report = client.send(action, Some(params)).await?;
    print_outcome(report.outcome)
}

fn print_outcome(outcome: AwaitOutcome) -> Result<()> {
    match outcome {
        AwaitOutcome::Matched(response) => {
            println!("{}", serde_json::to_string_pretty(&response.into_value())?);
        }
        AwaitOutcome::TimedOut => println!("No response received"),
    }
    Ok(())
}

async fn watch(store: Store, config: &RelayConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let ingestor = StreamIngestor::new(store, IngestConfig::from(config));
    let handle = ingestor
        .spawn(&config.user_id, CancellationToken::new())
        .await
        .context("Failed to subscribe to streams")?;
    info!(
        user_id = %config.user_id,
        output_dir = %config.output_dir.display(),
        "Watching streams, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let counts = handle.shutdown().await;
    info!(saved = counts.saved, discarded = counts.discarded, "Stopped");
    Ok(())
}

async fn interactive(store: Store, config: &RelayConfig) -> Result<()> {
    let client = CommandClient::new(store, config);
    println!(
        "Sending to {}. Enter ACTION [PARAMS_JSON], or quit.",
        client.user_id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }

        let (action, raw) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        let params = match parse_params(raw) {
            Ok(params) => params,
            Err(e) => {
                println!("Invalid parameters: {e}");
                continue;
            }
        };

        match client.send(action, Some(params)).await {
            Ok(report) => print_outcome(report.outcome)?,
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("relay-cli").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_send_flags_override_config() {
        let cli = parse(&[
            "send",
            "GET_LOCATION",
            "--user",
            "phone",
            "--timeout",
            "3",
            "--by-action",
            "--watch",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.user_id, "phone");
        assert_eq!(config.response_timeout_secs, 3);
        assert_eq!(config.correlation, CorrelationMode::Action);
        assert_eq!(config.wait_strategy, WaitMode::Watch);
    }

    #[test]
    fn test_watch_output_dir() {
        let cli = parse(&["--user", "phone", "watch", "--output-dir", "/tmp/media"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/media"));
    }

    #[test]
    fn test_firebase_requires_url() {
        let cli = parse(&["--user", "phone", "--backend", "firebase", "interactive"]);
        assert!(load_config(&cli).is_err());
    }

    #[tokio::test]
    async fn test_interrupt_is_a_clean_exit() {
        let res = until_interrupted(std::future::pending::<Result<()>>(), async {
            Ok::<(), std::io::Error>(())
        })
        .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_work_result_wins_without_interrupt() {
        let failed = until_interrupted(
            async { Err::<(), _>(anyhow::anyhow!("store unreachable")) },
            std::future::pending::<std::io::Result<()>>(),
        )
        .await;
        assert!(failed.is_err());

        let done = until_interrupted(
            async { Ok::<(), anyhow::Error>(()) },
            std::future::pending::<std::io::Result<()>>(),
        )
        .await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn test_broken_signal_listener_is_reported() {
        let res = until_interrupted(std::future::pending::<Result<()>>(), async {
            Err::<(), _>(std::io::Error::other("no signal handler"))
        })
        .await;
        assert!(res.is_err());
    }

    #[test]
    fn test_send_params_are_optional() {
        let cli = parse(&["send", "VIBRATE"]);
        assert!(matches!(
            cli.command,
            Command::Send { ref action, params: None, .. } if action == "VIBRATE"
        ));
    }
}
