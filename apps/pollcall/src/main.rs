use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pollcall::config::{CallConfig, DEFAULT_RELAY_URL, RelayClientConfig};
use pollcall::media::SyntheticDevices;
use pollcall::peer::rtc::RtcConnector;
use pollcall::signaling::HttpSignalingChannel;
use pollcall::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use pollcall::{CallController, CallDeps, CallRole, CallStatus, CallType, PartyId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "pollcall", about = "Audio/video calls negotiated over a polled relay")]
struct Cli {
    #[arg(long, env = "POLLCALL_PARTY", help = "Party id this client speaks for")]
    party: PartyId,

    #[arg(
        long,
        global = true,
        env = "POLLCALL_RELAY_URL",
        default_value = DEFAULT_RELAY_URL,
        help = "Base URL of the pollcall relay"
    )]
    relay_url: String,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "POLLCALL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "POLLCALL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a peer and send them an offer
    Call(CallArgs),
    /// Wait for a peer's offer and answer it
    Answer(AnswerArgs),
}

#[derive(Args, Debug)]
struct CallArgs {
    peer: PartyId,

    #[arg(long, help = "Include a camera track")]
    video: bool,

    #[arg(long, env = "POLLCALL_POLL_INTERVAL_MS", help = "Relay poll interval in milliseconds")]
    poll_interval_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct AnswerArgs {
    #[command(flatten)]
    call: CallArgs,

    #[arg(long, value_name = "JSON", help = "Offer blob already received out of band")]
    offer: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).context("logging initialization failed")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let (role, args, offer) = match cli.command {
        Command::Call(args) => (CallRole::Initiator, args, None),
        Command::Answer(answer) => (CallRole::Receiver, answer.call, answer.offer),
    };

    let mut config = CallConfig::from_env();
    if let Some(ms) = args.poll_interval_ms.filter(|ms| *ms > 0) {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    let relay_config = RelayClientConfig {
        request_timeout: RelayClientConfig::from_env().request_timeout,
        ..RelayClientConfig::new(cli.relay_url)
    };
    let signaling = HttpSignalingChannel::new(cli.party.clone(), &relay_config)
        .context("relay client could not be created")?;

    let controller = CallController::new(CallDeps {
        config,
        devices: Arc::new(SyntheticDevices::default()),
        connector: Arc::new(RtcConnector::default()),
        signaling: Arc::new(signaling),
    });
    let printer = tokio::spawn(print_status(controller.clone()));

    let call_type = if args.video {
        CallType::Video
    } else {
        CallType::Audio
    };
    eprintln!(
        "{} {} as {} ({call_type}); Enter refreshes, m toggles mute, c toggles camera, q hangs up",
        match role {
            CallRole::Initiator => "calling",
            CallRole::Receiver => "answering",
        },
        args.peer.short(),
        cli.party.short(),
    );

    if let Err(err) = controller.open(role, call_type, args.peer, offer).await {
        eprintln!("⚠️  {}", err.user_message());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "q" => break,
                    "m" => match controller.toggle_mute() {
                        Some(true) => eprintln!("🔇 muted"),
                        Some(false) => eprintln!("🔊 unmuted"),
                        None => eprintln!("no microphone to mute"),
                    },
                    "c" => match controller.toggle_camera() {
                        Some(true) => eprintln!("📷 camera off"),
                        Some(false) => eprintln!("📷 camera on"),
                        None => eprintln!("no camera in this call"),
                    },
                    _ => {
                        if let Err(err) = controller.manual_refresh().await {
                            warn!(error = %err, "manual refresh skipped");
                        }
                    }
                },
                Ok(None) => {
                    // stdin closed; keep the call up until Ctrl-C
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                    break;
                }
                Err(err) => return Err(err).context("reading stdin"),
            },
        }
    }

    if let Some(clearing) = controller.close().await {
        if tokio::time::timeout(relay_config.request_timeout, clearing)
            .await
            .is_err()
        {
            warn!("relay cleanup did not finish before exit");
        }
    }
    printer.abort();
    Ok(())
}

async fn print_status(controller: CallController) {
    let mut updates = controller.subscribe();
    let mut last = "";
    loop {
        let (text, status, error) = {
            let snapshot = updates.borrow_and_update();
            (
                snapshot.status_text(),
                snapshot.status,
                snapshot.error.clone(),
            )
        };
        if text != last && status != CallStatus::Idle {
            match error {
                Some(error) => eprintln!("• {text}: {error}"),
                None => eprintln!("• {text}"),
            }
            last = text;
        }
        if updates.changed().await.is_err() {
            return;
        }
    }
}
