use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use rtvoice::EngineConfig;
use rtvoice::core::audio::pcm16_le_bytes;
use rtvoice::core::realtime::openai::{self, OPENAI_REALTIME_SAMPLE_RATE};
use rtvoice::core::realtime::{
    Modality, SessionEvent, SessionSettings, ToolError, ToolRegistry, TranscriptRole,
    VoiceSession, VoiceSessionBuilder,
};

/// How long to wait for the remote side to create the session.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on leftover blocking work (stdin reads, device closes) at exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// rtvoice - Real-time voice sessions with a streaming speech model
#[derive(Parser, Debug)]
#[command(name = "rtvoice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Live conversation through the default microphone and speaker
    #[cfg(feature = "device-audio")]
    Voice,

    /// Send one text message and print the reply
    Text {
        /// Message to send
        prompt: String,
    },

    /// Send a 24kHz mono 16-bit WAV file as a spoken message
    File {
        /// WAV file to send
        path: PathBuf,
    },

    /// List audio devices
    #[cfg(feature = "device-audio")]
    Devices,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Must happen before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli));

    // Dropping the runtime would wait on blocking tasks indefinitely.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        #[cfg(feature = "device-audio")]
        Commands::Devices => {
            let devices = rtvoice::core::audio::cpal_device::list_devices()?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        #[cfg(feature = "device-audio")]
        Commands::Voice => run_voice(&load_config(cli.config.as_deref())?).await,
        Commands::Text { prompt } => {
            run_text(&load_config(cli.config.as_deref())?, &prompt).await
        }
        Commands::File { path } => run_file(&load_config(cli.config.as_deref())?, &path).await,
    }
}

/// Load configuration from file or environment.
fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from {}", config_path.display());
            EngineConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))
        }
        None => EngineConfig::from_env().map_err(|e| anyhow!(e.to_string())),
    }
}

// =============================================================================
// Tools
// =============================================================================

fn default_tools() -> anyhow::Result<ToolRegistry> {
    let mut tools = ToolRegistry::new();
    tools.register_fn(
        "get_current_time",
        "Get the current time as seconds since the Unix epoch (UTC).",
        serde_json::json!({"type": "object", "properties": {}}),
        |_| async {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| ToolError::failed("get_current_time", e))?;
            Ok(serde_json::json!({ "unix_seconds": now.as_secs() }).to_string())
        },
    )?;
    Ok(tools)
}

fn session_builder(
    config: &EngineConfig,
    settings: SessionSettings,
) -> anyhow::Result<VoiceSessionBuilder> {
    Ok(VoiceSession::builder(settings)
        .tools(default_tools()?)
        .playback(config.playback_config())
        .capture(config.capture_config())
        .tool_timeout(config.tool_timeout())
        .retention(config.transcript_retention)
        .shutdown_timeout(config.shutdown_timeout()))
}

/// Session settings for the one-shot commands, which have no speaker.
fn text_reply_settings(config: &EngineConfig) -> SessionSettings {
    let mut settings = config.session_settings();
    settings.modalities = vec![Modality::Text];
    settings
}

// =============================================================================
// Commands
// =============================================================================

async fn run_text(config: &EngineConfig, prompt: &str) -> anyhow::Result<()> {
    let channel = openai::connect(&config.connect_options()?).await?;
    let mut session = session_builder(config, text_reply_settings(config))?
        .start(channel)
        .await?;
    session.wait_ready(READY_TIMEOUT).await?;

    let sender = session.sender();
    sender.send_text_message(prompt).await?;
    sender.create_response().await?;

    let outcome = print_until_reply(&mut session).await;
    session.shutdown().await?;
    outcome
}

async fn run_file(config: &EngineConfig, path: &Path) -> anyhow::Result<()> {
    let samples = read_wav(path)?;
    info!(
        "Sending {} ({} ms of audio)",
        path.display(),
        samples.len() as u64 * 1000 / OPENAI_REALTIME_SAMPLE_RATE as u64
    );

    let channel = openai::connect(&config.connect_options()?).await?;
    let mut session = session_builder(config, text_reply_settings(config))?
        .start(channel)
        .await?;
    session.wait_ready(READY_TIMEOUT).await?;

    let sender = session.sender();
    sender.send_audio_message(&pcm16_le_bytes(&samples)).await?;
    sender.create_response().await?;

    let outcome = print_until_reply(&mut session).await;
    session.shutdown().await?;
    outcome
}

#[cfg(feature = "device-audio")]
async fn run_voice(config: &EngineConfig) -> anyhow::Result<()> {
    use rtvoice::core::audio::OutputDevice;
    use rtvoice::core::audio::cpal_device::{CpalInput, CpalOutput};
    use tokio::io::{AsyncBufReadExt, BufReader};

    let input = CpalInput::open(config.capture_config())?;
    let playback = config.playback_config();

    let channel = openai::connect(&config.connect_options()?).await?;
    let mut session = session_builder(config, config.session_settings())?
        .output(move |source| {
            Ok(Box::new(CpalOutput::open(source, playback)?) as Box<dyn OutputDevice>)
        })
        .input(Box::new(input))
        .start(channel)
        .await?;
    session.wait_ready(READY_TIMEOUT).await?;

    println!(
        "Session ready ({} mode). Type 'k' + Enter to toggle recording, 'q' + Enter to quit.",
        session.turn_mode()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "k" => match session.toggle_recording().await {
                        Ok(true) => println!("Recording..."),
                        Ok(false) => println!("Recording stopped"),
                        Err(e) => break Err(e.into()),
                    },
                    "q" => break Ok(()),
                    "" => {}
                    other => println!("Unknown command '{other}'"),
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(anyhow!("Failed to read stdin: {e}")),
            },

            event = session.next_event() => match event {
                Some(SessionEvent::Closed { reason }) => {
                    break match reason {
                        Some(reason) => Err(anyhow!("Session ended: {reason}")),
                        None => Ok(()),
                    };
                }
                Some(event) => print_event(&event),
                None => break Ok(()),
            },

            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    session.shutdown().await?;
    outcome
}

// =============================================================================
// Output
// =============================================================================

/// Print events until a response completes without requesting tools.
async fn print_until_reply(session: &mut VoiceSession) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(SessionEvent::ResponseDone { tool_calls: 0, .. }) => return Ok(()),
                Some(SessionEvent::Closed { reason }) => {
                    return match reason {
                        Some(reason) => Err(anyhow!("Session ended: {reason}")),
                        None => Ok(()),
                    };
                }
                Some(event) => print_event(&event),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Transcript(t) if t.is_final => match t.role {
            TranscriptRole::User => println!("You: {}", t.text),
            TranscriptRole::Assistant => println!("Assistant: {}", t.text),
        },
        SessionEvent::ToolInvoked { name, is_error, .. } => {
            info!(
                "Tool {} ran{}",
                name,
                if *is_error { " with an error" } else { "" }
            );
        }
        SessionEvent::ProviderError { message, code } => {
            eprintln!(
                "Provider error: {message} ({})",
                code.as_deref().unwrap_or("no code")
            );
        }
        _ => {}
    }
}

fn read_wav(path: &Path) -> anyhow::Result<Vec<i16>> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| anyhow!("Failed to open {}: {e}", path.display()))?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
        || spec.sample_rate != OPENAI_REALTIME_SAMPLE_RATE
    {
        bail!(
            "{} must be mono 16-bit PCM at {} Hz (got {} channels, {} bits, {} Hz)",
            path.display(),
            OPENAI_REALTIME_SAMPLE_RATE,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_rate
        );
    }

    reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Failed to read {}: {e}", path.display()))
}
