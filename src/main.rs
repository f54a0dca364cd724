use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rtc_voice_client::ClientConfig;
use rtc_voice_client::core::realtime::SessionConfigStore;

/// Realtime WebRTC voice session client
#[derive(Parser, Debug)]
#[command(name = "rtc-voice-client")]
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
    /// Print the handshake descriptor and session.update payload as JSON
    Descriptor,

    /// Open a session with a silent microphone track until Ctrl-C
    #[cfg(feature = "webrtc-backend")]
    Connect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        tracing::info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command {
        Commands::Descriptor => print_descriptor(&config),
        #[cfg(feature = "webrtc-backend")]
        Commands::Connect => connect::run(&config).await,
    }
}

fn print_descriptor(config: &ClientConfig) -> anyhow::Result<()> {
    let store = SessionConfigStore::new(config.model.clone(), config.session.clone());
    let output = serde_json::json!({
        "endpoint": config.endpoint,
        "handshake_mode": config.handshake_mode.as_str(),
        "descriptor": store.build_initial_descriptor(),
        "update": store.build_update_payload(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(feature = "webrtc-backend")]
mod connect {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;

    use rtc_voice_client::ClientConfig;
    use rtc_voice_client::core::realtime::{
        ConfirmedSession, ConnectOptions, ConnectionState, RealtimeClient,
        RealtimeClientCallbacks,
    };
    use rtc_voice_client::core::rtc::webrtc::{LocalAudioTrack, WebRtcPeerConnectionFactory};

    pub async fn run(config: &ClientConfig) -> anyhow::Result<()> {
        if !config.has_api_key() {
            anyhow::bail!("No API key configured (set REALTIME_API_KEY or OPENAI_API_KEY)");
        }

        let callbacks = RealtimeClientCallbacks {
            on_state_change: Some(Arc::new(|state: ConnectionState| {
                tracing::info!(%state, "Connection state");
            })),
            on_first_audio_frame: Some(Arc::new(|| {
                tracing::info!("First remote audio frame");
            })),
            on_session_updated: Some(Arc::new(|session: ConfirmedSession| {
                tracing::info!(voice = ?session.voice, turn_detection = ?session.turn_detection, "Session confirmed");
            })),
            ..Default::default()
        };

        let client = RealtimeClient::new(
            config,
            callbacks,
            Arc::new(WebRtcPeerConnectionFactory::new()),
        )
        .context("Failed to create realtime client")?;

        let microphone = Arc::new(LocalAudioTrack::new("microphone", "local"));
        let feeder_track = microphone.clone();
        let feeder = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            loop {
                ticker.tick().await;
                if let Err(e) = feeder_track.write_silence().await {
                    tracing::debug!(error = %e, "Silence frame dropped");
                }
            }
        });

        let options = ConnectOptions {
            stream: Some(microphone.into_stream()),
            ..Default::default()
        };
        client.connect(options).await.context("Connect failed")?;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Shutting down");

        feeder.abort();
        client.destroy().await;
        Ok(())
    }
}
