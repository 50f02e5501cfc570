pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod negotiator;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod utils;

pub use commands::Orchestrator;
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use logger::{Emitter, SessionEvent};
pub use negotiator::{Negotiator, SessionHandle, StartRequest};
pub use session::SessionState;

use clap::{Args, Parser, Subcommand};
use log::{info, warn, LevelFilter};
use media::sink::DrainSink;
use media::source::FileMediaSource;
use peer::types::MediaKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "whipctl", version)]
#[command(about = "Publish to a WHIP endpoint or play from a WHEP endpoint")]
struct Cli {
    /// error, warn, info, debug or trace; RUST_LOG overrides it
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send an IVF and/or Ogg/Opus file to a WHIP endpoint
    Publish {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        video: Option<PathBuf>,
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Receive from a WHEP endpoint, counting what arrives
    View {
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// WHIP/WHEP endpoint
    #[arg(long)]
    url: Option<String>,
    /// bearer token
    #[arg(long)]
    token: Option<String>,
    /// JSON session config; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// send a complete offer instead of trickling candidates
    #[arg(long)]
    no_trickle: bool,
    /// e.g. vp9 or video/H264
    #[arg(long)]
    video_codec: Option<String>,
    #[arg(long)]
    audio_codec: Option<String>,
    /// video bitrate cap in bits per second
    #[arg(long)]
    max_bitrate: Option<u32>,
    #[arg(long)]
    max_framerate: Option<f64>,
}

fn mime_type(kind: MediaKind, codec: &str) -> String {
    if codec.contains('/') {
        codec.to_owned()
    } else {
        format!("{kind}/{}", codec.to_ascii_uppercase())
    }
}

impl SessionArgs {
    fn into_config(self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(url) = self.url {
            config.endpoint_url = url;
        }
        if self.token.is_some() {
            config.auth_token = self.token;
        }
        if self.no_trickle {
            config.trickle = false;
        }
        if let Some(codec) = &self.video_codec {
            config.media.video_codec = Some(mime_type(MediaKind::Video, codec));
        }
        if let Some(codec) = &self.audio_codec {
            config.media.audio_codec = Some(mime_type(MediaKind::Audio, codec));
        }
        if self.max_bitrate.is_some() {
            config.media.video.max_bitrate = self.max_bitrate;
        }
        if self.max_framerate.is_some() {
            config.media.video.max_framerate = self.max_framerate;
        }
        Ok(config)
    }
}

enum Target {
    Publish(FileMediaSource),
    View(Arc<DrainSink>),
}

/// CLI entry point.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_level.unwrap_or(config::DEFAULT_LOG_LEVEL));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(cli.command))
}

async fn execute(command: Command) -> anyhow::Result<()> {
    let emitter = Emitter::new();
    let mut events = emitter.subscribe();

    let (config, target) = match command {
        Command::Publish {
            session,
            video,
            audio,
        } => (
            session.into_config()?,
            Target::Publish(FileMediaSource { video, audio }),
        ),
        Command::View { session } => (
            session.into_config()?,
            Target::View(Arc::new(DrainSink::new())),
        ),
    };

    let orchestrator = Orchestrator::with_http(config.request_timeout(), emitter)?;
    let handle = match &target {
        Target::Publish(source) => orchestrator.publish(&config, source).await?,
        Target::View(sink) => orchestrator.view(&config, sink.clone()).await?,
    };
    println!(
        "{} session {} at {}",
        handle.mode().protocol(),
        handle.id(),
        handle
            .resource_url()
            .map(|u| u.to_string())
            .unwrap_or_default()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Stats(snapshot)) => println!("{snapshot}"),
                Ok(SessionEvent::RemoteTrack(track)) => {
                    println!("remote {} track {} ({})", track.kind, track.id, track.mime_type);
                }
                Ok(SessionEvent::StateChanged { state: SessionState::Closed, .. }) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Skipped {n} session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.stop().await;
    if let Target::View(sink) = &target {
        for kind in MediaKind::ALL {
            let (packets, bytes) = sink.received(kind);
            println!("{kind}: {packets} packets, {bytes} bytes");
        }
    }
    if let Some(message) = orchestrator.last_error() {
        anyhow::bail!(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_shorthand_becomes_mime_type() {
        assert_eq!(mime_type(MediaKind::Video, "vp9"), "video/VP9");
        assert_eq!(mime_type(MediaKind::Audio, "opus"), "audio/OPUS");
        assert_eq!(mime_type(MediaKind::Video, "video/H264"), "video/H264");
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "whipctl",
            "publish",
            "--url",
            "https://example.com/whip",
            "--no-trickle",
            "--video-codec",
            "h264",
            "--max-bitrate",
            "2500000",
            "--video",
            "in.ivf",
        ]);
        let Command::Publish { session, video, .. } = cli.command else {
            panic!("expected publish");
        };
        let config = session.into_config().unwrap();
        assert_eq!(config.endpoint_url, "https://example.com/whip");
        assert!(!config.trickle);
        assert_eq!(config.media.video_codec.as_deref(), Some("video/H264"));
        assert_eq!(config.media.video.max_bitrate, Some(2_500_000));
        assert!(config.media.audio.is_auto());
        assert_eq!(video, Some(PathBuf::from("in.ivf")));
    }
}
