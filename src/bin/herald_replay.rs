//! Replays newline-delimited JSON notifications through the pipeline.
//!
//! Each stdin line is one `InboundEvent`. For every event a decision line is
//! written to stdout, and every utterance the pipeline would speak is written
//! as a `speak` line. A final `stats` line summarizes the run.
//!
//! Usage: `herald-replay [config.toml] < events.jsonl`
//!
//! All tracing output goes to stderr so that stdout stays machine-readable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald::delivery::SpeechEventSender;
use herald::rules::{StaticProbes, VoiceParams};
use herald::{
    AudioSystem, Collaborators, HeraldConfig, InboundEvent, JsonRuleStore, NotificationPipeline,
    NotificationSource, SpeakMode, SpeechEngine,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prints utterances instead of rendering audio and finishes them at once.
struct StdoutSpeech;

#[async_trait]
impl SpeechEngine for StdoutSpeech {
    async fn speak(
        &self,
        text: &str,
        mode: SpeakMode,
        utterance_id: &str,
        voice: Option<&VoiceParams>,
        events: SpeechEventSender,
    ) -> herald::Result<()> {
        let line = serde_json::json!({
            "type": "speak",
            "id": utterance_id,
            "text": text,
            "flush": mode == SpeakMode::Flush,
            "rate": voice.and_then(|v| v.rate),
        });
        println!("{line}");
        events.started(utterance_id)?;
        events.done(utterance_id)
    }

    async fn stop(&self) -> herald::Result<()> {
        Ok(())
    }
}

/// No other app is ever playing.
struct SilentAudio;

impl AudioSystem for SilentAudio {
    fn is_playback_active(&self) -> bool {
        false
    }

    fn volume(&self) -> herald::Result<u32> {
        Ok(0)
    }

    fn max_volume(&self) -> herald::Result<u32> {
        Ok(0)
    }

    fn set_volume(&self, _volume: u32) -> herald::Result<()> {
        Ok(())
    }

    fn request_focus(&self) -> herald::Result<bool> {
        Ok(true)
    }

    fn abandon_focus(&self) -> herald::Result<()> {
        Ok(())
    }
}

/// stdin is always connected.
struct StdinSource;

impl NotificationSource for StdinSource {
    fn is_authorized(&self) -> bool {
        true
    }

    fn request_resubscribe(&self) -> bool {
        false
    }
}

fn load_config() -> anyhow::Result<HeraldConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => HeraldConfig::from_file(&PathBuf::from(path))?,
        None => {
            let default = HeraldConfig::default_config_path();
            if default.exists() {
                HeraldConfig::from_file(&default)?
            } else {
                HeraldConfig::default()
            }
        }
    };
    if config.health.state_path.is_none() {
        config.health.state_path = Some(std::env::temp_dir().join("herald-replay-health.json"));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let pipeline = NotificationPipeline::start(
        &config,
        Collaborators {
            speech: Arc::new(StdoutSpeech),
            audio: Arc::new(SilentAudio),
            source: Arc::new(StdinSource),
            probes: Arc::new(StaticProbes::now()),
            rules: Arc::new(JsonRuleStore::new(config.rules_path())),
        },
    )?;
    pipeline.on_listener_connected();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: InboundEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "skipping unparseable event");
                continue;
            }
        };
        let source = event.source_id.clone();
        let result = pipeline.handle_event(event).await?;
        let line = serde_json::json!({
            "type": "decision",
            "source": source,
            "spoken": result.should_speak,
            "text": result.processed_text,
            "reason": result.reason,
            "delay": result.conditional_delay_seconds,
        });
        println!("{line}");
    }

    tracing::info!("stdin closed; waiting for pending readouts");
    let mut status = pipeline.delivery().subscribe();
    let drained = tokio::time::timeout(
        Duration::from_secs(600),
        status.wait_for(|s| s.is_idle() && s.queued == 0),
    )
    .await;
    if drained.is_err() {
        tracing::warn!("gave up waiting for pending readouts");
    }

    println!(
        "{}",
        serde_json::json!({ "type": "stats", "stats": pipeline.stats() })
    );
    pipeline.shutdown().await;
    Ok(())
}
