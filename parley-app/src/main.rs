//! Parley headless host.
//!
//! Loads settings, opens the default (or preferred) audio devices and keeps
//! one duplex session alive until Ctrl-C. `NoAudio` signals restart the
//! session, switching voice after repeated failures.

mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local};
use parley_core::audio::device::{list_input_devices, list_output_devices};
use parley_core::voices::random_voice;
use parley_core::{
    CpalHost, EchoService, NoAudioRecovery, RecoveryAction, SessionHandle, SessionSignal,
    StartRequest,
};
use settings::{default_settings_path, load_settings, AppSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const RESTART_DELAY: Duration = Duration::from_secs(1);

const GREETING_RULES: &[&str] = &[
    "Stay in character for the whole conversation.",
    "Keep every answer short and conversational.",
    "Never describe your own actions or stage directions.",
];

/// Compose the opening turn for a character.
fn build_greeting(persona: &str, now: DateTime<Local>) -> String {
    let mut greeting = format!("You are {persona}.\n");
    for rule in GREETING_RULES {
        greeting.push_str("- ");
        greeting.push_str(rule);
        greeting.push('\n');
    }
    greeting.push_str(&format!(
        "The current time is {}. Give only a very short introduction as your character. \
         JUST TALK! No more than one sentence.",
        now.format("%H:%M:%S")
    ));
    greeting
}

fn start_request(settings: &AppSettings) -> StartRequest {
    StartRequest::new(
        build_greeting(&settings.persona, Local::now()),
        settings.connect_config(),
    )
}

async fn restart(handle: &SessionHandle, settings: &AppSettings) -> anyhow::Result<()> {
    handle.stop()?;
    tokio::time::sleep(RESTART_DELAY).await;
    handle
        .start(start_request(settings))
        .await
        .context("session restart failed")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=info,parley_core=info")),
        )
        .init();

    info!("Parley starting");

    let settings_path = default_settings_path();
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_env_overrides();
    info!(
        settings_path = ?settings_path,
        model = %app_settings.model,
        voice = %app_settings.voice,
        start_sensitivity = %app_settings.start_sensitivity,
        "runtime settings loaded"
    );

    for device in list_input_devices() {
        info!(
            name = %device.name,
            default = device.is_default,
            recommended = device.is_recommended,
            loopback_like = device.is_loopback_like,
            "input device"
        );
    }
    for device in list_output_devices() {
        info!(name = %device.name, default = device.is_default, "output device");
    }

    // ── Session setup ─────────────────────────────────────────────────────
    let config = app_settings.session_config();
    let service = Arc::new(EchoService::new(
        config.capture_sample_rate,
        config.render_sample_rate,
    ));
    let (handle, join) = parley_core::spawn(config, service, Box::new(CpalHost::new()));
    let mut signals = handle.subscribe();

    handle
        .start(start_request(&app_settings))
        .await
        .context("session start failed")?;

    let mut recovery = NoAudioRecovery::new(app_settings.no_audio_retry_limit);

    // ── Signal loop ───────────────────────────────────────────────────────
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Ok(SessionSignal::SpeakingStarted) => {
                    info!(voice = %app_settings.voice, "assistant started speaking");
                }
                Ok(SessionSignal::NoAudio) => {
                    match recovery.on_no_audio() {
                        RecoveryAction::Retry { attempt } => {
                            warn!(attempt, "no audio from the service; restarting");
                        }
                        RecoveryAction::RetryWithRandomVoice => {
                            let previous = app_settings.voice.clone();
                            app_settings.voice =
                                random_voice(&mut rand::thread_rng(), Some(&previous)).to_string();
                            warn!(%previous, voice = %app_settings.voice, "no audio again; switching voice");
                        }
                    }
                    if let Err(e) = restart(&handle, &app_settings).await {
                        tracing::error!("{e:#}");
                    }
                }
                Ok(SessionSignal::ExtendedQuiet) => {
                    info!("conversation went quiet; speak to continue or press Ctrl-C to leave");
                }
                Ok(SessionSignal::QuotaExceeded) => {
                    warn!("dialog service quota exhausted; check the account or try again later");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "signal receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down");
                break;
            }
        }
    }

    handle.shutdown();
    join.await.context("session task panicked")?;
    info!(status = ?handle.status(), "Parley stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn greeting_includes_persona_rules_and_time() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 14, 30, 5).unwrap();
        let greeting = build_greeting("a retired astronaut", now);
        assert!(greeting.starts_with("You are a retired astronaut."));
        assert!(greeting.contains("14:30:05"));
        for rule in GREETING_RULES {
            assert!(greeting.contains(rule));
        }
    }

    #[test]
    fn start_request_uses_settings_voice() {
        let settings = AppSettings {
            voice: "Kore".into(),
            ..AppSettings::default()
        };
        let request = start_request(&settings);
        assert_eq!(request.connect.voice, "Kore");
        assert!(request.greeting.contains(&settings.persona));
    }
}
