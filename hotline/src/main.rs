use std::path::PathBuf;

use anyhow::Context;
use hotline_lib::HotkeyService;
use hotline_lib::events::BusEvent;
use hotline_lib::state::ConfigManager;
use hotline_lib::utils::error::HotkeyError;
use hotline_lib::utils::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(ConfigManager::default_path);
    let config = ConfigManager::load_or_default(&path);
    tracing::info!(path = %path.display(), backend = %config.supervisor.backend, "Configuration loaded");

    let service = HotkeyService::with_default_backend(config);
    let mut events = service.listen();

    match service.start().await {
        Ok(()) => {}
        Err(e @ HotkeyError::Config(_)) => {
            return Err(e).context("invalid hotkey bindings");
        }
        Err(e) => {
            // 监控会继续重试，直到达到失败上限
            tracing::warn!(error = %e, hint = ?e.recovery_hint(), "Hotkeys not active yet");
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BusEvent::Triggered(action)) => {
                    tracing::info!(action = %action, "Hotkey triggered");
                }
                Some(BusEvent::Failed(reason)) => {
                    tracing::error!(reason = %reason, "Global hotkeys stopped working");
                }
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    service.stop().await;
    Ok(())
}
