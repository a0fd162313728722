//! In-process multi-tab simulation: N providers share one store and one
//! realtime channel, the visible tab produces synthetic activity, then
//! everyone goes idle and the protocol runs to forced logout.

use std::sync::Arc;
use std::time::Duration;

use sessmux_bus::channel::TabChannel;
use sessmux_bus::store::{MemoryStore, SessionStore};
use sessmux_core::activity::SignalKind;
use sessmux_core::types::{KEY_TOKEN, SessionPhase};
use sessmux_runtime::config::SessionConfig;
use sessmux_runtime::navigator::LogNavigator;
use sessmux_runtime::provider::{SessionHandle, SessionProvider};

use crate::cli::SimulateOpts;

pub async fn run(opts: SimulateOpts) -> anyhow::Result<()> {
    let config = SessionConfig {
        timeout_ms: Some(opts.timeout_ms),
        // Keep the demo readable for short timeouts: warn over the last
        // third, modal over the last tenth.
        warning_window_ms: (opts.timeout_ms / 3).max(1),
        modal_threshold_ms: (opts.timeout_ms / 10).max(1),
        ..Default::default()
    };

    let store = Arc::new(MemoryStore::new());
    store.set(KEY_TOKEN, "demo-token");
    let channel = TabChannel::new();

    let mut tabs: Vec<SessionHandle> = Vec::with_capacity(opts.tabs);
    for i in 0..opts.tabs {
        let visible = i == 0;
        let handle = SessionProvider::spawn(
            config.clone(),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Some(channel.clone()),
            Arc::new(LogNavigator::new(&format!("/admin/page-{i}"))),
            visible,
        );
        tracing::info!(tab = handle.tab_id(), visible, "tab started");
        spawn_phase_logger(&handle);
        tabs.push(handle);
    }

    // Synthetic activity in the visible tab, then idle.
    let visible_tab = tabs[0].clone();
    let active_secs = opts.active_secs;
    tokio::spawn(async move {
        for _ in 0..active_secs {
            visible_tab.signal(SignalKind::PointerMove);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tracing::info!("user went idle");
    });

    // The run ends when the enforcer clears the credential.
    let deadline = Duration::from_millis(opts.timeout_ms + active_secs * 1_000 + 10_000);
    let logged_out = tokio::time::timeout(deadline, async {
        loop {
            if store.get(KEY_TOKEN).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await
    .is_ok();

    // Give followers a moment to react to the logout broadcast.
    tokio::time::sleep(Duration::from_millis(500)).await;
    for tab in &tabs {
        tab.shutdown();
    }

    if logged_out {
        tracing::info!("credential cleared, all tabs redirected");
        Ok(())
    } else {
        anyhow::bail!("simulation deadline passed without a forced logout")
    }
}

fn spawn_phase_logger(handle: &SessionHandle) {
    let tab_id = handle.tab_id().to_owned();
    let mut watch = handle.watch();
    tokio::spawn(async move {
        let mut last_phase: Option<SessionPhase> = None;
        loop {
            let snap = watch.borrow_and_update().clone();
            if last_phase != Some(snap.phase) {
                tracing::info!(
                    tab = %tab_id,
                    phase = %snap.phase,
                    remaining_s = ?snap.display_seconds(),
                    prompt = ?snap.prompt,
                    "phase change"
                );
                last_phase = Some(snap.phase);
            }
            if watch.changed().await.is_err() {
                break;
            }
        }
    });
}
