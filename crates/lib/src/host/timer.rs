//! Keep-alive timer trigger.

use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Call [`timer_tick`] every `every`, starting immediately.
pub fn spawn_keepalive(session: Arc<SessionManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            timer_tick(&session).await;
        }
    })
}

/// One timer invocation: log the time, ensure the session is started. Failures are logged; the next tick retries.
pub async fn timer_tick(session: &SessionManager) {
    log::info!(
        "timer trigger: executed at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z")
    );
    if let Err(e) = session.ensure_started().await {
        log::error!("timer trigger: gateway session not started: {}", e);
    }
}
