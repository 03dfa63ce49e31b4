//! Background liveness task.
//!
//! Drives [`SelfConnections::tick`] on a fixed cadence so hosts that already
//! run a tokio runtime don't need a tick loop of their own.

use crate::config::LivenessConfig;
use crate::manager::SelfConnections;
use crate::transport::CryptoTransport;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

/// Spawn a background liveness task.
///
/// The task holds only a weak reference and ends by itself once the manager
/// is dropped. Returns a handle that can be used to abort it sooner.
pub fn spawn_liveness_task<T: CryptoTransport + 'static>(
    manager: &Arc<SelfConnections<T>>,
    config: LivenessConfig,
) -> tokio::task::JoinHandle<()> {
    let weak = Arc::downgrade(manager);
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Liveness task disabled");
            return;
        }

        let period = config.tick_interval();
        tracing::info!("Liveness task started (interval: {}ms)", period.as_millis());

        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            let Some(manager) = weak.upgrade() else {
                tracing::info!("Liveness task stopped: manager dropped");
                return;
            };

            let report = manager.tick();
            if !report.expired.is_empty() {
                tracing::info!("Liveness: expired {} connections", report.expired.len());
            } else if !report.is_idle() {
                tracing::debug!(
                    "Liveness: {} keepalives sent, {} failed",
                    report.pinged,
                    report.ping_failures
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SelfSyncConfig;
    use crate::manager::NoopCallbacks;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn test_liveness_config(tick_interval_ms: u64, enabled: bool) -> LivenessConfig {
        LivenessConfig {
            tick_interval_ms,
            enabled,
            ..LivenessConfig::default()
        }
    }

    fn test_manager(
        transport: &MockTransport,
        clock: Arc<ManualClock>,
    ) -> Arc<SelfConnections<MockTransport>> {
        let manager = SelfConnections::with_clock(
            Arc::new(transport.clone()),
            Arc::new(NoopCallbacks),
            &SelfSyncConfig::default(),
            clock,
        )
        .unwrap();
        Arc::new(manager)
    }

    #[tokio::test]
    async fn liveness_task_disabled() {
        let transport = MockTransport::random();
        let manager = test_manager(&transport, Arc::new(ManualClock::new(0)));

        let handle = spawn_liveness_task(&manager, test_liveness_config(10, false));

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn liveness_task_pings_and_expires() {
        let transport = MockTransport::random();
        let clock = Arc::new(ManualClock::new(0));
        let manager = test_manager(&transport, clock.clone());

        transport.request_inbound(manager.local_key()).unwrap();
        let conn = transport.last_accepted().unwrap();

        let handle = spawn_liveness_task(&manager, test_liveness_config(5, true));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.sent_to(conn), vec![vec![32]]);

        clock.set(21);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.active_count(), 0);
        assert_eq!(transport.close_count(conn), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn liveness_task_stops_when_manager_dropped() {
        let transport = MockTransport::random();
        let manager = test_manager(&transport, Arc::new(ManualClock::new(0)));

        let handle = spawn_liveness_task(&manager, test_liveness_config(5, true));
        drop(manager);

        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("Task should end once the manager is gone")
            .expect("Task should not panic");
    }
}
