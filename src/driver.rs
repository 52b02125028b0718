//! Periodic cycle scheduling for hosts that do not bring their own timer.

use crate::manager::MetadataManager;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

/// Runs [MetadataManager::cycle] on a tokio interval until stopped or dropped.
///
/// The period is the manager's clamped `sync_interval_ms`. Must be spawned from within a
/// tokio runtime.
#[derive(Debug)]
pub struct CycleDriver {
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl CycleDriver {
    pub fn spawn(manager: MetadataManager) -> CycleDriver {
        let period = manager.config().effective_sync_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // A slow flush pushes the schedule back instead of bursting to catch up.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = manager.cycle().await;
                if report.failed > 0 {
                    tracing::warn!("[CycleDriver] {} flush(es) failed", report.failed);
                } else {
                    tracing::trace!("[CycleDriver] {report:?}");
                }
            }
        });
        tracing::debug!("[CycleDriver] Started with period {period:?}");
        CycleDriver {
            period,
            handle: Some(handle),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("[CycleDriver] Stopped");
        }
    }
}

impl Drop for CycleDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
