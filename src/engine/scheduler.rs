//! Timer loops.
//!
//! Each job runs on its own `tokio::time::interval`. A failing tick is
//! logged and the loop keeps going; all loops stop on shutdown.

use anyhow::Result;
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Run `job` now and then every `period` until shutdown.
    pub fn every<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut stop = self.shutdown.subscribe();
        info!(job = name, interval_secs = period.as_secs(), "Scheduling job");

        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = job().await {
                            error!(job = name, error = %e, "Scheduled job failed, continuing");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            info!(job = name, "Job stopped");
        }));
    }

    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal every loop to stop and wait for in-flight ticks to finish.
    /// Returns how many loops had ended abnormally (panicked or aborted).
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);
        let mut failed = 0;
        for joined in join_all(self.handles).await {
            if let Err(e) = joined {
                error!(error = %e, "Scheduled job task ended abnormally");
                failed += 1;
            }
        }
        failed
    }
}
