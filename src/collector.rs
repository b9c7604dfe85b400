//! Background garbage collection for one bucket
//!
//! The collector runs [`Bucket::collect_garbage`] on a blocking thread every
//! `interval`. A failed or panicking cycle is logged, published to
//! subscribers, and followed by the next tick; only [`Collector::stop`]
//! ends the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::bucket::Bucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Time between the start of two cycles
    pub interval: Duration,
    /// Minimum age of an unlinked file before it is collected
    pub grace: Duration,
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorEvent {
    /// Hashes removed from the catalog and every node
    Swept { bucket: String, removed: Vec<String> },
    /// The cycle failed; records whose files were not removed are kept
    Failed { bucket: String, error: String },
    /// The cycle panicked
    Panicked { bucket: String, message: String },
}

pub struct Collector {
    bucket: String,
    events: broadcast::Sender<CollectorEvent>,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Collector {
    /// Spawn the collection loop on the current tokio runtime. The first
    /// cycle runs immediately.
    pub fn start(bucket: Arc<Bucket>, config: CollectorConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let name = bucket.name().to_string();

        let task_events = events.clone();
        let handle = tokio::spawn(async move {
            info!(
                bucket = %bucket.name(),
                interval_secs = config.interval.as_secs(),
                grace_secs = config.grace.as_secs(),
                "Garbage collector started"
            );

            let mut tick = interval(config.interval.max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let event = run_cycle(bucket.clone(), config.grace).await;
                        // no subscribers is fine
                        let _ = task_events.send(event);
                    }
                    _ = shutdown_rx.recv() => {
                        info!(bucket = %bucket.name(), "Garbage collector shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            bucket: name,
            events,
            shutdown_tx,
            handle,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Receive the outcome of every cycle from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CollectorEvent> {
        self.events.subscribe()
    }

    /// Stop the loop and wait for it to exit. A cycle already running is
    /// finished first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            error!(bucket = %self.bucket, error = %e, "Garbage collector task failed");
        }
    }
}

async fn run_cycle(bucket: Arc<Bucket>, grace: Duration) -> CollectorEvent {
    let name = bucket.name().to_string();
    let result = tokio::task::spawn_blocking(move || bucket.collect_garbage(grace)).await;

    match result {
        Ok(Ok(removed)) => {
            debug!(bucket = %name, removed = removed.len(), "Collection cycle done");
            CollectorEvent::Swept {
                bucket: name,
                removed,
            }
        }
        Ok(Err(e)) => {
            error!(bucket = %name, error = %e, "Collection cycle failed");
            CollectorEvent::Failed {
                bucket: name,
                error: e.to_string(),
            }
        }
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                e.to_string()
            };
            error!(bucket = %name, message = %message, "Collection cycle panicked");
            CollectorEvent::Panicked {
                bucket: name,
                message,
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => s.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
