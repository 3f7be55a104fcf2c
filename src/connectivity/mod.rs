//! Connectivity observer.
//!
//! Publishes binary online/offline state over a `watch` channel. The current
//! value is always readable synchronously; subscribers are woken on change only.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::remote::RemoteDataClient;

#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish a new state. Returns `true` when it differed from the previous one.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Derives connectivity from the remote's health endpoint.
pub struct HealthProbe {
    remote: Arc<dyn RemoteDataClient>,
    connectivity: Connectivity,
    interval: Duration,
}

impl HealthProbe {
    pub fn new(
        remote: Arc<dyn RemoteDataClient>,
        connectivity: Connectivity,
        interval: Duration,
    ) -> Self {
        Self {
            remote,
            connectivity,
            interval,
        }
    }

    /// Ping once and publish the result.
    pub async fn check(&self) -> bool {
        let online = match self.remote.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        };
        if self.connectivity.set_online(online) {
            info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        online
    }

    /// Probe on every interval tick until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Health probe stopped");
                        break;
                    }
                }
            }
        }
    }
}
