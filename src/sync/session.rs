//! Background tasks tied to a signed-in session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SyncError, SyncManager};
use crate::connectivity::HealthProbe;
use crate::models::User;

/// Owns the connectivity listener (and optional health probe) for one session.
///
/// Dropping the session without calling [`SyncSession::shutdown`] leaves the
/// tasks running until the runtime stops.
pub struct SyncSession {
    manager: Arc<SyncManager>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    /// Start reacting to connectivity transitions. With `probe_interval`, the
    /// remote's health endpoint drives connectivity.
    pub fn start(manager: Arc<SyncManager>, probe_interval: Option<Duration>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connectivity = manager.connectivity().subscribe();
        let mut tasks = vec![tokio::spawn(listen(
            manager.clone(),
            connectivity,
            shutdown_rx.clone(),
        ))];

        if let Some(interval) = probe_interval {
            let probe = HealthProbe::new(manager.remote(), manager.connectivity().clone(), interval);
            tasks.push(tokio::spawn(probe.run(shutdown_rx)));
        }

        Self {
            manager,
            shutdown_tx,
            tasks,
        }
    }

    /// Remember `user`, start the session tasks and load the first dataset.
    pub async fn login(
        manager: Arc<SyncManager>,
        user: &User,
        probe_interval: Option<Duration>,
    ) -> Result<Self, SyncError> {
        manager
            .cache()
            .set_session_user(user)
            .await
            .map_err(SyncError::Storage)?;
        info!("Session started for {}", user.email);

        let session = Self::start(manager, probe_interval);
        session.manager.fetch_all().await;
        Ok(session)
    }

    pub fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    /// Stop the session tasks and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Sync task ended abnormally: {}", e);
            }
        }
        debug!("Sync session stopped");
    }

    /// Stop the session and forget the signed-in user. Queued writes stay on disk.
    pub async fn logout(self) -> Result<(), SyncError> {
        let manager = self.manager.clone();
        self.shutdown().await;
        manager
            .cache()
            .clear_session_user()
            .await
            .map_err(SyncError::Storage)?;
        info!("Session ended");
        Ok(())
    }
}

impl SyncManager {
    /// Shorthand for [`SyncSession::start`].
    pub fn spawn_session(self: Arc<Self>, probe_interval: Option<Duration>) -> SyncSession {
        SyncSession::start(self, probe_interval)
    }
}

async fn listen(
    manager: Arc<SyncManager>,
    mut connectivity: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *connectivity.borrow_and_update();
                if online {
                    let report = manager.on_online().await;
                    debug!("Reconnect sync finished: {}", report.summary());
                } else {
                    manager.on_offline();
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
