//! Stream discovery.
//!
//! Every directory under the input root is a stream key. The manager polls
//! the root, starts a [`StreamSession`] for each new directory and shuts
//! down sessions whose directory disappeared.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::processor::PipelineServices;
use crate::retry::FailureTracker;
use crate::session::StreamSession;

/// Changes applied by one discovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

/// Owns one [`StreamSession`] per live stream key.
pub struct SessionManager {
    config: WorkerConfig,
    services: PipelineServices,
    sessions: Mutex<HashMap<String, Arc<StreamSession>>>,
    shutdown: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(config: WorkerConfig, services: PipelineServices) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            services,
            sessions: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Poll for streams until [`SessionManager::shutdown`] is called, then
    /// shut every session down.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            input_root = %self.config.input_root.display(),
            output_root = %self.config.output_root.display(),
            "Starting session manager"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        while !*shutdown_rx.borrow() {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.discover().await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                warn!(
                                    input_root = %self.config.input_root.display(),
                                    error = %e,
                                    "Stream discovery failed"
                                );
                            }
                        }
                    }
                }
            }
        }

        info!("Shutdown signal received, stopping session manager");
        self.shutdown_all().await;
        Ok(())
    }

    /// Signal [`SessionManager::run`] to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Reconcile running sessions with the directories under the input root.
    pub async fn discover(&self) -> std::io::Result<DiscoveryReport> {
        let mut present = HashSet::new();
        let mut entries = fs::read_dir(&self.config.input_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(key) = entry.file_name().to_str() {
                present.insert(key.to_string());
            }
        }

        let mut report = DiscoveryReport::default();

        // Sessions start and stop outside the lock
        let (gone, mut new_keys) = {
            let mut sessions = self.sessions.lock().await;
            let gone_keys: Vec<String> = sessions
                .keys()
                .filter(|key| !present.contains(*key))
                .cloned()
                .collect();
            let gone: Vec<(String, Arc<StreamSession>)> = gone_keys
                .into_iter()
                .filter_map(|key| sessions.remove(&key).map(|session| (key, session)))
                .collect();
            let new_keys: Vec<String> = present
                .into_iter()
                .filter(|key| !sessions.contains_key(key))
                .collect();
            (gone, new_keys)
        };

        for (key, session) in gone {
            info!(stream_key = %key, "Stream directory removed, stopping session");
            session.shutdown().await;
            report.stopped.push(key);
        }

        new_keys.sort();
        for key in new_keys {
            match StreamSession::start(&self.config, &key, &self.services).await {
                Ok(session) => {
                    let duplicate = match self.sessions.lock().await.entry(key.clone()) {
                        Entry::Occupied(_) => Some(session),
                        Entry::Vacant(slot) => {
                            slot.insert(Arc::new(session));
                            None
                        }
                    };
                    match duplicate {
                        Some(session) => {
                            warn!(stream_key = %key, "Stream already started elsewhere, stopping duplicate");
                            session.shutdown().await;
                        }
                        None => report.started.push(key),
                    }
                }
                Err(e) => {
                    // Retried on the next discovery pass
                    error!(stream_key = %key, error = %e, "Failed to start stream session");
                }
            }
        }

        metrics::set_active_streams(self.sessions.lock().await.len());
        Ok(report)
    }

    /// Shut down every running session.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<StreamSession>> =
            self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        let count = drained.len();

        let handles: Vec<_> = drained
            .into_iter()
            .map(|session| tokio::spawn(async move { session.shutdown().await }))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Session shutdown task failed");
            }
        }

        metrics::set_active_streams(0);
        if count > 0 {
            info!(sessions = count, "All stream sessions stopped");
        }
    }

    /// Keys of the running sessions, sorted.
    pub async fn active_streams(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The running session for `stream_key`.
    pub async fn session(&self, stream_key: &str) -> Option<Arc<StreamSession>> {
        self.sessions.lock().await.get(stream_key).cloned()
    }
}
