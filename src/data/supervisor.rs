use std::sync::Arc;
use std::time::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use log::{debug, error, info, warn};

use crate::data::refresh::RefreshLoop;
use crate::data::{Broadcaster, MarketKey, TickerCache};
use crate::error::PollerError;
use crate::exchange::{ExchangeError, ExchangeRegistry};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum PollState {
    Absent,
    Running,
    Stopped,
}

struct PollTask {
    // Taken by `shutdown` so it can be awaited outside the map.
    handle: Option<JoinHandle<()>>,
    abort: AbortHandle,
    cancel: CancellationToken,
}

impl PollTask {
    fn state(&self) -> PollState {
        if self.abort.is_finished() {
            PollState::Stopped
        } else {
            PollState::Running
        }
    }
}

// One refresh loop per market key.
pub struct PollerSupervisor {
    tasks: DashMap<MarketKey, PollTask>,
    registry: Arc<ExchangeRegistry>,
    cache: Arc<TickerCache>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl PollerSupervisor {
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        cache: Arc<TickerCache>,
        broadcaster: Arc<Broadcaster>,
        interval: Duration,
    ) -> Self {
        Self {
            tasks: DashMap::new(),
            registry,
            cache,
            broadcaster,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    // Starts a loop for `key` unless one is already running. Ok(true) means a
    // loop was started. The registry is fixed at startup, so an unknown exchange
    // is rejected here for good without tracking anything for the key.
    pub fn ensure(&self, key: &MarketKey) -> Result<bool, PollerError> {
        if self.shutdown.is_cancelled() {
            return Err(PollerError::ShuttingDown);
        }
        if !self.registry.supports(&key.exchange) {
            debug!("Rejecting {}: unsupported exchange", key);
            return Err(ExchangeError::Unsupported(key.exchange.clone()).into());
        }

        match self.tasks.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state() == PollState::Running {
                    return Ok(false);
                }
                info!("Restarting stopped refresh loop for {}", key);
                let task = self.start(key)?;
                entry.insert(task);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                let task = self.start(key)?;
                entry.insert(task);
                info!("Started polling for {}", key);
                Ok(true)
            }
        }
    }

    fn start(&self, key: &MarketKey) -> Result<PollTask, PollerError> {
        let client = self.registry.create(&key.exchange)?;

        let cancel = self.shutdown.child_token();
        let refresh = RefreshLoop {
            key: key.clone(),
            client,
            cache: self.cache.clone(),
            broadcaster: self.broadcaster.clone(),
            interval: self.interval,
            close_timeout: self.registry.close_timeout(),
            cancel: cancel.clone(),
        };

        let handle = tokio::spawn(refresh.run());
        Ok(PollTask {
            abort: handle.abort_handle(),
            handle: Some(handle),
            cancel,
        })
    }

    pub fn state(&self, key: &MarketKey) -> PollState {
        self.tasks
            .get(key)
            .map(|task| task.state())
            .unwrap_or(PollState::Absent)
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.state() == PollState::Running)
            .count()
    }

    // The loop reaches `Stopped` once its client is closed.
    pub fn stop(&self, key: &MarketKey) -> bool {
        match self.tasks.get(key) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // Cancels every loop and waits up to `timeout` for them to finish. Loops
    // still running after that are aborted; returns how many were.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.shutdown.cancel();

        let mut handles = Vec::new();
        for mut task in self.tasks.iter_mut() {
            task.cancel.cancel();
            if let Some(handle) = task.handle.take() {
                handles.push((task.key().clone(), handle));
            }
        }

        if handles.is_empty() {
            info!("No refresh loops to stop");
            return 0;
        }

        info!("Waiting for {} refresh loops to stop...", handles.len());
        let waiting = futures::future::join_all(
            handles
                .into_iter()
                .map(|(key, handle)| async move { (key, handle.await) }),
        );

        match tokio::time::timeout(timeout, waiting).await {
            Ok(results) => {
                for (key, result) in results {
                    if let Err(e) = result {
                        error!("Refresh loop for {} ended abnormally: {}", key, e);
                    }
                }
                info!("All refresh loops stopped");
                0
            }
            Err(_) => {
                let mut aborted = 0;
                for task in self.tasks.iter() {
                    if !task.abort.is_finished() {
                        warn!("Refresh loop for {} missed the shutdown deadline, aborting", task.key());
                        task.abort.abort();
                        aborted += 1;
                    }
                }
                warn!("Timed out waiting for refresh loops, aborted {}", aborted);
                aborted
            }
        }
    }
}
