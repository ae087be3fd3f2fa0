//! Connectivity monitor
//!
//! Normalizes platform reachability signals into an edge-triggered
//! Online/Offline stream. Raw signals are deduplicated: subscribers only see
//! genuine state changes, in order. Rapid flaps (online → offline → online)
//! arrive as three discrete events, never collapsed.
//!
//! The state is a hint, not ground truth. Callers corroborate it with actual
//! call outcomes (see the orchestrator's suspect-recheck event).

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Reachability as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

/// Source of raw platform reachability signals.
///
/// `initial_state` is the synchronous query used at startup; `next_signal`
/// yields push events until the source is exhausted. Sources may repeat the
/// current state freely; the monitor deduplicates.
#[async_trait]
pub trait ReachabilitySource: Send + 'static {
    fn initial_state(&self) -> ConnectivityState;

    async fn next_signal(&mut self) -> Option<ConnectivityState>;
}

/// Edge-triggered connectivity monitor.
pub struct ConnectivityMonitor {
    /// Last known state (low contention, frequent reads)
    current: RwLock<ConnectivityState>,

    /// Edge events, in order
    edges: broadcast::Sender<ConnectivityState>,

    /// Guards against a second `start`
    started: AtomicBool,

    /// Shutdown signal for the source task
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with a known initial state.
    pub fn new(initial: ConnectivityState) -> Self {
        let (edges, _) = broadcast::channel(64);
        Self {
            current: RwLock::new(initial),
            edges,
            started: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Create a monitor initialized from the source's synchronous query.
    pub fn from_source<S: ReachabilitySource>(source: &S) -> Self {
        Self::new(source.initial_state())
    }

    /// Subscribe to the source's push signals. Idempotent: a second call is a
    /// no-op and the extra source is dropped.
    pub fn start<S: ReachabilitySource>(self: Arc<Self>, mut source: S) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Connectivity monitor already started");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let monitor = self;
        tokio::spawn(async move {
            info!(state = ?monitor.current_state(), "Connectivity monitor started");
            loop {
                tokio::select! {
                    signal = source.next_signal() => {
                        match signal {
                            Some(state) => monitor.report(state),
                            None => {
                                info!("Reachability source exhausted");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Connectivity monitor shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Feed a raw signal. Only a genuine change updates the state and fans
    /// out to subscribers; repeats of the current state are dropped.
    pub fn report(&self, state: ConnectivityState) {
        let mut current = self.current.write();
        if *current == state {
            return;
        }
        *current = state;
        debug!(?state, "Connectivity edge");
        // Lock held across send: edges stay ordered even under racing reports
        let _ = self.edges.send(state);
    }

    /// Last known state.
    pub fn current_state(&self) -> ConnectivityState {
        *self.current.read()
    }

    /// Receive every future edge, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityState> {
        self.edges.subscribe()
    }

    /// Stop the source task, if one was started.
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }
}
