//! Connection manager: one feed connection per network, a registry of
//! active subscriptions, and fan-out of inbound transfers to matches.
//!
//! # Concurrency
//!
//! Registry mutations (`activate`, `deactivate`, `shutdown_all`) are
//! serialized by a writer lock that is never held across a connection
//! attempt. Connecting goes through a per-network gate, so callers for
//! the same network share one attempt while other networks carry on.
//! Inbound dispatch works on a snapshot of the registry taken under a
//! short read lock, so it never observes a half-applied mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chainhook_core::{
    FeedConfig, FilterSet, HookError, MatchHandler, Network, Subscription, SubscriptionId,
    TransferEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connector::{ConnectionState, FeedConnector, FeedHandle, InboundBatch};

/// An activated subscription as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub subscription_id: SubscriptionId,
    pub filter: FilterSet,
    pub network: Network,
}

/// Fan-out counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchMetrics {
    pub batches_received: u64,
    pub events_received: u64,
    pub matches_dispatched: u64,
    /// Batches for a network with no registrations.
    pub batches_skipped: u64,
}

type ConnectGate = Arc<tokio::sync::Mutex<()>>;

pub struct ConnectionManager {
    connector: Arc<dyn FeedConnector>,
    handler: Arc<dyn MatchHandler>,
    /// Live handles only; never locked across an await.
    connections: Mutex<HashMap<Network, FeedHandle>>,
    /// One in-flight connection attempt per network.
    gates: Mutex<HashMap<Network, ConnectGate>>,
    registrations: RwLock<HashMap<SubscriptionId, Registration>>,
    writer: tokio::sync::Mutex<()>,
    inbound: Mutex<Option<mpsc::Sender<InboundBatch>>>,
    closed: AtomicBool,
    metrics: Mutex<DispatchMetrics>,
}

impl ConnectionManager {
    /// Create a manager and the receiving end of its inbound batch queue.
    ///
    /// Drive the receiver with [`run_dispatcher`](Self::run_dispatcher).
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        handler: Arc<dyn MatchHandler>,
        config: &FeedConfig,
    ) -> (Self, mpsc::Receiver<InboundBatch>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let manager = Self {
            connector,
            handler,
            connections: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            registrations: RwLock::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(()),
            inbound: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            metrics: Mutex::new(DispatchMetrics::default()),
        };
        (manager, rx)
    }

    /// Return the live connection for `network`, opening one if needed.
    ///
    /// Concurrent callers for the same network share a single attempt. A
    /// cached connection whose task has stopped is dropped and replaced,
    /// and the registrations of that network are subscribed on the new one.
    pub async fn ensure_connection(&self, network: Network) -> Result<FeedHandle, HookError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HookError::Closed);
        }
        if let Some(handle) = self.live_connection(network) {
            return Ok(handle);
        }

        let gate = self.gate(network);
        let _attempt = gate.lock().await;
        if let Some(handle) = self.live_connection(network) {
            return Ok(handle);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(HookError::Closed);
        }

        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(HookError::Closed)?;

        info!(network = %network, "opening feed connection");
        let handle = self.connector.connect(network, inbound).await?;

        let _writer = self.writer.lock().await;
        let mut connections = self.lock_connections();
        if self.closed.load(Ordering::SeqCst) {
            drop(connections);
            handle.close();
            return Err(HookError::Closed);
        }

        let registered: Vec<Registration> = self
            .read_registrations()
            .values()
            .filter(|r| r.network == network)
            .cloned()
            .collect();
        for reg in &registered {
            if let Err(e) = handle.subscribe(&reg.filter) {
                warn!(subscription_id = %reg.subscription_id, error = %e, "re-subscribe failed");
            }
        }
        if !registered.is_empty() {
            info!(
                network = %network,
                count = registered.len(),
                "restored registrations on new connection"
            );
        }

        connections.insert(network, handle.clone());
        Ok(handle)
    }

    /// Start delivering matches for `id`.
    ///
    /// The filter is normalized and validated before any network work.
    /// Activating an id that is already registered replaces the previous
    /// registration and unsubscribes its filter.
    pub async fn activate(
        &self,
        id: SubscriptionId,
        filter: &FilterSet,
        network: Network,
    ) -> Result<(), HookError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HookError::Closed);
        }
        let filter = filter.normalized();
        filter.validate()?;

        let handle = self.ensure_connection(network).await?;
        let _writer = self.writer.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(HookError::Closed);
        }
        handle.subscribe(&filter)?;

        let previous = self.write_registrations().insert(
            id,
            Registration {
                subscription_id: id,
                filter: filter.clone(),
                network,
            },
        );

        if let Some(prev) = previous {
            if let Some(old) = self.live_connection(prev.network) {
                if let Err(e) = old.unsubscribe(&prev.filter) {
                    warn!(
                        subscription_id = %id,
                        error = %e,
                        "failed to unsubscribe replaced filter"
                    );
                }
            }
        }

        info!(subscription_id = %id, network = %network, "subscription activated");
        Ok(())
    }

    /// Stop delivering matches for `id`.
    pub async fn deactivate(&self, id: SubscriptionId) -> Result<(), HookError> {
        let _writer = self.writer.lock().await;

        let registered = self.read_registrations().get(&id).cloned();
        let Some(reg) = registered else {
            warn!(subscription_id = %id, "deactivate: subscription not registered");
            return Err(HookError::NotFound(id));
        };

        if let Some(handle) = self.live_connection(reg.network) {
            if let Err(e) = handle.unsubscribe(&reg.filter) {
                warn!(subscription_id = %id, error = %e, "failed to unsubscribe filter");
            }
        }

        self.write_registrations().remove(&id);
        info!(subscription_id = %id, network = %reg.network, "subscription deactivated");
        Ok(())
    }

    /// Re-register `id` with a new filter or network.
    pub async fn reactivate(
        &self,
        id: SubscriptionId,
        filter: &FilterSet,
        network: Network,
    ) -> Result<(), HookError> {
        match self.deactivate(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.activate(id, filter, network).await
    }

    /// Activate every active subscription; returns how many succeeded.
    /// A failing subscription is logged and does not stop the others.
    pub async fn activate_all(&self, subscriptions: &[Subscription]) -> usize {
        let mut activated = 0;
        for sub in subscriptions.iter().filter(|s| s.is_active) {
            match self.activate(sub.id, &sub.filters, sub.network).await {
                Ok(()) => activated += 1,
                Err(e) => error!(
                    subscription_id = %sub.id,
                    network = %sub.network,
                    error = %e,
                    "failed to activate subscription"
                ),
            }
        }
        info!(activated, total = subscriptions.len(), "subscriptions restored");
        activated
    }

    /// Match a batch against the registrations of `network` and spawn one
    /// handler task per match. Returns the number of matches dispatched.
    pub fn on_transfer_batch(&self, network: Network, events: Vec<TransferEvent>) -> usize {
        let snapshot: Vec<Registration> = self
            .read_registrations()
            .values()
            .filter(|r| r.network == network)
            .cloned()
            .collect();

        if snapshot.is_empty() {
            let mut m = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            m.batches_received += 1;
            m.events_received += events.len() as u64;
            m.batches_skipped += 1;
            return 0;
        }

        let mut dispatched = 0;
        for event in &events {
            for reg in snapshot.iter().filter(|r| r.filter.matches(event)) {
                let handler = Arc::clone(&self.handler);
                let id = reg.subscription_id;
                let event = event.clone();
                tokio::spawn(async move {
                    handler.on_match(id, network, event).await;
                });
                dispatched += 1;
            }
        }

        {
            let mut m = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            m.batches_received += 1;
            m.events_received += events.len() as u64;
            m.matches_dispatched += dispatched as u64;
        }
        debug!(
            network = %network,
            events = events.len(),
            matches = dispatched,
            "transfer batch dispatched"
        );
        dispatched
    }

    /// Drain the inbound queue until every connection has closed.
    pub async fn run_dispatcher(self: Arc<Self>, mut rx: mpsc::Receiver<InboundBatch>) {
        while let Some(batch) = rx.recv().await {
            self.on_transfer_batch(batch.network, batch.events);
        }
        info!("transfer dispatcher stopped");
    }

    /// Unsubscribe every registration and close every connection.
    ///
    /// Best effort: individual failures are logged. In-flight deliveries
    /// are left to finish. Later activations fail with `HookError::Closed`.
    pub async fn shutdown_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _writer = self.writer.lock().await;

        let registrations: Vec<Registration> =
            self.write_registrations().drain().map(|(_, r)| r).collect();
        let connections = std::mem::take(&mut *self.lock_connections());

        for reg in &registrations {
            let id = reg.subscription_id;
            match connections.get(&reg.network) {
                Some(handle) => {
                    if let Err(e) = handle.unsubscribe(&reg.filter) {
                        warn!(subscription_id = %id, error = %e, "unsubscribe failed");
                    }
                }
                None => warn!(subscription_id = %id, "no connection to unsubscribe from"),
            }
        }

        for (network, handle) in connections {
            handle.close();
            info!(network = %network, "feed connection closed");
        }

        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(unsubscribed = registrations.len(), "connection manager shut down");
    }

    pub fn registration(&self, id: SubscriptionId) -> Option<Registration> {
        self.read_registrations().get(&id).cloned()
    }

    pub fn registration_count(&self) -> usize {
        self.read_registrations().len()
    }

    pub fn connection_state(&self, network: Network) -> Option<ConnectionState> {
        self.lock_connections().get(&network).map(FeedHandle::state)
    }

    pub fn metrics(&self) -> DispatchMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The cached handle for `network`, evicting it if its task has stopped.
    fn live_connection(&self, network: Network) -> Option<FeedHandle> {
        let mut connections = self.lock_connections();
        let handle = connections.get(&network)?;
        if !handle.is_closed() {
            return Some(handle.clone());
        }
        connections.remove(&network);
        warn!(network = %network, "feed connection stopped, dropping it");
        None
    }

    fn gate(&self, network: Network) -> ConnectGate {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(network)
            .or_default()
            .clone()
    }

    fn lock_connections(&self) -> MutexGuard<'_, HashMap<Network, FeedHandle>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_registrations(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<SubscriptionId, Registration>> {
        self.registrations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registrations(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<SubscriptionId, Registration>> {
        self.registrations.write().unwrap_or_else(PoisonError::into_inner)
    }
}
