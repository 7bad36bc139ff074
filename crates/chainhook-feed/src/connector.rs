//! Connection seam between the manager and a concrete upstream feed.

use std::fmt;

use async_trait::async_trait;
use chainhook_core::{FilterSet, HookError, Network, TransferEvent};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Disconnected; reconnecting, or idle after exhausting its attempts.
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Command sent from a [`FeedHandle`] to its background task.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    Subscribe(FilterSet),
    Unsubscribe(FilterSet),
    Close,
}

/// One `customTransferUpdate` worth of transfers from a network.
#[derive(Debug, Clone)]
pub struct InboundBatch {
    pub network: Network,
    pub events: Vec<TransferEvent>,
}

/// Cheap-to-clone control handle for one network's feed connection.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    network: Network,
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl FeedHandle {
    pub fn new(
        network: Network,
        commands: mpsc::UnboundedSender<FeedCommand>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            network,
            commands,
            state,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// True once the background task has exited or reported `Closed`.
    /// A closed handle never recovers; open a new connection instead.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.state() == ConnectionState::Closed
    }

    /// Queue a subscribe emission. Filters queued while disconnected are
    /// sent once the connection is re-established.
    pub fn subscribe(&self, filter: &FilterSet) -> Result<(), HookError> {
        self.send(FeedCommand::Subscribe(filter.clone()))
    }

    pub fn unsubscribe(&self, filter: &FilterSet) -> Result<(), HookError> {
        self.send(FeedCommand::Unsubscribe(filter.clone()))
    }

    /// Ask the task to disconnect and exit. No-op if it already stopped.
    pub fn close(&self) {
        let _ = self.commands.send(FeedCommand::Close);
    }

    fn send(&self, cmd: FeedCommand) -> Result<(), HookError> {
        self.commands
            .send(cmd)
            .map_err(|_| HookError::Connection(format!("{} feed task has stopped", self.network)))
    }
}

/// Opens feed connections.
///
/// `connect` resolves only after the first connection attempt cycle: `Ok`
/// once the feed is live, `Err(HookError::Connection)` when it could not be
/// reached. Transfer batches received later are pushed into `inbound`.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        network: Network,
        inbound: mpsc::Sender<InboundBatch>,
    ) -> Result<FeedHandle, HookError>;
}
