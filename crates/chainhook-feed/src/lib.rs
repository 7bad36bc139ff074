//! chainhook-feed: upstream transfer feed connections for ChainHook.
//!
//! One Socket.IO connection is kept per network. The [`ConnectionManager`]
//! owns the registry of active subscriptions, emits subscribe/unsubscribe
//! signals over the network's connection, and fans every inbound transfer
//! out to a [`MatchHandler`](chainhook_core::MatchHandler) once per
//! matching subscription.
//!
//! # Features
//! - Lazy connection per network, shared by all its subscriptions
//! - Capped fixed-delay reconnect with automatic re-subscribe
//! - Snapshot-based dispatch, one spawned task per match

pub mod client;
pub mod connector;
pub mod endpoint;
pub mod manager;
pub mod socketio;

pub use client::{ReconnectPolicy, SocketIoConnector};
pub use connector::{ConnectionState, FeedCommand, FeedConnector, FeedHandle, InboundBatch};
pub use endpoint::EndpointResolver;
pub use manager::{ConnectionManager, DispatchMetrics, Registration};
