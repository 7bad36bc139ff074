//! chainhook-core: foundation types for the ChainHook webhook relay.
//!
//! # Overview
//!
//! ChainHook keeps one streaming connection per network to an upstream
//! transfer feed, matches every inbound transfer against the active
//! subscriptions of that network, and POSTs each match to the subscriber's
//! webhook. The core crate defines:
//!
//! - [`FilterSet`] / [`matches`]: subscription criteria and the pure matcher
//! - [`TransferEvent`]: raw transfer record with total field accessors
//! - [`Subscription`], [`Network`], [`SubscriptionId`]
//! - [`DeliveryRecord`], [`DeliveryOutcome`], [`DeliveryStats`]
//! - [`HookError`]: structured error type
//! - [`store`]: persistence contracts; [`MatchHandler`]: fan-out seam
//! - [`config`]: service configuration

pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
pub mod store;
pub mod types;

pub use config::{DeliveryConfig, FeedConfig, HookConfig, LogConfig, StorageConfig};
pub use delivery::{DeliveryOutcome, DeliveryRecord, DeliveryStats};
pub use error::HookError;
pub use event::{transfers_from_update, TransferEvent};
pub use filter::{matches, FilterSet};
pub use handler::MatchHandler;
pub use store::{DeliveryLogStore, SubscriptionStore};
pub use types::{Network, Subscription, SubscriptionId};
