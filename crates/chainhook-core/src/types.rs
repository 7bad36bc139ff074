//! Subscription and network types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HookError;
use crate::filter::FilterSet;

/// Target network of a subscription and of an upstream feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Devnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::Mainnet
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "devnet" => Ok(Self::Devnet),
            other => Err(HookError::Config(format!(
                "unsupported network '{other}' (expected mainnet, testnet or devnet)"
            ))),
        }
    }
}

/// Stable identifier of a stored subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub i64);

impl From<i64> for SubscriptionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored subscription record, joined with its owner's address.
///
/// The record of truth lives in the persistence layer; the connection
/// manager only keeps a registration derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Owning user row. Opaque to the delivery pipeline.
    pub owner_id: i64,
    /// Owning user's wallet address, forwarded in webhook payloads.
    pub owner_address: String,
    pub name: String,
    #[serde(default)]
    pub network: Network,
    pub filters: FilterSet,
    pub webhook_url: String,
    #[serde(default = "bool_true")]
    pub is_active: bool,
}

fn bool_true() -> bool {
    true
}
