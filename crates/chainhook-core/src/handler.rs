//! Match handler trait: the seam between fan-out and delivery.

use async_trait::async_trait;

use crate::event::TransferEvent;
use crate::types::{Network, SubscriptionId};

/// Receives every (subscription, event) pair the filter matcher accepted.
///
/// Each call runs in its own task; implementations handle their own errors
/// and never propagate them back to the fan-out loop.
#[async_trait]
pub trait MatchHandler: Send + Sync + 'static {
    async fn on_match(
        &self,
        subscription_id: SubscriptionId,
        network: Network,
        event: TransferEvent,
    );
}
