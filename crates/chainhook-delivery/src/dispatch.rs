//! Production [`MatchHandler`]: resolves the stored subscription behind a
//! match and runs a delivery sequence for it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use chainhook_core::{MatchHandler, Network, SubscriptionId, SubscriptionStore, TransferEvent};

use crate::engine::DeliveryEngine;

pub struct WebhookDispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    engine: Arc<DeliveryEngine>,
}

impl WebhookDispatcher {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, engine: Arc<DeliveryEngine>) -> Self {
        Self {
            subscriptions,
            engine,
        }
    }
}

#[async_trait]
impl MatchHandler for WebhookDispatcher {
    async fn on_match(
        &self,
        subscription_id: SubscriptionId,
        network: Network,
        event: TransferEvent,
    ) {
        let subscription = match self.subscriptions.get(subscription_id).await {
            Ok(Some(sub)) => sub,
            Ok(None) => {
                warn!(subscription_id = %subscription_id, "matched subscription no longer stored");
                return;
            }
            Err(e) => {
                error!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "subscription lookup failed"
                );
                return;
            }
        };

        if !subscription.is_active || subscription.network != network {
            debug!(
                subscription_id = %subscription_id,
                active = subscription.is_active,
                network = %network,
                "skipping stale registration"
            );
            return;
        }

        self.engine.deliver(&subscription, &event).await;
    }
}
