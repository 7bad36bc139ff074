//! Transfer events received from the upstream feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One value-movement notification from the upstream feed.
///
/// The record is kept as raw JSON so it can be forwarded to webhooks exactly
/// as received; the accessors below never fail on missing or mistyped fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferEvent(Value);

impl TransferEvent {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn sender(&self) -> Option<&str> {
        self.str_field("sender")
    }

    pub fn receiver(&self) -> Option<&str> {
        self.str_field("receiver")
    }

    pub fn relayer(&self) -> Option<&str> {
        self.str_field("relayer")
    }

    pub fn function(&self) -> Option<&str> {
        self.str_field("function")
    }

    /// Top-level native value, as a decimal string.
    pub fn value(&self) -> Option<&str> {
        self.str_field("value")
    }

    /// Transaction hash, if the feed supplied one (used for log context).
    pub fn tx_hash(&self) -> Option<&str> {
        self.str_field("txHash")
    }

    /// Token identifiers of the nested sub-transfers
    /// (`action.arguments.transfers[].token`).
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0
            .pointer("/action/arguments/transfers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|t| t.get("token").and_then(Value::as_str))
    }
}

impl From<Value> for TransferEvent {
    fn from(raw: Value) -> Self {
        Self(raw)
    }
}

/// Extract the transfer list from a `customTransferUpdate` payload.
///
/// Returns an empty vector when `transfers` is missing or not an array.
pub fn transfers_from_update(payload: &Value) -> Vec<TransferEvent> {
    payload
        .get("transfers")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .cloned()
                .map(TransferEvent::new)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn esdt_transfer() -> TransferEvent {
        TransferEvent::new(json!({
            "txHash": "a1b2",
            "sender": "erd1alice",
            "receiver": "erd1bob",
            "value": "0",
            "function": "MultiESDTNFTTransfer",
            "action": {
                "category": "esdtNft",
                "arguments": {
                    "transfers": [
                        { "token": "USDC-c76f1f", "value": "1000000" },
                        { "token": "WEGLD-bd4d79", "value": "5" }
                    ]
                }
            }
        }))
    }

    #[test]
    fn field_accessors() {
        let ev = esdt_transfer();
        assert_eq!(ev.sender(), Some("erd1alice"));
        assert_eq!(ev.receiver(), Some("erd1bob"));
        assert_eq!(ev.relayer(), None);
        assert_eq!(ev.function(), Some("MultiESDTNFTTransfer"));
        assert_eq!(ev.value(), Some("0"));
        assert_eq!(ev.tx_hash(), Some("a1b2"));
    }

    #[test]
    fn nested_tokens() {
        let ev = esdt_transfer();
        let tokens: Vec<_> = ev.tokens().collect();
        assert_eq!(tokens, vec!["USDC-c76f1f", "WEGLD-bd4d79"]);
    }

    #[test]
    fn accessors_tolerate_garbage() {
        let ev = TransferEvent::new(json!({ "sender": 12, "action": "nope" }));
        assert_eq!(ev.sender(), None);
        assert_eq!(ev.tokens().count(), 0);

        let ev = TransferEvent::new(Value::Null);
        assert_eq!(ev.receiver(), None);
        assert_eq!(ev.tokens().count(), 0);
    }

    #[test]
    fn update_payload_extraction() {
        let payload = json!({ "transfers": [ { "sender": "a" }, 5, { "sender": "b" } ] });
        let events = transfers_from_update(&payload);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sender(), Some("b"));

        assert!(transfers_from_update(&json!({})).is_empty());
        assert!(transfers_from_update(&json!({ "transfers": "x" })).is_empty());
    }

    #[test]
    fn serializes_as_raw_json() {
        let ev = esdt_transfer();
        let out = serde_json::to_value(&ev).unwrap();
        assert_eq!(out["txHash"], "a1b2");
    }
}
