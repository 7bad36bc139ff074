//! Subscription filter sets and the transfer filter matcher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HookError;
use crate::event::TransferEvent;

/// Match criteria of a subscription. Every key is optional; an empty string
/// counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Matches when the address is the sender, receiver or relayer.
    /// Mutually exclusive with `sender`, `receiver` and `relayer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

fn present(key: &Option<String>) -> Option<&str> {
    key.as_deref().filter(|v| !v.is_empty())
}

impl FilterSet {
    /// Parse a stored `filters` column, which is either a JSON object or a
    /// JSON string holding one (text-typed columns).
    pub fn from_stored(raw: &Value) -> Result<Self, HookError> {
        let filter: FilterSet = match raw {
            Value::String(text) => serde_json::from_str(text)?,
            other => serde_json::from_value(other.clone())?,
        };
        Ok(filter.normalized())
    }

    pub fn sender(&self) -> Option<&str> {
        present(&self.sender)
    }

    pub fn receiver(&self) -> Option<&str> {
        present(&self.receiver)
    }

    pub fn relayer(&self) -> Option<&str> {
        present(&self.relayer)
    }

    pub fn function(&self) -> Option<&str> {
        present(&self.function)
    }

    pub fn token(&self) -> Option<&str> {
        present(&self.token)
    }

    pub fn address(&self) -> Option<&str> {
        present(&self.address)
    }

    /// Copy with empty-string keys dropped.
    pub fn normalized(&self) -> FilterSet {
        let keep = |key: &Option<String>| present(key).map(str::to_owned);
        FilterSet {
            sender: keep(&self.sender),
            receiver: keep(&self.receiver),
            relayer: keep(&self.relayer),
            function: keep(&self.function),
            token: keep(&self.token),
            address: keep(&self.address),
        }
    }

    /// `true` when no recognized key is present.
    pub fn is_empty(&self) -> bool {
        self.present_keys().next().is_none()
    }

    fn present_keys(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("sender", self.sender()),
            ("receiver", self.receiver()),
            ("relayer", self.relayer()),
            ("function", self.function()),
            ("token", self.token()),
            ("address", self.address()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    /// Activation-time validation.
    pub fn validate(&self) -> Result<(), HookError> {
        if self.is_empty() {
            return Err(HookError::InvalidFilter(
                "at least one filter must be provided".into(),
            ));
        }
        if self.address().is_some()
            && (self.sender().is_some() || self.receiver().is_some() || self.relayer().is_some())
        {
            return Err(HookError::InvalidFilter(
                "address filter cannot be combined with sender, receiver, or relayer filters"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Subscribe/unsubscribe signal payload: a JSON object holding only the
    /// present keys.
    pub fn to_payload(&self) -> Value {
        let map: Map<String, Value> = self
            .present_keys()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        Value::Object(map)
    }

    /// See [`matches`].
    pub fn matches(&self, event: &TransferEvent) -> bool {
        matches(event, self)
    }
}

/// Decide whether `event` satisfies every present key of `filter`.
///
/// Keys are ANDed. The token key is not checked when the event's top-level
/// `value` is exactly `"0"`. A filter with no keys matches nothing.
pub fn matches(event: &TransferEvent, filter: &FilterSet) -> bool {
    if filter.is_empty() {
        return false;
    }

    let exact = |want: Option<&str>, got: Option<&str>| match want {
        Some(w) => got == Some(w),
        None => true,
    };

    if !exact(filter.sender(), event.sender())
        || !exact(filter.receiver(), event.receiver())
        || !exact(filter.relayer(), event.relayer())
        || !exact(filter.function(), event.function())
    {
        return false;
    }

    if let Some(token) = filter.token() {
        if event.value() != Some("0") && !event.tokens().any(|t| t == token) {
            return false;
        }
    }

    if let Some(address) = filter.address() {
        let involved = [event.sender(), event.receiver(), event.relayer()]
            .into_iter()
            .any(|party| party == Some(address));
        if !involved {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: &str) -> TransferEvent {
        TransferEvent::new(json!({
            "sender": "erd1alice",
            "receiver": "erd1bob",
            "relayer": "erd1relay",
            "function": "ESDTTransfer",
            "value": value,
            "action": { "arguments": { "transfers": [ { "token": "USDC-c76f1f" } ] } }
        }))
    }

    fn filter(raw: Value) -> FilterSet {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn empty_filter_matches_nothing() {
        assert!(!matches(&event("1"), &FilterSet::default()));
        assert!(!matches(&event("0"), &filter(json!({ "sender": "" }))));
        assert!(!matches(&TransferEvent::new(Value::Null), &FilterSet::default()));
    }

    #[test]
    fn exact_party_keys() {
        assert!(matches(&event("1"), &filter(json!({ "sender": "erd1alice" }))));
        assert!(!matches(&event("1"), &filter(json!({ "sender": "ERD1ALICE" }))));
        assert!(matches(&event("1"), &filter(json!({ "receiver": "erd1bob" }))));
        assert!(matches(&event("1"), &filter(json!({ "relayer": "erd1relay" }))));
        assert!(!matches(&event("1"), &filter(json!({ "relayer": "erd1other" }))));
        assert!(matches(&event("1"), &filter(json!({ "function": "ESDTTransfer" }))));
    }

    #[test]
    fn keys_are_anded() {
        let f = filter(json!({ "sender": "erd1alice", "receiver": "erd1carol" }));
        assert!(!matches(&event("1"), &f));
        let f = filter(json!({ "sender": "erd1alice", "receiver": "erd1bob" }));
        assert!(matches(&event("1"), &f));
    }

    #[test]
    fn address_matches_any_party() {
        for party in ["erd1alice", "erd1bob", "erd1relay"] {
            let f = filter(json!({ "address": party, "function": "somethingElse" }));
            // function still ANDed
            assert!(!matches(&event("1"), &f));
            let f = filter(json!({ "address": party }));
            assert!(matches(&event("1"), &f), "party {party}");
        }
        assert!(!matches(&event("1"), &filter(json!({ "address": "erd1nobody" }))));
    }

    #[test]
    fn token_requires_sub_transfer() {
        assert!(matches(&event("1"), &filter(json!({ "token": "USDC-c76f1f" }))));
        assert!(!matches(&event("1"), &filter(json!({ "token": "MEX-455c57" }))));
    }

    #[test]
    fn token_check_skipped_for_zero_value() {
        assert!(matches(&event("0"), &filter(json!({ "token": "MEX-455c57" }))));
    }

    #[test]
    fn missing_event_fields_do_not_panic() {
        let bare = TransferEvent::new(json!({ "value": "10" }));
        assert!(!matches(&bare, &filter(json!({ "sender": "erd1alice" }))));
        assert!(!matches(&bare, &filter(json!({ "token": "USDC-c76f1f" }))));
        assert!(!matches(&bare, &filter(json!({ "address": "erd1alice" }))));
    }

    #[test]
    fn validation_rules() {
        assert!(matches!(
            FilterSet::default().validate(),
            Err(HookError::InvalidFilter(_))
        ));
        assert!(matches!(
            filter(json!({ "address": "a", "sender": "b" })).validate(),
            Err(HookError::InvalidFilter(_))
        ));
        assert!(matches!(
            filter(json!({ "address": "a", "relayer": "b" })).validate(),
            Err(HookError::InvalidFilter(_))
        ));
        assert!(filter(json!({ "address": "a", "token": "T-1" })).validate().is_ok());
        assert!(filter(json!({ "address": "a", "sender": "" })).validate().is_ok());
    }

    #[test]
    fn payload_has_only_present_keys() {
        let f = filter(json!({ "sender": "erd1alice", "token": "", "function": "swap" }));
        assert_eq!(f.to_payload(), json!({ "sender": "erd1alice", "function": "swap" }));
    }

    #[test]
    fn stored_blob_as_text_or_object() {
        let from_text =
            FilterSet::from_stored(&json!("{\"receiver\":\"erd1bob\",\"token\":\"\"}")).unwrap();
        let from_obj = FilterSet::from_stored(&json!({ "receiver": "erd1bob" })).unwrap();
        assert_eq!(from_text, from_obj);
        assert_eq!(from_text.token, None);
        assert!(FilterSet::from_stored(&json!("not json")).is_err());
    }
}
