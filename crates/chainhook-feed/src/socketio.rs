//! Minimal Socket.IO v5 / Engine.IO v4 text codec over WebSocket.
//!
//! Only the packets the transfer feed uses are modelled: the Engine.IO
//! open/close/ping/pong frames and the Socket.IO connect, disconnect,
//! connect-error and event packets of the default namespace.

use serde_json::Value;

/// Socket.IO namespace connect request for `/`.
pub const CONNECT: &str = "40";
/// Socket.IO namespace disconnect for `/`.
pub const DISCONNECT: &str = "41";
/// Engine.IO pong, sent in answer to a server ping.
pub const PONG: &str = "3";

/// Event emitted to start receiving transfers for a filter.
pub const SUBSCRIBE_EVENT: &str = "subscribeCustomTransfers";
/// Event emitted to stop receiving transfers for a filter.
pub const UNSUBSCRIBE_EVENT: &str = "unsubscribeCustomTransfers";
/// Inbound event carrying `{"transfers": [...]}`.
pub const TRANSFER_UPDATE_EVENT: &str = "customTransferUpdate";
/// Inbound server-side error event.
pub const ERROR_EVENT: &str = "error";

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake (`0{...}`).
    Open(Value),
    /// Engine.IO close (`1`).
    Close,
    /// Engine.IO ping (`2`).
    Ping,
    /// Engine.IO pong (`3`).
    Pong,
    /// Namespace connected (`40` / `40{...}`).
    Connect(Option<Value>),
    /// Namespace disconnected by the server (`41`).
    Disconnect,
    /// Namespace connection refused (`44{...}`).
    ConnectError(Value),
    /// Event (`42["name", data]`).
    Event { name: String, data: Value },
    /// Anything else (binary attachments, acks, malformed frames).
    Unknown(String),
}

/// Decode one text frame.
pub fn parse(text: &str) -> Packet {
    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Packet::Open(serde_json::from_str(&text[1..]).unwrap_or(Value::Null)),
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('4') => parse_socket_packet(&text[1..]),
        _ => Packet::Unknown(text.to_string()),
    }
}

fn parse_socket_packet(body: &str) -> Packet {
    let Some(kind) = body.chars().next() else {
        return Packet::Unknown(body.to_string());
    };
    let rest = strip_namespace(&body[kind.len_utf8()..]);

    match kind {
        '0' => Packet::Connect(serde_json::from_str(rest).ok()),
        '1' => Packet::Disconnect,
        '4' => Packet::ConnectError(serde_json::from_str(rest).unwrap_or(Value::Null)),
        '2' => {
            // optional ack id precedes the payload array
            let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            parse_event(payload).unwrap_or_else(|| Packet::Unknown(body.to_string()))
        }
        _ => Packet::Unknown(body.to_string()),
    }
}

/// Drop a `"/namespace,"` prefix if present.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

fn parse_event(payload: &str) -> Option<Packet> {
    let Value::Array(mut items) = serde_json::from_str::<Value>(payload).ok()? else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    let name = items.remove(0).as_str()?.to_string();
    let data = if items.is_empty() {
        Value::Null
    } else {
        items.remove(0)
    };
    Some(Packet::Event { name, data })
}

/// Encode an event emission.
pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", Value::Array(vec![Value::String(name.to_string()), data.clone()]))
}

/// Streaming endpoint for the host returned by the feed's config lookup.
///
/// `host` may be a bare host or carry an `http(s)`/`ws(s)` scheme; plain
/// `http` maps to `ws`, everything else to `wss`.
pub fn socket_url(host: &str, path: &str) -> String {
    let (scheme, bare) = if let Some(rest) = host.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = host.strip_prefix("ws://") {
        ("ws", rest)
    } else if let Some(rest) = host.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = host.strip_prefix("wss://") {
        ("wss", rest)
    } else {
        ("wss", host)
    };
    let bare = bare.trim_end_matches('/');
    let path = path.trim_matches('/');
    format!("{scheme}://{bare}/{path}/?EIO=4&transport=websocket")
}
