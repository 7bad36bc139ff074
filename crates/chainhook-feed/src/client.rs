//! Socket.IO feed connector with capped auto-reconnect and re-subscribe.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainhook_core::{transfers_from_update, FeedConfig, FilterSet, HookError, Network};

use crate::connector::{ConnectionState, FeedCommand, FeedConnector, FeedHandle, InboundBatch};
use crate::endpoint::EndpointResolver;
use crate::socketio::{self, Packet};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect behaviour of one feed task.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Tries per disconnect before the connection goes idle.
    pub attempts: u32,
    /// Fixed wait between tries.
    pub delay: Duration,
    /// Upper bound for the WebSocket + Socket.IO handshake.
    pub handshake_timeout: Duration,
}

impl From<&FeedConfig> for ReconnectPolicy {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            attempts: cfg.reconnect_attempts.max(1),
            delay: cfg.reconnect_delay(),
            handshake_timeout: cfg.resolve_timeout(),
        }
    }
}

/// Production [`FeedConnector`] speaking Socket.IO to the network's
/// transfer feed.
pub struct SocketIoConnector {
    resolver: EndpointResolver,
    policy: ReconnectPolicy,
}

impl SocketIoConnector {
    pub fn new(config: &FeedConfig) -> Result<Self, HookError> {
        Ok(Self {
            resolver: EndpointResolver::new(config.clone())?,
            policy: ReconnectPolicy::from(config),
        })
    }
}

#[async_trait]
impl FeedConnector for SocketIoConnector {
    async fn connect(
        &self,
        network: Network,
        inbound: mpsc::Sender<InboundBatch>,
    ) -> Result<FeedHandle, HookError> {
        let url = self.resolver.resolve(network).await?;
        spawn_feed(network, url, self.policy.clone(), inbound).await
    }
}

/// Spawn the feed task for a resolved socket URL and wait for its first
/// connection cycle.
async fn spawn_feed(
    network: Network,
    url: String,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<InboundBatch>,
) -> Result<FeedHandle, HookError> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (ready_tx, ready_rx) = oneshot::channel();

    let task = FeedTask {
        network,
        url,
        policy,
        inbound,
        state: state_tx,
    };
    tokio::spawn(task.run(cmd_rx, ready_tx));

    match ready_rx.await {
        Ok(Ok(())) => Ok(FeedHandle::new(network, cmd_tx, state_rx)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(HookError::Connection(format!(
            "{network} feed task exited during connect"
        ))),
    }
}

enum SessionEnd {
    /// Closed on request; the task exits.
    Closed,
    /// Lost the connection; the task reconnects.
    Dropped(String),
}

struct FeedTask {
    network: Network,
    url: String,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<InboundBatch>,
    state: watch::Sender<ConnectionState>,
}

impl FeedTask {
    async fn run(
        self,
        mut cmd_rx: mpsc::UnboundedReceiver<FeedCommand>,
        ready: oneshot::Sender<Result<(), HookError>>,
    ) {
        let mut ready = Some(ready);
        let mut active: Vec<FilterSet> = Vec::new();

        loop {
            let ws = match self.connect_with_retries().await {
                Ok(ws) => ws,
                Err(e) => {
                    if let Some(tx) = ready.take() {
                        self.state.send_replace(ConnectionState::Closed);
                        let _ = tx.send(Err(e));
                        return;
                    }
                    tracing::warn!(
                        network = %self.network,
                        error = %e,
                        "feed reconnect attempts exhausted, idle until next command"
                    );
                    match cmd_rx.recv().await {
                        None | Some(FeedCommand::Close) => break,
                        Some(FeedCommand::Subscribe(filter)) => active.push(filter),
                        Some(FeedCommand::Unsubscribe(filter)) => forget(&mut active, &filter),
                    }
                    continue;
                }
            };

            self.state.send_replace(ConnectionState::Connected);
            tracing::info!(network = %self.network, url = %self.url, "feed connected");
            if let Some(tx) = ready.take() {
                let _ = tx.send(Ok(()));
            }

            match self.session(ws, &mut cmd_rx, &mut active).await {
                SessionEnd::Closed => break,
                SessionEnd::Dropped(reason) => {
                    tracing::warn!(network = %self.network, reason = %reason, "feed disconnected");
                    self.state.send_replace(ConnectionState::Reconnecting);
                }
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        tracing::info!(network = %self.network, "feed connection closed");
    }

    async fn connect_with_retries(&self) -> Result<WsStream, HookError> {
        let mut last_error = String::new();

        for attempt in 1..=self.policy.attempts {
            if attempt > 1 || *self.state.borrow() == ConnectionState::Reconnecting {
                time::sleep(self.policy.delay).await;
            }

            match time::timeout(self.policy.handshake_timeout, open_session(&self.url)).await {
                Ok(Ok(ws)) => return Ok(ws),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "handshake timed out".into(),
            }
            tracing::warn!(
                network = %self.network,
                attempt,
                max = self.policy.attempts,
                error = %last_error,
                "feed connect attempt failed"
            );
        }

        Err(HookError::Connection(format!(
            "{} feed unreachable after {} attempts: {last_error}",
            self.network, self.policy.attempts
        )))
    }

    async fn session(
        &self,
        ws: WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
        active: &mut Vec<FilterSet>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        for filter in active.iter() {
            let frame = socketio::encode_event(socketio::SUBSCRIBE_EVENT, &filter.to_payload());
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                return SessionEnd::Dropped(e.to_string());
            }
        }
        if !active.is_empty() {
            tracing::info!(network = %self.network, count = active.len(), "re-subscribed filters");
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let (event, filter) = match cmd {
                        None | Some(FeedCommand::Close) => {
                            let bye = Message::Text(socketio::DISCONNECT.to_string().into());
                            let _ = sink.send(bye).await;
                            let _ = sink.close().await;
                            return SessionEnd::Closed;
                        }
                        Some(FeedCommand::Subscribe(filter)) => {
                            active.push(filter.clone());
                            (socketio::SUBSCRIBE_EVENT, filter)
                        }
                        Some(FeedCommand::Unsubscribe(filter)) => {
                            forget(active, &filter);
                            (socketio::UNSUBSCRIBE_EVENT, filter)
                        }
                    };
                    let frame = socketio::encode_event(event, &filter.to_payload());
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        return SessionEnd::Dropped(e.to_string());
                    }
                    tracing::debug!(network = %self.network, event, "emitted");
                }
                msg = stream.next() => {
                    let text = match msg {
                        None => return SessionEnd::Dropped("stream ended".into()),
                        Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                        Some(Ok(Message::Close(_))) => {
                            return SessionEnd::Dropped("closed by server".into())
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                            continue;
                        }
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    match socketio::parse(text.as_str()) {
                        Packet::Ping => {
                            let pong = Message::Text(socketio::PONG.to_string().into());
                            if let Err(e) = sink.send(pong).await {
                                return SessionEnd::Dropped(e.to_string());
                            }
                        }
                        Packet::Event { name, data } => self.on_event(&name, &data).await,
                        Packet::Close => return SessionEnd::Dropped("engine closed".into()),
                        Packet::Disconnect => {
                            return SessionEnd::Dropped("namespace disconnected".into())
                        }
                        Packet::ConnectError(data) => {
                            return SessionEnd::Dropped(format!("connect error: {data}"))
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn on_event(&self, name: &str, data: &serde_json::Value) {
        match name {
            socketio::TRANSFER_UPDATE_EVENT => {
                let events = transfers_from_update(data);
                if events.is_empty() {
                    return;
                }
                tracing::debug!(network = %self.network, count = events.len(), "transfer batch");
                let batch = InboundBatch {
                    network: self.network,
                    events,
                };
                if self.inbound.send(batch).await.is_err() {
                    tracing::debug!(network = %self.network, "inbound receiver dropped");
                }
            }
            socketio::ERROR_EVENT => {
                tracing::error!(network = %self.network, error = %data, "feed reported an error");
            }
            other => tracing::debug!(network = %self.network, event = other, "ignored feed event"),
        }
    }
}

/// WebSocket connect plus Engine.IO open and Socket.IO namespace connect.
async fn open_session(url: &str) -> Result<WsStream, HookError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| HookError::Connection(e.to_string()))?;

    let mut namespace_requested = false;
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| HookError::Connection(e.to_string()))?;
        let Message::Text(text) = msg else { continue };

        match socketio::parse(text.as_str()) {
            Packet::Open(_) if !namespace_requested => {
                ws.send(Message::Text(socketio::CONNECT.to_string().into()))
                    .await
                    .map_err(|e| HookError::Connection(e.to_string()))?;
                namespace_requested = true;
            }
            Packet::Ping => {
                ws.send(Message::Text(socketio::PONG.to_string().into()))
                    .await
                    .map_err(|e| HookError::Connection(e.to_string()))?;
            }
            Packet::Connect(_) => return Ok(ws),
            Packet::ConnectError(data) => {
                return Err(HookError::Connection(format!("namespace refused: {data}")))
            }
            Packet::Close => return Err(HookError::Connection("closed during handshake".into())),
            _ => {}
        }
    }

    Err(HookError::Connection("stream ended during handshake".into()))
}

fn forget(active: &mut Vec<FilterSet>, filter: &FilterSet) {
    if let Some(pos) = active.iter().position(|f| f == filter) {
        active.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    type ServerWs = WebSocketStream<TcpStream>;

    fn filter(token: &str) -> FilterSet {
        FilterSet {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    #[test]
    fn forget_removes_one_copy() {
        let mut active = vec![filter("A"), filter("B"), filter("A")];
        forget(&mut active, &filter("A"));
        assert_eq!(active, vec![filter("B"), filter("A")]);
        forget(&mut active, &filter("Z"));
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn policy_from_config() {
        let cfg = FeedConfig {
            reconnect_attempts: 0,
            reconnect_delay_ms: 250,
            ..Default::default()
        };
        let policy = ReconnectPolicy::from(&cfg);
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn unreachable_feed_fails_connect() {
        let mut cfg = FeedConfig::default();
        cfg.api_endpoints.clear();
        let connector = SocketIoConnector::new(&cfg).unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let err = connector.connect(Network::Mainnet, tx).await.unwrap_err();
        assert!(matches!(err, HookError::Connection(_)));
    }

    // ─── Local Socket.IO server ─────────────────────────────────────────

    fn fast_policy(attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts,
            delay: Duration::from_millis(20),
            handshake_timeout: Duration::from_secs(1),
        }
    }

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        (listener, socketio::socket_url(&host, "ws/subscription"))
    }

    /// Accept one client and complete the Engine.IO open and namespace connect.
    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        send(&mut ws, r#"0{"sid":"s1","pingInterval":25000,"pingTimeout":20000}"#).await;
        assert_eq!(next_text(&mut ws).await, socketio::CONNECT);
        send(&mut ws, r#"40{"sid":"n1"}"#).await;
        ws
    }

    async fn send(ws: &mut ServerWs, text: &str) {
        ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    async fn next_text(ws: &mut ServerWs) -> String {
        loop {
            let msg = time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("client sent nothing")
                .expect("client went away")
                .unwrap();
            if let Message::Text(text) = msg {
                return text.to_string();
            }
        }
    }

    async fn wait_for_state(handle: &FeedHandle, want: ConnectionState) {
        time::timeout(Duration::from_secs(2), async {
            while handle.state() != want {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("state stuck at {}, wanted {want}", handle.state()));
    }

    fn subscribe_frame(f: &FilterSet) -> String {
        socketio::encode_event(socketio::SUBSCRIBE_EVENT, &f.to_payload())
    }

    // ─── Feed task ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn live_session_emits_answers_pings_and_forwards_transfers() {
        let (listener, url) = listen().await;
        let (tx, mut rx) = mpsc::channel(4);
        let (handle, mut server) = tokio::join!(
            spawn_feed(Network::Devnet, url, fast_policy(2), tx),
            accept(&listener)
        );
        let handle = handle.unwrap();
        assert_eq!(handle.state(), ConnectionState::Connected);

        handle.subscribe(&filter("EGLD")).unwrap();
        assert_eq!(next_text(&mut server).await, subscribe_frame(&filter("EGLD")));
        handle.unsubscribe(&filter("EGLD")).unwrap();
        assert_eq!(
            next_text(&mut server).await,
            socketio::encode_event(socketio::UNSUBSCRIBE_EVENT, &filter("EGLD").to_payload())
        );

        send(&mut server, "2").await;
        assert_eq!(next_text(&mut server).await, socketio::PONG);

        let update = json!({ "transfers": [{ "txHash": "aa", "sender": "erd1a" }, 7] });
        let frame = socketio::encode_event(socketio::TRANSFER_UPDATE_EVENT, &update);
        send(&mut server, &frame).await;
        let batch = time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no batch forwarded")
            .unwrap();
        assert_eq!(batch.network, Network::Devnet);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].tx_hash(), Some("aa"));
    }

    #[tokio::test]
    async fn dropped_socket_reconnects_and_resubscribes_active_filters() {
        let (listener, url) = listen().await;
        let (tx, _rx) = mpsc::channel(4);
        let (handle, mut server) = tokio::join!(
            spawn_feed(Network::Mainnet, url, fast_policy(3), tx),
            accept(&listener)
        );
        let handle = handle.unwrap();

        handle.subscribe(&filter("A")).unwrap();
        handle.subscribe(&filter("B")).unwrap();
        handle.unsubscribe(&filter("A")).unwrap();
        for _ in 0..3 {
            next_text(&mut server).await;
        }

        drop(server);
        let mut server = accept(&listener).await;
        assert_eq!(next_text(&mut server).await, subscribe_frame(&filter("B")));
        wait_for_state(&handle, ConnectionState::Connected).await;

        // commands still flow over the new session
        handle.subscribe(&filter("C")).unwrap();
        assert_eq!(next_text(&mut server).await, subscribe_frame(&filter("C")));
    }

    #[tokio::test]
    async fn close_sends_namespace_disconnect_and_ends_closed() {
        let (listener, url) = listen().await;
        let (tx, _rx) = mpsc::channel(4);
        let (handle, mut server) = tokio::join!(
            spawn_feed(Network::Testnet, url, fast_policy(2), tx),
            accept(&listener)
        );
        let handle = handle.unwrap();

        handle.close();
        assert_eq!(next_text(&mut server).await, socketio::DISCONNECT);
        wait_for_state(&handle, ConnectionState::Closed).await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn exhausted_reconnects_go_idle_until_next_command() {
        let (listener, url) = listen().await;
        let (tx, _rx) = mpsc::channel(4);
        let (handle, server) = tokio::join!(
            spawn_feed(Network::Mainnet, url, fast_policy(3), tx),
            accept(&listener)
        );
        let handle = handle.unwrap();

        // refuse every upgrade: accept the TCP connection and hang up
        drop(server);
        let refusing = tokio::spawn(async move {
            for _ in 0..3 {
                let (stream, _) = listener.accept().await.unwrap();
                drop(stream);
            }
            listener
        });
        let listener = time::timeout(Duration::from_secs(2), refusing)
            .await
            .expect("fewer reconnect attempts than the cap")
            .unwrap();
        wait_for_state(&handle, ConnectionState::Reconnecting).await;

        // idle: no further attempt after the cap
        assert!(time::timeout(Duration::from_millis(200), listener.accept()).await.is_err());
        assert_eq!(handle.state(), ConnectionState::Reconnecting);

        // the next command wakes the task, which reconnects and subscribes
        handle.subscribe(&filter("WAKE")).unwrap();
        let mut server = accept(&listener).await;
        assert_eq!(next_text(&mut server).await, subscribe_frame(&filter("WAKE")));
        wait_for_state(&handle, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn first_cycle_failure_is_reported_and_closed() {
        let (listener, url) = listen().await;
        let refusing = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                drop(stream);
            }
        });
        let (tx, _rx) = mpsc::channel(4);

        let err = spawn_feed(Network::Devnet, url, fast_policy(2), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Connection(ref msg) if msg.contains("2 attempts")));
        refusing.abort();
    }
}
