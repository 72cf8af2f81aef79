//! GraphQL implementation of the Indexer trait.
//!
//! Seed queries are plain HTTP POSTs. Live updates share one websocket
//! speaking the `graphql-transport-ws` protocol. That socket is owned by a
//! process-wide [`SubscriptionHub`] which is created lazily on first use and
//! never torn down: it reconnects with capped exponential backoff and
//! re-subscribes every live operation. Per-session subscriptions are
//! cancelable handles layered on top of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use chance_master_core::{
    BoardSnapshot, ClaimSnapshot, ClockSnapshot, EntityId, PlayerAddress, PlayerSnapshot,
    SessionId, SessionSnapshot,
};

use crate::error::{IndexerError, Result};
use crate::models::{
    decode_models, SeedNode, WireBoard, WireClaim, WireClock, WirePlayer, WireSession,
};
use crate::traits::{Indexer, Seeded, Subscription, SubscriptionSender};

/// Websocket subprotocol.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Upper bound on the reconnect wait.
pub const MAX_BACKOFF: Duration = Duration::from_millis(15_000);

// ───────────────────────────────────────────────────────────────────────────
// Documents
// ───────────────────────────────────────────────────────────────────────────

const PLAYER_SEED: &str = r#"
query PlayerSeed($addr: ContractAddress) {
  chanceMasterPlayerModels(where: { contract_address: $addr }, limit: 1) {
    edges { node { entity { id } contract_address is_enqueued is_in_game last_game_id } }
  }
}"#;

const SESSION_SEED: &str = r#"
query GameSeed($id: ID!) {
  chanceMasterGameModels(where: { id: $id }, limit: 1) {
    edges { node {
      entity { id }
      id white black status result turn
      prev_roll { _0 _1 _2 } white_draw_offered black_draw_offered
    } }
  }
}"#;

const BOARD_SEED: &str = r#"
query BoardSeed($id: ID!) {
  chanceMasterGameBoardModels(where: { id: $id }, limit: 1) {
    edges { node {
      entity { id }
      id
      white_pawns white_knights white_bishops white_rooks white_queens white_king
      black_pawns black_knights black_bishops black_rooks black_queens black_king
      castling_rights ep_square is_white_in_check is_black_in_check
    } }
  }
}"#;

const CLOCK_SEED: &str = r#"
query ClockSeed($id: ID!) {
  chanceMasterGameClockModels(where: { id: $id }, limit: 1) {
    edges { node { entity { id } id white_rem black_rem last_updated } }
  }
}"#;

const CLAIM_SEED: &str = r#"
query ClaimSeed($id: ID!) {
  chanceMasterGameClaimModels(where: { id: $id }, limit: 1) {
    edges { node { entity { id } id claim } }
  }
}"#;

const ENTITY_UPDATED: &str = r#"
subscription EntityUpdated($id: ID!) {
  entityUpdated(id: $id) {
    models {
      __typename
      ... on chance_master_Player { contract_address is_enqueued is_in_game last_game_id }
      ... on chance_master_Game {
        id white black status result turn
        prev_roll { _0 _1 _2 } white_draw_offered black_draw_offered
      }
      ... on chance_master_GameBoard {
        id
        white_pawns white_knights white_bishops white_rooks white_queens white_king
        black_pawns black_knights black_bishops black_rooks black_queens black_king
        castling_rights ep_square is_white_in_check is_black_in_check
      }
      ... on chance_master_GameClock { id white_rem black_rem last_updated }
      ... on chance_master_GameClaim { id claim }
    }
  }
}"#;

// ───────────────────────────────────────────────────────────────────────────
// HTTP seed queries
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
    message: String,
}

/// GraphQL-backed indexer.
pub struct GraphqlIndexer {
    http: reqwest::Client,
    http_url: Url,
    hub: Arc<SubscriptionHub>,
}

impl GraphqlIndexer {
    /// Create an indexer for the given HTTP and websocket endpoints.
    ///
    /// The websocket endpoint initialises the process-wide hub on first
    /// call; later calls reuse it.
    pub fn new(http_url: &str, ws_url: &str) -> Result<Self> {
        let http_url = Url::parse(http_url)?;
        let ws_url = Url::parse(ws_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            http_url,
            hub: SubscriptionHub::global(ws_url),
        })
    }

    pub fn http_url(&self) -> &Url {
        &self.http_url
    }

    /// Run a query and return the first node under `root`, if any.
    async fn first_node<W: DeserializeOwned>(
        &self,
        query: &str,
        root: &str,
        variables: Value,
    ) -> Result<Option<SeedNode<W>>> {
        let response = self
            .http
            .post(self.http_url.clone())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let status = response.status();
        let body: GraphqlResponse = response.json().await?;

        if let Some(err) = body.errors.first() {
            return Err(IndexerError::GraphQl(err.message.clone()));
        }
        if !status.is_success() {
            return Err(IndexerError::Status(status.as_u16()));
        }
        let data = body
            .data
            .ok_or_else(|| IndexerError::Malformed("response without data".into()))?;

        match first_edge_node(&data, root) {
            Some(node) => Ok(Some(serde_json::from_value(node)?)),
            None => {
                trace!(root, "seed query returned no node");
                Ok(None)
            }
        }
    }
}

/// `data[root].edges[0].node`, treating null as absent.
fn first_edge_node(data: &Value, root: &str) -> Option<Value> {
    data.get(root)?
        .get("edges")?
        .get(0)?
        .get("node")
        .filter(|n| !n.is_null())
        .cloned()
}

fn session_variable(id: SessionId) -> Value {
    json!({ "id": format!("{:#x}", id.value()) })
}

fn seeded<W, T>(node: SeedNode<W>) -> Result<Seeded<T>>
where
    W: TryInto<T, Error = IndexerError>,
{
    let entity_id = node.entity.map(|e| EntityId::new(e.id));
    Ok(Seeded::new(entity_id, node.model.try_into()?))
}

#[async_trait]
impl Indexer for GraphqlIndexer {
    async fn session(&self, id: SessionId) -> Result<Option<Seeded<SessionSnapshot>>> {
        self.first_node::<WireSession>(SESSION_SEED, "chanceMasterGameModels", session_variable(id))
            .await?
            .map(seeded)
            .transpose()
    }

    async fn board(&self, id: SessionId) -> Result<Option<Seeded<BoardSnapshot>>> {
        self.first_node::<WireBoard>(BOARD_SEED, "chanceMasterGameBoardModels", session_variable(id))
            .await?
            .map(seeded)
            .transpose()
    }

    async fn clock(&self, id: SessionId) -> Result<Option<Seeded<ClockSnapshot>>> {
        let node = self
            .first_node::<WireClock>(CLOCK_SEED, "chanceMasterGameClockModels", session_variable(id))
            .await?;
        Ok(node.map(|n| Seeded::new(n.entity.map(|e| EntityId::new(e.id)), n.model.into())))
    }

    async fn claim(&self, id: SessionId) -> Result<Option<Seeded<ClaimSnapshot>>> {
        self.first_node::<WireClaim>(CLAIM_SEED, "chanceMasterGameClaimModels", session_variable(id))
            .await?
            .map(seeded)
            .transpose()
    }

    async fn player(&self, address: &PlayerAddress) -> Result<Option<Seeded<PlayerSnapshot>>> {
        self.first_node::<WirePlayer>(
            PLAYER_SEED,
            "chanceMasterPlayerModels",
            json!({ "addr": address.to_hex() }),
        )
        .await?
        .map(seeded)
        .transpose()
    }

    async fn subscribe(&self, entity: &EntityId) -> Result<Subscription> {
        self.hub.subscribe(entity)
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Subscription hub
// ───────────────────────────────────────────────────────────────────────────

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum HubCommand {
    Subscribe {
        op: String,
        entity: EntityId,
        sender: SubscriptionSender,
    },
    Unsubscribe {
        op: String,
    },
}

struct ActiveOperation {
    entity: EntityId,
    sender: SubscriptionSender,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

enum Disconnect {
    /// Every handle to the hub is gone.
    Shutdown,
    /// The socket dropped; reconnect.
    Socket,
}

/// The process-wide websocket owner.
pub struct SubscriptionHub {
    url: Url,
    commands: mpsc::UnboundedSender<HubCommand>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<HubCommand>>>,
    started: AtomicBool,
}

static HUB: OnceLock<Arc<SubscriptionHub>> = OnceLock::new();

impl SubscriptionHub {
    /// The hub for this process, created on first call.
    pub fn global(url: Url) -> Arc<Self> {
        let hub = HUB.get_or_init(|| {
            let (commands, pending) = mpsc::unbounded_channel();
            Arc::new(Self {
                url: url.clone(),
                commands,
                pending: Mutex::new(Some(pending)),
                started: AtomicBool::new(false),
            })
        });
        if hub.url != url {
            warn!(
                existing = %hub.url,
                requested = %url,
                "subscription hub already initialised for another endpoint"
            );
        }
        hub.clone()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Spawn the connection task on first use.
    fn ensure_started(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(commands) = pending {
            debug!(url = %self.url, "starting subscription hub");
            tokio::spawn(run_hub(self.url.clone(), commands));
        }
    }

    /// Open a subscription on `entity`.
    pub fn subscribe(&self, entity: &EntityId) -> Result<Subscription> {
        self.ensure_started();
        let op = format!("{:016x}", rand::random::<u64>());
        let (subscription, sender) = Subscription::channel(entity.clone());
        self.commands
            .send(HubCommand::Subscribe {
                op: op.clone(),
                entity: entity.clone(),
                sender,
            })
            .map_err(|_| IndexerError::Closed)?;

        let commands = self.commands.clone();
        Ok(subscription.with_on_close(move || {
            let _ = commands.send(HubCommand::Unsubscribe { op });
        }))
    }
}

/// Reconnect wait after `attempt` consecutive failures.
pub fn backoff(attempt: u32) -> Duration {
    let ms = 1000u64 << attempt.min(4);
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

fn subscribe_message(op: &str, entity: &EntityId) -> Value {
    json!({
        "id": op,
        "type": "subscribe",
        "payload": { "query": ENTITY_UPDATED, "variables": { "id": entity.as_str() } }
    })
}

/// `payload.data.entityUpdated.models` of a `next` message.
fn next_models(payload: Option<Value>) -> Option<Vec<Value>> {
    let mut payload = payload?;
    let models = payload
        .get_mut("data")?
        .get_mut("entityUpdated")?
        .get_mut("models")?
        .take();
    match models {
        Value::Array(models) => Some(models),
        _ => None,
    }
}

async fn send_json(ws: &mut Socket, value: Value) -> Result<()> {
    ws.send(Message::Text(value.to_string())).await?;
    Ok(())
}

async fn connect(url: &Url) -> Result<Socket> {
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await?;

    send_json(&mut ws, json!({ "type": "connection_init" })).await?;
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                let message: ServerMessage = serde_json::from_str(&text)?;
                match message.kind.as_str() {
                    "connection_ack" => return Ok(ws),
                    "ping" => send_json(&mut ws, json!({ "type": "pong" })).await?,
                    other => trace!(kind = other, "ignoring message before ack"),
                }
            }
            Message::Close(_) => return Err(IndexerError::Closed),
            _ => {}
        }
    }
    Err(IndexerError::Closed)
}

fn apply_offline(active: &mut HashMap<String, ActiveOperation>, command: HubCommand) {
    match command {
        HubCommand::Subscribe { op, entity, sender } => {
            active.insert(op, ActiveOperation { entity, sender });
        }
        HubCommand::Unsubscribe { op } => {
            active.remove(&op);
        }
    }
}

/// Wait out a backoff while still accepting commands. Returns false on
/// shutdown.
async fn wait_offline(
    wait: Duration,
    commands: &mut mpsc::UnboundedReceiver<HubCommand>,
    active: &mut HashMap<String, ActiveOperation>,
) -> bool {
    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = commands.recv() => match cmd {
                Some(cmd) => apply_offline(active, cmd),
                None => return false,
            },
        }
    }
}

async fn run_hub(url: Url, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    let mut active: HashMap<String, ActiveOperation> = HashMap::new();
    let mut attempt: u32 = 0;

    loop {
        let mut ws = match connect(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                let wait = backoff(attempt);
                warn!(
                    url = %url,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "indexer websocket connect failed"
                );
                attempt = attempt.saturating_add(1);
                if !wait_offline(wait, &mut commands, &mut active).await {
                    return;
                }
                continue;
            }
        };
        attempt = 0;
        info!(url = %url, operations = active.len(), "indexer websocket connected");

        // 1. Re-subscribe everything that survived the last connection.
        active.retain(|_, a| !a.sender.is_closed());
        let mut resubscribed = true;
        for (op, a) in &active {
            if let Err(e) = send_json(&mut ws, subscribe_message(op, &a.entity)).await {
                warn!(error = %e, "re-subscribe failed");
                resubscribed = false;
                break;
            }
        }

        // 2. Pump until the socket drops or the hub shuts down.
        let outcome = if resubscribed {
            pump(&mut ws, &mut commands, &mut active).await
        } else {
            Disconnect::Socket
        };

        match outcome {
            Disconnect::Shutdown => {
                let _ = ws.close(None).await;
                debug!("subscription hub shut down");
                return;
            }
            Disconnect::Socket => {
                let wait = backoff(attempt);
                debug!(wait_ms = wait.as_millis() as u64, "indexer websocket dropped");
                attempt = attempt.saturating_add(1);
                if !wait_offline(wait, &mut commands, &mut active).await {
                    return;
                }
            }
        }
    }
}

async fn pump(
    ws: &mut Socket,
    commands: &mut mpsc::UnboundedReceiver<HubCommand>,
    active: &mut HashMap<String, ActiveOperation>,
) -> Disconnect {
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                None => return Disconnect::Shutdown,
                Some(HubCommand::Subscribe { op, entity, sender }) => {
                    let sent = send_json(ws, subscribe_message(&op, &entity)).await;
                    trace!(op = %op, entity = %entity, "subscribe");
                    active.insert(op, ActiveOperation { entity, sender });
                    if sent.is_err() {
                        return Disconnect::Socket;
                    }
                }
                Some(HubCommand::Unsubscribe { op }) => {
                    if active.remove(&op).is_some() {
                        trace!(op = %op, "complete");
                        if send_json(ws, json!({ "id": op, "type": "complete" })).await.is_err() {
                            return Disconnect::Socket;
                        }
                    }
                }
            },
            msg = ws.next() => match msg {
                None => return Disconnect::Socket,
                Some(Err(e)) => {
                    warn!(error = %e, "indexer websocket error");
                    return Disconnect::Socket;
                }
                Some(Ok(Message::Text(text))) => {
                    if handle_text(ws, active, &text).await.is_err() {
                        return Disconnect::Socket;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "indexer closed websocket");
                    return Disconnect::Socket;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn handle_text(
    ws: &mut Socket,
    active: &mut HashMap<String, ActiveOperation>,
    text: &str,
) -> Result<()> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "undecodable websocket message");
            return Ok(());
        }
    };

    match message.kind.as_str() {
        "next" => {
            let Some(op) = message.id else {
                return Ok(());
            };
            let Some(operation) = active.get(&op) else {
                trace!(op = %op, "update for unknown operation");
                return Ok(());
            };
            let models = next_models(message.payload).unwrap_or_default();
            let updates = decode_models(&operation.entity, models);
            if updates.is_empty() {
                return Ok(());
            }
            if !operation.sender.send(updates) {
                debug!(op = %op, entity = %operation.entity, "consumer gone, completing");
                active.remove(&op);
                send_json(ws, json!({ "id": op, "type": "complete" })).await?;
            }
        }
        "error" => {
            if let Some(op) = message.id {
                warn!(op = %op, payload = ?message.payload, "subscription error");
                active.remove(&op);
            }
        }
        "complete" => {
            if let Some(op) = message.id {
                active.remove(&op);
            }
        }
        "ping" => send_json(ws, json!({ "type": "pong" })).await?,
        other => trace!(kind = other, "ignoring websocket message"),
    }
    Ok(())
}
