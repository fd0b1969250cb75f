pub mod cache;
pub mod config;
pub mod coordinator;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Sink, SinkExt, Stream, StreamExt};
use santa_core::{GameError, GameView, Participant, RevealRecord};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{FileCache, MemoryCache};
use crate::config::Config;
use crate::coordinator::{CoordinatorError, Session};
use crate::store::MemoryStore;

/// Cache key holding the whole document in store-less mode.
pub const DEVICE_DOCUMENT_KEY: &str = "santa.document";

#[derive(Clone)]
pub struct AppState {
    store: MemoryStore,
    config: Arc<Config>,
    sessions: Arc<AtomicU64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl AppState {
    /// In-memory store, nothing written to disk.
    pub fn new(config: Config) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }

    /// Uses `config.persist_path` or, in store-less mode,
    /// `config.cache_path` when set.
    pub async fn from_config(config: Config) -> Self {
        let store = match (&config.persist_path, &config.cache_path) {
            (Some(path), _) => MemoryStore::with_persistence(path.clone()).await,
            (None, Some(path)) => {
                MemoryStore::on_device(Arc::new(FileCache::open(path.clone())), DEVICE_DOCUMENT_KEY)
            }
            (None, None) => MemoryStore::new(),
        };
        Self::with_store(store, config)
    }

    fn with_store(store: MemoryStore, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            sessions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Configured seed offset by the number of sessions opened so far.
    fn next_seed(&self) -> Option<u64> {
        let opened = self.sessions.fetch_add(1, Ordering::Relaxed);
        self.config.seed.map(|seed| seed.wrapping_add(opened))
    }

    /// A fresh client of the shared game. Each has its own device cache.
    fn session(&self) -> Result<Session<MemoryStore, MemoryCache>, CoordinatorError> {
        let session = Session::open(
            self.config.roster.clone(),
            self.store.clone(),
            MemoryCache::default(),
            &self.config.namespace,
        )?;
        Ok(match self.next_seed() {
            Some(seed) => session.with_seed(seed),
            None => session,
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/game", get(get_game))
        .route("/game/reveal/:participant", post(reveal))
        .route("/game/reset", post(reset_game))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct GameResponse {
    roster: Vec<Participant>,
    revealed: RevealRecord,
    revealed_count: usize,
    is_complete: bool,
}

#[derive(Serialize)]
struct RevealResponse {
    giver: Participant,
    recipient: Participant,
    message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    View(GameView),
    Error { message: String, retryable: bool },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Reveal { participant: Participant },
}

fn error_response(err: &CoordinatorError) -> Response {
    let status = match err {
        CoordinatorError::Game(GameError::UnknownParticipant(_)) => StatusCode::NOT_FOUND,
        CoordinatorError::Game(_) => StatusCode::BAD_REQUEST,
        CoordinatorError::NotLoaded | CoordinatorError::GameChanged => StatusCode::CONFLICT,
        CoordinatorError::Store(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

async fn get_game(State(state): State<AppState>) -> impl IntoResponse {
    let mut session = match state.session() {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = session.ensure_assignment().await {
        return error_response(&err);
    }
    let update = match session.snapshot().await {
        Ok(update) => update,
        Err(err) => return error_response(&err),
    };

    let roster = session.roster();
    (
        StatusCode::OK,
        Json(GameResponse {
            roster: roster.participants().to_vec(),
            revealed_count: update.record.revealed_count(roster),
            is_complete: update.is_complete,
            revealed: update.record,
        }),
    )
        .into_response()
}

async fn reveal(
    State(state): State<AppState>,
    Path(participant): Path<String>,
) -> impl IntoResponse {
    let mut session = match state.session() {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = session.ensure_assignment().await {
        return error_response(&err);
    }

    match session.reveal(&participant).await {
        Ok(revealed) => (
            StatusCode::OK,
            Json(RevealResponse {
                message: revealed.to_string(),
                giver: revealed.giver,
                recipient: revealed.recipient,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn reset_game(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != state.config.admin_password {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    let mut session = match state.session() {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };
    match session.reset().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let device = Uuid::new_v4();
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state).instrument(tracing::info_span!("device", %device))
    })
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (sender, receiver) = stream.split();
    run_device(sender, receiver, state).await;
}

/// One connected device. Store notifications and client messages are handled
/// one at a time on this task, so the session is never touched concurrently.
async fn run_device<Tx, Rx>(mut sender: Tx, mut receiver: Rx, state: AppState)
where
    Tx: Sink<Message, Error = axum::Error> + Unpin,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut session = match state.session() {
        Ok(session) => session,
        Err(err) => {
            let _ = send(&mut sender, &error_message(&err)).await;
            return;
        }
    };
    if let Err(err) = session.ensure_assignment().await {
        let _ = send(&mut sender, &error_message(&err)).await;
        return;
    }
    let mut updates = match session.observe().await {
        Ok(updates) => updates,
        Err(err) => {
            let _ = send(&mut sender, &error_message(&err)).await;
            return;
        }
    };
    tracing::info!("device connected");

    loop {
        let outgoing = tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                match update {
                    Ok(update) => {
                        let epoch_ended = update.assignments.is_none();
                        let view = session.apply(update);
                        if epoch_ended {
                            // Reset elsewhere: start the next game. The write
                            // comes back as another notification.
                            if let Err(err) = session.ensure_assignment().await {
                                tracing::warn!(%err, "could not start a new game");
                            }
                        }
                        ServerMessage::View(view)
                    }
                    Err(err) => error_message(&err),
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                        Ok(ClientMessage::Reveal { participant }) => {
                            match session.reveal(&participant).await {
                                Ok(_) => ServerMessage::View(session.view()),
                                Err(err) => error_message(&err),
                            }
                        }
                        Err(err) => ServerMessage::Error {
                            message: format!("bad message: {err}"),
                            retryable: false,
                        },
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        };

        if send(&mut sender, &outgoing).await.is_err() {
            break;
        }
    }
    tracing::info!("device disconnected");
}

fn error_message(err: &CoordinatorError) -> ServerMessage {
    ServerMessage::Error {
        message: err.to_string(),
        retryable: err.is_retryable(),
    }
}

async fn send<S>(sender: &mut S, message: &ServerMessage) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}
