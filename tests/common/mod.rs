//! In-process mock controller serving the agent's poll and duplex
//! endpoints. Scripted tasks are handed out once each, submitted results
//! are captured for assertions.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wayfarer_agent::protocol::TaskEnvelope;

#[derive(Default)]
struct MockState {
    tasks: Mutex<VecDeque<TaskEnvelope>>,
    results: Mutex<Vec<Value>>,
    checkins: AtomicUsize,
    last_agent_id: Mutex<Option<String>>,
    last_user_agent: Mutex<Option<String>>,
    last_checkin_body: Mutex<Option<String>>,
    ws_connections: AtomicUsize,
    ws_closed: AtomicUsize,
}

pub struct MockController {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockController {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/beacon", post(checkin).get(checkin))
            .route("/results", post(results))
            .route("/channel", get(channel))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Queue a task; it is handed out exactly once, over whichever
    /// endpoint asks first.
    pub fn push_task(&self, envelope: TaskEnvelope) {
        self.state.tasks.lock().unwrap().push_back(envelope);
    }

    pub fn checkins(&self) -> usize {
        self.state.checkins.load(Ordering::SeqCst)
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ws_closed(&self) -> usize {
        self.state.ws_closed.load(Ordering::SeqCst)
    }

    pub fn last_agent_id(&self) -> Option<String> {
        self.state.last_agent_id.lock().unwrap().clone()
    }

    pub fn last_user_agent(&self) -> Option<String> {
        self.state.last_user_agent.lock().unwrap().clone()
    }

    pub fn last_checkin_body(&self) -> Option<String> {
        self.state.last_checkin_body.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<Value> {
        self.state.results.lock().unwrap().clone()
    }

    /// Block until at least `n` results have been submitted.
    pub async fn results_at_least(&self, n: usize, wait: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let results = self.results();
            if results.len() >= n {
                return results;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {n} results, have {}", results.len());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Block until at least `n` duplex sockets have connected.
    pub async fn ws_connections_at_least(&self, n: usize, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        while self.ws_connections() < n {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {n} duplex connections, have {}",
                    self.ws_connections()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Block until at least `n` duplex sockets have been observed closed.
    pub async fn ws_closed_at_least(&self, n: usize, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        while self.ws_closed() < n {
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {n} closed sockets, have {}", self.ws_closed());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Envelope carrying one task.
pub fn task_envelope(id: &str, command: &str, data: Value) -> TaskEnvelope {
    TaskEnvelope {
        task_available: true,
        task_id: Some(id.to_string()),
        command: Some(command.to_string()),
        data,
    }
}

async fn checkin(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: String,
) -> Json<TaskEnvelope> {
    state.checkins.fetch_add(1, Ordering::SeqCst);
    *state.last_agent_id.lock().unwrap() = headers
        .get("agent-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *state.last_user_agent.lock().unwrap() = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *state.last_checkin_body.lock().unwrap() = Some(body);

    let envelope = state
        .tasks
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(TaskEnvelope::empty);
    Json(envelope)
}

async fn results(State(state): State<Arc<MockState>>, Json(result): Json<Value>) -> &'static str {
    state.results.lock().unwrap().push(result);
    "ok"
}

async fn channel(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<MockState>) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    let mut push_timer = tokio::time::interval(Duration::from_millis(20));

    loop {
        tokio::select! {
            _ = push_timer.tick() => {
                let pending = state.tasks.lock().unwrap().pop_front();
                if let Some(envelope) = pending {
                    let frame = serde_json::to_string(&envelope).unwrap();
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                            state.results.lock().unwrap().push(value);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.ws_closed.fetch_add(1, Ordering::SeqCst);
}
