//! In-process room API

use super::{HarnessError, HarnessResult};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct Reply {
    status: StatusCode,
    body: Value,
}

#[derive(Default)]
struct Recorded {
    authorization: Vec<Option<String>>,
}

#[derive(Clone)]
struct ApiState {
    reply: Arc<Reply>,
    recorded: Arc<Mutex<Recorded>>,
}

/// Serves `POST /web-rtc/create-room` with a fixed reply
pub struct RoomApiServer {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
    task: JoinHandle<()>,
}

impl RoomApiServer {
    pub async fn start(status: StatusCode, body: Value) -> HarnessResult<Self> {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let state = ApiState {
            reply: Arc::new(Reply { status, body }),
            recorded: Arc::clone(&recorded),
        };
        let app = Router::new()
            .route("/api/web-rtc/create-room", post(create_room))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Room API server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            recorded,
            task,
        })
    }

    /// Base URL to hand to the client
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// `Authorization` header of every request, in order
    pub fn authorization_headers(&self) -> Vec<Option<String>> {
        self.recorded.lock().authorization.clone()
    }

    pub fn request_count(&self) -> HarnessResult<usize> {
        if self.task.is_finished() {
            return Err(HarnessError::ServerError("room API server stopped".into()));
        }
        Ok(self.recorded.lock().authorization.len())
    }
}

impl Drop for RoomApiServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn create_room(State(state): State<ApiState>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.recorded.lock().authorization.push(authorization);
    (state.reply.status, Json(state.reply.body.clone()))
}
