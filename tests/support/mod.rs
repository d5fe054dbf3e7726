//! In-process stand-in for the embedding and chat services, served by axum
//! on an ephemeral local port.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use kb_rag::config::Config;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const DIMENSION: usize = 8;
pub const CHAT_REPLY: &str = "- The answer, from context.";
pub const EMBEDDING_KEY: &str = "test-embedding-key";
pub const CHAT_KEY: &str = "test-chat-key";

const EMBEDDINGS_PATH: &str = "/v1/embeddings";
const CHAT_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// 1-based embedding call that answers HTTP 500; later calls succeed
    pub fail_embedding_call: Option<usize>,
    pub fail_all_embeddings: bool,
    pub malformed_embeddings: bool,
    /// Sleep this long before answering an embedding call
    pub delay_embeddings: Option<Duration>,
    /// Return `data` in reverse order, each item keeping its true `index`
    pub reverse_embeddings: bool,
    pub fail_chat: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

struct MockState {
    options: Mutex<MockOptions>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    /// Store the request and return the options in force plus the number of
    /// requests seen on `path` so far, this one included
    fn record(&self, path: &str, headers: &HeaderMap, body: &Value) -> (MockOptions, usize) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut requests = self.requests.lock().unwrap();
        requests.push(RecordedRequest {
            path: path.to_string(),
            authorization,
            body: body.clone(),
        });
        let calls = requests.iter().filter(|r| r.path == path).count();
        (self.options.lock().unwrap().clone(), calls)
    }
}

pub struct MockServer {
    base_url: String,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let state = Arc::new(MockState {
            options: Mutex::new(options),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route(EMBEDDINGS_PATH, post(embeddings))
            .route(CHAT_PATH, post(chat_completions))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockServer {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn set_options(&self, options: MockOptions) {
        *self.state.options.lock().unwrap() = options;
    }

    pub fn config(&self) -> Config {
        let mut config = Config::new(EMBEDDING_KEY, CHAT_KEY);
        config.embedding.endpoint = format!("{}{}", self.base_url, EMBEDDINGS_PATH);
        config.embedding.dimension = DIMENSION;
        config.embedding.timeout = Duration::from_secs(5);
        config.chat.base_url = format!("{}/v1", self.base_url);
        config.chat.timeout = Duration::from_secs(5);
        config
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn embedding_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == EMBEDDINGS_PATH)
            .collect()
    }

    pub fn chat_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == CHAT_PATH)
            .collect()
    }

    /// Sizes of the `input` arrays of every embedding call, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.embedding_requests()
            .iter()
            .map(|r| r.body["input"].as_array().map(|a| a.len()).unwrap_or(0))
            .collect()
    }
}

/// Deterministic unit vector: byte histogram folded into `DIMENSION` buckets
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut values = vec![0.0f32; DIMENSION];
    for byte in text.bytes() {
        values[byte as usize % DIMENSION] += 1.0;
    }
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}

async fn embeddings(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (options, calls) = state.record(EMBEDDINGS_PATH, &headers, &body);

    if let Some(delay) = options.delay_embeddings {
        tokio::time::sleep(delay).await;
    }
    if options.fail_all_embeddings || options.fail_embedding_call == Some(calls) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "boom"}})),
        );
    }
    if options.malformed_embeddings {
        return (StatusCode::OK, Json(json!({"unexpected": true})));
    }

    let mut data: Vec<Value> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    json!({
                        "object": "embedding",
                        "index": i,
                        "embedding": embed_text(text.as_str().unwrap_or_default()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if options.reverse_embeddings {
        data.reverse();
    }

    (
        StatusCode::OK,
        Json(json!({"object": "list", "data": data, "model": "mock"})),
    )
}

async fn chat_completions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (options, _) = state.record(CHAT_PATH, &headers, &body);

    if options.fail_chat {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "overloaded"}})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": CHAT_REPLY},
                "finish_reason": "stop"
            }]
        })),
    )
}
