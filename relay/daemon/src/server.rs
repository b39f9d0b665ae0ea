//! HTTP Server
//!
//! Routes:
//! - `GET /sse/:conversation_id`: live server-sent-event stream for one
//!   conversation
//! - `GET /metrics`: pipeline status snapshot
//! - `POST /fragments`: append one raw fragment, keyed by its conversation id
//! - `POST /fragments/:partition`: append one raw fragment to a partition
//!
//! # Connection Lifecycle
//!
//! ```text
//!   GET /sse/c1
//!        │ register
//!        ▼
//!   SseAdapter::run ──frames──► ChannelSink ──► response body
//!        ▲                                          │
//!        └──── cancel ◄── client gone / shutdown ───┘
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use relay_core::{
    ChannelSink, ConversationId, Fragment, FragmentError, LogError, LogProducer, MetricsSnapshot,
    SseAdapter, StreamRegistry, WorkerPool,
};

/// Frames buffered between a drain loop and its response body
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    adapter: SseAdapter,
    pool: Arc<WorkerPool>,
    producer: LogProducer,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create handler state
    ///
    /// Cancelling `shutdown` ends every open event stream.
    pub fn new(
        registry: StreamRegistry,
        pool: Arc<WorkerPool>,
        producer: LogProducer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter: SseAdapter::new(registry),
            pool,
            producer,
            shutdown,
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sse/:conversation_id", get(stream_conversation))
        .route("/metrics", get(metrics))
        .route("/fragments", post(produce_keyed))
        .route("/fragments/:partition", post(produce_to_partition))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Handler failures
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not a fragment
    #[error("invalid fragment: {0}")]
    BadFragment(#[from] FragmentError),

    /// The log no longer accepts records
    #[error("log unavailable: {0}")]
    Log(#[from] LogError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadFragment(_) => StatusCode::BAD_REQUEST,
            Self::Log(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn stream_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    let conversation_id = ConversationId::from(conversation_id);
    let handle = state.adapter.connect(conversation_id.clone());
    let (sink, frames) = ChannelSink::new(BODY_CHANNEL_CAPACITY);
    let cancel = state.shutdown.child_token();

    // Ends the drain loop as soon as the client goes away, even while the
    // inbox is idle.
    {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = sink.closed() => cancel.cancel(),
                () = cancel.cancelled() => {}
            }
        });
    }

    {
        let adapter = state.adapter.clone();
        let mut sink = sink;
        tokio::spawn(async move {
            let report = adapter.run(handle, &mut sink, cancel.clone()).await;
            // Lets the watcher drop its sender so the body ends.
            cancel.cancel();
            debug!(
                conversation_id = %conversation_id,
                outcome = ?report.outcome,
                delivered = report.delivered,
                "Event stream finished"
            );
        });
    }

    let body = Body::from_stream(ReceiverStream::new(frames).map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.pool.snapshot())
}

/// Body of a successful produce
#[derive(Debug, Serialize)]
struct Produced {
    partition: i32,
}

async fn produce_keyed(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Produced>), ApiError> {
    let fragment = Fragment::decode(&body)?;
    let partition = state
        .producer
        .produce_keyed(&fragment.conversation_id, body)
        .await?;

    debug!(
        conversation_id = %fragment.conversation_id,
        partition,
        "Fragment produced"
    );
    Ok((StatusCode::ACCEPTED, Json(Produced { partition })))
}

async fn produce_to_partition(
    State(state): State<AppState>,
    Path(partition): Path<i32>,
    body: Bytes,
) -> Result<(StatusCode, Json<Produced>), ApiError> {
    if partition < 0 || partition as usize >= state.producer.partitions() {
        warn!(partition, "Fragment produced to a partition the pool does not serve");
    }
    state.producer.produce(partition, body).await?;
    Ok((StatusCode::ACCEPTED, Json(Produced { partition })))
}

/// Serve `router` until `shutdown` is cancelled
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use relay_core::RelayConfig;

    use crate::pipeline::Pipeline;

    struct TestServer {
        addr: SocketAddr,
        shutdown: CancellationToken,
        server: tokio::task::JoinHandle<std::io::Result<()>>,
        pipeline: Pipeline,
    }

    impl TestServer {
        async fn start(partitions: usize) -> Self {
            let mut config = RelayConfig::default();
            config.partitions = partitions;
            let pipeline = Pipeline::start(&config).await.unwrap();

            let shutdown = CancellationToken::new();
            let state = AppState::new(
                pipeline.registry.clone(),
                Arc::clone(&pipeline.pool),
                pipeline.producer.clone(),
                shutdown.clone(),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = tokio::spawn(serve(listener, router(state), shutdown.clone()));

            Self {
                addr,
                shutdown,
                server,
                pipeline,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        async fn post(&self, path: &str, fragment: &Fragment) -> reqwest::Response {
            reqwest::Client::new()
                .post(self.url(path))
                .body(fragment.encode().unwrap())
                .send()
                .await
                .unwrap()
        }

        async fn stop(self) {
            self.shutdown.cancel();
            tokio::time::timeout(Duration::from_secs(5), self.server)
                .await
                .expect("server did not stop")
                .unwrap()
                .unwrap();
            self.pipeline.shutdown().await.unwrap();
        }
    }

    /// Read SSE bytes until `frames` complete events arrived
    async fn read_frames(response: reqwest::Response, frames: usize) -> Vec<String> {
        let mut stream = response.bytes_stream();
        let mut text = String::new();
        while text.matches("\n\n").count() < frames {
            let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("event stream stalled")
                .expect("event stream ended")
                .unwrap();
            text.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        text.split_terminator("\n\n").map(str::to_string).collect()
    }

    #[tokio::test]
    async fn test_metrics_shape() {
        let server = TestServer::start(3).await;

        let value: serde_json::Value = reqwest::get(server.url("/metrics"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(value["messages_processed"], 0);
        assert_eq!(value["messages_dropped"], 0);
        assert_eq!(value["buffer_levels"], serde_json::json!([0, 0, 0]));
        assert_eq!(value["active_workers"], 3);
        assert!(value["avg_processing_ms"].is_number());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_sse_replays_buffer_then_streams_live() {
        let server = TestServer::start(2).await;
        let id = ConversationId::new("c1");

        let response = server.post("/fragments", &Fragment::text("c1", "Hello")).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        for _ in 0..100 {
            if server.pipeline.registry.buffered_len(&id) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let events = reqwest::get(server.url("/sse/c1")).await.unwrap();
        assert_eq!(
            events.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(events.headers()["cache-control"].to_str().unwrap(), "no-cache");

        server.post("/fragments", &Fragment::terminal("c1", false)).await;

        let frames = read_frames(events, 2).await;
        assert_eq!(
            frames,
            vec![
                "data: {\"message\":\"Hello\"}".to_string(),
                "data: {\"message\":\"[DONE]\"}".to_string(),
            ]
        );

        server.stop().await;
    }

    #[tokio::test]
    async fn test_bad_fragment_rejected() {
        let server = TestServer::start(1).await;

        let response = reqwest::Client::new()
            .post(server.url("/fragments"))
            .body("not a fragment")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let value: serde_json::Value = response.json().await.unwrap();
        assert!(value["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid fragment"));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_partition_is_counted_as_dropped() {
        let server = TestServer::start(2).await;

        let response = server.post("/fragments/9", &Fragment::text("c", "x")).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        let mut dropped = 0;
        for _ in 0..100 {
            dropped = server.pipeline.pool.snapshot().messages_dropped;
            if dropped == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(dropped, 1);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_stream() {
        let server = TestServer::start(1).await;
        let id = ConversationId::new("gone");

        let events = reqwest::get(server.url("/sse/gone")).await.unwrap();
        assert!(server.pipeline.registry.is_registered(&id));
        drop(events);

        let mut registered = true;
        for _ in 0..200 {
            registered = server.pipeline.registry.is_registered(&id);
            if !registered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registered);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_streams() {
        let server = TestServer::start(1).await;
        let events = reqwest::get(server.url("/sse/open")).await.unwrap();

        let reader = tokio::spawn(async move {
            let mut stream = events.bytes_stream();
            while let Some(chunk) = stream.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        });

        server.stop().await;
        tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("stream stayed open after shutdown")
            .unwrap();
    }
}
