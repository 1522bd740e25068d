//! FinSight API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Rate limiting
//! - Request routing and validation
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use finsight_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedding_gate,
    llm::create_llm_gateway,
    metrics,
};
use finsight_context::{
    tools::{AccountingSource, FixtureToolExecutor, HttpAccountingSource, LiveDataToolExecutor, ToolExecutor, ToolRegistry},
    AnswerEngine, DocumentIngestor, Orchestrator, RetrievalEngine,
};
use finsight_search::{create_vector_index, VectorStore};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub answers: Arc<AnswerEngine>,
    pub ingestor: Arc<DocumentIngestor>,
}

impl AppState {
    /// Wire the engine from configuration.
    ///
    /// Fails on setup errors only: bad provider names, missing credentials
    /// for a real provider, or an unreadable index snapshot.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let embeddings = Arc::new(create_embedding_gate(&config.embedding)?);
        let index = create_vector_index(&config.vector_store).await?;
        let store = Arc::new(VectorStore::new(index, embeddings));
        let llm = create_llm_gateway(&config.llm)?;
        let generation_timeout = Duration::from_secs(config.llm.timeout_secs);

        info!(
            embedding = store.dimension(),
            vector_store = store.backend(),
            llm = llm.name(),
            "Backends configured"
        );

        let retrieval = Arc::new(
            RetrievalEngine::new(store, llm.clone())
                .with_config(&config.retrieval)
                .with_generation_timeout(generation_timeout),
        );

        let registry = Arc::new(ToolRegistry::builtin());
        let executor: Arc<dyn ToolExecutor> = if config.tools.live_data {
            let source = HttpAccountingSource::from_config(&config.accounting)?
                .map(|s| Arc::new(s) as Arc<dyn AccountingSource>);
            Arc::new(
                LiveDataToolExecutor::new(registry.clone(), source, config.cache_ttl())
                    .with_fetch_timeout(Duration::from_secs(config.accounting.timeout_secs)),
            )
        } else {
            Arc::new(FixtureToolExecutor::new(registry.clone()))
        };

        let orchestrator = Arc::new(
            Orchestrator::new(registry, executor, llm)?.with_generation_timeout(generation_timeout),
        );

        Ok(Self {
            config: Arc::new(config),
            answers: Arc::new(AnswerEngine::new(orchestrator, retrieval.clone())),
            ingestor: Arc::new(DocumentIngestor::new(retrieval)),
        })
    }

    pub fn retrieval(&self) -> &Arc<RetrievalEngine> {
        self.answers.retrieval()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        self.answers.orchestrator()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting FinSight API Gateway v{}", finsight_common::VERSION);

    // Initialize metrics
    init_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState::from_config(config).await?;
    let app = create_router(state)?;

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` overrides the configured level.
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Port 0 disables the Prometheus listener.
fn init_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> anyhow::Result<Router> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Answer endpoints
        .route("/ask", post(handlers::ask::ask))
        .route("/rag/query", post(handlers::rag::query))

        // Knowledge base endpoints
        .route(
            "/documents",
            post(handlers::documents::create_document).get(handlers::documents::list_documents),
        )
        .route("/documents/search", post(handlers::documents::search_documents))
        .route("/documents/samples", post(handlers::documents::seed_samples))
        .route(
            "/documents/{id}",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        )

        // Tool endpoints
        .route("/tools", get(handlers::tools::list_tools))
        .route("/tools/execute", post(handlers::tools::execute_tool));

    let rate_limit = &state.config.rate_limit;
    let api_routes = if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        )?;
        api_routes.layer(axum::middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                middleware::rate_limit::rate_limit_middleware(request, next, limiter.clone())
            },
        ))
    } else {
        api_routes
    };

    // Compose the app
    Ok(Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // outermost last: the id is set before it is propagated
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> Router {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        let state = AppState::from_config(config).await.unwrap();
        create_router(state).unwrap()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        };
        app.clone().oneshot(request.unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let response = send(&app, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        // a caller-supplied id is echoed back unchanged
        let request = Request::builder()
            .uri("/v1/health")
            .header("x-request-id", "req-123")
            .body(Body::empty())
            .unwrap();
        let echoed = app.clone().oneshot(request).await.unwrap();
        assert_eq!(echoed.headers()["x-request-id"], "req-123");
        assert_eq!(json_body(response).await["status"], "healthy");

        let response = send(&app, "GET", "/v1/ready", None).await;
        assert_eq!(json_body(response).await["status"], "ready");
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let app = app().await;

        let response = send(
            &app,
            "POST",
            "/v1/documents",
            Some(json!({"content": "Travel expenses need receipts.", "type": "policy", "title": "Travel"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = send(&app, "GET", &format!("/v1/documents/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["metadata"]["type"], "policy");
        assert!(body.get("embedding").is_none());

        let response = send(&app, "GET", "/v1/documents", None).await;
        assert_eq!(json_body(response).await["total"], 1);

        let response = send(&app, "DELETE", &format!("/v1/documents/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, "GET", &format!("/v1/documents/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "DOCUMENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let app = app().await;
        let response = send(&app, "POST", "/v1/documents", Some(json!({"content": ""}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_seed_samples() {
        let app = app().await;
        let response = send(&app, "POST", "/v1/documents/samples", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["ids"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ask_uses_tools() {
        let app = app().await;
        let response = send(
            &app,
            "POST",
            "/v1/ask",
            Some(json!({"question": "What's our cash flow this quarter?"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["strategy"], "tools");
        assert_eq!(body["tool_calls"][0]["name"], "get_cash_flow_analysis");
        assert!(body["tool_results"][0]["success"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn test_ask_validates_question() {
        let app = app().await;
        let response = send(&app, "POST", "/v1/ask", Some(json!({"question": ""}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rag_query_without_documents() {
        let app = app().await;
        let response = send(
            &app,
            "POST",
            "/v1/rag/query",
            Some(json!({"question": "What is our revenue?"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["sources"].as_array().unwrap().len(), 0);
        assert!((body["confidence"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_tools_endpoints() {
        let app = app().await;

        let response = send(&app, "GET", "/v1/tools", None).await;
        assert_eq!(json_body(response).await["tools"].as_array().unwrap().len(), 8);

        let response = send(
            &app,
            "POST",
            "/v1/tools/execute",
            Some(json!({"name": "calculate_kpis", "parameters": {"period": "Q1 2025"}})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["success"], true);

        let response = send(
            &app,
            "POST",
            "/v1/tools/execute",
            Some(json!({"name": "no_such_tool"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = create_router(AppState::from_config(config).await.unwrap()).unwrap();

        let first = send(&app, "GET", "/v1/health", None).await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = send(&app, "GET", "/v1/health", None).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
