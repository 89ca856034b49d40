//! Threshold Wallet Service
//!
//! HTTP front end for creating threshold wallets and signing with them.
//! Every request runs a full session over in-process simulated parties.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tss_core::{KeygenConfig, Orchestrator, OrchestratorConfig};

/// Wallet service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tss-wallet-svc")]
#[command(about = "Threshold wallet service with in-process MPC parties")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Parties per wallet when a request does not say
    #[arg(short = 'n', long, env = "TSS_PARTIES", default_value_t = tss_core::DEFAULT_PARTIES)]
    parties: usize,

    /// Threshold when a request does not say
    #[arg(short, long, env = "TSS_THRESHOLD", default_value_t = tss_core::DEFAULT_THRESHOLD)]
    threshold: usize,

    /// Session deadline in seconds (0 disables)
    #[arg(long, env = "TSS_SESSION_TIMEOUT_SECS", default_value = "60")]
    session_timeout_secs: u64,
}

impl Args {
    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            parties: self.parties,
            threshold: self.threshold,
            session_timeout: (self.session_timeout_secs > 0)
                .then(|| Duration::from_secs(self.session_timeout_secs)),
        }
    }
}

/// Application state
struct AppState {
    orchestrator: Orchestrator,
}

/// Optional body of `POST /wallet`
#[derive(Debug, Default, Deserialize)]
struct CreateWalletRequest {
    parties: Option<usize>,
    threshold: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletResponse {
    address: String,
    #[serde(rename = "pubKey")]
    pub_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletsResponse {
    wallets: Vec<WalletResponse>,
}

#[derive(Debug, Deserialize)]
struct SignRequest {
    #[serde(default)]
    data: String,
    #[serde(default)]
    wallet: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignResponse {
    signature: String,
}

/// Error body `{"error": ...}` with a status derived from the failure kind
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<tss_core::Error> for ApiError {
    fn from(e: tss_core::Error) -> Self {
        let status = match &e {
            tss_core::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            tss_core::Error::WalletNotFound(_) => StatusCode::NOT_FOUND,
            tss_core::Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %e, "Request failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = args.orchestrator_config();
    KeygenConfig {
        parties: config.parties,
        threshold: config.threshold,
    }
    .validate()?;

    info!(
        listen = %args.listen,
        parties = config.parties,
        threshold = config.threshold,
        timeout = ?config.session_timeout,
        "Starting threshold wallet service"
    );

    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(config),
    });

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/wallet", post(create_wallet))
        .route("/wallets", get(list_wallets))
        .route("/sign", post(sign))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.orchestrator.config();
    Json(serde_json::json!({
        "status": "ok",
        "service": "tss-wallet-svc",
        "version": env!("CARGO_PKG_VERSION"),
        "parties": config.parties,
        "threshold": config.threshold,
        "wallets": state.orchestrator.store().len(),
    }))
}

/// Run keygen and store the new wallet
async fn create_wallet(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<WalletResponse>, ApiError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        CreateWalletRequest::default()
    } else {
        serde_json::from_slice::<CreateWalletRequest>(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?
    };

    let defaults = state.orchestrator.default_keygen();
    let config = KeygenConfig {
        parties: req.parties.unwrap_or(defaults.parties),
        threshold: req.threshold.unwrap_or(defaults.threshold),
    };

    let result = state.orchestrator.run_keygen(config).await?;
    Ok(Json(WalletResponse {
        address: result.address,
        pub_key: result.public_key_hex,
    }))
}

/// List every stored wallet
async fn list_wallets(State(state): State<Arc<AppState>>) -> Json<WalletsResponse> {
    let wallets = state
        .orchestrator
        .wallets()
        .into_iter()
        .map(|w| WalletResponse {
            address: w.address,
            pub_key: w.public_key_hex,
        })
        .collect();
    Json(WalletsResponse { wallets })
}

/// Sign hex data with a stored wallet
async fn sign(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SignResponse>, ApiError> {
    let req: SignRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;

    let signature = state.orchestrator.sign(&req.wallet, &req.data).await?;
    Ok(Json(SignResponse { signature }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn test_app() -> Router {
        app(Arc::new(AppState {
            orchestrator: Orchestrator::default(),
        }))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router) -> WalletResponse {
        let (status, body) = call(app, Method::POST, "/wallet", "").await;
        assert_eq!(status, StatusCode::OK, "{body}");
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_create_wallet() {
        let app = test_app();
        let wallet = create(&app).await;

        assert!(wallet.address.starts_with("0x"));
        assert_eq!(hex::decode(&wallet.address[2..]).unwrap().len(), 20);
        assert!(wallet.pub_key.starts_with("0x"));
        assert_eq!(hex::decode(&wallet.pub_key[2..]).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_create_wallet_with_parameters() {
        let app = test_app();
        let (status, body) = call(&app, Method::POST, "/wallet", r#"{"parties":5,"threshold":2}"#).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = call(&app, Method::POST, "/wallet", r#"{"parties":3,"threshold":2}"#).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = call(&app, Method::POST, "/wallet", r#"{"parties":3,"threshold":3}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, Method::POST, "/wallet", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_wallets() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/wallets", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wallets"].as_array().unwrap().len(), 0);

        let created = create(&app).await;
        let (status, body) = call(&app, Method::GET, "/wallets", "").await;
        assert_eq!(status, StatusCode::OK);

        let listed: WalletsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(listed.wallets.len(), 1);
        let wallet = &listed.wallets[0];
        assert_eq!(wallet.address, created.address);
        assert_eq!(hex::decode(&wallet.address[2..]).unwrap().len(), 20);
        assert_eq!(hex::decode(&wallet.pub_key[2..]).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_sign() {
        let app = test_app();
        let wallet = create(&app).await;

        let body = serde_json::json!({ "data": "0x74657374", "wallet": wallet.address }).to_string();
        let (status, body) = call(&app, Method::POST, "/sign", &body).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let response: SignResponse = serde_json::from_value(body).unwrap();
        assert!(!response.signature.is_empty());
        assert!(hex::decode(&response.signature).is_ok());
    }

    #[tokio::test]
    async fn test_sign_wallet_not_found() {
        let app = test_app();
        let body = r#"{"data":"0x74657374","wallet":"0x0000000000000000000000000000000000000000"}"#;
        let (status, body) = call(&app, Method::POST, "/sign", body).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_sign_invalid_data() {
        let app = test_app();
        let wallet = create(&app).await;

        let body = serde_json::json!({ "data": "invalid", "wallet": wallet.address }).to_string();
        let (status, _) = call(&app, Method::POST, "/sign", &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::POST, "/sign", r#"{"wallet":"0x00"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::POST, "/sign", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/health", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["wallets"], 0);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let args = Args::parse_from(["tss-wallet-svc", "--session-timeout-secs", "0"]);
        assert!(args.orchestrator_config().session_timeout.is_none());

        let args = Args::parse_from(["tss-wallet-svc", "-n", "5", "-t", "2"]);
        let config = args.orchestrator_config();
        assert_eq!((config.parties, config.threshold), (5, 2));
        assert_eq!(config.session_timeout, Some(Duration::from_secs(60)));
    }
}
