//! Gateway HTTP server (single port).

use crate::channels::WhatsAppSender;
use crate::config::{self, Config, Secrets};
use crate::dedup::DedupGate;
use crate::llm::{CompletionClient, OpenAiClient};
use crate::signature::{SignatureVerifier, SIGNATURE_HEADER};
use crate::store::{ConversationRepository, ConversationStore};
use crate::webhook::{Dispatcher, HandshakeParams};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Wire the production collaborators from config: JSON/in-memory store, OpenAI client, WhatsApp sender.
pub async fn build_dispatcher(config: &Config, config_path: &Path) -> Result<Dispatcher> {
    let secrets = Secrets::resolve(config)?;

    let repository: Arc<dyn ConversationRepository> =
        match config::resolve_store_path(config, config_path) {
            Some(path) => Arc::new(
                ConversationStore::open(&path, secrets.system_prompt.clone())
                    .await
                    .with_context(|| format!("opening conversation store {}", path.display()))?,
            ),
            None => {
                log::info!("conversation store: in memory (set conversation.storePath to persist)");
                Arc::new(ConversationStore::in_memory(secrets.system_prompt.clone()))
            }
        };

    let provider = OpenAiClient::new(&config.openai, secrets.openai_api_key.clone());
    let sender = WhatsAppSender::new(
        &config.whatsapp.api_base,
        &secrets.api_version,
        &secrets.phone_number_id,
        secrets.access_token.clone(),
        Duration::from_secs(config.whatsapp.send_timeout_secs),
    );

    Ok(Dispatcher::new(
        SignatureVerifier::new(secrets.app_secret.clone()),
        secrets.verify_token.clone(),
        DedupGate::new(config.dedup.window()),
        repository,
        CompletionClient::new(Arc::new(provider)),
        Arc::new(sender),
    )
    .with_history_limit(config.conversation.history_limit))
}

/// Router for the health probe and the webhook path (with and without a trailing slash).
pub fn router(state: GatewayState) -> Router {
    let path = normalize_path(&state.config.gateway.webhook_path);
    let app = if path == "/" {
        Router::new().route("/", get(webhook_verify).post(webhook_receive))
    } else {
        Router::new()
            .route("/", get(health_http))
            .route(&path, get(webhook_verify).post(webhook_receive))
            .route(&format!("{}/", path), get(webhook_verify).post(webhook_receive))
    };
    app.with_state(state)
}

/// "/webhook/" and "webhook" both become "/webhook".
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config, config_path: &Path) -> Result<()> {
    let dispatcher = build_dispatcher(&config, config_path).await?;
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = GatewayState {
        config: Arc::new(config),
        dispatcher: Arc::new(dispatcher),
    };
    let webhook_path = normalize_path(&state.config.gateway.webhook_path);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {} (webhook at {})", bind_addr, webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET {webhook} — subscribe handshake; echoes hub.challenge on success.
async fn webhook_verify(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    log::info!("webhook: GET request received");
    state
        .dispatcher
        .verify_subscription(&HandshakeParams::from_query(&query))
        .into_response()
}

/// POST {webhook} — signed event delivery. The body is taken raw so the signature covers the exact bytes.
async fn webhook_receive(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    log::info!("webhook: POST request received ({} bytes)", body.len());
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state
        .dispatcher
        .handle_event(signature, &body)
        .await
        .into_response()
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_path_normalization() {
        assert_eq!(normalize_path("/webhook"), "/webhook");
        assert_eq!(normalize_path("webhook/"), "/webhook");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/api/wa/"), "/api/wa");
    }
}
