use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use herald_config::{Config, Http, Templating, HEALTH_PATH};
use herald_contracts::AlertGroup;
use herald_kernel::{ComputedValueRule, RenderSettings, Renderer, TemplateRenderer, TemplateSpec};
use tracing::{debug, error, info, warn};

pub mod backend;
pub mod dispatch;
pub mod matrix;
pub mod membership;
pub mod metrics;

#[cfg(test)]
mod testing;

pub use backend::{BackendError, ChatBackend};
pub use dispatch::{ChatDispatcher, DeliveryError, Dispatcher};
pub use matrix::MatrixClient;
pub use membership::{JoinOutcome, RoomMembership};
pub use metrics::{Metrics, PrometheusMetrics};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .http
        .listen_addr()
        .parse()
        .map_err(|e| format!("invalid listen address: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "listening for alerts");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Wires the Matrix backend, the membership cache seeded from the
/// homeserver, the compiled templates and Prometheus counters.
pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let metrics = Arc::new(PrometheusMetrics::new().map_err(|e| e.to_string())?);

    let renderer = TemplateRenderer::new(
        &template_spec(&cfg.templating),
        render_settings(&cfg.templating),
    )
    .map_err(|e| e.to_string())?;
    info!("message templates compiled");

    let timeout = Duration::from_millis(cfg.matrix.timeout_ms);
    let backend: Arc<dyn ChatBackend> = Arc::new(
        MatrixClient::new(&cfg.matrix.homeserver_url, &cfg.matrix.access_token, timeout)
            .map_err(|e| e.to_string())?,
    );
    let membership = Arc::new(
        RoomMembership::seeded(Arc::clone(&backend), timeout)
            .await
            .map_err(|e| format!("could not fetch joined rooms: {e}"))?,
    );
    let dispatcher = ChatDispatcher::new(
        backend,
        membership,
        cfg.matrix.room_mapping.clone(),
        metrics.clone(),
        timeout,
    );
    info!(homeserver = %cfg.matrix.homeserver_url, "matrix dispatcher ready");

    Ok(router(
        &cfg.http,
        Components {
            renderer: Arc::new(renderer),
            dispatcher: Arc::new(dispatcher),
            metrics,
        },
    ))
}

pub fn template_spec(templating: &Templating) -> TemplateSpec {
    TemplateSpec::new(templating.firing.clone(), templating.resolved.clone())
}

pub fn render_settings(templating: &Templating) -> RenderSettings {
    RenderSettings {
        external_url_mapping: templating.external_url_mapping.clone(),
        generator_url_mapping: templating.generator_url_mapping.clone(),
        computed_values: templating
            .computed_values
            .iter()
            .map(|rule| ComputedValueRule {
                values: rule.values.clone(),
                status: Some(rule.status_matcher.clone()).filter(|s| !s.is_empty()),
                labels: rule.label_matcher.clone(),
                annotations: rule.annotation_matcher.clone(),
            })
            .collect(),
        strict: templating.strict_mode,
    }
}

/// The collaborators a router needs; tests substitute their own.
pub struct Components {
    pub renderer: Arc<dyn Renderer>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub metrics: Arc<dyn Metrics>,
}

#[derive(Clone)]
struct AppState {
    renderer: Arc<dyn Renderer>,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: Arc<dyn Metrics>,
    credentials: Option<Arc<Credentials>>,
}

struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    fn accepts(&self, headers: &HeaderMap) -> bool {
        let Some(encoded) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded
            .split_once(':')
            .is_some_and(|(user, pass)| user == self.username && pass == self.password)
    }
}

pub fn router(http: &Http, components: Components) -> Router {
    let credentials = if http.basic_password.is_empty() {
        info!("allowing all incoming requests");
        None
    } else {
        info!(username = %http.basic_username, "basic authentication enabled");
        Some(Arc::new(Credentials {
            username: http.basic_username.clone(),
            password: http.basic_password.clone(),
        }))
    };
    let state = AppState {
        renderer: components.renderer,
        dispatcher: components.dispatcher,
        metrics: components.metrics,
        credentials,
    };

    let mut app = Router::new()
        .route(HEALTH_PATH, get(healthz))
        .route(&http.alerts_path_prefix, any(missing_room))
        .route(&format!("{}{{*room}}", http.alerts_path_prefix), any(alerts));
    if http.metrics_enabled {
        info!(path = %http.metrics_path, "metrics endpoint enabled");
        app = app.route(&http.metrics_path, get(metrics_text));
    }
    app.with_state(state)
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Some(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn missing_room(State(state): State<AppState>, method: Method) -> StatusCode {
    state.metrics.http_request();
    warn!(%method, "alerts request without a room in the path");
    StatusCode::NOT_FOUND
}

async fn alerts(
    State(state): State<AppState>,
    Path(room): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.metrics.http_request();

    if let Some(credentials) = &state.credentials {
        if !credentials.accepts(&headers) {
            state.metrics.unauthorized_request();
            error!("not authorized to perform request");
            return StatusCode::UNAUTHORIZED;
        }
    }

    if method != Method::POST {
        state.metrics.unsupported_method(method.as_str());
        error!(%method, "unsupported HTTP method used");
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let group: AlertGroup = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state.metrics.invalid_payload();
            error!(error = %e, "received invalid data");
            return StatusCode::BAD_REQUEST;
        }
    };
    debug!(%room, alerts = group.alerts.len(), "received alert group");

    for alert in &group.alerts {
        state.metrics.alert_received(&room);
        let message = match state.renderer.render(alert, &group) {
            Ok(v) => {
                state.metrics.render_succeeded();
                v
            }
            Err(e) => {
                state.metrics.render_failed();
                error!(fingerprint = %alert.fingerprint, error = %e, "cannot template alert");
                continue;
            }
        };
        if message.is_empty() {
            debug!(fingerprint = %alert.fingerprint, "template rendered nothing, skipping");
            continue;
        }
        debug!(html = %message, "created message");
        if let Err(e) = state.dispatcher.deliver(&message, &room).await {
            warn!(fingerprint = %alert.fingerprint, error = %e, "alert not delivered");
        }
    }
    StatusCode::OK
}
