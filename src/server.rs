//! HTTP host adapter.
//!
//! Wraps the authenticator in an axum middleware and exposes a forward-auth
//! endpoint for reverse proxies. The registry is reloaded on SIGHUP.

use std::path::PathBuf;

use anyhow::Result;
use axum::{
    Extension, Json, Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::Value;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{
    AuthExtractor, AuthRequest, AuthResult, Identity, RejectReason, RequestOrigin, authenticate,
};
use crate::keys::KeyLoader;
use crate::registry::{SharedRegistry, SiteRegistry};

/// Response header naming the authenticated user on `/auth`.
pub const USER_HEADER: HeaderName = HeaderName::from_static("x-syn-user");

/// Body of every 401/403 response.
pub const REJECTION_BODY: &str = "Token authentication failed.";

const FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORWARDED_HOST: &str = "x-forwarded-host";
const FORWARDED_METHOD: &str = "x-forwarded-method";

/// Role header as set on the request by [`require_syn_auth`], so responses
/// echo the same name even if the registry is swapped mid-request.
#[derive(Debug, Clone)]
struct AppliedRoleHeader(HeaderName, HeaderValue);

#[derive(Clone)]
pub struct AppState {
    extractor: AuthExtractor,
    /// Take scheme, host and method from `X-Forwarded-*` headers.
    trust_forwarded_headers: bool,
}

impl AppState {
    pub fn new(extractor: AuthExtractor, trust_forwarded_headers: bool) -> Self {
        Self {
            extractor,
            trust_forwarded_headers,
        }
    }
}

/// First value of a possibly comma-separated header.
fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Effective origin of a request: scheme + host + port.
pub fn request_origin(headers: &HeaderMap, uri: &Uri, trust_forwarded: bool) -> Option<RequestOrigin> {
    let forwarded = |name: &str| trust_forwarded.then(|| first_value(headers, name)).flatten();

    let scheme = forwarded(FORWARDED_PROTO)
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = forwarded(FORWARDED_HOST)
        .or_else(|| first_value(headers, header::HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.as_str()))?;

    RequestOrigin::from_host(scheme, host)
}

/// Method the client used, which a proxy may pass in `X-Forwarded-Method`.
pub fn request_method(headers: &HeaderMap, method: &Method, trust_forwarded: bool) -> Method {
    if trust_forwarded
        && let Some(forwarded) = first_value(headers, FORWARDED_METHOD)
        && let Ok(m) = Method::from_bytes(forwarded.as_bytes())
    {
        return m;
    }
    method.clone()
}

fn rejection(result: &AuthResult) -> Response {
    let status = result
        .reason()
        .map(|r| r.status_code())
        .unwrap_or(StatusCode::UNAUTHORIZED);
    (status, REJECTION_BODY).into_response()
}

/// Authentication middleware.
///
/// Passes through untouched when authentication is disabled. Otherwise the
/// [`Identity`] is stored in request extensions and, if configured, the role
/// header is set on the request for downstream handlers.
pub async fn require_syn_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let registry = state.extractor.registry().current();
    if registry.is_disabled() {
        return next.run(request).await;
    }

    let headers = request.headers();
    let origin = request_origin(headers, request.uri(), state.trust_forwarded_headers);
    let method = request_method(headers, request.method(), state.trust_forwarded_headers);
    let authorization = match headers.get(header::AUTHORIZATION).map(|v| v.to_str()) {
        // A header that is not visible ASCII cannot be a bearer credential.
        Some(Err(_)) => return rejection(&AuthResult::rejected(RejectReason::MalformedHeader)),
        Some(Ok(value)) => Some(value),
        None => None,
    };

    let result = authenticate(
        &registry,
        &AuthRequest {
            authorization,
            method: &method,
            origin: origin.as_ref(),
        },
    );

    let identity = match result {
        AuthResult::Authenticated(identity) => identity,
        rejected => return rejection(&rejected),
    };

    if let Some(role_header) = registry.role_header() {
        match HeaderValue::from_str(&identity.role_header_value()) {
            Ok(value) => {
                request.headers_mut().insert(role_header.clone(), value.clone());
                request
                    .extensions_mut()
                    .insert(AppliedRoleHeader(role_header.clone(), value));
            }
            Err(e) => warn!(error = %e, "Roles cannot be sent as a header value"),
        }
    }
    request.extensions_mut().insert(identity);

    next.run(request).await
}

/// Forward-auth endpoint: 200 with identity headers, or the rejection.
async fn forward_auth(
    identity: Option<Extension<Identity>>,
    role_header: Option<Extension<AppliedRoleHeader>>,
) -> Response {
    let Some(Extension(identity)) = identity else {
        // Authentication is disabled.
        return StatusCode::OK.into_response();
    };

    let mut headers = HeaderMap::new();
    if let Ok(user) = HeaderValue::from_str(identity.user().as_str()) {
        headers.insert(USER_HEADER, user);
    }
    if let Some(Extension(AppliedRoleHeader(name, value))) = role_header {
        headers.insert(name, value);
    }

    (StatusCode::OK, headers).into_response()
}

async fn whoami(identity: Option<Extension<Identity>>) -> Response {
    match identity {
        Some(Extension(identity)) => Json(identity).into_response(),
        None => Json(serde_json::json!({ "authentication": "disabled" })).into_response(),
    }
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Build the router: `/health` is open, `/auth` and `/whoami` are protected.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth", any(forward_auth))
        .route("/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_syn_auth));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Options for [`serve`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub bind: String,
    pub settings_path: PathBuf,
    pub key_loader: KeyLoader,
    pub trust_forwarded_headers: bool,
}

/// Load the settings, then serve until Ctrl+C or SIGTERM.
pub async fn serve(options: ServeOptions) -> Result<()> {
    let registry = SiteRegistry::load(&options.settings_path, &options.key_loader)?;
    let shared = SharedRegistry::new(registry);

    tokio::spawn(reload_on_hangup(
        shared.clone(),
        options.settings_path.clone(),
        options.key_loader.clone(),
    ));

    let state = AppState::new(AuthExtractor::new(shared), options.trust_forwarded_headers);
    let listener = tokio::net::TcpListener::bind(&options.bind).await?;
    info!("Authentication server listening on http://{}", options.bind);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Authentication server stopped");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(shared: SharedRegistry, path: PathBuf, loader: KeyLoader) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGHUP handler, reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!(path = %path.display(), "SIGHUP received, reloading settings");
        let (shared, path, loader) = (shared.clone(), path.clone(), loader.clone());
        let outcome = tokio::task::spawn_blocking(move || shared.reload(&path, &loader)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Reload failed, keeping previous settings: {}", e),
            Err(e) => error!("Reload task failed: {}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_shared: SharedRegistry, _path: PathBuf, _loader: KeyLoader) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
