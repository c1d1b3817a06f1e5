//! HTTP surface: the request gateway in front of the broker.
//!
//! Handlers validate inbound parameters into a job envelope, submit it to
//! the dispatcher, wait on the registry with the configured deadline, and
//! encode the outcome. This step is stateless and independent per request;
//! the only shared state it touches is the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::info;

use crate::auth::AuthState;
use crate::cache::{self, ResponseCache};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::params::{OutputMode, RenderJob, RenderRequest};
use crate::registry::{Completion, CompletionRegistry};
use crate::ServerConfig;

const SERVER_IDENT: &str = concat!("pagecap/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub registry: CompletionRegistry,
    pub config: Arc<ServerConfig>,
    pub auth: AuthState,
    pub cache: Option<ResponseCache>,
}

/// Build the service router. The render handler itself stays a plain
/// handler; auth and the response cache sit in front of it as layers.
pub fn build_router(state: AppState) -> Router {
    let render = routing::get(render_get)
        .post(render_post)
        .fallback(method_not_allowed);

    let guarded = Router::new()
        .route("/", render.clone())
        .route("/render", render)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            cache::response_cache,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(guarded)
        .route("/favicon.ico", routing::get(favicon))
        .route("/robots.txt", routing::get(robots))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

async fn render_get(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match RenderRequest::from_query(&query) {
        Ok(request) => execute(&state, request).await,
        Err(err) => error_response(&err),
    }
}

async fn render_post(State(state): State<AppState>, body: Bytes) -> Response {
    match serde_json::from_slice::<RenderRequest>(&body) {
        Ok(request) => execute(&state, request).await,
        Err(err) => error_response(&Error::Validation(format!("invalid body: {}", err))),
    }
}

async fn method_not_allowed(method: Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        format!("405 Method Not Allowed ({})", method),
    )
        .into_response()
}

async fn favicon() -> StatusCode {
    StatusCode::OK
}

async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /"
}

// Validate, submit, wait, encode. Validation failures never reach the
// dispatcher; engine failures come back as completion tags, not errors.
async fn execute(state: &AppState, request: RenderRequest) -> Response {
    let job = match request.validate() {
        Ok(job) => job,
        Err(err) => return error_response(&err),
    };

    if let Err(err) = state.dispatcher.submit(job.clone()) {
        return error_response(&err);
    }

    match state.registry.wait(&job.id, state.config.wait_deadline()).await {
        None => error_response(&Error::Timeout(state.config.wait_secs())),
        Some(Completion::Failed(failure)) => error_response(&Error::Engine(failure.tag())),
        Some(Completion::Image(bytes)) => encode_output(&state.config, &job, bytes),
    }
}

/// Map a broker error onto the status line and message body the service
/// exposes.
pub fn error_response(err: &Error) -> Response {
    let (status, message) = match err {
        Error::Validation(msg) => (
            StatusCode::BAD_REQUEST,
            format!("400 Bad Request ({})", msg),
        ),
        Error::Timeout(secs) => (
            StatusCode::REQUEST_TIMEOUT,
            format!("408 Request Timeout (after {} seconds)", secs),
        ),
        Error::Engine(tag) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("500 Internal Server Error ({})", tag),
        ),
        Error::Unauthorized => (StatusCode::UNAUTHORIZED, "401 Unauthorized".to_string()),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("500 Internal Server Error ({})", other),
        ),
    };
    (status, message).into_response()
}

// Encode a successful completion per the requested output mode. Pure and
// per-request; nothing here touches shared state.
fn encode_output(config: &ServerConfig, job: &RenderJob, bytes: Vec<u8>) -> Response {
    let mut response = match job.output {
        OutputMode::Raw => {
            let disposition = format!("inline; filename=\"{}\"", job.filename())
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("inline"));
            (
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(job.format.content_type()),
                    ),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        OutputMode::Base64 => BASE64.encode(&bytes).into_response(),
        OutputMode::Html => {
            let page = format!(
                "<!DOCTYPE html><html><body><img src=\"data:image/{};base64,{}\" download=\"{}\"/></body></html>",
                job.format.as_str(),
                BASE64.encode(&bytes),
                job.filename(),
            );
            Html(page).into_response()
        }
    };

    if config.cache_enabled() {
        if let Ok(value) = format!("public,max-age={}", config.max_age_secs).parse() {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
    }
    response
}

// Gate render requests behind Basic auth when a credential file is loaded.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.auth.enabled() {
        return next.run(request).await;
    }

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    match state.auth.check(authorization.as_deref()) {
        Ok(_) => next.run(request).await,
        Err(err) => {
            let mut response = error_response(&err);
            if let Some(realm) = state.auth.realm() {
                if let Ok(value) = format!("Basic realm=\"{}\"", realm).parse() {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, value);
                }
            }
            response
        }
    }
}

// Access log plus the service-identifying headers every response carries.
async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::SERVER, HeaderValue::from_static(SERVER_IDENT));
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    let cache_status = response
        .headers()
        .get(cache::CACHE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    info!(
        target: "pagecap::http",
        method = %method,
        path = %uri.path(),
        query = uri.query().unwrap_or(""),
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        cache = %cache_status,
        "request",
    );
    response
}
