//! End-to-end tests of the HTTP gateway over a scriptable engine, driving
//! the router directly with `tower::ServiceExt::oneshot`.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use pagecap::auth::AuthState;
use pagecap::cache::ResponseCache;
use pagecap::engine::{PageEngine, Painter, Viewport};
use pagecap::{
    AppState, Completion, CompletionRegistry, Dispatcher, Error, RenderFailure, RenderJob,
    Result, ServerConfig,
};

#[derive(Clone, Copy)]
enum Script {
    Succeed,
    FailLoad,
    Slow(Duration),
    /// Publish this failure for the job, the way a capture-stage error would.
    Fail(RenderFailure),
}

struct StubEngine {
    script: Script,
    viewport: Viewport,
    loads: Arc<AtomicUsize>,
    registry: CompletionRegistry,
}

impl PageEngine for StubEngine {
    fn load_page(&mut self, job: &RenderJob) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::FailLoad => Err(Error::Load("unreachable host".to_string())),
            Script::Slow(delay) => {
                std::thread::sleep(delay);
                Ok(())
            }
            Script::Fail(failure) => {
                self.registry.publish(&job.id, Completion::Failed(failure));
                // Hold the worker's turn until the waiting handler has
                // consumed the failure above.
                std::thread::sleep(Duration::from_millis(200));
                Err(Error::Load("failed during capture".to_string()))
            }
            Script::Succeed => Ok(()),
        }
    }

    fn measure_height(&mut self) -> Result<u32> {
        Ok(self.viewport.height)
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn paint(&mut self, painter: &mut Painter<'_>) -> Result<()> {
        painter.clear([200, 200, 200]);
        Ok(())
    }
}

async fn state_with(script: Script, config: ServerConfig) -> (AppState, Arc<AtomicUsize>) {
    let registry = CompletionRegistry::new(Duration::from_secs(5));
    let loads = Arc::new(AtomicUsize::new(0));
    let engine = StubEngine {
        script,
        viewport: Viewport {
            width: 0,
            height: 0,
        },
        loads: loads.clone(),
        registry: registry.clone(),
    };
    let dispatcher = Dispatcher::spawn(move || Ok(engine), registry.clone())
        .await
        .unwrap();

    let cache = config
        .cache_enabled()
        .then(|| ResponseCache::new(config.cache_entries, Duration::from_secs(config.max_age_secs)));

    let state = AppState {
        dispatcher,
        registry,
        config: Arc::new(config),
        auth: AuthState::disabled(),
        cache,
    };
    (state, loads)
}

async fn app(script: Script) -> Router {
    let (state, _) = state_with(script, ServerConfig::default()).await;
    pagecap::build_router(state)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn missing_url_is_a_bad_request() {
    let response = app(Script::Succeed).await.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "400 Bad Request (empty url)");
}

#[tokio::test]
async fn malformed_url_is_a_bad_request() {
    let response = app(Script::Succeed)
        .await
        .oneshot(get("/render?url=http%3A%2F%2F%5Bbad"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response)
        .await
        .starts_with("400 Bad Request (invalid url"));
}

#[tokio::test]
async fn out_of_range_parameter_never_reaches_the_engine() {
    let (state, loads) = state_with(Script::Succeed, ServerConfig::default()).await;
    let response = pagecap::build_router(state)
        .oneshot(get("/render?url=example.com&width=5000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_string(response).await,
        "400 Bad Request (width maximum is 4096)"
    );
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsupported_method_is_rejected() {
    let request = Request::builder()
        .method("PUT")
        .uri("/render")
        .body(Body::empty())
        .unwrap();
    let response = app(Script::Succeed).await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        body_string(response).await,
        "405 Method Not Allowed (PUT)"
    );
}

#[tokio::test]
async fn post_body_renders_to_base64_png() {
    let request = Request::builder()
        .method("POST")
        .uri("/render")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"url":"example.com","format":"png","output":"base64","width":800,"height":600}"#,
        ))
        .unwrap();
    let response = app(Script::Succeed).await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let encoded = body_string(response).await;
    let bytes = BASE64.decode(encoded.trim()).unwrap();
    let img = image::load_from_memory(&bytes).unwrap();
    assert_eq!((img.width(), img.height()), (800, 600));
    assert_eq!(
        image::guess_format(&bytes).unwrap(),
        image::ImageFormat::Png
    );
}

#[tokio::test]
async fn malformed_post_body_is_a_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/render")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(Script::Succeed).await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.starts_with("400 Bad Request (invalid body:"));
}

#[tokio::test]
async fn raw_output_carries_image_headers() {
    let response = app(Script::Succeed)
        .await
        .oneshot(get("/render?url=example.com&format=png&width=32&height=16"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "inline; filename=\"http://example.com.png\""
    );
    assert_eq!(
        response.headers().get(header::SERVER).unwrap(),
        concat!("pagecap/", env!("CARGO_PKG_VERSION"))
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn html_output_embeds_a_data_uri() {
    let response = app(Script::Succeed)
        .await
        .oneshot(get("/render?url=example.com&format=png&output=html&width=8&height=8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("data:image/png;base64,"));
    assert!(body.contains("download=\"http://example.com.png\""));
}

#[tokio::test]
async fn engine_failure_maps_to_its_tag() {
    let response = app(Script::FailLoad)
        .await
        .oneshot(get("/render?url=example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_string(response).await,
        "500 Internal Server Error (render-failed)"
    );
}

#[tokio::test]
async fn context_failure_maps_to_its_tag() {
    let response = app(Script::Fail(RenderFailure::Context))
        .await
        .oneshot(get("/render?url=example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_string(response).await,
        "500 Internal Server Error (context-unavailable)"
    );
}

#[tokio::test]
async fn encode_failure_maps_to_its_tag() {
    let response = app(Script::Fail(RenderFailure::Encode))
        .await
        .oneshot(get("/render?url=example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_string(response).await,
        "500 Internal Server Error (encode-failed)"
    );
}

#[tokio::test]
async fn slow_render_times_out_with_the_deadline() {
    let config = ServerConfig {
        read_timeout_secs: 0,
        write_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (state, _) = state_with(Script::Slow(Duration::from_secs(3)), config).await;
    let response = pagecap::build_router(state)
        .oneshot(get("/render?url=example.com"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(
        body_string(response).await,
        "408 Request Timeout (after 1 seconds)"
    );
}

#[tokio::test]
async fn repeated_request_is_served_from_the_cache() {
    let config = ServerConfig {
        cache_entries: 16,
        ..ServerConfig::default()
    };
    let (state, loads) = state_with(Script::Succeed, config).await;
    let router = pagecap::build_router(state);

    let uri = "/render?url=example.com&format=png&width=16&height=16";
    let first = router.clone().oneshot(get(uri)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(
        first.headers().get(header::CACHE_CONTROL).unwrap(),
        "public,max-age=86400"
    );

    let second = router.oneshot(get(uri)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let (first_body, second_body) = (body_string(first).await, body_string(second).await);
    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn basic_auth_guards_the_render_routes() {
    let credentials = std::env::temp_dir().join(format!(
        "pagecap-test-htpasswd-{}",
        uuid::Uuid::new_v4().simple()
    ));
    {
        let mut file = std::fs::File::create(&credentials).unwrap();
        writeln!(file, "admin:{}", hex::encode(Sha256::digest(b"secret"))).unwrap();
    }

    let (state, _) = state_with(Script::Succeed, ServerConfig::default()).await;
    state.auth.reload(Some(&credentials), "pagecap").unwrap();
    let router = pagecap::build_router(state);

    let denied = router
        .clone()
        .oneshot(get("/render?url=example.com&width=8&height=8"))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        denied.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"pagecap\""
    );

    let wrong = Request::builder()
        .uri("/render?url=example.com&width=8&height=8")
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", BASE64.encode("admin:wrong")),
        )
        .body(Body::empty())
        .unwrap();
    let denied = router.clone().oneshot(wrong).await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = Request::builder()
        .uri("/render?url=example.com&width=8&height=8")
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", BASE64.encode("admin:secret")),
        )
        .body(Body::empty())
        .unwrap();
    let granted = router.clone().oneshot(allowed).await.unwrap();
    assert_eq!(granted.status(), StatusCode::OK);

    // Utility routes stay open.
    let robots = router.oneshot(get("/robots.txt")).await.unwrap();
    assert_eq!(robots.status(), StatusCode::OK);

    let _ = std::fs::remove_file(&credentials);
}

#[tokio::test]
async fn utility_routes_respond() {
    let router = app(Script::Succeed).await;
    let favicon = router.clone().oneshot(get("/favicon.ico")).await.unwrap();
    assert_eq!(favicon.status(), StatusCode::OK);

    let robots = router.oneshot(get("/robots.txt")).await.unwrap();
    assert_eq!(robots.status(), StatusCode::OK);
    assert_eq!(body_string(robots).await, "User-agent: *\nDisallow: /");
}
