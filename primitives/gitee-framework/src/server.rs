//! Webhook run-loop.
//!
//! Accepts Gitee deliveries on `POST /gitee-hook`, checks the headers,
//! decodes the payload by kind and hands it to the robot's [`Handler`] on a
//! tracked task. `GET /` answers health checks.
//!
//! # Headers
//!
//! - `User-Agent`: `Robot-Gitee-Access` (access proxy) or `git-oschina-hook` (Gitee)
//! - `X-Gitee-Event`: event kind, e.g. `Merge Request Hook`
//! - `X-Gitee-Timestamp`: delivery time in milliseconds, used as the event id
//! - `X-Gitee-Token`: checked only when a webhook secret is configured

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, field};

use crate::{
    event::{Event, EventKind},
    handler::{Handler, dispatch},
    secret::TokenGenerator,
};

/// Path deliveries are posted to.
pub const HOOK_PATH: &str = "/gitee-hook";

const ACCESS_USER_AGENT: &str = "Robot-Gitee-Access";
const GITEE_USER_AGENT: &str = "git-oschina-hook";

/// Reasons a delivery is rejected before reaching the handler.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("unknown User-Agent header")]
    UnknownUserAgent,

    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("invalid X-Gitee-Token")]
    InvalidToken,

    #[error("failed to parse payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Errors that end the run-loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Listener and shutdown settings for [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub port: u16,
    pub grace_period: Duration,
    pub webhook_secret: Option<TokenGenerator>,
}

/// Turns deliveries into handler calls.
pub struct Dispatcher<H> {
    handler: Arc<H>,
    webhook_secret: Option<TokenGenerator>,
    tracker: TaskTracker,
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            webhook_secret: None,
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<TokenGenerator>) -> Self {
        self.webhook_secret = secret;
        self
    }

    /// Tracks the handler tasks this dispatcher spawns.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .route(HOOK_PATH, post(handle_hook::<H>))
            .with_state(Arc::new(self))
    }

    fn accept(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError> {
        match header(headers, "user-agent") {
            Ok(ACCESS_USER_AGENT | GITEE_USER_AGENT) => {}
            _ => return Err(WebhookError::UnknownUserAgent),
        }

        let event_type = header(headers, "x-gitee-event")?;
        let event_id = header(headers, "x-gitee-timestamp")?;

        if let Some(secret) = &self.webhook_secret {
            let token = header(headers, "x-gitee-token")?;
            if !verify_token(secret.token().as_str(), event_id, token) {
                return Err(WebhookError::InvalidToken);
            }
        }

        let kind = match event_type.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!(event_id, error = %e, "ignoring unhandled event type");
                return Ok(());
            }
        };

        let event = Event::decode(kind, body)?;

        let span = tracing::info_span!(
            "webhook",
            event_type = %kind,
            event_id,
            org = field::Empty,
            repo = field::Empty,
        );
        if let Some((org, repo)) = event.org_repo() {
            span.record("org", org);
            span.record("repo", repo);
        }

        let handler = Arc::clone(&self.handler);
        let log = span.clone();
        self.tracker.spawn(
            async move {
                if let Err(e) = dispatch(handler.as_ref(), &event, &log).await {
                    tracing::error!(error = %e, "failed to handle event");
                }
            }
            .instrument(span),
        );

        Ok(())
    }
}

async fn handle_hook<H: Handler>(
    State(dispatcher): State<Arc<Dispatcher<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match dispatcher.accept(&headers, &body) {
        Ok(()) => (StatusCode::OK, "Event received. Have a nice day.").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "rejected webhook delivery");
            e.into_response()
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(WebhookError::MissingHeader(name))
}

/// Computes Gitee's webhook signature: base64 of HMAC-SHA256 over
/// `"{timestamp}\n{secret}"` keyed by the secret.
pub fn sign(secret: &str, timestamp: &str) -> Option<String> {
    let mac = mac(secret, timestamp)?;
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

fn verify_token(secret: &str, timestamp: &str, token: &str) -> bool {
    let Some(mac) = mac(secret, timestamp) else {
        return false;
    };

    match STANDARD.decode(token) {
        Ok(expected) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn mac(secret: &str, timestamp: &str) -> Option<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b"\n");
    mac.update(secret.as_bytes());
    Some(mac)
}

/// Serves `handler` until SIGINT or SIGTERM, then waits up to the grace
/// period for in-flight events.
pub async fn run<H: Handler>(handler: H, options: RunOptions) -> Result<(), ServerError> {
    run_until(handler, options, shutdown_signal()).await
}

/// Like [`run`], but stops accepting deliveries once `shutdown` resolves.
pub async fn run_until<H, F>(handler: H, options: RunOptions, shutdown: F) -> Result<(), ServerError>
where
    H: Handler,
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher = Dispatcher::new(Arc::new(handler)).with_webhook_secret(options.webhook_secret);
    let tracker = dispatcher.tracker().clone();
    let app = dispatcher.router();

    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(%addr, path = HOOK_PATH, "listening for webhooks");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;

    tracker.close();
    if tokio::time::timeout(options.grace_period, tracker.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            pending = tracker.len(),
            "grace period elapsed with events still in flight"
        );
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NoteEvent, PullRequestEvent, PushEvent};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };
    use tokio::sync::oneshot;
    use tower::ServiceExt;
    use tracing::Span;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(EventKind, Option<String>)>>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle_pr_event(&self, event: &PullRequestEvent, _log: &Span) -> anyhow::Result<()> {
            let repo = event.org_repo().map(|(o, r)| format!("{o}/{r}"));
            self.seen.lock().unwrap().push((EventKind::PullRequest, repo));
            Ok(())
        }

        async fn handle_note_event(&self, event: &NoteEvent, _log: &Span) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push((EventKind::Note, event.body().map(str::to_string)));
            anyhow::bail!("note handler failed")
        }
    }

    fn delivery(event: &str) -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri(HOOK_PATH)
            .header("user-agent", ACCESS_USER_AGENT)
            .header("x-gitee-event", event)
            .header("x-gitee-timestamp", "1650000000000")
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    async fn settle(tracker: &TaskTracker) {
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn health_check_is_ok() {
        let router = Dispatcher::new(Arc::new(Recorder::default())).router();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, _) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn pull_request_is_dispatched() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(Arc::clone(&recorder));
        let tracker = dispatcher.tracker().clone();

        let body = r#"{"repository": {"namespace": "openeuler", "path": "kernel"}}"#;
        let request = delivery("Merge Request Hook")
            .body(Body::from(body))
            .unwrap();
        let (status, text) = send(dispatcher.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "Event received. Have a nice day.");

        settle(&tracker).await;
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(EventKind::PullRequest, Some("openeuler/kernel".to_string()))]
        );
    }

    #[tokio::test]
    async fn handler_error_still_acknowledges() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(Arc::clone(&recorder));
        let tracker = dispatcher.tracker().clone();

        let body = r#"{"comment": {"body": "/lgtm"}}"#;
        let request = delivery("Note Hook").body(Body::from(body)).unwrap();
        let (status, _) = send(dispatcher.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        settle(&tracker).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_event_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(Arc::clone(&recorder));
        let tracker = dispatcher.tracker().clone();

        let request = delivery("Tag Push Hook")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(dispatcher.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        settle(&tracker).await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_payload_is_rejected() {
        let router = Dispatcher::new(Arc::new(Recorder::default())).router();
        let request = delivery("Push Hook").body(Body::from("nope")).unwrap();
        let (status, text) = send(router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.starts_with("failed to parse payload"));
    }

    #[tokio::test]
    async fn unknown_user_agent_is_rejected() {
        let router = Dispatcher::new(Arc::new(Recorder::default())).router();
        let request = Request::builder()
            .method("POST")
            .uri(HOOK_PATH)
            .header("user-agent", "curl/8.0")
            .header("x-gitee-event", "Push Hook")
            .header("x-gitee-timestamp", "1")
            .body(Body::from("{}"))
            .unwrap();
        let (status, text) = send(router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "unknown User-Agent header");
    }

    #[tokio::test]
    async fn missing_event_header_is_rejected() {
        let router = Dispatcher::new(Arc::new(Recorder::default())).router();
        let request = Request::builder()
            .method("POST")
            .uri(HOOK_PATH)
            .header("user-agent", GITEE_USER_AGENT)
            .header("x-gitee-timestamp", "1")
            .body(Body::from("{}"))
            .unwrap();
        let (status, text) = send(router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "missing x-gitee-event header");
    }

    #[tokio::test]
    async fn webhook_token_is_checked() {
        let secret = TokenGenerator::fixed("hook-secret");
        let good = sign("hook-secret", "1650000000000").unwrap();

        let router = Dispatcher::new(Arc::new(Recorder::default()))
            .with_webhook_secret(Some(secret.clone()))
            .router();
        let request = delivery("Push Hook")
            .header("x-gitee-token", good.as_str())
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(send(router, request).await.0, StatusCode::OK);

        let router = Dispatcher::new(Arc::new(Recorder::default()))
            .with_webhook_secret(Some(secret))
            .router();
        let request = delivery("Push Hook")
            .header("x-gitee-token", sign("other", "1650000000000").unwrap())
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(send(router, request).await.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn signature_matches_known_vector() {
        let token = sign("s", "1").unwrap();
        assert!(verify_token("s", "1", &token));
        assert!(!verify_token("s", "2", &token));
        assert!(!verify_token("s", "1", "not base64!"));
    }

    struct Slow {
        delay: Duration,
        done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Handler for Slow {
        async fn handle_push_event(&self, _event: &PushEvent, _log: &Span) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.done.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    /// Starts `run_until` with a slow push handler, delivers one push event and
    /// triggers shutdown. Returns whether the handler finished and how long
    /// shutdown took.
    async fn deliver_then_stop(delay: Duration, grace_period: Duration) -> (bool, Duration) {
        let done = Arc::new(AtomicBool::new(false));
        let port = free_port();
        let (stop, stopped) = oneshot::channel::<()>();

        let handler = Slow {
            delay,
            done: Arc::clone(&done),
        };
        let options = RunOptions {
            port,
            grace_period,
            webhook_secret: None,
        };
        let server = tokio::spawn(run_until(handler, options, async move {
            let _ = stopped.await;
        }));

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap();
        let base = format!("http://127.0.0.1:{port}");
        let mut ready = false;
        for _ in 0..100 {
            if http.get(&base).send().await.is_ok() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ready, "server did not start");

        let response = http
            .post(format!("{base}{HOOK_PATH}"))
            .header("user-agent", GITEE_USER_AGENT)
            .header("x-gitee-event", "Push Hook")
            .header("x-gitee-timestamp", "1650000000000")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let started = tokio::time::Instant::now();
        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        (done.load(Ordering::SeqCst), started.elapsed())
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_events() {
        let (done, _) = deliver_then_stop(Duration::from_millis(200), Duration::from_secs(5)).await;
        assert!(done);
    }

    #[tokio::test]
    async fn shutdown_abandons_events_after_grace_period() {
        let (done, elapsed) =
            deliver_then_stop(Duration::from_secs(30), Duration::from_millis(200)).await;
        assert!(!done);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn taken_port_is_a_bind_error() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let options = RunOptions {
            port,
            grace_period: Duration::from_secs(1),
            webhook_secret: None,
        };
        let err = run_until(Recorder::default(), options, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { addr, .. } if addr.port() == port));
    }
}
