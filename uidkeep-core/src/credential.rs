//! Bearer credential used to authorize access-control calls.
//!
//! A single [`CredentialProvider`] owns the current token and publishes it
//! through a `watch` channel. Readers hold a [`CredentialHandle`] and take
//! cheap `Arc` snapshots without blocking the refresh loop.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::CredentialConfig;
use crate::error::{Error, Result};
use crate::task::BackgroundTask;

const ISSUER: &str = "credential issuer";

/// Number of token characters that may appear in logs
const TOKEN_LOG_PREFIX: usize = 15;

/// A bearer token and the local time it was obtained
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    issued_at: NaiveDateTime,
}

impl Credential {
    pub fn new(token: impl Into<String>, issued_at: NaiveDateTime) -> Self {
        Self {
            token: token.into(),
            issued_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> NaiveDateTime {
        self.issued_at
    }

    /// The first few characters of the token, for log lines
    pub fn preview(&self) -> String {
        let prefix: String = self.token.chars().take(TOKEN_LOG_PREFIX).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.preview())
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Something that can hand out a fresh bearer token
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct IssuerResponse {
    status: String,
    #[serde(default)]
    token: Option<String>,
}

/// Fetches tokens with `GET {issuer_url}?uid=..&password=..`.
///
/// Only a 2xx response carrying `{"status": "live", "token": ...}` counts as
/// success.
pub struct HttpTokenIssuer {
    client: Client,
    url: String,
    identity: String,
    secret: String,
}

impl HttpTokenIssuer {
    pub fn new(config: &CredentialConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::external(ISSUER, e))?;

        Ok(Self {
            client,
            url: config.issuer_url.clone(),
            identity: config.identity.clone(),
            secret: config.secret.clone(),
        })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("uid", &self.identity), ("password", &self.secret)])
            .send()
            .await
            .map_err(|e| Error::external(ISSUER, e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::external(ISSUER, format!("HTTP {status}")));
        }

        let body: IssuerResponse = response
            .json()
            .await
            .map_err(|e| Error::external(ISSUER, e.without_url()))?;

        match body {
            IssuerResponse {
                status,
                token: Some(token),
            } if status == "live" && !token.is_empty() => Ok(token),
            IssuerResponse { status, .. } => Err(Error::external(
                ISSUER,
                format!("issuer reported status {status:?} without a usable token"),
            )),
        }
    }
}

/// Read side of the credential channel.
#[derive(Clone)]
pub struct CredentialHandle {
    rx: watch::Receiver<Option<Arc<Credential>>>,
}

impl CredentialHandle {
    /// A handle that never receives a credential, for running local-only
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    /// A handle pinned to one credential
    pub fn fixed(credential: Credential) -> Self {
        let (_tx, rx) = watch::channel(Some(Arc::new(credential)));
        Self { rx }
    }

    /// Snapshot of the latest credential, if any
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.rx.borrow().clone()
    }

    /// Like [`current`](Self::current) but as an error the mirror can log
    pub fn require(&self) -> Result<Arc<Credential>> {
        self.current().ok_or(Error::CredentialUnavailable)
    }

    pub fn is_available(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

struct ProviderInner {
    issuer: Arc<dyn TokenIssuer>,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Option<Arc<Credential>>>,
    failures: AtomicU64,
}

/// Owns the current credential and keeps it fresh.
///
/// A failed refresh keeps whatever credential was held before, since a
/// stale token is more useful to the mirror than none.
#[derive(Clone)]
pub struct CredentialProvider {
    inner: Arc<ProviderInner>,
}

impl CredentialProvider {
    pub fn new(issuer: Arc<dyn TokenIssuer>, clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(ProviderInner {
                issuer,
                clock,
                tx,
                failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn handle(&self) -> CredentialHandle {
        CredentialHandle {
            rx: self.inner.tx.subscribe(),
        }
    }

    pub fn current(&self) -> Option<Arc<Credential>> {
        self.inner.tx.borrow().clone()
    }

    /// Number of refresh attempts that failed since startup
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Fetches a new token and publishes it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ExternalCallFailed` when the issuer call fails; the
    /// previously held credential stays in place.
    pub async fn refresh(&self) -> Result<Arc<Credential>> {
        match self.inner.issuer.issue().await {
            Ok(token) => {
                let credential = Arc::new(Credential::new(token, self.inner.clock.now()));
                tracing::info!("Credential refreshed: {}", credential.preview());
                self.inner.tx.send_replace(Some(Arc::clone(&credential)));
                Ok(credential)
            }
            Err(err) => {
                let failures = self.inner.failures.fetch_add(1, Ordering::Relaxed) + 1;
                let keeping = if self.current().is_some() {
                    "keeping previous credential"
                } else {
                    "no credential held"
                };
                tracing::warn!(
                    "Credential refresh failed ({} failures so far, {}): {}",
                    failures,
                    keeping,
                    err
                );
                Err(err)
            }
        }
    }

    /// Starts the periodic refresh loop. The first refresh happens after one
    /// `interval`; call [`refresh`](Self::refresh) beforehand to obtain a
    /// credential at startup.
    pub fn spawn(&self, interval: Duration) -> BackgroundTask {
        let provider = self.clone();
        BackgroundTask::spawn("credential refresh", interval, false, move || {
            let provider = provider.clone();
            async move {
                let _ = provider.refresh().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Issuer that replays a scripted sequence of outcomes
    struct ScriptedIssuer {
        outcomes: Mutex<VecDeque<Result<String>>>,
        calls: AtomicU64,
    }

    impl ScriptedIssuer {
        fn new(outcomes: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenIssuer for ScriptedIssuer {
        async fn issue(&self) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::external(ISSUER, "script exhausted")))
        }
    }

    fn provider(issuer: Arc<ScriptedIssuer>) -> CredentialProvider {
        CredentialProvider::new(issuer, Arc::new(ManualClock::starting_now()))
    }

    #[tokio::test]
    async fn test_starts_without_credential() {
        let provider = provider(ScriptedIssuer::new(vec![]));
        assert!(provider.current().is_none());
        assert!(matches!(
            provider.handle().require(),
            Err(Error::CredentialUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_refresh_publishes_to_handles() {
        let provider = provider(ScriptedIssuer::new(vec![Ok("token-one".into())]));
        let handle = provider.handle();

        provider.refresh().await.unwrap();

        assert_eq!(handle.current().unwrap().token(), "token-one");
        assert!(handle.is_available());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_credential() {
        let provider = provider(ScriptedIssuer::new(vec![
            Ok("token-one".into()),
            Err(Error::external(ISSUER, "HTTP 503")),
        ]));
        let handle = provider.handle();

        provider.refresh().await.unwrap();
        assert!(provider.refresh().await.is_err());

        assert_eq!(handle.current().unwrap().token(), "token-one");
        assert_eq!(provider.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_later_refresh_replaces_credential() {
        let provider = provider(ScriptedIssuer::new(vec![
            Ok("token-one".into()),
            Ok("token-two".into()),
        ]));
        let handle = provider.handle();
        let first = {
            provider.refresh().await.unwrap();
            handle.current().unwrap()
        };

        provider.refresh().await.unwrap();

        // Readers holding the old snapshot keep it intact
        assert_eq!(first.token(), "token-one");
        assert_eq!(handle.current().unwrap().token(), "token-two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_refreshes_each_interval() {
        let issuer = ScriptedIssuer::new(vec![
            Ok("a".into()),
            Ok("b".into()),
            Ok("c".into()),
        ]);
        let provider = provider(Arc::clone(&issuer));

        let task = provider.spawn(Duration::from_secs(8 * 3600));
        tokio::time::sleep(Duration::from_secs(2 * 8 * 3600 + 1)).await;
        task.shutdown().await;

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.current().unwrap().token(), "b");
    }

    #[test]
    fn test_preview_hides_token_tail() {
        let credential = Credential::new(
            "eyJhbGciOiJIUzI1NiJ9.secret-part",
            ManualClock::starting_now().now(),
        );
        assert_eq!(credential.preview(), "eyJhbGciOiJIUzI...");
        assert!(!format!("{:?}", credential).contains("secret-part"));
    }

    #[test]
    fn test_issuer_response_parsing() {
        let live: IssuerResponse =
            serde_json::from_str(r#"{"status": "live", "token": "abc"}"#).unwrap();
        assert_eq!(live.status, "live");
        assert_eq!(live.token.as_deref(), Some("abc"));

        let dead: IssuerResponse = serde_json::from_str(r#"{"status": "banned"}"#).unwrap();
        assert!(dead.token.is_none());
    }

    #[test]
    fn test_none_handle_stays_empty() {
        let handle = CredentialHandle::none();
        assert!(handle.current().is_none());
        assert!(!handle.is_available());
    }

    mod http_issuer {
        use super::*;
        use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
        use serde_json::json;
        use std::collections::HashMap;

        type Params = HashMap<String, String>;

        async fn serve(app: Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            format!("http://{addr}/token")
        }

        fn issuer(url: String, timeout: Duration) -> HttpTokenIssuer {
            let config = CredentialConfig::new("100200", "s3cret")
                .with_issuer_url(url)
                .with_timeout(timeout);
            HttpTokenIssuer::new(&config).unwrap()
        }

        #[tokio::test]
        async fn test_live_token_is_returned() {
            let seen: Arc<Mutex<Vec<Params>>> = Arc::default();
            let app = Router::new().route(
                "/token",
                get({
                    let seen = Arc::clone(&seen);
                    move |Query(params): Query<Params>| {
                        let seen = Arc::clone(&seen);
                        async move {
                            seen.lock().unwrap().push(params);
                            Json(json!({"status": "live", "token": "tok-123"}))
                        }
                    }
                }),
            );
            let issuer = issuer(serve(app).await, Duration::from_secs(5));

            assert_eq!(issuer.issue().await.unwrap(), "tok-123");

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0]["uid"], "100200");
            assert_eq!(seen[0]["password"], "s3cret");
        }

        #[tokio::test]
        async fn test_status_other_than_live_is_rejected() {
            let app = Router::new().route(
                "/token",
                get(|| async { Json(json!({"status": "banned", "token": "tok-123"})) }),
            );
            let issuer = issuer(serve(app).await, Duration::from_secs(5));

            assert!(matches!(
                issuer.issue().await,
                Err(Error::ExternalCallFailed { .. })
            ));
        }

        #[tokio::test]
        async fn test_empty_or_missing_token_is_rejected() {
            let app = Router::new()
                .route("/token", get(|| async { Json(json!({"status": "live", "token": ""})) }))
                .route("/bare", get(|| async { Json(json!({"status": "live"})) }));
            let url = serve(app).await;

            let empty = issuer(url.clone(), Duration::from_secs(5));
            assert!(matches!(
                empty.issue().await,
                Err(Error::ExternalCallFailed { .. })
            ));

            let bare = issuer(url.replace("/token", "/bare"), Duration::from_secs(5));
            assert!(matches!(
                bare.issue().await,
                Err(Error::ExternalCallFailed { .. })
            ));
        }

        #[tokio::test]
        async fn test_non_success_status_is_rejected() {
            let app = Router::new().route(
                "/token",
                get(|| async {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({"status": "live", "token": "tok-123"})),
                    )
                }),
            );
            let issuer = issuer(serve(app).await, Duration::from_secs(5));

            assert!(matches!(
                issuer.issue().await,
                Err(Error::ExternalCallFailed { .. })
            ));
        }

        #[tokio::test]
        async fn test_slow_issuer_times_out() {
            let app = Router::new().route(
                "/token",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(json!({"status": "live", "token": "late"}))
                }),
            );
            let issuer = issuer(serve(app).await, Duration::from_millis(100));

            let started = std::time::Instant::now();
            assert!(matches!(
                issuer.issue().await,
                Err(Error::ExternalCallFailed { .. })
            ));
            assert!(started.elapsed() < Duration::from_secs(2));
        }

        #[tokio::test]
        async fn test_failed_http_refresh_keeps_previous_credential() {
            let app = Router::new().route("/token", get(|| async { StatusCode::BAD_GATEWAY }));
            let issuer = Arc::new(issuer(serve(app).await, Duration::from_secs(5)));
            let provider = CredentialProvider::new(issuer, Arc::new(ManualClock::starting_now()));

            assert!(provider.refresh().await.is_err());
            assert!(provider.current().is_none());
            assert_eq!(provider.failure_count(), 1);
        }
    }
}
