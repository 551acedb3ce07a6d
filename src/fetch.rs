//! HTML retrieval: direct GET with a browser user agent, or POST through the
//! standings proxy endpoint. Both honour a cancellation token and record
//! latency into the shared histogram.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, PRAGMA};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::latency::LatencyStats;
use crate::config::{Config, ACCEPT_HTML, FETCH_RETRY_BACKOFF_MS, STANDINGS_PROXY_PATH};
use crate::error::{AppError, Result};

/// Anything that can turn a URL into HTML text.
pub trait HtmlSource: Send + Sync {
    fn fetch_html(&self, url: &str, cancel: &CancellationToken) -> impl Future<Output = Result<String>> + Send;
}

/// Request body of the standings proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub url: String,
}

/// Cooperative delay used between tab fetches. Returns `Cancelled` early
/// when the token fires.
pub async fn sleep(ms: u64, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    if ms == 0 {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

fn build_client(cfg: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    let client = Client::builder()
        .user_agent(cfg.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
        .build()?;
    Ok(client)
}

/// Send one request, racing it against the cancellation token.
async fn send_once<F, E>(send: F, cancel: &CancellationToken, on_status: E) -> Result<String>
where
    F: Future<Output = reqwest::Result<Response>>,
    E: Fn(u16, String, String) -> AppError,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = read_body(send, on_status) => res,
    }
}

/// Body text of a 2xx response; anything else goes through `on_status`.
async fn read_body<F, E>(send: F, on_status: E) -> Result<String>
where
    F: Future<Output = reqwest::Result<Response>>,
    E: Fn(u16, String, String) -> AppError,
{
    let resp = send.await?;
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    let reason = status.canonical_reason().unwrap_or("").to_string();
    Err(on_status(status.as_u16(), reason, body))
}

/// Run `attempt` once more after a short backoff when the first failure is
/// transient. Cancellation and client errors never retry.
async fn with_retry<F, Fut>(url: &str, cancel: &CancellationToken, attempt: F) -> Result<String>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    match attempt().await {
        Err(e) if e.is_transient() => {
            warn!(url, error = %e, "transient fetch failure, retrying once");
            sleep(FETCH_RETRY_BACKOFF_MS, cancel).await?;
            attempt().await
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Direct fetch
// ---------------------------------------------------------------------------

pub struct HtmlFetcher {
    client: Client,
    latency: Arc<LatencyStats>,
}

impl HtmlFetcher {
    pub fn new(cfg: &Config, latency: Arc<LatencyStats>) -> Result<Self> {
        Ok(Self {
            client: build_client(cfg)?,
            latency,
        })
    }

    pub async fn fetch_html(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let started = Instant::now();
        let res = with_retry(url, cancel, || {
            send_once(self.client.get(url).send(), cancel, |status, reason, _| {
                AppError::HttpStatus { status, reason }
            })
        })
        .await;
        self.latency.record(started.elapsed());
        match &res {
            Ok(body) => debug!(url, bytes = body.len(), "fetched html"),
            Err(e) => warn!(url, error = %e, "html fetch failed"),
        }
        res
    }
}

impl HtmlSource for HtmlFetcher {
    fn fetch_html(&self, url: &str, cancel: &CancellationToken) -> impl Future<Output = Result<String>> + Send {
        HtmlFetcher::fetch_html(self, url, cancel)
    }
}

// ---------------------------------------------------------------------------
// Proxy fetch
// ---------------------------------------------------------------------------

/// Client of the standings proxy (`POST {url}` → raw HTML).
pub struct ProxyFetcher {
    client: Client,
    endpoint: String,
    latency: Arc<LatencyStats>,
}

impl ProxyFetcher {
    pub fn new(cfg: &Config, endpoint: impl Into<String>, latency: Arc<LatencyStats>) -> Result<Self> {
        Ok(Self {
            client: build_client(cfg)?,
            endpoint: endpoint.into(),
            latency,
        })
    }

    /// One POST per call. The proxy fetches with [`HtmlFetcher`], which already
    /// retries transient failures upstream.
    pub async fn fetch_html(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let started = Instant::now();
        let body = ProxyRequest { url: url.to_string() };
        let res = send_once(self.client.post(&self.endpoint).json(&body).send(), cancel, proxy_error).await;
        self.latency.record(started.elapsed());
        match &res {
            Ok(html) => debug!(url, bytes = html.len(), "fetched html through proxy"),
            Err(e) => warn!(url, endpoint = %self.endpoint, error = %e, "proxy fetch failed"),
        }
        res
    }
}

/// Any non-2xx from the proxy carries the proxy's own message.
fn proxy_error(status: u16, reason: String, body: String) -> AppError {
    let body = body.trim();
    if body.is_empty() {
        AppError::Proxy(format!("proxy returned {status} {reason}"))
    } else {
        AppError::Proxy(body.to_string())
    }
}

impl HtmlSource for ProxyFetcher {
    fn fetch_html(&self, url: &str, cancel: &CancellationToken) -> impl Future<Output = Result<String>> + Send {
        ProxyFetcher::fetch_html(self, url, cancel)
    }
}

// ---------------------------------------------------------------------------
// Configured client
// ---------------------------------------------------------------------------

/// Direct or proxied fetching, chosen by `STANDINGS_PROXY_URL`.
pub enum HtmlClient {
    Direct(HtmlFetcher),
    Proxy(ProxyFetcher),
}

impl HtmlClient {
    pub fn from_config(cfg: &Config, latency: Arc<LatencyStats>) -> Result<Self> {
        match &cfg.standings_proxy_url {
            Some(base) => {
                let endpoint = format!("{base}{STANDINGS_PROXY_PATH}");
                Ok(Self::Proxy(ProxyFetcher::new(cfg, endpoint, latency)?))
            }
            None => Ok(Self::Direct(HtmlFetcher::new(cfg, latency)?)),
        }
    }
}

impl HtmlSource for HtmlClient {
    async fn fetch_html(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        match self {
            Self::Direct(f) => f.fetch_html(url, cancel).await,
            Self::Proxy(p) => p.fetch_html(url, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn sleep_returns_early_when_cancelled() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let started = Instant::now();
        let res = sleep(60_000, &cancel).await;
        assert!(matches!(res, Err(AppError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sleep_zero_is_immediate() {
        assert!(sleep(0, &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn retry_happens_once_for_transient_errors() {
        let calls = AtomicUsize::new(0);
        let res = with_retry("http://x", &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<String, _>(AppError::HttpStatus {
                    status: 503,
                    reason: "Service Unavailable".into(),
                })
            }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let calls = AtomicUsize::new(0);
        let res = with_retry("http://x", &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>(AppError::Proxy("bad url".into())) }
        })
        .await;
        assert_eq!(res.unwrap_err().to_string(), "bad url");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn proxy_client(base: String) -> HtmlClient {
        let cfg = Config {
            standings_proxy_url: Some(base),
            ..Config::default()
        };
        HtmlClient::from_config(&cfg, Arc::new(LatencyStats::new())).unwrap()
    }

    #[tokio::test]
    async fn proxy_posts_url_and_returns_page() {
        let app = axum::Router::new().route(
            STANDINGS_PROXY_PATH,
            axum::routing::post(|axum::Json(req): axum::Json<ProxyRequest>| async move {
                format!("<html>{}</html>", req.url)
            }),
        );
        let client = proxy_client(serve(app).await);
        let html = client
            .fetch_html("https://v9ky.in.ua/liga", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(html, "<html>https://v9ky.in.ua/liga</html>");
    }

    #[tokio::test]
    async fn proxy_server_error_keeps_message_and_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = axum::Router::new().route(
            STANDINGS_PROXY_PATH,
            axum::routing::post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::SERVICE_UNAVAILABLE, "upstream timed out")
                }
            }),
        );
        let client = proxy_client(serve(app).await);
        let err = client
            .fetch_html("https://v9ky.in.ua/liga", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream timed out");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_proxy_error_body_falls_back_to_status() {
        let err = proxy_error(429, "Too Many Requests".into(), "  ".into());
        assert_eq!(err.to_string(), "proxy returned 429 Too Many Requests");
    }

    #[tokio::test]
    async fn cancelled_token_rejects_before_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let res = with_retry("http://x", &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("never".to_string()) }
        })
        .await;
        assert!(matches!(res, Err(AppError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
