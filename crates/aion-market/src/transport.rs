//! Network access for the marketplace: registry documents and strategy code.
//!
//! The [`RegistryTransport`] trait is the only way the marketplace touches the
//! network, which keeps every await point of refresh/install in one place.

use aion_types::error::{MarketError, MarketResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a registry document.
pub const MAX_INDEX_BYTES: usize = 16 * 1024 * 1024;

/// Fetches registry documents and strategy code.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch the raw registry document.
    async fn fetch_index(&self, url: &str) -> MarketResult<Vec<u8>>;

    /// Fetch strategy code, failing with `OversizedPackage` as soon as the
    /// body grows past `max_bytes`.
    async fn fetch_code(&self, url: &str, max_bytes: usize) -> MarketResult<String>;
}

/// Redirects followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    allow_insecure_http: bool,
}

impl HttpTransport {
    /// Create a transport with a per-request timeout.
    ///
    /// Plain `http://` URLs are refused unless `allow_insecure_http` is set.
    pub fn new(timeout: Duration, allow_insecure_http: bool) -> MarketResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("aion-market/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .redirect(redirect_policy(allow_insecure_http))
            .build()
            .map_err(|e| MarketError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            allow_insecure_http,
        })
    }

    fn check_url(&self, url: &str) -> MarketResult<()> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| MarketError::InvalidPackage(format!("invalid URL '{url}': {e}")))?;
        if scheme_allowed(parsed.scheme(), self.allow_insecure_http) {
            Ok(())
        } else {
            Err(MarketError::SecurityError(format!(
                "refusing '{}' URL, an encrypted transport is required: {url}",
                parsed.scheme()
            )))
        }
    }

    async fn get(&self, url: &str) -> MarketResult<reqwest::Response> {
        self.check_url(url)?;
        debug!(url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_redirect() {
                    MarketError::SecurityError(format!("GET {url}: redirect refused: {e}"))
                } else {
                    MarketError::NetworkFailure(format!("GET {url}: {e}"))
                }
            })?;
        if !resp.status().is_success() {
            return Err(MarketError::NetworkFailure(format!(
                "GET {url} returned {}",
                resp.status()
            )));
        }
        Ok(resp)
    }
}

fn scheme_allowed(scheme: &str, allow_insecure_http: bool) -> bool {
    scheme == "https" || (allow_insecure_http && scheme == "http")
}

/// Every redirect hop must satisfy the same scheme rule as the first request.
fn redirect_policy(allow_insecure_http: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if scheme_allowed(attempt.url().scheme(), allow_insecure_http) {
            attempt.follow()
        } else {
            let target = attempt.url().to_string();
            attempt.error(format!("redirect to non-https URL {target}"))
        }
    })
}

/// Read a response body, stopping once it exceeds `limit` bytes.
async fn read_capped(mut resp: reqwest::Response, limit: usize) -> MarketResult<Vec<u8>> {
    if let Some(len) = resp.content_length() {
        if len > limit as u64 {
            return Err(MarketError::OversizedPackage {
                size: usize::try_from(len).unwrap_or(usize::MAX),
                limit,
            });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| MarketError::NetworkFailure(format!("reading body: {e}")))?
    {
        body.extend_from_slice(&chunk);
        if body.len() > limit {
            return Err(MarketError::OversizedPackage {
                size: body.len(),
                limit,
            });
        }
    }
    Ok(body)
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn fetch_index(&self, url: &str) -> MarketResult<Vec<u8>> {
        let resp = self.get(url).await?;
        read_capped(resp, MAX_INDEX_BYTES).await.map_err(|e| match e {
            MarketError::OversizedPackage { size, limit } => MarketError::InvalidPackage(format!(
                "registry document is at least {size} bytes, limit {limit}"
            )),
            other => other,
        })
    }

    async fn fetch_code(&self, url: &str, max_bytes: usize) -> MarketResult<String> {
        let resp = self.get(url).await?;
        let body = read_capped(resp, max_bytes).await?;
        String::from_utf8(body)
            .map_err(|_| MarketError::InvalidPackage(format!("code at {url} is not UTF-8")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::Redirect;
    use axum::routing::get;
    use axum::Router;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn transport(allow_insecure_http: bool) -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5), allow_insecure_http).unwrap()
    }

    #[tokio::test]
    async fn test_plain_http_refused_by_default() {
        let err = transport(false)
            .fetch_code("http://127.0.0.1:1/s1.wat", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::SecurityError(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_scheme_refused() {
        let err = transport(true)
            .fetch_index("file:///etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::SecurityError(_)));
    }

    #[tokio::test]
    async fn test_fetch_code_and_index() {
        let base = serve(
            Router::new()
                .route("/s1.wat", get(|| async { "(module)" }))
                .route("/registry.json", get(|| async { "{}" })),
        )
        .await;
        let t = transport(true);

        let code = t.fetch_code(&format!("{base}/s1.wat"), 1024).await.unwrap();
        assert_eq!(code, "(module)");
        let index = t.fetch_index(&format!("{base}/registry.json")).await.unwrap();
        assert_eq!(index, b"{}");
    }

    #[tokio::test]
    async fn test_http_error_status_is_network_failure() {
        let base = serve(Router::new()).await;
        let err = transport(true)
            .fetch_code(&format!("{base}/missing.wat"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NetworkFailure(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let base = serve(Router::new().route("/big.wat", get(|| async { "x".repeat(4096) }))).await;
        let err = transport(true)
            .fetch_code(&format!("{base}/big.wat"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::OversizedPackage { limit: 1024, .. }
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport(true)
            .fetch_index(&format!("http://{addr}/registry.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_redirect_to_other_scheme_refused() {
        let base = serve(Router::new().route(
            "/registry.json",
            get(|| async { Redirect::temporary("ftp://mirror.example/registry.json") }),
        ))
        .await;
        let err = transport(true)
            .fetch_index(&format!("{base}/registry.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::SecurityError(_)), "got {err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_allowed_redirect_followed() {
        let base = serve(
            Router::new()
                .route("/old.wat", get(|| async { Redirect::permanent("/new.wat") }))
                .route("/new.wat", get(|| async { "(module)" })),
        )
        .await;
        let code = transport(true)
            .fetch_code(&format!("{base}/old.wat"), 1024)
            .await
            .unwrap();
        assert_eq!(code, "(module)");
    }

    #[test]
    fn test_plain_http_only_when_allowed() {
        assert!(scheme_allowed("https", false));
        assert!(!scheme_allowed("http", false));
        assert!(scheme_allowed("http", true));
        assert!(!scheme_allowed("ftp", true));
        assert!(!scheme_allowed("file", true));
    }
}
