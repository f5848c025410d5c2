use anyhow::Result;
use chrono::Utc;
use std::time::{Duration, Instant};

use super::interval::PROBE_TIMEOUT;
use super::types::ProbeOutcome;

/// Performs one outbound check against a target.
///
/// Implementations never retry; retry cadence belongs to the scheduler.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// HTTP GET prober.
///
/// Any status below 500 counts as reachable, client errors included: the
/// server is up and answering. Timeouts, connection failures and 5xx are
/// failures.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("autoping/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let checked_at = Utc::now();
        let start = Instant::now();

        let response = self.client.get(url).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let status_code = response.status().as_u16();
                if status_code >= 500 {
                    ProbeOutcome::failure(
                        checked_at,
                        duration_ms,
                        format!("Request failed with status code {status_code}"),
                    )
                } else {
                    ProbeOutcome::success(checked_at, duration_ms, status_code)
                }
            }
            Err(e) if e.is_timeout() => ProbeOutcome::failure(
                checked_at,
                duration_ms,
                format!("timeout of {}ms exceeded", self.timeout.as_millis()),
            ),
            Err(e) => ProbeOutcome::failure(checked_at, duration_ms, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `response` verbatim to the first connection.
    async fn serve_once(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        addr
    }

    #[tokio::test]
    async fn test_client_error_counts_as_success() {
        let addr =
            serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober.probe(&format!("http://{addr}/missing")).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.result_text, "Success: 404");
    }

    #[tokio::test]
    async fn test_server_error_counts_as_failure() {
        let addr = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober.probe(&format!("http://{addr}/")).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.result_text, "Error: Request failed with status code 503");
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HttpProber::new().unwrap();
        let outcome = prober.probe(&format!("http://{addr}/")).await;

        assert!(!outcome.succeeded);
        assert!(outcome.result_text.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let prober = HttpProber::with_timeout(Duration::from_millis(200)).unwrap();
        let outcome = prober.probe(&format!("http://{addr}/")).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.result_text, "Error: timeout of 200ms exceeded");
    }
}
