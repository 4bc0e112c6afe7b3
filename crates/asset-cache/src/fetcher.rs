//! Asset downloading with progress reporting

use crate::error::{AssetError, Result};
use crate::types::{LoadProgress, ProgressCallback};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// A downloaded payload
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAsset {
    pub data: Bytes,
    pub content_type: String,
}

/// Source of asset bytes
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download `url`, reporting progress as chunks arrive
    async fn fetch(&self, url: &str, on_progress: Option<ProgressCallback>) -> Result<FetchedAsset>;
}

/// HTTP client for fetching media assets
pub struct HttpAssetFetcher {
    client: Client,
}

impl HttpAssetFetcher {
    /// Create a new fetcher with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str, on_progress: Option<ProgressCallback>) -> Result<FetchedAsset> {
        debug!(url = %url, "Fetching asset");

        let mut response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = %status, url = %url, "Asset requires authentication");
            return Err(AssetError::Unauthorized {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            warn!(status = %status, url = %url, "Failed to fetch asset");
            return Err(AssetError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let total = response.content_length();
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);

        while let Some(chunk) = response.chunk().await? {
            buffer.extend_from_slice(&chunk);
            if let Some(report) = &on_progress {
                report(LoadProgress::new(buffer.len() as u64, total));
            }
        }

        debug!(
            url = %url,
            size = buffer.len(),
            content_type = %content_type,
            "Fetched asset"
        );

        Ok(FetchedAsset {
            data: buffer.freeze(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port, returning the asset URL
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/media/hero", addr)
    }

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<LoadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p| s.lock().unwrap().push(p));
        (callback, seen)
    }

    fn fetcher() -> HttpAssetFetcher {
        // Local canned server; keep any ambient proxy settings out of the way
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpAssetFetcher { client }
    }

    #[tokio::test]
    async fn test_fetch_with_content_length() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 11\r\nConnection: close\r\n\r\nvideo bytes",
        )
        .await;
        let (progress, seen) = recorder();

        let fetched = fetcher().fetch(&url, Some(progress)).await.unwrap();
        assert_eq!(fetched.data.as_ref(), b"video bytes");
        assert_eq!(fetched.content_type, "video/mp4");

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.loaded, 11);
        assert_eq!(last.total, Some(11));
        assert_eq!(last.percentage, Some(100.0));
    }

    #[tokio::test]
    async fn test_fetch_without_content_length_has_no_percentage() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: image/webp\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await;
        let (progress, seen) = recorder();

        let fetched = fetcher().fetch(&url, Some(progress)).await.unwrap();
        assert_eq!(fetched.data.as_ref(), b"hello world");
        assert_eq!(fetched.content_type, "image/webp");

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.total.is_none() && p.percentage.is_none()));
        assert_eq!(seen.last().unwrap().loaded, 11);
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_octet_stream() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc").await;

        let fetched = fetcher().fetch(&url, None).await.unwrap();
        assert_eq!(fetched.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_unauthorized_statuses() {
        for (response, expected) in [
            ("HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", 401),
            ("HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", 403),
        ] {
            let url = serve_once(response).await;
            match fetcher().fetch(&url, None).await {
                Err(AssetError::Unauthorized { status, url: failed }) => {
                    assert_eq!(status, expected);
                    assert_eq!(failed, url);
                }
                other => panic!("expected unauthorized, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_not_found_is_http_error() {
        let url = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;

        let err = fetcher().fetch(&url, None).await.unwrap_err();
        assert!(matches!(err, AssetError::Http { status: 404, .. }));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_fetcher_builds() {
        assert!(HttpAssetFetcher::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_error() {
        let fetcher = HttpAssetFetcher::new(Duration::from_secs(2)).unwrap();

        let result = fetcher.fetch("http://127.0.0.1:9/hero.mp4", None).await;
        assert!(matches!(result, Err(AssetError::Fetch(_))));
    }
}
