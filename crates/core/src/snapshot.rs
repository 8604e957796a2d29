//! One-shot still image retrieval.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, StreamError};

/// Fetches still images from a camera's snapshot URL.
///
/// No retries and no caching: a failed fetch is reported to the caller as-is.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    client: reqwest::Client,
}

impl SnapshotFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// GET `url?w={width}&h={height}` and return the image bytes.
    pub async fn fetch(&self, url: &str, width: u32, height: u32) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .query(&[("w", width), ("h", height)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "snapshot request rejected");
            return Err(StreamError::FetchStatus(status.as_u16()));
        }

        let image = response.bytes().await?;
        tracing::debug!(url, width, height, bytes = image.len(), "snapshot fetched");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the request line.
    async fn serve_once(status: &'static str, body: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/snap.jpeg", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).lines().next().unwrap_or("").to_string()
        });

        (url, task)
    }

    #[tokio::test]
    async fn fetches_image_with_dimensions() {
        let (url, server) = serve_once("200 OK", b"\xFF\xD8jpeg").await;
        let fetcher = SnapshotFetcher::new(Duration::from_secs(5)).unwrap();

        let image = fetcher.fetch(&url, 640, 360).await.unwrap();
        assert_eq!(&image[..], b"\xFF\xD8jpeg");

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /snap.jpeg?w=640&h=360 "));
    }

    #[tokio::test]
    async fn error_status_is_a_fetch_failure() {
        let (url, _server) = serve_once("503 Service Unavailable", b"").await;
        let fetcher = SnapshotFetcher::new(Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch(&url, 640, 360).await.unwrap_err();
        assert!(matches!(err, StreamError::FetchStatus(503)));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_fetch_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/snap.jpeg", listener.local_addr().unwrap());
        drop(listener);

        let fetcher = SnapshotFetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch(&url, 640, 360).await.unwrap_err();
        assert!(matches!(err, StreamError::Fetch(_)));
    }
}
