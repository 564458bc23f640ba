//! The upstream HTTP call and the stream handle wrapping its body.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// `POST {base_url}/chat/completions` with the configured key.
///
/// The timeout only covers the wait for response headers; once a body starts
/// streaming no per-chunk deadline applies. Non-2xx responses are read as text
/// and returned as [`GatewayError::Upstream`].
pub async fn send_chat_completions(
    client: &reqwest::Client,
    config: &GatewayConfig,
    body: &impl Serialize,
) -> Result<reqwest::Response> {
    let url = config.chat_completions_url();
    debug!(%url, "calling upstream");

    let request = client
        .post(&url)
        .bearer_auth(&config.upstream_api_key)
        .json(body)
        .send();

    let response = tokio::time::timeout(config.request_timeout(), request)
        .await
        .map_err(|_| GatewayError::Timeout(config.request_timeout_ms))??;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "upstream returned an error");
        return Err(GatewayError::upstream(status.as_u16(), text));
    }

    Ok(response)
}

/// The byte stream of an upstream response body.
///
/// [`release`](Self::release) drops the underlying body, which returns or
/// closes the connection. It runs at most once no matter how often it is
/// called, and also runs when the body ends and when the handle is dropped.
pub struct UpstreamStream {
    inner: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
}

impl UpstreamStream {
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_stream(response.bytes_stream())
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Some(stream.boxed()),
        }
    }

    pub fn release(&mut self) {
        if self.inner.take().is_some() {
            debug!("upstream stream released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for UpstreamStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                self.release();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for UpstreamStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> UpstreamStream {
        let items: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        UpstreamStream::from_stream(futures::stream::iter(items))
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut stream = chunks(&["a", "b"]);
        assert!(!stream.is_released());
        stream.release();
        assert!(stream.is_released());
        stream.release();
        assert!(stream.is_released());
    }

    #[test]
    fn test_released_stream_yields_nothing() {
        let mut stream = chunks(&["a"]);
        stream.release();
        let rest: Vec<_> = tokio_test::block_on(stream.by_ref().collect::<Vec<_>>());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_natural_end_releases() {
        let mut stream = chunks(&["a", "b"]);
        let items: Vec<_> = tokio_test::block_on(stream.by_ref().collect::<Vec<_>>());
        assert_eq!(items.len(), 2);
        assert!(stream.is_released());
        // Releasing a finished stream is a no-op
        stream.release();
    }

    #[test]
    fn test_drop_after_release() {
        let mut stream = chunks(&["a"]);
        stream.release();
        drop(stream);
    }
}
