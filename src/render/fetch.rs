//! Image sources for the renderer.
//!
//! [`ImageFetcher`] is the only network seam in rendering. The HTTP
//! implementation lives behind the `http` feature; [`StaticImageFetcher`]
//! serves pre-loaded bytes for offline rendering and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use super::images::ResourceFetchError;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, ResourceFetchError>;
}

/// Serves images from an in-memory map keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct StaticImageFetcher {
    images: HashMap<String, Bytes>,
}

impl StaticImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.insert(url, bytes);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: impl Into<Bytes>) {
        self.images.insert(url.into(), bytes.into());
    }
}

#[async_trait]
impl ImageFetcher for StaticImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, ResourceFetchError> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| ResourceFetchError::NotFound {
                url: url.to_string(),
            })
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpImageFetcher;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use tracing::debug;

    use super::ImageFetcher;
    use crate::render::images::ResourceFetchError;

    /// Fetches images over HTTP(S) with a per-request timeout and a size cap.
    #[derive(Debug, Clone)]
    pub struct HttpImageFetcher {
        client: reqwest::Client,
        max_bytes: usize,
    }

    impl HttpImageFetcher {
        pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, reqwest::Error> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout.min(Duration::from_secs(10)))
                .build()?;
            Ok(Self { client, max_bytes })
        }

        pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
            Self { client, max_bytes }
        }
    }

    #[async_trait]
    impl ImageFetcher for HttpImageFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, ResourceFetchError> {
            let transport = |err: reqwest::Error| ResourceFetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            };
            let too_large = || ResourceFetchError::TooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            };

            let mut response = self.client.get(url).send().await.map_err(transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(ResourceFetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            if response
                .content_length()
                .is_some_and(|len| len > self.max_bytes as u64)
            {
                return Err(too_large());
            }

            let mut body = BytesMut::new();
            while let Some(chunk) = response.chunk().await.map_err(transport)? {
                if body.len() + chunk.len() > self.max_bytes {
                    return Err(too_large());
                }
                body.extend_from_slice(&chunk);
            }
            debug!(url = %url, bytes = body.len(), "image_fetched");
            Ok(body.freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_fetcher_serves_known_urls() {
        let fetcher = StaticImageFetcher::new().with_image("https://x/a.png", vec![1u8, 2, 3]);
        assert_eq!(fetcher.fetch("https://x/a.png").await.unwrap(), Bytes::from_static(&[1, 2, 3]));
        let err = fetcher.fetch("https://x/missing.png").await.unwrap_err();
        assert!(matches!(err, ResourceFetchError::NotFound { .. }));
    }
}
