use std::path::Path;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::http::build_http_client;
use crate::core::progress::{CancelFlag, ProgressSpan};

/// An open response body, consumed chunk by chunk.
pub struct Download {
    pub url: String,
    pub total_bytes: Option<u64>,
    pub body: BoxStream<'static, ManagerResult<Vec<u8>>>,
}

/// Anything that can hand out file bodies by URL.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn open(&self, url: &str) -> ManagerResult<Download>;
}

/// Streaming HTTP file source. No overall timeout: bodies stream until EOF.
pub struct HttpFileSource {
    client: Client,
}

impl HttpFileSource {
    pub fn new() -> ManagerResult<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }
}

#[async_trait]
impl FileSource for HttpFileSource {
    async fn open(&self, url: &str) -> ManagerResult<Download> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManagerError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ManagerError::from))
            .boxed();

        Ok(Download {
            url: url.to_string(),
            total_bytes,
            body,
        })
    }
}

impl Download {
    /// Pull the next chunk, honouring cancellation and tracking byte progress.
    async fn next_chunk(
        &mut self,
        received: &mut u64,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<Option<Vec<u8>>> {
        cancel.check()?;
        let Some(chunk) = self.body.next().await else {
            return Ok(None);
        };
        let chunk = chunk?;

        *received += chunk.len() as u64;
        if let Some(total) = self.total_bytes.filter(|t| *t > 0) {
            span.set(*received as f64 / total as f64);
        }
        Ok(Some(chunk))
    }

    fn check_complete(&self, received: u64) -> ManagerResult<()> {
        match self.total_bytes {
            Some(expected) if received < expected => Err(ManagerError::TruncatedBody {
                url: self.url.clone(),
                expected,
                received,
            }),
            _ => Ok(()),
        }
    }

    /// Stream the body into `dest`, creating parent directories.
    ///
    /// Cancellation mid-body leaves the partially written file behind.
    pub async fn write_to(
        mut self,
        dest: &Path,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ManagerError::io(parent, e))?;
        }

        let mut received = 0u64;
        // Scope the handle so it is closed before returning.
        {
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| ManagerError::io(dest, e))?;

            while let Some(chunk) = self.next_chunk(&mut received, span, cancel).await? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| ManagerError::io(dest, e))?;
            }

            file.flush().await.map_err(|e| ManagerError::io(dest, e))?;
        }

        self.check_complete(received)?;
        span.set(1.0);
        debug!("Downloaded: {} -> {:?} ({} bytes)", self.url, dest, received);
        Ok(received)
    }

    /// Buffer the whole body in memory.
    pub async fn into_bytes(
        mut self,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.total_bytes.unwrap_or(0) as usize);
        let mut received = 0u64;

        while let Some(chunk) = self.next_chunk(&mut received, span, cancel).await? {
            buffer.extend_from_slice(&chunk);
        }

        self.check_complete(received)?;
        span.set(1.0);
        debug!("Buffered: {} ({} bytes)", self.url, received);
        Ok(buffer)
    }
}


#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::testing::MemoryFileSource;
    use super::*;
    use crate::core::progress::{Progress, ProgressTracker};

    #[tokio::test]
    async fn writes_body_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryFileSource::new();
        source.serve("mem://a", b"hello world".to_vec());

        let tracker = ProgressTracker::new();
        let dest = dir.path().join("nested/a.txt");
        let written = source
            .open("mem://a")
            .await
            .unwrap()
            .write_to(&dest, ProgressSpan::new(Some(&tracker)), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        assert_eq!(tracker.get_value(), 1.0);
    }

    #[tokio::test]
    async fn short_body_is_truncated() {
        let download = Download {
            url: "mem://short".into(),
            total_bytes: Some(10),
            body: stream::iter(vec![Ok(b"abc".to_vec())]).boxed(),
        };

        let err = download
            .into_bytes(ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::TruncatedBody { received: 3, .. }));
    }

    #[tokio::test]
    async fn cancelled_before_first_chunk() {
        let source = MemoryFileSource::new();
        source.serve("mem://a", b"data".to_vec());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = source
            .open("mem://a")
            .await
            .unwrap()
            .into_bytes(ProgressSpan::new(None), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Cancelled));
    }

    #[tokio::test]
    async fn sentinel_refuses_second_fetch() {
        let source = MemoryFileSource::sentinel();
        source.serve("mem://once", b"x".to_vec());
        assert!(source.open("mem://once").await.is_ok());
        assert!(matches!(
            source.open("mem://once").await,
            Err(ManagerError::DownloadFailed { status: 500, .. })
        ));
        assert_eq!(source.hits("mem://once"), 2);
    }
}
