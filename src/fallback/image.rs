//! Fallback image selection
//!
//! The picture looped by the encoder comes from outside this crate: either a
//! configured still image or an external compositor that renders one on
//! demand (for example a card listing the currently active channels). The
//! [`ImageSource`] trait is that seam; the server asks it once per client
//! session, and a `None` answer drops the session into null-packet keepalive
//! mode instead of failing the response.

use async_trait::async_trait;
use std::path::PathBuf;

/// Supplies the still image for a fallback session
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Produce the image to loop for one client session
    async fn fallback_image(&self) -> Option<PathBuf>;
}

/// A fixed on-disk image, checked for existence on every request
#[derive(Debug, Clone, Default)]
pub struct StaticImage {
    path: Option<PathBuf>,
}

impl StaticImage {
    /// Create a source for a configured image path (possibly absent)
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ImageSource for StaticImage {
    async fn fallback_image(&self) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        if tokio::fs::metadata(path).await.is_ok() {
            Some(path.clone())
        } else {
            tracing::warn!(path = %path.display(), "Configured fallback image not found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_image_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let source = StaticImage::new(Some(path.clone()));
        assert_eq!(source.fallback_image().await, Some(path));
    }

    #[tokio::test]
    async fn test_missing_image_yields_none() {
        let source = StaticImage::new(Some(PathBuf::from("/nonexistent/card.jpg")));
        assert_eq!(source.fallback_image().await, None);
    }

    #[tokio::test]
    async fn test_unconfigured_yields_none() {
        let source = StaticImage::new(None);
        assert_eq!(source.fallback_image().await, None);
    }
}
