use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::services::image_ref::ImageData;

/// Persists images written onto jobs and returns the reference to store.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, key: &str, image: &ImageData) -> Result<String, StorageError>;
}

/// Keeps images on the row itself as `data:` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineImageStore;

#[async_trait]
impl ImageStore for InlineImageStore {
    async fn put(&self, _key: &str, image: &ImageData) -> Result<String, StorageError> {
        if image.bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        Ok(image.to_data_url())
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_base_url: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Public URL an uploaded key is served from.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ImageStore for R2Client {
    async fn put(&self, key: &str, image: &ImageData) -> Result<String, StorageError> {
        if image.bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        self.bucket
            .put_object_with_content_type(key, &image.bytes, &image.mime_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(self.public_url(key))
    }
}

/// Storage key for an image belonging to a job, e.g. `tryout/<id>/photo.jpg`.
pub fn job_image_key(job_id: uuid::Uuid, name: &str, image: &ImageData) -> String {
    format!("tryout/{}/{}.{}", job_id, name, image.extension())
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Refusing to store an empty image")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inline_store_returns_data_url() {
        let image = ImageData::new(b"hello".to_vec(), "image/png");
        let url = InlineImageStore.put("ignored", &image).await.unwrap();
        assert_eq!(url, "data:image/png;base64,aGVsbG8=");
    }

    #[tokio::test]
    async fn test_inline_store_rejects_empty() {
        let image = ImageData::new(Vec::new(), "image/png");
        assert!(matches!(
            InlineImageStore.put("k", &image).await,
            Err(StorageError::Empty)
        ));
    }

    #[test]
    fn test_job_image_key() {
        let id = uuid::Uuid::nil();
        let image = ImageData::new(vec![1], "image/jpeg");
        assert_eq!(
            job_image_key(id, "photo", &image),
            "tryout/00000000-0000-0000-0000-000000000000/photo.jpg"
        );
    }
}
