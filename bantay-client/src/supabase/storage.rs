use mirror::{BlobStorage, RemovalError, UploadError};

use super::{SupabaseClient, error_message};

impl SupabaseClient {
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{key}", self.base_url())
    }
}

impl BlobStorage for SupabaseClient {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let rejected = |message: String| UploadError::Rejected {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };
        let response = self
            .authorize(self.http.post(self.object_url(bucket, key)))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|e| rejected(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejected(error_message(status, &body)));
        }
        Ok(self.public_url(bucket, key))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), RemovalError> {
        let rejected = |message: String| RemovalError::Rejected {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };
        let url = format!("{}/storage/v1/object/{bucket}", self.base_url());
        let response = self
            .authorize(self.http.delete(url))
            .json(&serde_json::json!({ "prefixes": [key] }))
            .send()
            .await
            .map_err(|e| rejected(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejected(error_message(status, &body)));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{key}", self.base_url())
    }
}
