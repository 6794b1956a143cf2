use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::config::CloudinaryConfig;
use crate::errors::AppError;

/// Binary-object storage for images attached to turns.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Uploads a base64 image and returns its public HTTPS URL.
    async fn upload(&self, base64_payload: &str, folder: &str) -> Result<String, AppError>;
}

const CLOUDINARY_API: &str = "https://api.cloudinary.com";

/// Uploads images to Cloudinary with a signed request.
pub struct CloudinaryImageStore {
    http: reqwest::Client,
    config: CloudinaryConfig,
    api_base: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryImageStore {
    /// `timeout` bounds each upload request end to end.
    pub fn new(config: CloudinaryConfig, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::Configuration { message: format!("Failed to build HTTP client: {e}") }
        })?;
        Ok(Self { http, config, api_base: CLOUDINARY_API.to_string() })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn upload_url(&self) -> String {
        format!("{}/v1_1/{}/image/upload", self.api_base, self.config.cloud_name)
    }
}

/// Signs the upload parameters: sorted `key=value` pairs joined by `&`, then the secret.
fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(key, _)| *key);
    let joined = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{:x}", Sha256::digest(format!("{joined}{api_secret}").as_bytes()))
}

/// Bare base64 is assumed to be JPEG; payloads that already are data URLs pass through.
fn to_data_url(base64_payload: &str) -> String {
    if base64_payload.starts_with("data:") {
        base64_payload.to_string()
    } else {
        format!("data:image/jpeg;base64,{base64_payload}")
    }
}

#[async_trait]
impl ImageStore for CloudinaryImageStore {
    async fn upload(&self, base64_payload: &str, folder: &str) -> Result<String, AppError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign(
            &[("folder", folder), ("timestamp", timestamp.as_str())],
            &self.config.api_secret,
        );
        let file = to_data_url(base64_payload);
        let form = [
            ("file", file.as_str()),
            ("folder", folder),
            ("timestamp", timestamp.as_str()),
            ("api_key", self.config.api_key.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let response = self
            .http
            .post(self.upload_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!("Cloudinary request failed: {e}");
                AppError::UploadFailed { message: e.to_string() }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => format!("HTTP {status}"),
            };
            error!(%status, "Cloudinary rejected upload: {message}");
            return Err(AppError::UploadFailed { message });
        }

        let body: UploadResponse = response.json().await.map_err(|e| {
            error!("Cloudinary response unreadable: {e}");
            AppError::UploadFailed { message: e.to_string() }
        })?;
        info!(folder, url = %body.secure_url, "image uploaded");
        Ok(body.secure_url)
    }
}

/// Stand-in used when no storage credentials are configured.
pub struct DisabledImageStore;

#[async_trait]
impl ImageStore for DisabledImageStore {
    async fn upload(&self, _base64_payload: &str, _folder: &str) -> Result<String, AppError> {
        Err(AppError::UploadFailed { message: "image storage is not configured".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_sorts_params_and_appends_secret() {
        let forward = sign(&[("folder", "chat-images"), ("timestamp", "1700000000")], "secret");
        let reversed = sign(&[("timestamp", "1700000000"), ("folder", "chat-images")], "secret");
        assert_eq!(forward, reversed);
        assert_eq!(
            forward,
            "bfc4dc8b9b62a64ee0f55a370b7c1be415357c97c074ab2b1df5d5a8097d7c0a"
        );
    }

    #[test]
    fn bare_base64_gets_jpeg_data_url_prefix() {
        assert_eq!(to_data_url("QUJD"), "data:image/jpeg;base64,QUJD");
        assert_eq!(to_data_url("data:image/png;base64,QUJD"), "data:image/png;base64,QUJD");
    }

    fn store(timeout: Duration) -> CloudinaryImageStore {
        CloudinaryImageStore::new(
            CloudinaryConfig {
                cloud_name: "demo".into(),
                api_key: "k".into(),
                api_secret: "s".into(),
            },
            timeout,
        )
        .unwrap()
    }

    #[test]
    fn upload_url_uses_cloud_name() {
        let store = store(Duration::from_secs(5));
        assert_eq!(store.upload_url(), "https://api.cloudinary.com/v1_1/demo/image/upload");
    }

    #[tokio::test]
    async fn hung_upload_fails_after_the_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts connections and never answers.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = store(Duration::from_millis(200)).with_api_base(format!("http://{addr}"));
        let result =
            tokio::time::timeout(Duration::from_secs(5), store.upload("QUJD", "chat-images"))
                .await
                .expect("upload should give up on its own");

        assert!(matches!(result, Err(AppError::UploadFailed { .. })));
        server.abort();
    }

    #[tokio::test]
    async fn disabled_store_always_fails() {
        let err = DisabledImageStore.upload("QUJD", "chat-images").await.unwrap_err();
        assert!(matches!(err, AppError::UploadFailed { .. }));
    }
}
