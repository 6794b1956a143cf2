use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_IMAGE_FOLDER: &str = "chat-images";
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `None` runs the relay against the in-memory chat store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub model: String,
    /// `None` disables image uploads.
    pub cloudinary: Option<CloudinaryConfig>,
    pub image_folder: String,
    pub stream_idle_timeout: Duration,
    pub max_payload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openai_api_key = get("OPENAI_API_KEY").ok_or_else(|| AppError::Configuration {
            message: "OPENAI_API_KEY must be set".to_string(),
        })?;

        let cloudinary = match (
            get("CLOUDINARY_NAME"),
            get("CLOUDINARY_API_KEY"),
            get("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => {
                Some(CloudinaryConfig { cloud_name, api_key, api_secret })
            }
            _ => None,
        };

        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DB_MAX_CONNECTIONS,
            )?,
            openai_api_key,
            openai_base_url: get("OPENAI_BASE_URL"),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            cloudinary,
            image_folder: get("IMAGE_FOLDER").unwrap_or_else(|| DEFAULT_IMAGE_FOLDER.to_string()),
            stream_idle_timeout: Duration::from_secs(parse_or(
                &get,
                "STREAM_IDLE_TIMEOUT_SECS",
                DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            )?),
            max_payload_bytes: parse_or(&get, "MAX_PAYLOAD_BYTES", DEFAULT_MAX_PAYLOAD_BYTES)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| AppError::Configuration {
            message: format!("{key} has an invalid value: '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_api_key_is_set() {
        let config = AppConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.image_folder, "chat-images");
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.max_payload_bytes, 10 * 1024 * 1024);
        assert!(config.database_url.is_none());
        assert!(config.cloudinary.is_none());
        assert!(config.openai_base_url.is_none());
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "8080")])).unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn cloudinary_requires_all_three_credentials() {
        let partial = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("CLOUDINARY_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "123"),
        ]))
        .unwrap();
        assert!(partial.cloudinary.is_none());

        let full = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("CLOUDINARY_NAME", "demo"),
            ("CLOUDINARY_API_KEY", "123"),
            ("CLOUDINARY_API_SECRET", "shh"),
            ("STREAM_IDLE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(full.cloudinary.unwrap().cloud_name, "demo");
        assert_eq!(full.stream_idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DATABASE_URL", "  "),
        ]))
        .unwrap();
        assert!(config.database_url.is_none());
    }
}
