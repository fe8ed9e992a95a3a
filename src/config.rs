//! Application configuration loaded from environment variables.
//!
//! Values are read once at startup; the auth service credentials come from
//! the same environment in local development and in deployment.

use std::env;

/// Default number of AI credits granted per UTC day to eligible tiers.
pub const DEFAULT_AI_DAILY_CREDITS: u32 = 20;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Base URL of the GoTrue-compatible auth service (e.g. `https://<ref>.supabase.co/auth/v1`)
    pub auth_url: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID hosting the Firestore database
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Daily AI credit allowance for premium and classe tiers
    pub ai_daily_credits: u32,

    // --- Secrets ---
    /// Public API key sent to the auth service in the `apikey` header
    pub auth_api_key: String,
    /// HS256 secret the auth service signs access tokens with (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            auth_url: "http://localhost:9999/auth/v1".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            ai_daily_credits: DEFAULT_AI_DAILY_CREDITS,
            auth_api_key: "test_api_key".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            auth_url: env::var("AUTH_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("AUTH_URL"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            ai_daily_credits: match env::var("AI_DAILY_CREDITS") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("AI_DAILY_CREDITS", raw))?,
                Err(_) => DEFAULT_AI_DAILY_CREDITS,
            },

            auth_api_key: env::var("AUTH_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("AUTH_API_KEY"))?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases live in one test because they share process-wide env vars.
    #[test]
    fn test_config_from_env() {
        env::set_var("AUTH_URL", "https://example.supabase.co/auth/v1/");
        env::set_var("AUTH_API_KEY", " anon-key ");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::remove_var("AI_DAILY_CREDITS");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.auth_url, "https://example.supabase.co/auth/v1");
        assert_eq!(config.auth_api_key, "anon-key");
        assert_eq!(config.ai_daily_credits, DEFAULT_AI_DAILY_CREDITS);

        env::set_var("AI_DAILY_CREDITS", "many");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("AI_DAILY_CREDITS", _)));

        env::set_var("AI_DAILY_CREDITS", "5");
        let config = Config::from_env().expect("Config should load");
        assert_eq!(config.ai_daily_credits, 5);
        env::remove_var("AI_DAILY_CREDITS");
    }
}
