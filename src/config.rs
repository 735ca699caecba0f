
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub gemini_api_key: Option<String>, // Absent: local deterministic scoring only
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub scoring_config_path: Option<String>,
    pub max_upload_bytes: usize,
    pub store_capacity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            scoring_config_path: None,
            max_upload_bytes: 10 * 1024 * 1024,
            store_capacity: 1_000,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("GEMINI_BASE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })
                .transpose()?
                .unwrap_or(defaults.gemini_base_url),
            gemini_model: std::env::var("GEMINI_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.gemini_model),
            scoring_config_path: std::env::var("SCORING_CONFIG_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .map(|v| {
                    v.parse::<usize>()
                        .map_err(|_| anyhow::anyhow!("MAX_UPLOAD_BYTES must be a positive number"))
                })
                .transpose()?
                .unwrap_or(defaults.max_upload_bytes),
            store_capacity: std::env::var("STORE_CAPACITY")
                .ok()
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| anyhow::anyhow!("STORE_CAPACITY must be a positive number"))
                })
                .transpose()?
                .unwrap_or(defaults.store_capacity),
        };

        if config.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES cannot be 0");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if config.gemini_api_key.is_some() {
            tracing::info!(
                "Gemini scoring enabled: {} ({})",
                config.gemini_model,
                config.gemini_base_url
            );
        } else {
            tracing::warn!("GEMINI_API_KEY not set, falling back to local deterministic scoring");
        }
        if let Some(ref path) = config.scoring_config_path {
            tracing::debug!("Scoring config path: {}", path);
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
