use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub success_page_url: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub livescore_api_url: Option<String>,
    pub livescore_api_key: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub dev_mode: bool,
}

/// Requests-per-minute caps for the three public rate-limit tiers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub strict_rpm: u32,
    pub standard_rpm: u32,
    pub relaxed_rpm: u32,
}

impl RateLimitConfig {
    fn from_env() -> Self {
        fn rpm(var: &str, default: u32) -> u32 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Self {
            strict_rpm: rpm("RATE_LIMIT_STRICT_RPM", 10),
            standard_rpm: rpm("RATE_LIMIT_STANDARD_RPM", 30),
            relaxed_rpm: rpm("RATE_LIMIT_RELAXED_RPM", 60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PITCHSIDE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));
        let success_page_url = env::var("SUCCESS_PAGE_URL")
            .unwrap_or_else(|_| format!("{}/checkout/success", base_url));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "pitchside.db".to_string()),
            base_url,
            success_page_url,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            livescore_api_url: env::var("LIVESCORE_API_URL").ok(),
            livescore_api_key: env::var("LIVESCORE_API_KEY").ok(),
            rate_limit: RateLimitConfig::from_env(),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
