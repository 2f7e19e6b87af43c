//! Application configuration
//!
//! Layered configuration: `config/default.toml`, an optional
//! environment-specific file selected by `MOLARIS_ENV`, then environment
//! variables prefixed with `MOLARIS__` (double underscore separates levels,
//! e.g. `MOLARIS__DATABASE__URL`).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub whatsapp: WhatsAppConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Frontend base URL, used for Stripe redirect targets.
    #[serde(default = "default_app_url")]
    pub app_url: String,
}

fn default_app_url() -> String {
    "http://localhost:5173".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    25
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_minutes: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_days: i64,
}

fn default_access_ttl() -> i64 {
    15
}

fn default_refresh_ttl() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    /// Stripe price id per plan.
    #[serde(default)]
    pub prices: PlanPrices,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanPrices {
    #[serde(default)]
    pub basic: String,
    #[serde(default)]
    pub professional: String,
    #[serde(default)]
    pub premium: String,
}

impl PlanPrices {
    pub fn for_plan(&self, plan: &str) -> Option<&str> {
        let price = match plan {
            "basic" => &self.basic,
            "professional" => &self.professional,
            "premium" => &self.premium,
            _ => return None,
        };
        (!price.is_empty()).then_some(price.as_str())
    }
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub business_account_id: String,
    pub webhook_verify_token: String,
    #[serde(default = "default_graph_api_base")]
    pub api_base: String,
    #[serde(default = "default_graph_api_version")]
    pub api_version: String,
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_api_version() -> String {
    "v18.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default = "default_base_folder")]
    pub base_folder: String,
}

fn default_base_folder() -> String {
    "exams".to_string()
}

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig, config::ConfigError> {
    let env = std::env::var("MOLARIS_ENV").unwrap_or_else(|_| "development".into());

    config::Config::builder()
        .add_source(config::File::with_name("config/default"))
        .add_source(config::File::with_name(&format!("config/{env}")).required(false))
        .add_source(config::Environment::with_prefix("MOLARIS").separator("__"))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prices_skip_unconfigured_plans() {
        let prices = PlanPrices {
            basic: "price_basic".into(),
            professional: String::new(),
            premium: "price_premium".into(),
        };
        assert_eq!(prices.for_plan("basic"), Some("price_basic"));
        assert_eq!(prices.for_plan("professional"), None);
        assert_eq!(prices.for_plan("premium"), Some("price_premium"));
        assert_eq!(prices.for_plan("enterprise"), None);
    }
}
