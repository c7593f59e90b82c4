use std::{env, time::Duration};

const DEFAULT_DATABASE_URL: &str = "sqlite://marketbot.db";
const DEFAULT_DELIVERY_ADDRESS: &str = "Novosibirsk, pickup point #1";
const DEFAULT_PAYMENT_DETAILS: &str =
    "Transfer the total to card 0000 0000 0000 0000 and press \"I paid\".";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_WB_CARD_API_BASE: &str = "https://card.wb.ru";

/// Process-wide settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub database_url: String,
    pub delivery_address: String,
    pub payment_details: String,
    pub manager_name: String,
    pub max_quantity: u32,
    pub notify: NotifyConfig,
    pub scraper: ScraperConfig,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub bot_token: Option<String>,
    pub operator_chat_id: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub wb_card_api_base: String,
    pub max_retries: u32,
    /// Multiplier applied to every retry delay; `0.0` disables sleeping.
    pub backoff_scale: f64,
}

impl BotConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            delivery_address: env_string("DELIVERY_ADDRESS")
                .unwrap_or_else(|| DEFAULT_DELIVERY_ADDRESS.to_string()),
            payment_details: env_string("PAYMENT_DETAILS")
                .unwrap_or_else(|| DEFAULT_PAYMENT_DETAILS.to_string()),
            manager_name: env_string("MANAGER_NAME").unwrap_or_else(|| "manager".to_string()),
            max_quantity: env::var("MAX_QUANTITY")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(99),
            notify: NotifyConfig::from_env(),
            scraper: ScraperConfig::from_env(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            delivery_address: DEFAULT_DELIVERY_ADDRESS.to_string(),
            payment_details: DEFAULT_PAYMENT_DETAILS.to_string(),
            manager_name: "manager".to_string(),
            max_quantity: 99,
            notify: NotifyConfig::default(),
            scraper: ScraperConfig::default(),
        }
    }
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        Self {
            bot_token: env_string("BOT_TOKEN"),
            operator_chat_id: env_string("OPERATOR_CHAT_ID").or_else(|| env_string("CHAT_ID")),
            api_base: env_string("TELEGRAM_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            operator_chat_id: None,
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn from_env() -> Self {
        Self {
            wb_card_api_base: env_string("WB_CARD_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_WB_CARD_API_BASE.to_string()),
            max_retries: env::var("SCRAPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v >= 1)
                .unwrap_or(3),
            backoff_scale: env::var("SCRAPE_BACKOFF_SCALE")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(1.0),
        }
    }

    pub fn scaled(&self, seconds: f64) -> Duration {
        Duration::from_secs_f64((seconds * self.backoff_scale).max(0.0))
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            wb_card_api_base: DEFAULT_WB_CARD_API_BASE.to_string(),
            max_retries: 3,
            backoff_scale: 1.0,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_delay_honours_zero_scale() {
        let cfg = ScraperConfig {
            backoff_scale: 0.0,
            ..ScraperConfig::default()
        };
        assert_eq!(cfg.scaled(7.5), Duration::ZERO);
        let cfg = ScraperConfig {
            backoff_scale: 0.5,
            ..ScraperConfig::default()
        };
        assert_eq!(cfg.scaled(4.0), Duration::from_secs(2));
    }
}
