use crate::config::NotifyConfig;
use crate::http::build_client;
use crate::store::{Order, User};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{info, warn};

#[cfg(test)]
use std::sync::{Arc, Mutex};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("chat api rejected the message: {0}")]
    Rejected(String),
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers order hand-offs to the operator chat.
#[derive(Clone)]
pub enum Notifier {
    Telegram {
        http: Client,
        endpoint: String,
        chat_id: String,
    },
    /// No operator chat configured; notices only reach the logs.
    Log,
    #[cfg(test)]
    Recording(Arc<Mutex<Vec<String>>>),
}

impl Notifier {
    pub fn from_config(config: &NotifyConfig) -> Self {
        match (&config.bot_token, &config.operator_chat_id) {
            (Some(token), Some(chat_id)) => Notifier::Telegram {
                http: build_client(),
                endpoint: format!(
                    "{}/bot{token}/sendMessage",
                    config.api_base.trim_end_matches('/')
                ),
                chat_id: chat_id.clone(),
            },
            _ => {
                warn!(target = "marketbot.notify", "operator_chat_not_configured");
                Notifier::Log
            }
        }
    }

    pub async fn notify_order(&self, order: &Order, user: &User) -> Result<(), NotifyError> {
        let text = format_order_notice(order, user);
        self.send(&text).await?;
        info!(target = "marketbot.notify", order_id = order.id, "operator_notified");
        Ok(())
    }

    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        match self {
            Notifier::Telegram {
                http,
                endpoint,
                chat_id,
            } => {
                let response = http
                    .post(endpoint)
                    .json(&json!({
                        "chat_id": chat_id,
                        "text": text,
                        "parse_mode": "HTML",
                        "disable_web_page_preview": true,
                    }))
                    .send()
                    .await
                    .map_err(|err| NotifyError::Request(err.to_string()))?;
                let status = response.status();
                let body: SendMessageResponse = response
                    .json()
                    .await
                    .map_err(|err| NotifyError::Request(format!("HTTP {status}: {err}")))?;
                if !body.ok {
                    return Err(NotifyError::Rejected(
                        body.description.unwrap_or_else(|| format!("HTTP {status}")),
                    ));
                }
                Ok(())
            }
            Notifier::Log => {
                info!(target = "marketbot.notify", text, "operator_notice");
                Ok(())
            }
            #[cfg(test)]
            Notifier::Recording(sent) => {
                if let Ok(mut sent) = sent.lock() {
                    sent.push(text.to_string());
                }
                Ok(())
            }
        }
    }
}

pub fn format_order_notice(order: &Order, user: &User) -> String {
    let mut text = String::from("📦 <b>NEW PAID ORDER</b>\n\n");
    let _ = write!(text, "👤 <b>User:</b> {}", user.user_id);
    if let Some(username) = user.username.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(text, " (@{})", escape_html(username));
    }
    text.push_str("\n\n");

    let payment = order
        .payment_method
        .map(|m| m.display_name())
        .unwrap_or("not specified");
    let _ = writeln!(text, "🧾 <b>Order:</b> #{}", order.id);
    let _ = writeln!(text, "💳 <b>Payment method:</b> {payment}");
    let _ = writeln!(
        text,
        "🚚 <b>Delivery address:</b> {}",
        escape_html(&order.delivery_address)
    );
    if let Some(time) = &order.delivery_time {
        let _ = writeln!(text, "🕒 <b>Delivery time:</b> {}", escape_html(time));
    }
    let _ = writeln!(text, "🔹 <b>Status:</b> {}\n", order.status.display_name());

    text.push_str("📋 <b>Items:</b>\n\n");
    for (idx, item) in order.items.iter().enumerate() {
        let title = escape_html(&item.product.title);
        let title = if item.product.url.is_empty() {
            format!("<b>{title}</b>")
        } else {
            format!("<a href=\"{}\">{title}</a>", escape_html(&item.product.url))
        };
        let _ = write!(
            text,
            "{}. {title}\n   Marketplace: {}\n   Price: {} ₽ x {} = {} ₽\n   Size: {}\n   Notes: {}\n\n",
            idx + 1,
            item.product.marketplace.display_name(),
            item.price,
            item.quantity,
            item.line_total(),
            item.size.as_deref().map(escape_html).unwrap_or_else(|| "not specified".into()),
            item.color.as_deref().map(escape_html).unwrap_or_else(|| "none".into()),
        );
    }
    let _ = write!(text, "<b>Total:</b> {} ₽", order.total_amount);
    text
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
