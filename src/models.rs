use crate::scrape::ProductInfo;
use crate::store::OrderStatus;
use crate::wizard::{Action, ChatUser, Input, Outcome, Reply};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One update relayed by the chat front-end: either a typed message or a
/// button press.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatUpdate {
    pub user: ChatUser,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub callback_data: Option<String>,
}

impl ChatUpdate {
    pub fn input(&self) -> Result<Input, ApiError> {
        match (&self.callback_data, &self.text) {
            (Some(data), _) => Action::parse(data).map(Input::Action).ok_or_else(|| ApiError {
                error: "unknown_action".into(),
                detail: Some(format!("callback data {data:?} is not recognised")),
            }),
            (None, Some(text)) => Ok(Input::from_message(text)),
            (None, None) => Err(ApiError {
                error: "empty_update".into(),
                detail: Some("either text or callback_data is required".into()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: Reply,
    /// Callback data of the buttons to render under the reply.
    pub buttons: Vec<Action>,
    pub state: &'static str,
}

impl From<Outcome> for ChatResponse {
    fn from(outcome: Outcome) -> Self {
        Self {
            buttons: outcome.reply.prompt.actions(),
            state: outcome.state.name(),
            reply: outcome.reply,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    pub url: String,
    /// Also store the product so it can be added to carts.
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResolveResponse {
    pub product: ProductInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

/// Contact phone a courier can call; set by the operator on the user's behalf.
#[derive(Debug, Clone, Deserialize)]
pub struct PhoneUpdate {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
