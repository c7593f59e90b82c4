//! Conversational order assembly.
//!
//! Each chat update is folded into the user's current [`State`], producing a
//! [`Reply`] and the next state. Cart rows are only written once quantity,
//! size and color/notes have all been collected.

pub mod action;
mod reply;
mod sessions;

pub use action::{Action, Command, Input};
pub use reply::{Prompt, Reply};
pub use sessions::SessionStore;

use crate::config::BotConfig;
use crate::marketplace::{self, Marketplace};
use crate::notify::{Notifier, escape_html};
use crate::scrape::{ProductInfo, ProductSource, ScrapeError};
use crate::store::{Order, OrderStatus, PaymentMethod, Store, StoreError, User};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, warn};

const SUMMARY_SIZES: usize = 5;
const SUMMARY_COLORS: usize = 3;
const SUGGESTED_SIZES: usize = 10;
const SKIP: &str = "-";

/// A scraped product that already has a database row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftProduct {
    pub product_id: i64,
    pub info: ProductInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum State {
    #[default]
    Idle,
    AwaitingName,
    AwaitingUrl,
    AwaitingQuantity {
        draft: DraftProduct,
    },
    AwaitingSize {
        draft: DraftProduct,
        quantity: u32,
    },
    AwaitingColor {
        draft: DraftProduct,
        quantity: u32,
        size: Option<String>,
    },
    AwaitingPaymentMethod,
    AwaitingPaymentConfirmation {
        order_id: i64,
    },
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::AwaitingName => "awaiting_name",
            State::AwaitingUrl => "awaiting_url",
            State::AwaitingQuantity { .. } => "awaiting_quantity",
            State::AwaitingSize { .. } => "awaiting_size",
            State::AwaitingColor { .. } => "awaiting_color",
            State::AwaitingPaymentMethod => "awaiting_payment_method",
            State::AwaitingPaymentConfirmation { .. } => "awaiting_payment_confirmation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WizardSettings {
    pub delivery_address: String,
    pub payment_details: String,
    pub manager_name: String,
    pub max_quantity: u32,
}

impl From<&BotConfig> for WizardSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            delivery_address: config.delivery_address.clone(),
            payment_details: config.payment_details.clone(),
            manager_name: config.manager_name.clone(),
            max_quantity: config.max_quantity.max(1),
        }
    }
}

/// The sender of an update as the chat platform reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub reply: Reply,
    pub state: State,
}

#[derive(Debug, Error)]
pub enum WizardError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

type Step = Result<(Reply, State), WizardError>;

pub struct Wizard<S> {
    store: Store,
    source: S,
    notifier: Notifier,
    sessions: SessionStore,
    settings: WizardSettings,
}

impl<S: ProductSource> Wizard<S> {
    pub fn new(store: Store, source: S, notifier: Notifier, settings: WizardSettings) -> Self {
        Self {
            store,
            source,
            notifier,
            sessions: SessionStore::new(),
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, user: &ChatUser, input: Input) -> Result<Outcome, WizardError> {
        let (record, _) = self
            .store
            .ensure_user(user.id, user.username.as_deref())
            .await?;
        let state = self.sessions.get(user.id).await;
        let from = state.name();
        debug!(target = "marketbot.wizard", user_id = user.id, state = from, input = ?input, "update");

        let (reply, next) = match input {
            Input::Command(command) => self.on_command(&record, command, state).await?,
            Input::Action(action) => self.on_action(user, action, state).await?,
            Input::Text(text) => self.on_text(user, text.trim(), state).await?,
        };

        self.sessions.set(user.id, next.clone()).await;
        crate::metrics::wizard_transition(from, next.name());
        Ok(Outcome { reply, state: next })
    }

    async fn on_command(&self, record: &User, command: Command, state: State) -> Step {
        match command {
            Command::Start => Ok(match &record.first_name {
                Some(name) => (
                    Reply::new(
                        format!("Welcome back, {}! 👋\n\nChoose what you want to do:", escape_html(name)),
                        Prompt::MainMenu,
                    ),
                    State::Idle,
                ),
                None => (
                    Reply::new(
                        "Welcome to the marketplace bot! 👋\n\nFirst, how should we call you?",
                        Prompt::FreeText,
                    ),
                    State::AwaitingName,
                ),
            }),
            Command::Help => Ok((Reply::new(self.help_text(), Prompt::None), state)),
            Command::Instruction => Ok((Reply::new(instruction_text(), Prompt::None), state)),
            Command::Reset => Ok((
                Reply::new("Conversation reset.\n\nChoose what you want to do:", Prompt::MainMenu),
                State::Idle,
            )),
        }
    }

    async fn on_text(&self, user: &ChatUser, text: &str, state: State) -> Step {
        match state {
            State::AwaitingName => {
                if text.is_empty() {
                    return Ok((
                        Reply::new("Please tell us how we should call you.", Prompt::FreeText),
                        State::AwaitingName,
                    ));
                }
                self.store.update_user_name(user.id, text).await?;
                Ok((
                    Reply::new(
                        format!(
                            "Thank you, {}! All features of the bot are now available.\n\nChoose what you want to do:",
                            escape_html(text)
                        ),
                        Prompt::MainMenu,
                    ),
                    State::Idle,
                ))
            }
            State::AwaitingUrl => self.on_url(text).await,
            State::AwaitingQuantity { draft } => match self.parse_quantity(text) {
                Some(quantity) => Ok(self.after_quantity(draft, quantity)),
                None => Ok(self.reprompt_quantity(draft)),
            },
            State::AwaitingSize { draft, quantity } => {
                if text == SKIP {
                    self.after_size(user, draft, quantity, None).await
                } else {
                    self.choose_size(user, draft, quantity, text).await
                }
            }
            State::AwaitingColor {
                draft,
                quantity,
                size,
            } => {
                let color = (!text.is_empty() && text != SKIP).then(|| text.to_string());
                self.finish_line(user, draft, quantity, size, color).await
            }
            State::AwaitingPaymentMethod => Ok((
                Reply::new(
                    "Please choose a payment method with the buttons below.",
                    payment_methods_prompt(),
                ),
                State::AwaitingPaymentMethod,
            )),
            State::AwaitingPaymentConfirmation { order_id } => Ok((
                Reply::new(
                    format!("Press \"I paid\" once the payment for order #{order_id} is sent."),
                    Prompt::PaymentConfirmation { order_id },
                ),
                State::AwaitingPaymentConfirmation { order_id },
            )),
            State::Idle => Ok((
                Reply::new(
                    "I did not understand that. Use the menu below or /help.",
                    Prompt::MainMenu,
                ),
                State::Idle,
            )),
        }
    }

    async fn on_action(&self, user: &ChatUser, action: Action, state: State) -> Step {
        match (action, state) {
            (Action::Back | Action::MainMenu, _) => Ok(main_menu()),
            (Action::NewOrder, _) => Ok((
                Reply::new(
                    "🔗 New order\n\nSend a product link from one of the supported marketplaces:\n• Wildberries\n• Ozon\n• Yandex Market",
                    Prompt::Back,
                ),
                State::AwaitingUrl,
            )),
            (Action::Quantity(quantity), State::AwaitingQuantity { draft }) => {
                if (1..=self.settings.max_quantity).contains(&quantity) {
                    Ok(self.after_quantity(draft, quantity))
                } else {
                    Ok(self.reprompt_quantity(draft))
                }
            }
            (Action::QuantityManual, state @ State::AwaitingQuantity { .. }) => Ok((
                Reply::new(
                    format!("Type the quantity (1 to {}):", self.settings.max_quantity),
                    Prompt::FreeText,
                ),
                state,
            )),
            (Action::Size(size), State::AwaitingSize { draft, quantity }) => {
                self.choose_size(user, draft, quantity, &size).await
            }
            (Action::SizeIdx(idx), State::AwaitingSize { draft, quantity }) => {
                match draft.info.available_sizes.get(idx).map(|size| size.name.clone()) {
                    Some(name) => self.after_size(user, draft, quantity, Some(name)).await,
                    None => Ok(self.after_quantity(draft, quantity)),
                }
            }
            (Action::SizeNone, State::AwaitingSize { draft, quantity }) => {
                self.after_size(user, draft, quantity, None).await
            }
            (Action::SizeManual, state @ State::AwaitingSize { .. }) => Ok((
                Reply::new("Type the size:", Prompt::FreeText),
                state,
            )),
            (
                Action::Color(color),
                State::AwaitingColor {
                    draft,
                    quantity,
                    size,
                },
            ) => self.finish_line(user, draft, quantity, size, Some(color)).await,
            (
                Action::ColorIdx(idx),
                State::AwaitingColor {
                    draft,
                    quantity,
                    size,
                },
            ) => {
                let color = size
                    .as_deref()
                    .and_then(|s| draft.info.colors_for(s).get(idx).cloned());
                match color {
                    Some(color) => {
                        self.finish_line(user, draft, quantity, size, Some(color))
                            .await
                    }
                    None => Ok((
                        Reply::new("This button is no longer active.", Prompt::None),
                        State::AwaitingColor {
                            draft,
                            quantity,
                            size,
                        },
                    )),
                }
            }
            (
                Action::ColorNone,
                State::AwaitingColor {
                    draft,
                    quantity,
                    size,
                },
            ) => self.finish_line(user, draft, quantity, size, None).await,
            (Action::ColorManual, state @ State::AwaitingColor { .. }) => Ok((
                Reply::new("Type the color or any notes for the order:", Prompt::FreeText),
                state,
            )),
            (Action::Cart, _) => self.show_cart(user).await,
            (Action::DeleteOrder, _) => self.removable_items(user).await,
            (Action::RemoveOrder(id), _) => self.confirm_removal(user, id).await,
            (Action::ConfirmRemoveCartItem(id), _) => self.remove_item(user, id).await,
            (Action::CancelAction, _) => Ok((
                Reply::new("❌ Action cancelled", Prompt::Cart),
                State::Idle,
            )),
            (Action::PayOrders, _) => self.start_checkout(user).await,
            (Action::Pay(method), State::AwaitingPaymentMethod) => {
                self.checkout(user, method).await
            }
            (Action::PayOrder(order_id), _) => self.pay_existing(user, order_id).await,
            (Action::PaidOrder(order_id), _) => self.mark_paid(user, order_id).await,
            (Action::CancelOrder(order_id), _) => self.cancel(user, order_id).await,
            (Action::OrderHistory, _) => self.history(user).await,
            (Action::Profile, _) => self.profile(user).await,
            (Action::ShowAddress, _) => Ok((
                Reply::new(
                    format!(
                        "🚚 Delivery\n\nOrders are delivered to:\n{}",
                        escape_html(&self.settings.delivery_address)
                    ),
                    Prompt::MainMenu,
                ),
                State::Idle,
            )),
            (action, state) => {
                debug!(
                    target = "marketbot.wizard",
                    user_id = user.id,
                    action = %action.callback_data(),
                    state = state.name(),
                    "stale_action"
                );
                let prompt = if matches!(state, State::Idle) {
                    Prompt::MainMenu
                } else {
                    Prompt::None
                };
                Ok((Reply::new("This button is no longer active.", prompt), state))
            }
        }
    }

    async fn on_url(&self, text: &str) -> Step {
        let url = marketplace::extract_url(text).unwrap_or(text);
        if !marketplace::is_valid_marketplace_url(url) {
            return Ok((
                Reply::new(
                    "❌ Invalid link. Please make sure you sent a product link from Wildberries, Ozon or Yandex Market.",
                    Prompt::MainMenu,
                ),
                State::Idle,
            ));
        }
        if marketplace::identify(url) == Some(Marketplace::Ozon) {
            return Ok(unsupported_reply(Marketplace::Ozon));
        }

        let info = match self.source.fetch_product(url).await {
            Ok(info) if info.price.is_positive() => info,
            Ok(_) => {
                return Ok(scrape_failed(
                    "❌ Could not get a valid price for this product. Check the link and try again.".into(),
                ));
            }
            Err(ScrapeError::Unsupported(marketplace)) => {
                return Ok(unsupported_reply(marketplace));
            }
            Err(err) => {
                warn!(
                    target = "marketbot.wizard",
                    %url,
                    error = %err,
                    transient = err.is_transient(),
                    "product_fetch_failed"
                );
                let text = match err {
                    ScrapeError::Captcha | ScrapeError::NotFound => {
                        "❌ Product not found. Please try again...".to_string()
                    }
                    other => format!(
                        "❌ Could not get product information: {other}. Check the link and try again."
                    ),
                };
                return Ok(scrape_failed(text));
            }
        };

        let product = self.store.create_product(&info).await?;
        info!(
            target = "marketbot.wizard",
            product_id = product.id,
            marketplace = info.marketplace.as_str(),
            price = %info.price,
            "product_resolved"
        );
        let reply = Reply::new(
            product_summary(&info),
            Prompt::Quantity {
                max: self.settings.max_quantity,
            },
        )
        .with_image(info.image_url.clone());
        Ok((
            reply,
            State::AwaitingQuantity {
                draft: DraftProduct {
                    product_id: product.id,
                    info,
                },
            },
        ))
    }

    fn parse_quantity(&self, text: &str) -> Option<u32> {
        text.parse::<u32>()
            .ok()
            .filter(|q| (1..=self.settings.max_quantity).contains(q))
    }

    fn reprompt_quantity(&self, draft: DraftProduct) -> (Reply, State) {
        (
            Reply::new(
                format!(
                    "Please enter a whole number from 1 to {}.",
                    self.settings.max_quantity
                ),
                Prompt::Quantity {
                    max: self.settings.max_quantity,
                },
            ),
            State::AwaitingQuantity { draft },
        )
    }

    fn after_quantity(&self, draft: DraftProduct, quantity: u32) -> (Reply, State) {
        let sizes: Vec<String> = draft
            .info
            .available_sizes
            .iter()
            .map(|size| size.name.clone())
            .collect();
        let reply = if sizes.is_empty() {
            Reply::new(
                format!("Quantity: {quantity}\n\nType the size, or send \"{SKIP}\" to skip:"),
                Prompt::SkipSize,
            )
        } else {
            Reply::new(
                format!("Quantity: {quantity}\n\n📏 Choose a size:"),
                Prompt::Sizes { options: sizes },
            )
        };
        (reply, State::AwaitingSize { draft, quantity })
    }

    async fn choose_size(
        &self,
        user: &ChatUser,
        draft: DraftProduct,
        quantity: u32,
        wanted: &str,
    ) -> Step {
        if draft.info.available_sizes.is_empty() {
            return self
                .after_size(user, draft, quantity, Some(wanted.to_string()))
                .await;
        }
        match draft.info.size(wanted) {
            Some(size) => {
                let name = size.name.clone();
                self.after_size(user, draft, quantity, Some(name)).await
            }
            None => {
                let labels: Vec<String> = draft
                    .info
                    .available_sizes
                    .iter()
                    .take(SUGGESTED_SIZES)
                    .map(|size| size.label())
                    .collect();
                let options = draft
                    .info
                    .available_sizes
                    .iter()
                    .map(|size| size.name.clone())
                    .collect();
                Ok((
                    Reply::new(
                        format!(
                            "Size \"{}\" is not available.\n\nAvailable sizes: {}",
                            escape_html(wanted),
                            labels.join(", ")
                        ),
                        Prompt::Sizes { options },
                    ),
                    State::AwaitingSize { draft, quantity },
                ))
            }
        }
    }

    /// Wildberries items always get a color/notes step; other marketplaces
    /// only when the chosen size lists colors.
    async fn after_size(
        &self,
        user: &ChatUser,
        draft: DraftProduct,
        quantity: u32,
        size: Option<String>,
    ) -> Step {
        let colors = size
            .as_deref()
            .map(|s| draft.info.colors_for(s).to_vec())
            .unwrap_or_default();
        if colors.is_empty() && draft.info.marketplace != Marketplace::Wildberries {
            return self.finish_line(user, draft, quantity, size, None).await;
        }
        let size_line = size
            .as_deref()
            .map(escape_html)
            .unwrap_or_else(|| "not specified".into());
        let reply = if colors.is_empty() {
            Reply::new(
                format!(
                    "Size: {size_line}\n\n📝 Add notes for the order (color, wishes), or send \"{SKIP}\" to skip:"
                ),
                Prompt::Notes,
            )
        } else {
            Reply::new(
                format!("Size: {size_line}\n\n🎨 Choose a color:"),
                Prompt::Colors { options: colors },
            )
        };
        Ok((
            reply,
            State::AwaitingColor {
                draft,
                quantity,
                size,
            },
        ))
    }

    async fn finish_line(
        &self,
        user: &ChatUser,
        draft: DraftProduct,
        quantity: u32,
        size: Option<String>,
        color: Option<String>,
    ) -> Step {
        self.store
            .add_to_cart(
                user.id,
                draft.product_id,
                quantity,
                size.as_deref(),
                color.as_deref(),
            )
            .await?;
        let total = draft.info.price.times(quantity);
        let text = format!(
            "✅ Added to cart\n\n<b>{}</b>\nQuantity: {quantity}\nSize: {}\nNotes: {}\nAmount: {total} ₽",
            escape_html(&draft.info.title),
            size.as_deref().map(escape_html).unwrap_or_else(|| "not specified".into()),
            color.as_deref().map(escape_html).unwrap_or_else(|| "none".into()),
        );
        Ok((Reply::new(text, Prompt::Cart), State::Idle))
    }

    async fn show_cart(&self, user: &ChatUser) -> Step {
        let lines = self.store.get_cart_items(user.id).await?;
        if lines.is_empty() {
            return Ok((
                Reply::new("🛒 Your cart is empty.", Prompt::MainMenu),
                State::Idle,
            ));
        }
        let mut text = String::from("🛒 <b>Your cart</b>\n\n");
        for (idx, line) in lines.iter().enumerate() {
            let _ = writeln!(
                text,
                "{}. {}\n   Size: {} · Notes: {}\n   {} ₽ x {} = {} ₽",
                idx + 1,
                escape_html(&line.product.title),
                line.size.as_deref().map(escape_html).unwrap_or_else(|| "-".into()),
                line.color.as_deref().map(escape_html).unwrap_or_else(|| "-".into()),
                line.product.price,
                line.quantity,
                line.line_total(),
            );
        }
        let total: crate::money::Money = lines.iter().map(|line| line.line_total()).sum();
        let _ = write!(text, "\n<b>Total:</b> {total} ₽");
        Ok((Reply::new(text, Prompt::Cart), State::Idle))
    }

    async fn removable_items(&self, user: &ChatUser) -> Step {
        let lines = self.store.get_cart_items(user.id).await?;
        if lines.is_empty() {
            return Ok((
                Reply::new("🛒 Your cart is empty, nothing to remove.", Prompt::Cart),
                State::Idle,
            ));
        }
        let mut text = String::from("Choose an item to remove:\n\n");
        for line in &lines {
            let _ = writeln!(
                text,
                "#{} {} x {}",
                line.id,
                escape_html(&line.product.title),
                line.quantity
            );
        }
        Ok((
            Reply::new(
                text,
                Prompt::RemovableItems {
                    cart_item_ids: lines.iter().map(|line| line.id).collect(),
                },
            ),
            State::Idle,
        ))
    }

    async fn confirm_removal(&self, user: &ChatUser, cart_item_id: i64) -> Step {
        let lines = self.store.get_cart_items(user.id).await?;
        match lines.iter().find(|line| line.id == cart_item_id) {
            Some(line) => Ok((
                Reply::new(
                    format!(
                        "Remove \"{}\" from the cart?",
                        escape_html(&line.product.title)
                    ),
                    Prompt::ConfirmRemoval { cart_item_id },
                ),
                State::Idle,
            )),
            None => Ok((
                Reply::new("Item not found in your cart.", Prompt::Cart),
                State::Idle,
            )),
        }
    }

    async fn remove_item(&self, user: &ChatUser, cart_item_id: i64) -> Step {
        let text = if self.store.remove_from_cart(user.id, cart_item_id).await? {
            "🗑 Item removed from the cart."
        } else {
            "Item not found in your cart."
        };
        Ok((Reply::new(text, Prompt::Cart), State::Idle))
    }

    async fn start_checkout(&self, user: &ChatUser) -> Step {
        let lines = self.store.get_cart_items(user.id).await?;
        if lines.is_empty() {
            return Ok(empty_cart());
        }
        let total: crate::money::Money = lines.iter().map(|line| line.line_total()).sum();
        Ok((
            Reply::new(
                format!(
                    "💳 <b>Checkout</b>\n\nItems: {}\nTotal: {total} ₽\nDelivery address: {}\n\nChoose a payment method:",
                    lines.len(),
                    escape_html(&self.settings.delivery_address)
                ),
                payment_methods_prompt(),
            ),
            State::AwaitingPaymentMethod,
        ))
    }

    async fn checkout(&self, user: &ChatUser, method: PaymentMethod) -> Step {
        let order = match self
            .store
            .create_order(user.id, &self.settings.delivery_address, None, Some(method))
            .await
        {
            Ok(order) => order,
            Err(StoreError::EmptyCart) => return Ok(empty_cart()),
            Err(err) => return Err(err.into()),
        };
        info!(
            target = "marketbot.wizard",
            user_id = user.id,
            order_id = order.id,
            method = method.as_str(),
            "order_placed"
        );
        Ok(self.payment_instructions(&order, "✅ <b>Order placed</b>"))
    }

    async fn pay_existing(&self, user: &ChatUser, order_id: i64) -> Step {
        match self.store.get_order(order_id).await? {
            Some(order) if order.user_id == user.id && order.status == OrderStatus::New => {
                Ok(self.payment_instructions(&order, "💳 <b>Order payment</b>"))
            }
            _ => Ok((
                Reply::new(
                    format!("Order #{order_id} cannot be paid."),
                    Prompt::MainMenu,
                ),
                State::Idle,
            )),
        }
    }

    fn payment_instructions(&self, order: &Order, heading: &str) -> (Reply, State) {
        let method = order
            .payment_method
            .map(|m| m.display_name())
            .unwrap_or("not specified");
        let text = format!(
            "{heading}\n\nOrder number: {}\nAmount: {} ₽\nPayment method: {method}\nDelivery address: {}\n\n{}\n\nPress \"I paid\" after the transfer.",
            order.id,
            order.total_amount,
            escape_html(&order.delivery_address),
            escape_html(&self.settings.payment_details),
        );
        (
            Reply::new(text, Prompt::PaymentConfirmation { order_id: order.id }),
            State::AwaitingPaymentConfirmation { order_id: order.id },
        )
    }

    async fn mark_paid(&self, user: &ChatUser, order_id: i64) -> Step {
        let order = match self.store.confirm_payment(user.id, order_id).await {
            Ok(order) => order,
            Err(StoreError::NotFound(_)) => {
                return Ok((
                    Reply::new(format!("Order #{order_id} not found."), Prompt::MainMenu),
                    State::Idle,
                ));
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                return Ok((
                    Reply::new(
                        format!(
                            "Order #{order_id} is already processed (status: {}).",
                            from.display_name()
                        ),
                        Prompt::MainMenu,
                    ),
                    State::Idle,
                ));
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(record) = self.store.get_user(user.id).await? {
            // the payment stays recorded even if the operator chat is down
            if let Err(err) = self.notifier.notify_order(&order, &record).await {
                warn!(target = "marketbot.wizard", order_id, error = %err, "operator_notify_failed");
            }
        }
        Ok((
            Reply::new(
                format!(
                    "✅ Payment for order #{order_id} is recorded.\n\nOur manager @{} will contact you shortly.",
                    escape_html(&self.settings.manager_name)
                ),
                Prompt::MainMenu,
            ),
            State::Idle,
        ))
    }

    async fn cancel(&self, user: &ChatUser, order_id: i64) -> Step {
        let text = if self.store.cancel_order(user.id, order_id).await? {
            format!("Order #{order_id} is cancelled.")
        } else {
            format!("Order #{order_id} cannot be cancelled: only new or paid orders can be.")
        };
        Ok((Reply::new(text, Prompt::MainMenu), State::Idle))
    }

    async fn history(&self, user: &ChatUser) -> Step {
        let orders = self.store.get_orders(user.id).await?;
        if orders.is_empty() {
            return Ok((
                Reply::new("You have no orders yet.", Prompt::MainMenu),
                State::Idle,
            ));
        }
        let mut text = String::from("📋 <b>Your orders</b>\n\n");
        for order in &orders {
            let _ = writeln!(
                text,
                "#{} · {} · {} · {} ₽ · {} item(s)",
                order.id,
                order.created_at.format("%d.%m.%Y"),
                order.status.display_name(),
                order.total_amount,
                order.items.len()
            );
        }
        let payable = orders
            .iter()
            .filter(|o| o.status == OrderStatus::New)
            .map(|o| o.id)
            .collect();
        let cancellable = orders
            .iter()
            .filter(|o| o.status.is_cancellable())
            .map(|o| o.id)
            .collect();
        Ok((
            Reply::new(
                text,
                Prompt::Orders {
                    payable,
                    cancellable,
                },
            ),
            State::Idle,
        ))
    }

    async fn profile(&self, user: &ChatUser) -> Step {
        let record = self
            .store
            .get_user(user.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;
        let orders = self.store.get_orders(user.id).await?;
        let cart = self.store.get_cart_items(user.id).await?;
        let name = record.first_name.as_deref().map(escape_html);
        let username = record.username.as_deref().map(|u| format!("@{}", escape_html(u)));
        let text = format!(
            "👤 <b>Profile</b>\n\nName: {}\nUsername: {}\nPhone: {}\nOrders: {}\nItems in cart: {}",
            name.unwrap_or_else(|| "not set".into()),
            username.unwrap_or_else(|| "not set".into()),
            record.phone.as_deref().map(escape_html).unwrap_or_else(|| "not set".into()),
            orders.len(),
            cart.len(),
        );
        Ok((Reply::new(text, Prompt::MainMenu), State::Idle))
    }

    fn help_text(&self) -> String {
        format!(
            "🛍️ <b>Marketplace bot</b> is an easy way to order products!\n\n\
             Commands:\n\
             /start - start the bot and register\n\
             /help - show this message\n\
             /instruction - how to place an order\n\
             /reset - cancel the current step\n\n\
             Send a product link from Wildberries or Yandex Market, manage your cart and \
             track your orders.\n\n\
             Questions? Contact @{}.",
            escape_html(&self.settings.manager_name)
        )
    }
}

fn instruction_text() -> &'static str {
    "📖 <b>How to order</b>\n\n\
     1. Press \"New order\" and send a product link.\n\
     2. Choose the quantity, the size and a color or notes.\n\
     3. Open the cart and press \"Pay\".\n\
     4. Choose a payment method and transfer the amount.\n\
     5. Press \"I paid\": the manager gets your order and contacts you."
}

fn main_menu() -> (Reply, State) {
    (
        Reply::new("Choose what you want to do:", Prompt::MainMenu),
        State::Idle,
    )
}

fn empty_cart() -> (Reply, State) {
    (
        Reply::new(
            "🛒 Your cart is empty. Add products before checkout.",
            Prompt::MainMenu,
        ),
        State::Idle,
    )
}

fn payment_methods_prompt() -> Prompt {
    Prompt::PaymentMethods {
        methods: PaymentMethod::OFFERED.to_vec(),
    }
}

fn unsupported_reply(marketplace: Marketplace) -> (Reply, State) {
    (
        Reply::new(
            format!(
                "⚠️ <b>{} is temporarily not supported</b>\n\nPlease use products from Wildberries or Yandex Market.",
                marketplace.display_name()
            ),
            Prompt::MainMenu,
        ),
        State::Idle,
    )
}

fn scrape_failed(text: String) -> (Reply, State) {
    (Reply::new(text, Prompt::MainMenu), State::Idle)
}

fn product_summary(info: &ProductInfo) -> String {
    let mut text = format!(
        "✅ <b>Product found</b>\n\n<b>{}</b>\nMarketplace: {}\nPrice: {} ₽\n",
        escape_html(&info.title),
        info.marketplace.display_name(),
        info.price
    );
    if let Some(brand) = &info.brand {
        let _ = writeln!(text, "Brand: {}", escape_html(brand));
    }
    if !info.available_sizes.is_empty() {
        text.push_str("\n📏 <b>Available sizes:</b>\n");
        for size in info.available_sizes.iter().take(SUMMARY_SIZES) {
            let _ = writeln!(text, "- {}", escape_html(&size.label()));
            if !size.colors.is_empty() {
                let colors: Vec<String> = size
                    .colors
                    .iter()
                    .take(SUMMARY_COLORS)
                    .map(|c| escape_html(c))
                    .collect();
                let _ = writeln!(text, "  Colors: {}", colors.join(", "));
            }
        }
        let hidden = info.available_sizes.len().saturating_sub(SUMMARY_SIZES);
        if hidden > 0 {
            let _ = writeln!(text, "...and {hidden} more");
        }
    }
    text.push_str("\nHow many do you need?");
    text
}
