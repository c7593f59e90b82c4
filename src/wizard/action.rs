use crate::store::PaymentMethod;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Slash commands understood in any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Reset,
    Instruction,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        // "/start@shop_bot" is what group chats deliver
        let word = word.split('@').next().unwrap_or(word);
        match word {
            "/start" => Some(Command::Start),
            "/help" => Some(Command::Help),
            "/reset" => Some(Command::Reset),
            "/instruction" => Some(Command::Instruction),
            _ => None,
        }
    }
}

/// Button presses, carried as callback data strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NewOrder,
    Quantity(u32),
    QuantityManual,
    Size(String),
    /// Position in the product's size list; safe for any label.
    SizeIdx(usize),
    SizeNone,
    SizeManual,
    Color(String),
    ColorIdx(usize),
    ColorNone,
    ColorManual,
    Cart,
    DeleteOrder,
    RemoveOrder(i64),
    ConfirmRemoveCartItem(i64),
    CancelAction,
    PayOrders,
    Pay(PaymentMethod),
    PayOrder(i64),
    PaidOrder(i64),
    CancelOrder(i64),
    OrderHistory,
    Profile,
    ShowAddress,
    Back,
    MainMenu,
}

impl Action {
    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();
        let fixed = match data {
            "new_order" => Some(Action::NewOrder),
            "quantity_manual" => Some(Action::QuantityManual),
            "size_none" => Some(Action::SizeNone),
            "size_manual" => Some(Action::SizeManual),
            "color_none" => Some(Action::ColorNone),
            "color_manual" => Some(Action::ColorManual),
            "cart" | "my_orders" => Some(Action::Cart),
            "delete_order" => Some(Action::DeleteOrder),
            "cancel_action" => Some(Action::CancelAction),
            "pay_orders" => Some(Action::PayOrders),
            "order_history" => Some(Action::OrderHistory),
            "profile" => Some(Action::Profile),
            "show_address" => Some(Action::ShowAddress),
            "back" => Some(Action::Back),
            "main_menu" => Some(Action::MainMenu),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }

        // longer prefixes first: "pay_order_" before "pay_", "cancel_order_" is
        // distinct from "cancel_action"
        if let Some(id) = id_after(data, "confirm_remove_cart_item_") {
            return Some(Action::ConfirmRemoveCartItem(id));
        }
        if let Some(id) = id_after(data, "remove_order_") {
            return Some(Action::RemoveOrder(id));
        }
        if let Some(id) = id_after(data, "pay_order_") {
            return Some(Action::PayOrder(id));
        }
        if let Some(id) = id_after(data, "paid_order_") {
            return Some(Action::PaidOrder(id));
        }
        if let Some(id) = id_after(data, "cancel_order_") {
            return Some(Action::CancelOrder(id));
        }
        if let Some(method) = data.strip_prefix("pay_") {
            return PaymentMethod::parse(method).map(Action::Pay);
        }
        if let Some(n) = data.strip_prefix("quantity_") {
            return n.parse::<u32>().ok().map(Action::Quantity);
        }
        if let Some(idx) = data.strip_prefix("size_idx_") {
            return idx.parse::<usize>().ok().map(Action::SizeIdx);
        }
        if let Some(idx) = data.strip_prefix("color_idx_") {
            return idx.parse::<usize>().ok().map(Action::ColorIdx);
        }
        if let Some(size) = data.strip_prefix("size_").filter(|s| !s.is_empty()) {
            return Some(Action::Size(size.to_string()));
        }
        if let Some(color) = data.strip_prefix("color_").filter(|c| !c.is_empty()) {
            return Some(Action::Color(color.to_string()));
        }
        None
    }

    pub fn callback_data(&self) -> String {
        match self {
            Action::NewOrder => "new_order".into(),
            Action::Quantity(n) => format!("quantity_{n}"),
            Action::QuantityManual => "quantity_manual".into(),
            Action::Size(size) => format!("size_{size}"),
            Action::SizeIdx(idx) => format!("size_idx_{idx}"),
            Action::SizeNone => "size_none".into(),
            Action::SizeManual => "size_manual".into(),
            Action::Color(color) => format!("color_{color}"),
            Action::ColorIdx(idx) => format!("color_idx_{idx}"),
            Action::ColorNone => "color_none".into(),
            Action::ColorManual => "color_manual".into(),
            Action::Cart => "cart".into(),
            Action::DeleteOrder => "delete_order".into(),
            Action::RemoveOrder(id) => format!("remove_order_{id}"),
            Action::ConfirmRemoveCartItem(id) => format!("confirm_remove_cart_item_{id}"),
            Action::CancelAction => "cancel_action".into(),
            Action::PayOrders => "pay_orders".into(),
            Action::Pay(method) => format!("pay_{}", method.as_str()),
            Action::PayOrder(id) => format!("pay_order_{id}"),
            Action::PaidOrder(id) => format!("paid_order_{id}"),
            Action::CancelOrder(id) => format!("cancel_order_{id}"),
            Action::OrderHistory => "order_history".into(),
            Action::Profile => "profile".into(),
            Action::ShowAddress => "show_address".into(),
            Action::Back => "back".into(),
            Action::MainMenu => "main_menu".into(),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.callback_data())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Action::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown action {raw:?}")))
    }
}

fn id_after(data: &str, prefix: &str) -> Option<i64> {
    data.strip_prefix(prefix)?.parse().ok()
}

/// One update from the chat front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Text(String),
    Action(Action),
}

impl Input {
    /// Messages starting with a known slash command become commands,
    /// everything else is free text.
    pub fn from_message(text: &str) -> Self {
        match Command::parse(text) {
            Some(command) => Input::Command(command),
            None => Input::Text(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_actions_do_not_shadow_each_other() {
        assert_eq!(Action::parse("pay_orders"), Some(Action::PayOrders));
        assert_eq!(Action::parse("pay_order_12"), Some(Action::PayOrder(12)));
        assert_eq!(Action::parse("paid_order_12"), Some(Action::PaidOrder(12)));
        assert_eq!(
            Action::parse("pay_visa_mc"),
            Some(Action::Pay(PaymentMethod::VisaMc))
        );
        assert_eq!(Action::parse("cancel_action"), Some(Action::CancelAction));
        assert_eq!(Action::parse("cancel_order_3"), Some(Action::CancelOrder(3)));
        assert_eq!(Action::parse("remove_order_5"), Some(Action::RemoveOrder(5)));
        assert_eq!(
            Action::parse("confirm_remove_cart_item_5"),
            Some(Action::ConfirmRemoveCartItem(5))
        );
        assert_eq!(Action::parse("quantity_manual"), Some(Action::QuantityManual));
        assert_eq!(Action::parse("quantity_4"), Some(Action::Quantity(4)));
        assert_eq!(Action::parse("size_none"), Some(Action::SizeNone));
        assert_eq!(Action::parse("size_XL"), Some(Action::Size("XL".into())));
        assert_eq!(
            Action::parse("color_тёмно-синий"),
            Some(Action::Color("тёмно-синий".into()))
        );
        assert_eq!(Action::parse("size_idx_3"), Some(Action::SizeIdx(3)));
        assert_eq!(Action::parse("color_idx_0"), Some(Action::ColorIdx(0)));
        assert_eq!(Action::parse("my_orders"), Some(Action::Cart));
        assert_eq!(Action::ColorIdx(2).callback_data(), "color_idx_2");
    }

    #[test]
    fn malformed_actions_are_rejected() {
        assert_eq!(Action::parse("quantity_-1"), None);
        assert_eq!(Action::parse("pay_cash"), None);
        assert_eq!(Action::parse("remove_order_x"), None);
        assert_eq!(Action::parse("size_"), None);
        assert_eq!(Action::parse("size_idx_x"), None);
        assert_eq!(Action::parse("no_action"), None);
    }

    #[test]
    fn actions_serialize_as_callback_data() {
        let json = serde_json::to_string(&Action::PaidOrder(9)).expect("json");
        assert_eq!(json, "\"paid_order_9\"");
        let back: Action = serde_json::from_str("\"size_M\"").expect("parse");
        assert_eq!(back, Action::Size("M".into()));
        assert!(serde_json::from_str::<Action>("\"bogus\"").is_err());
    }

    #[test]
    fn commands_ignore_bot_suffix_and_arguments() {
        assert_eq!(Command::parse("/start@shop_bot"), Some(Command::Start));
        assert_eq!(Command::parse(" /help please"), Some(Command::Help));
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(
            Input::from_message("hello"),
            Input::Text("hello".to_string())
        );
        assert_eq!(
            Input::from_message("/reset"),
            Input::Command(Command::Reset)
        );
    }
}
