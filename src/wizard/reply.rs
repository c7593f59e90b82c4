use super::Action;
use crate::store::PaymentMethod;
use serde::Serialize;
use serde_with::skip_serializing_none;

const QUICK_QUANTITIES: [u32; 5] = [1, 2, 3, 4, 5];

/// What the front-end should offer next. Rendering (keyboards, menus) is left
/// to the chat side; [`Prompt::actions`] lists the callbacks each choice maps to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prompt {
    MainMenu,
    Back,
    Quantity { max: u32 },
    Sizes { options: Vec<String> },
    SkipSize,
    Colors { options: Vec<String> },
    Notes,
    Cart,
    RemovableItems { cart_item_ids: Vec<i64> },
    ConfirmRemoval { cart_item_id: i64 },
    PaymentMethods { methods: Vec<PaymentMethod> },
    PaymentConfirmation { order_id: i64 },
    Orders { payable: Vec<i64>, cancellable: Vec<i64> },
    FreeText,
    None,
}

impl Prompt {
    pub fn actions(&self) -> Vec<Action> {
        match self {
            Prompt::MainMenu => vec![
                Action::NewOrder,
                Action::Cart,
                Action::OrderHistory,
                Action::Profile,
                Action::ShowAddress,
            ],
            Prompt::Back | Prompt::FreeText => vec![Action::Back, Action::MainMenu],
            Prompt::Quantity { max } => QUICK_QUANTITIES
                .iter()
                .copied()
                .filter(|q| q <= max)
                .map(Action::Quantity)
                .chain([Action::QuantityManual, Action::MainMenu])
                .collect(),
            Prompt::Sizes { options } => (0..options.len())
                .map(Action::SizeIdx)
                .chain([Action::SizeManual, Action::SizeNone, Action::MainMenu])
                .collect(),
            Prompt::SkipSize => vec![Action::SizeNone, Action::SizeManual, Action::MainMenu],
            Prompt::Colors { options } => (0..options.len())
                .map(Action::ColorIdx)
                .chain([Action::ColorManual, Action::ColorNone, Action::MainMenu])
                .collect(),
            Prompt::Notes => vec![Action::ColorNone, Action::MainMenu],
            Prompt::Cart => vec![
                Action::PayOrders,
                Action::DeleteOrder,
                Action::OrderHistory,
                Action::Back,
                Action::MainMenu,
            ],
            Prompt::RemovableItems { cart_item_ids } => cart_item_ids
                .iter()
                .copied()
                .map(Action::RemoveOrder)
                .chain([Action::CancelAction])
                .collect(),
            Prompt::ConfirmRemoval { cart_item_id } => vec![
                Action::ConfirmRemoveCartItem(*cart_item_id),
                Action::CancelAction,
            ],
            Prompt::PaymentMethods { methods } => methods
                .iter()
                .copied()
                .map(Action::Pay)
                .chain([Action::Back, Action::MainMenu])
                .collect(),
            Prompt::PaymentConfirmation { order_id } => vec![
                Action::PaidOrder(*order_id),
                Action::CancelOrder(*order_id),
                Action::MainMenu,
            ],
            Prompt::Orders {
                payable,
                cancellable,
            } => payable
                .iter()
                .copied()
                .map(Action::PayOrder)
                .chain(cancellable.iter().copied().map(Action::CancelOrder))
                .chain([Action::MainMenu])
                .collect(),
            Prompt::None => Vec::new(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub text: String,
    pub prompt: Prompt,
    pub image_url: Option<String>,
}

impl Reply {
    pub fn new(text: impl Into<String>, prompt: Prompt) -> Self {
        Self {
            text: text.into(),
            prompt,
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }
}
