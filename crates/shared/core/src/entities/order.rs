use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{Symbol, Timestamp};

/// Order type as reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "ORDER_TYPE_BUY")]
    Buy,
    #[serde(rename = "ORDER_TYPE_SELL")]
    Sell,
    #[serde(rename = "ORDER_TYPE_BUY_LIMIT")]
    BuyLimit,
    #[serde(rename = "ORDER_TYPE_SELL_LIMIT")]
    SellLimit,
    #[serde(rename = "ORDER_TYPE_BUY_STOP")]
    BuyStop,
    #[serde(rename = "ORDER_TYPE_SELL_STOP")]
    SellStop,
    #[serde(rename = "ORDER_TYPE_BUY_STOP_LIMIT")]
    BuyStopLimit,
    #[serde(rename = "ORDER_TYPE_SELL_STOP_LIMIT")]
    SellStopLimit,
    #[serde(rename = "ORDER_TYPE_CLOSE_BY")]
    CloseBy,
}

impl OrderType {
    /// Returns true for orders that execute on the buy side (filled at ask)
    pub fn is_buy(&self) -> bool {
        matches!(
            self,
            OrderType::Buy | OrderType::BuyLimit | OrderType::BuyStop | OrderType::BuyStopLimit
        )
    }

    /// Market price an order of this type is compared against
    pub fn market_price(&self, bid: Decimal, ask: Decimal) -> Decimal {
        if self.is_buy() { ask } else { bid }
    }
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    #[serde(rename = "ORDER_STATE_STARTED")]
    Started,
    #[serde(rename = "ORDER_STATE_PLACED")]
    Placed,
    #[serde(rename = "ORDER_STATE_CANCELED")]
    Canceled,
    #[serde(rename = "ORDER_STATE_PARTIAL")]
    Partial,
    #[serde(rename = "ORDER_STATE_FILLED")]
    Filled,
    #[serde(rename = "ORDER_STATE_REJECTED")]
    Rejected,
    #[serde(rename = "ORDER_STATE_EXPIRED")]
    Expired,
    #[serde(rename = "ORDER_STATE_REQUEST_ADD")]
    RequestAdd,
    #[serde(rename = "ORDER_STATE_REQUEST_MODIFY")]
    RequestModify,
    #[serde(rename = "ORDER_STATE_REQUEST_CANCEL")]
    RequestCancel,
}

/// Pending or historical order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub state: Option<OrderState>,
    pub symbol: Symbol,
    #[serde(default)]
    pub magic: i64,
    #[serde(default)]
    pub time: Option<Timestamp>,
    /// Set for history orders
    #[serde(default)]
    pub done_time: Option<Timestamp>,
    #[serde(default)]
    pub open_price: Option<Decimal>,
    /// Market price the order is compared against (ask for buys, bid for sells)
    #[serde(default)]
    pub current_price: Option<Decimal>,
    pub volume: Decimal,
    #[serde(default)]
    pub current_volume: Option<Decimal>,
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Order {
    pub fn new(
        id: impl Into<String>,
        order_type: OrderType,
        symbol: impl Into<Symbol>,
        volume: Decimal,
    ) -> Self {
        Order {
            id: id.into(),
            order_type,
            state: None,
            symbol: symbol.into(),
            magic: 0,
            time: None,
            done_time: None,
            open_price: None,
            current_price: None,
            volume,
            current_volume: None,
            position_id: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
            client_id: None,
        }
    }

    pub fn with_open_price(mut self, price: Decimal) -> Self {
        self.open_price = Some(price);
        self
    }

    pub fn with_done_time(mut self, time: Timestamp) -> Self {
        self.done_time = Some(time);
        self
    }

    /// Time used to order history entries (done time, falling back to placement time)
    pub fn history_time(&self) -> Option<Timestamp> {
        self.done_time.or(self.time)
    }
}
