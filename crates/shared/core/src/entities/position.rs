use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{Symbol, Timestamp};

/// Position side as reported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionType {
    /// Long position, closed by selling at bid
    #[serde(rename = "POSITION_TYPE_BUY")]
    Buy,
    /// Short position, closed by buying at ask
    #[serde(rename = "POSITION_TYPE_SELL")]
    Sell,
}

impl PositionType {
    /// +1 for long, -1 for short
    pub fn direction(&self) -> Decimal {
        match self {
            PositionType::Buy => Decimal::ONE,
            PositionType::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Open position held by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Unique position identifier
    pub id: String,

    #[serde(rename = "type")]
    pub position_type: PositionType,

    pub symbol: Symbol,

    #[serde(default)]
    pub magic: i64,

    /// When the position was opened
    #[serde(default)]
    pub time: Option<Timestamp>,

    /// Last modification time
    #[serde(default)]
    pub update_time: Option<Timestamp>,

    pub open_price: Decimal,

    /// Price the position would close at right now
    #[serde(default)]
    pub current_price: Decimal,

    /// Tick value used for the last profit computation
    #[serde(default)]
    pub current_tick_value: Option<Decimal>,

    pub volume: Decimal,

    #[serde(default)]
    pub swap: Decimal,

    /// Total profit (realized + unrealized)
    #[serde(default)]
    pub profit: Decimal,

    #[serde(default)]
    pub commission: Decimal,

    #[serde(default)]
    pub unrealized_profit: Option<Decimal>,

    #[serde(default)]
    pub realized_profit: Option<Decimal>,

    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    #[serde(default)]
    pub take_profit: Option<Decimal>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,
}

impl Position {
    /// Create a position with the fields required for profit tracking
    pub fn new(
        id: impl Into<String>,
        position_type: PositionType,
        symbol: impl Into<Symbol>,
        open_price: Decimal,
        volume: Decimal,
    ) -> Self {
        Position {
            id: id.into(),
            position_type,
            symbol: symbol.into(),
            magic: 0,
            time: None,
            update_time: None,
            open_price,
            current_price: open_price,
            current_tick_value: None,
            volume,
            swap: Decimal::ZERO,
            profit: Decimal::ZERO,
            commission: Decimal::ZERO,
            unrealized_profit: None,
            realized_profit: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
            client_id: None,
        }
    }

    pub fn with_current_tick_value(mut self, tick_value: Decimal) -> Self {
        self.current_tick_value = Some(tick_value);
        self
    }

    pub fn with_profit(mut self, profit: Decimal) -> Self {
        self.profit = profit;
        self
    }

    pub fn with_current_price(mut self, price: Decimal) -> Self {
        self.current_price = price;
        self
    }

    /// Price at which this position would be closed given a quote
    pub fn closing_price(&self, bid: Decimal, ask: Decimal) -> Decimal {
        match self.position_type {
            PositionType::Buy => bid,
            PositionType::Sell => ask,
        }
    }

    /// Unrealized profit at `price` for the given tick value and tick size.
    ///
    /// `direction × (price − open) × tick_value × volume / tick_size`
    pub fn profit_at(&self, price: Decimal, tick_value: Decimal, tick_size: Decimal) -> Decimal {
        if tick_size.is_zero() {
            return Decimal::ZERO;
        }
        self.position_type.direction() * (price - self.open_price) * tick_value * self.volume
            / tick_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_closing_price_by_side() {
        let long = Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2));
        let short = Position::new("2", PositionType::Sell, "EURUSD", dec!(8), dec!(2));

        assert_eq!(long.closing_price(dec!(10), dec!(11)), dec!(10));
        assert_eq!(short.closing_price(dec!(10), dec!(11)), dec!(11));
    }

    #[test]
    fn test_profit_at() {
        let long = Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2));
        // (10 - 8) * 0.5 * 2 / 0.01
        assert_eq!(long.profit_at(dec!(10), dec!(0.5), dec!(0.01)), dec!(200));

        let short = Position::new("2", PositionType::Sell, "EURUSD", dec!(8), dec!(2));
        assert_eq!(short.profit_at(dec!(11), dec!(0.5), dec!(0.01)), dec!(-300));
    }

    #[test]
    fn test_profit_at_zero_tick_size() {
        let long = Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2));
        assert_eq!(long.profit_at(dec!(10), dec!(0.5), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_deserialize_wire_position() {
        let json = r#"{
            "id": "46214692",
            "type": "POSITION_TYPE_BUY",
            "symbol": "GBPUSD",
            "magic": 1000,
            "time": "2020-04-15T02:45:06.521Z",
            "openPrice": 1.26101,
            "currentPrice": 1.24883,
            "currentTickValue": 1,
            "volume": 0.07,
            "swap": 0,
            "profit": -85.25999999999966,
            "commission": -0.25
        }"#;

        let position: Position = serde_json::from_str(json).unwrap();
        assert_eq!(position.id, "46214692");
        assert_eq!(position.position_type, PositionType::Buy);
        assert_eq!(position.current_tick_value, Some(dec!(1)));
        assert!(position.unrealized_profit.is_none());
    }
}
