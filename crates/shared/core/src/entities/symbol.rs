use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{Symbol, Timestamp};

/// Per-symbol contract constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSpecification {
    pub symbol: Symbol,
    /// Minimal price change
    pub tick_size: Decimal,
    #[serde(default)]
    pub min_volume: Decimal,
    #[serde(default)]
    pub max_volume: Decimal,
    #[serde(default)]
    pub volume_step: Decimal,
    #[serde(default)]
    pub digits: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SymbolSpecification {
    pub fn new(symbol: impl Into<Symbol>, tick_size: Decimal) -> Self {
        SymbolSpecification {
            symbol: symbol.into(),
            tick_size,
            min_volume: Decimal::ZERO,
            max_volume: Decimal::ZERO,
            volume_step: Decimal::ZERO,
            digits: None,
            description: None,
        }
    }
}

/// Quote for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPrice {
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Tick value for a profitable move, in account currency
    #[serde(default)]
    pub profit_tick_value: Option<Decimal>,
    /// Tick value for a losing move, in account currency
    #[serde(default)]
    pub loss_tick_value: Option<Decimal>,
    #[serde(default)]
    pub account_currency_exchange_rate: Option<Decimal>,
    #[serde(default)]
    pub time: Option<Timestamp>,
    #[serde(default)]
    pub broker_time: Option<String>,
}

impl SymbolPrice {
    pub fn new(symbol: impl Into<Symbol>, bid: Decimal, ask: Decimal) -> Self {
        SymbolPrice {
            symbol: symbol.into(),
            bid,
            ask,
            profit_tick_value: None,
            loss_tick_value: None,
            account_currency_exchange_rate: None,
            time: None,
            broker_time: None,
        }
    }

    pub fn with_tick_values(mut self, profit: Decimal, loss: Decimal) -> Self {
        self.profit_tick_value = Some(profit);
        self.loss_tick_value = Some(loss);
        self
    }

    /// Tick value for a move in the given direction (positive = profitable)
    pub fn tick_value_for(&self, move_sign: Decimal) -> Option<Decimal> {
        if move_sign > Decimal::ZERO {
            self.profit_tick_value
        } else {
            self.loss_tick_value
        }
    }
}
