use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{Symbol, Timestamp};

/// Deal type. Types the mirror has no special handling for collapse into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealType {
    #[serde(rename = "DEAL_TYPE_BUY")]
    Buy,
    #[serde(rename = "DEAL_TYPE_SELL")]
    Sell,
    #[serde(rename = "DEAL_TYPE_BALANCE")]
    Balance,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealEntryType {
    #[serde(rename = "DEAL_ENTRY_IN")]
    In,
    #[serde(rename = "DEAL_ENTRY_OUT")]
    Out,
    #[serde(rename = "DEAL_ENTRY_INOUT")]
    InOut,
    #[serde(rename = "DEAL_ENTRY_OUT_BY")]
    OutBy,
}

/// Executed deal from the account history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    #[serde(rename = "type")]
    pub deal_type: DealType,
    #[serde(default)]
    pub entry_type: Option<DealEntryType>,
    #[serde(default)]
    pub symbol: Option<Symbol>,
    pub time: Timestamp,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub profit: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub swap: Decimal,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub position_id: Option<String>,
}

impl Deal {
    pub fn new(id: impl Into<String>, deal_type: DealType, time: Timestamp) -> Self {
        Deal {
            id: id.into(),
            deal_type,
            entry_type: None,
            symbol: None,
            time,
            volume: None,
            price: None,
            profit: Decimal::ZERO,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            order_id: None,
            position_id: None,
        }
    }
}
