use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading account summary as reported by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInformation {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub broker: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub server: String,
    pub balance: Decimal,
    pub equity: Decimal,
    #[serde(default)]
    pub margin: Decimal,
    #[serde(default)]
    pub free_margin: Decimal,
    #[serde(default)]
    pub leverage: Decimal,
    /// Absent while no margin is in use
    #[serde(default)]
    pub margin_level: Option<Decimal>,
}

impl AccountInformation {
    /// Create account information with the given balance and equity
    pub fn new(balance: Decimal, equity: Decimal) -> Self {
        AccountInformation {
            platform: String::new(),
            broker: String::new(),
            currency: String::new(),
            server: String::new(),
            balance,
            equity,
            margin: Decimal::ZERO,
            free_margin: Decimal::ZERO,
            leverage: Decimal::ZERO,
            margin_level: None,
        }
    }
}
