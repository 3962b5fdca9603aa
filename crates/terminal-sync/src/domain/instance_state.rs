//! Projection of one terminal replica
//!
//! Pure state rebuilt from the ordered event stream of a single instance.
//! Holds no timers and performs no I/O; the application layer owns those.

use std::collections::HashMap;

use mirror_core::{
    AccountInformation, InstanceIndex, Order, Position, PriceUpdate, ResyncScope, Symbol,
    SymbolPrice, SymbolSpecification,
};
use rust_decimal::Decimal;
use tracing::trace;

/// Projected state of one terminal instance
#[derive(Debug, Clone, Default)]
pub struct InstanceState {
    pub instance_index: InstanceIndex,
    pub connected: bool,
    pub connected_to_broker: bool,
    pub account_information: Option<AccountInformation>,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub specifications: HashMap<Symbol, SymbolSpecification>,
    pub prices: HashMap<Symbol, SymbolPrice>,
    pub positions_initialized: bool,
    pub orders_initialized: bool,
    /// Set once the deal history finished synchronizing
    pub synchronized: bool,
    /// Ordinal of the last synchronization start; 0 before the first one
    pub synchronization_epoch: u64,
}

impl InstanceState {
    pub fn new(instance_index: InstanceIndex) -> Self {
        InstanceState {
            instance_index,
            ..Default::default()
        }
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.connected_to_broker = false;
    }

    /// Drop what the coming synchronization resends. Parts outside `scope`
    /// are unchanged on the server and stay as projected.
    pub fn reset(&mut self, epoch: u64, scope: ResyncScope) {
        self.account_information = None;
        if scope.positions {
            self.positions.clear();
            self.positions_initialized = false;
        }
        if scope.orders {
            self.orders.clear();
            self.orders_initialized = false;
        }
        if scope.specifications {
            self.specifications.clear();
            self.prices.clear();
        }
        self.synchronized = false;
        self.synchronization_epoch = epoch;
    }

    pub fn replace_positions(&mut self, positions: &[Position]) {
        self.positions.clear();
        for position in positions {
            self.upsert_position(position.clone());
        }
        self.positions_initialized = true;
    }

    /// Insert or replace by id
    pub fn upsert_position(&mut self, position: Position) {
        match self.positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position,
            None => self.positions.push(position),
        }
    }

    pub fn remove_position(&mut self, position_id: &str) {
        self.positions.retain(|p| p.id != position_id);
    }

    pub fn replace_orders(&mut self, orders: &[Order]) {
        self.orders.clear();
        for order in orders {
            self.upsert_order(order.clone());
        }
        self.orders_initialized = true;
    }

    pub fn upsert_order(&mut self, order: Order) {
        match self.orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => self.orders.push(order),
        }
    }

    pub fn complete_order(&mut self, order_id: &str) {
        self.orders.retain(|o| o.id != order_id);
    }

    pub fn update_specifications(
        &mut self,
        specifications: &[SymbolSpecification],
        removed_symbols: &[String],
    ) {
        for specification in specifications {
            self.specifications
                .insert(specification.symbol.clone(), specification.clone());
        }
        for symbol in removed_symbols {
            self.specifications.remove(symbol);
            self.prices.remove(symbol);
        }
    }

    /// Apply a batch of quotes, remark positions and orders on the quoted
    /// symbols, then refresh the account figures
    pub fn apply_prices(&mut self, update: &PriceUpdate) {
        for price in &update.prices {
            self.prices.insert(price.symbol.clone(), price.clone());

            let specification = self.specifications.get(&price.symbol);
            for position in self.positions.iter_mut().filter(|p| p.symbol == price.symbol) {
                match specification {
                    Some(specification) => remark_position(position, specification, price),
                    None => trace!(symbol = %price.symbol, "No specification, position profit left as is"),
                }
            }

            for order in self.orders.iter_mut().filter(|o| o.symbol == price.symbol) {
                order.current_price = Some(order.order_type.market_price(price.bid, price.ask));
            }
        }

        let all_positions_priced = self
            .positions
            .iter()
            .all(|p| self.prices.contains_key(&p.symbol));
        let unrealized: Decimal = self
            .positions
            .iter()
            .map(|p| p.unrealized_profit.unwrap_or(p.profit))
            .sum();

        if let Some(account) = self.account_information.as_mut() {
            if self.positions_initialized && all_positions_priced {
                account.equity = account.balance + unrealized;
            } else if let Some(equity) = update.equity {
                account.equity = equity;
            }
            if let Some(margin) = update.margin {
                account.margin = margin;
            }
            if let Some(free_margin) = update.free_margin {
                account.free_margin = free_margin;
            }
            if update.margin_level.is_some() {
                account.margin_level = update.margin_level;
            }
        }
    }

    pub fn position(&self, position_id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == order_id)
    }
}

/// Mark a position to a new quote.
///
/// The realized part of the reported profit is derived once from the last
/// known price and carried unchanged; only the unrealized part moves.
fn remark_position(position: &mut Position, specification: &SymbolSpecification, price: &SymbolPrice) {
    let tick_size = specification.tick_size;
    if position.unrealized_profit.is_none() || position.realized_profit.is_none() {
        let unrealized = match position.current_tick_value {
            Some(tick_value) => position.profit_at(position.current_price, tick_value, tick_size),
            None => position.profit,
        };
        position.unrealized_profit = Some(unrealized);
        position.realized_profit = Some(position.profit - unrealized);
    }

    let new_price = position.closing_price(price.bid, price.ask);
    let move_sign = position.position_type.direction() * (new_price - position.open_price);
    let Some(tick_value) = price.tick_value_for(move_sign) else {
        trace!(symbol = %price.symbol, "Quote carries no tick value");
        return;
    };

    let unrealized = position.profit_at(new_price, tick_value, tick_size);
    position.unrealized_profit = Some(unrealized);
    position.profit = unrealized + position.realized_profit.unwrap_or(Decimal::ZERO);
    position.current_price = new_price;
    position.current_tick_value = Some(tick_value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{OrderType, PositionType};
    use rust_decimal_macros::dec;

    fn priced_state() -> InstanceState {
        let mut state = InstanceState::new(0);
        state.update_specifications(&[SymbolSpecification::new("EURUSD", dec!(0.01))], &[]);
        state
    }

    fn quote(bid: Decimal, ask: Decimal) -> PriceUpdate {
        PriceUpdate {
            prices: vec![SymbolPrice::new("EURUSD", bid, ask).with_tick_values(dec!(0.5), dec!(0.5))],
            ..Default::default()
        }
    }

    #[test]
    fn test_buy_position_marked_at_bid() {
        let mut state = priced_state();
        state.replace_positions(&[Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2))
            .with_current_tick_value(dec!(0.5))]);

        state.apply_prices(&quote(dec!(10), dec!(11)));

        let position = state.position("1").unwrap();
        assert_eq!(position.current_price, dec!(10));
        assert_eq!(position.unrealized_profit, Some(dec!(200)));
        assert_eq!(position.profit, dec!(200));
        assert_eq!(position.current_tick_value, Some(dec!(0.5)));
    }

    #[test]
    fn test_sell_position_marked_at_ask() {
        let mut state = priced_state();
        state.replace_positions(&[Position::new("2", PositionType::Sell, "EURUSD", dec!(8), dec!(2))
            .with_current_tick_value(dec!(0.5))]);

        state.apply_prices(&quote(dec!(10), dec!(11)));

        let position = state.position("2").unwrap();
        assert_eq!(position.current_price, dec!(11));
        assert_eq!(position.profit, dec!(-300));
    }

    #[test]
    fn test_realized_part_is_preserved() {
        let mut state = priced_state();
        // reported profit 250 at price 10: 200 unrealized, 50 realized
        state.replace_positions(&[Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2))
            .with_current_price(dec!(10))
            .with_current_tick_value(dec!(0.5))
            .with_profit(dec!(250))]);

        state.apply_prices(&quote(dec!(9), dec!(9.5)));

        let position = state.position("1").unwrap();
        assert_eq!(position.realized_profit, Some(dec!(50)));
        assert_eq!(position.unrealized_profit, Some(dec!(100)));
        assert_eq!(position.profit, dec!(150));
    }

    #[test]
    fn test_loss_side_tick_value_used_for_losing_move() {
        let mut state = priced_state();
        state.replace_positions(&[Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(1))
            .with_current_tick_value(dec!(1))]);

        let update = PriceUpdate {
            prices: vec![SymbolPrice::new("EURUSD", dec!(7), dec!(7.5)).with_tick_values(dec!(1), dec!(2))],
            ..Default::default()
        };
        state.apply_prices(&update);

        // -1 * 2 * 1 / 0.01
        assert_eq!(state.position("1").unwrap().profit, dec!(-200));
    }

    #[test]
    fn test_position_without_specification_is_untouched() {
        let mut state = InstanceState::new(0);
        state.replace_positions(&[Position::new("1", PositionType::Buy, "GBPUSD", dec!(8), dec!(2))
            .with_profit(dec!(5))]);

        state.apply_prices(&PriceUpdate {
            prices: vec![SymbolPrice::new("GBPUSD", dec!(10), dec!(11)).with_tick_values(dec!(1), dec!(1))],
            ..Default::default()
        });

        let position = state.position("1").unwrap();
        assert_eq!(position.profit, dec!(5));
        assert_eq!(position.current_price, dec!(8));
        assert!(state.prices.contains_key("GBPUSD"));
    }

    #[test]
    fn test_orders_take_side_price() {
        let mut state = priced_state();
        state.replace_orders(&[
            Order::new("b", OrderType::BuyLimit, "EURUSD", dec!(1)),
            Order::new("s", OrderType::SellStop, "EURUSD", dec!(1)),
        ]);

        state.apply_prices(&quote(dec!(10), dec!(11)));

        assert_eq!(state.order("b").unwrap().current_price, Some(dec!(11)));
        assert_eq!(state.order("s").unwrap().current_price, Some(dec!(10)));
    }

    #[test]
    fn test_equity_from_positions_when_all_priced() {
        let mut state = priced_state();
        state.account_information = Some(AccountInformation::new(dec!(1000), dec!(1000)));
        state.replace_positions(&[Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2))
            .with_current_tick_value(dec!(0.5))]);

        let mut update = quote(dec!(10), dec!(11));
        update.equity = Some(dec!(999));
        update.margin = Some(dec!(40));
        update.free_margin = Some(dec!(1160));
        state.apply_prices(&update);

        let account = state.account_information.as_ref().unwrap();
        assert_eq!(account.equity, dec!(1200));
        assert_eq!(account.margin, dec!(40));
        assert_eq!(account.free_margin, dec!(1160));
    }

    #[test]
    fn test_equity_falls_back_to_packet_value() {
        let mut state = priced_state();
        state.account_information = Some(AccountInformation::new(dec!(1000), dec!(1000)));
        state.replace_positions(&[
            Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2)),
            Position::new("2", PositionType::Buy, "XAUUSD", dec!(1900), dec!(1)),
        ]);

        let mut update = quote(dec!(10), dec!(11));
        update.equity = Some(dec!(1234));
        state.apply_prices(&update);

        assert_eq!(state.account_information.as_ref().unwrap().equity, dec!(1234));
    }

    #[test]
    fn test_upsert_keeps_ids_unique() {
        let mut state = InstanceState::new(0);
        state.upsert_position(Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(1)).with_profit(dec!(10)));
        state.upsert_position(Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(1)).with_profit(dec!(11)));

        assert_eq!(state.positions.len(), 1);
        assert_eq!(state.positions[0].profit, dec!(11));
    }

    #[test]
    fn test_removed_symbol_drops_specification_and_price() {
        let mut state = priced_state();
        state.apply_prices(&quote(dec!(10), dec!(11)));

        state.update_specifications(&[], &["EURUSD".to_string()]);

        assert!(state.specifications.is_empty());
        assert!(state.prices.is_empty());
    }

    #[test]
    fn test_reset_clears_entities() {
        let mut state = priced_state();
        state.connected = true;
        state.replace_positions(&[Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(1))]);
        state.replace_orders(&[Order::new("o", OrderType::BuyLimit, "EURUSD", dec!(1))]);
        state.synchronized = true;

        state.reset(7, ResyncScope::FULL);

        assert!(state.connected);
        assert!(state.positions.is_empty() && state.orders.is_empty());
        assert!(state.specifications.is_empty());
        assert!(!state.positions_initialized && !state.orders_initialized);
        assert!(!state.synchronized);
        assert_eq!(state.synchronization_epoch, 7);
    }

    #[test]
    fn test_reset_keeps_parts_outside_scope() {
        let mut state = priced_state();
        state.replace_positions(&[Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(1))]);
        state.replace_orders(&[Order::new("o", OrderType::BuyLimit, "EURUSD", dec!(1))]);
        state.synchronized = true;

        state.reset(
            2,
            ResyncScope {
                specifications: false,
                positions: false,
                orders: true,
            },
        );

        assert_eq!(state.positions.len(), 1);
        assert!(state.positions_initialized);
        assert!(state.specifications.contains_key("EURUSD"));
        assert!(state.orders.is_empty() && !state.orders_initialized);
        assert!(!state.synchronized);
    }
}
