mod account;
mod deal;
mod order;
mod position;
mod symbol;

pub use account::AccountInformation;
pub use deal::{Deal, DealEntryType, DealType};
pub use order::{Order, OrderState, OrderType};
pub use position::{Position, PositionType};
pub use symbol::{SymbolPrice, SymbolSpecification};
