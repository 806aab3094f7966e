//! Domain models for the inventory ledger

mod alert;
mod level;
mod movement;
mod warehouse;

pub use alert::*;
pub use level::*;
pub use movement::*;
pub use warehouse::*;
