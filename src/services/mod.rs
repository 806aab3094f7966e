//! Ledger services: the operation surface exposed to surrounding business
//! systems

pub mod alert;
pub mod level;
pub mod stock;
pub mod warehouse;

pub use alert::AlertService;
pub use level::LevelService;
pub use stock::StockService;
pub use warehouse::WarehouseService;
