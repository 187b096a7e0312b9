pub mod engine;
pub mod records;
pub mod versioned;

pub use engine::{StorageEngine, Txn};
pub use records::{
    ClientRecord, EntityKind, OrderItem, OrderRecord, ProductRecord, Role, StockRecord,
    UserRecord,
};
pub use versioned::ApplyOutcome;
