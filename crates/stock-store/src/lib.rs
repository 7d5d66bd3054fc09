//! Persistence layer for stock reservation and checkout commit.
//!
//! Stock records are only ever mutated through [`StockUpdate`]s: per-record
//! conditional writes that either match and apply atomically or leave the
//! record untouched. Both backends honor the same matching rules.

pub mod error;
pub mod idempotency;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod session;
pub mod stock;
pub mod store;
pub mod update;

pub use common::{OrderId, ProductId, SessionId, UserId};
pub use error::{Result, StoreError};
pub use idempotency::{IdempotencyRecord, IdempotencyStatus};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use order::Order;
pub use postgres::{PostgresStore, PostgresTransaction};
pub use session::{CheckoutSession, SessionStatus};
pub use stock::{InvariantViolation, LineItem, Product, ReservationEntry, StockLevel, StockRecord};
pub use store::{
    BagStore, CheckoutStore, IdempotencyStore, OrderStore, SessionStore, StockStore,
    StockTransaction,
};
pub use update::{BatchOutcome, StockMutation, StockTarget, StockUpdate};
