//! Inventory reservation and checkout commit.
//!
//! This crate holds the pieces that keep stock consistent under concurrent
//! checkouts:
//! - [`BulkWriter`] submits per-record conditional updates in bounded batches
//! - [`ReservationService`] holds stock for a session, all-or-nothing
//! - [`SessionRegistry`] tracks the monotonic lifecycle of checkout sessions
//! - [`StockCommitService`] turns a reservation into a permanent decrement and an order
//! - [`IdempotencyGuard`] lets the commit path run at most once per payment session

pub mod bulk;
pub mod commit;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod items;
pub mod reservation;
pub mod session;

pub use bulk::{BulkWriteSummary, BulkWriter};
pub use commit::StockCommitService;
pub use config::CheckoutSettings;
pub use error::{BulkWriteError, CheckoutError, Result};
pub use idempotency::{DuplicateReason, GuardOutcome, IdempotencyGuard};
pub use items::{merge_line_items, validate_items};
pub use reservation::{
    ReleaseSummary, ReservationDirection, ReservationReceipt, ReservationService,
    reservation_updates,
};
pub use session::{SessionRegistry, TransitionOutcome};
