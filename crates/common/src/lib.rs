//! Identifier types shared by every layer of the checkout system.

mod types;

pub use types::{OrderId, ProductId, SessionId, UserId};
