//! External service traits and in-memory implementations.

pub mod gateway;

pub use gateway::{GatewaySession, InMemoryPaymentGateway, PaymentGateway};
