//! Stock records and the simple-vs-variant product model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::update::StockTarget;
use crate::{ProductId, SessionId};

/// One purchasable line: a quantity of a product, optionally of a size variant.
///
/// This is the metadata shape the payment gateway carries for a session, and
/// the input to reservation, release and commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl LineItem {
    /// Creates a line item for a simple (non-variant) product.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            variant: None,
        }
    }

    /// Creates a line item for one size variant of a product.
    pub fn variant(
        product_id: impl Into<ProductId>,
        label: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            variant: Some(label.into()),
        }
    }

    /// Returns the stock record this line draws from.
    pub fn target(&self) -> StockTarget {
        StockTarget {
            product_id: self.product_id.clone(),
            variant: self.variant.clone(),
        }
    }
}

/// A temporary hold on stock owned by one checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationEntry {
    pub session_id: SessionId,
    pub quantity: u32,
    pub reserved_at: DateTime<Utc>,
}

/// Stock of a single sellable unit: a simple product or one size variant.
///
/// `reserved` always equals the sum of `reservations[].quantity` and never
/// exceeds `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub quantity: u32,
    pub reserved: u32,
    pub reservations: Vec<ReservationEntry>,
    pub in_stock: bool,
}

impl StockRecord {
    /// Creates a record with nothing reserved.
    pub fn new(quantity: u32) -> Self {
        Self {
            quantity,
            reserved: 0,
            reservations: Vec::new(),
            in_stock: quantity > 0,
        }
    }

    /// Units eligible for new reservations.
    pub fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.reserved)
    }

    /// Total quantity currently held by the given session.
    pub fn held_by(&self, session_id: &SessionId) -> u32 {
        self.reservations
            .iter()
            .filter(|entry| &entry.session_id == session_id)
            .map(|entry| entry.quantity)
            .sum()
    }

    /// Returns true if the session holds at least one entry on this record.
    pub fn is_held_by(&self, session_id: &SessionId) -> bool {
        self.reservations
            .iter()
            .any(|entry| &entry.session_id == session_id)
    }

    /// A record stays in stock only while it has units left.
    pub fn recompute_in_stock(&mut self) {
        self.in_stock = self.in_stock && self.quantity > 0;
    }

    fn check_invariants(&self, location: String) -> Result<(), InvariantViolation> {
        if let Some(entry) = self.reservations.iter().find(|e| e.quantity == 0) {
            return Err(InvariantViolation::EmptyEntry {
                location,
                session_id: entry.session_id.clone(),
            });
        }
        let entries: u32 = self.reservations.iter().map(|e| e.quantity).sum();
        if entries != self.reserved {
            return Err(InvariantViolation::ReservedMismatch {
                location,
                reserved: self.reserved,
                entries,
            });
        }
        if self.reserved > self.quantity {
            return Err(InvariantViolation::Oversold {
                location,
                quantity: self.quantity,
                reserved: self.reserved,
            });
        }
        Ok(())
    }
}

/// A product is either one stock record or one stock record per size label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stock", rename_all = "snake_case")]
pub enum StockLevel {
    Simple(StockRecord),
    Variants(BTreeMap<String, StockRecord>),
}

impl StockLevel {
    /// Resolves the record addressed by an optional variant label.
    ///
    /// A label never resolves on a simple product, and a variant product
    /// never resolves without one.
    pub fn record(&self, variant: Option<&str>) -> Option<&StockRecord> {
        match (self, variant) {
            (StockLevel::Simple(record), None) => Some(record),
            (StockLevel::Variants(variants), Some(label)) => variants.get(label),
            _ => None,
        }
    }

    /// Mutable counterpart of [`StockLevel::record`].
    pub fn record_mut(&mut self, variant: Option<&str>) -> Option<&mut StockRecord> {
        match (self, variant) {
            (StockLevel::Simple(record), None) => Some(record),
            (StockLevel::Variants(variants), Some(label)) => variants.get_mut(label),
            _ => None,
        }
    }

    /// Iterates every record with its variant label.
    pub fn records(
        &self,
    ) -> Box<dyn Iterator<Item = (Option<&str>, &StockRecord)> + Send + '_> {
        match self {
            StockLevel::Simple(record) => Box::new(std::iter::once((None, record))),
            StockLevel::Variants(variants) => Box::new(
                variants
                    .iter()
                    .map(|(label, record)| (Some(label.as_str()), record)),
            ),
        }
    }
}

/// The stock-bearing view of a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub stock: StockLevel,
}

impl Product {
    /// Creates a simple product holding `quantity` units.
    pub fn simple(id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            id: id.into(),
            stock: StockLevel::Simple(StockRecord::new(quantity)),
        }
    }

    /// Creates a product with one stock record per size label.
    pub fn with_variants<I, L>(id: impl Into<ProductId>, variants: I) -> Self
    where
        I: IntoIterator<Item = (L, u32)>,
        L: Into<String>,
    {
        Self {
            id: id.into(),
            stock: StockLevel::Variants(
                variants
                    .into_iter()
                    .map(|(label, quantity)| (label.into(), StockRecord::new(quantity)))
                    .collect(),
            ),
        }
    }

    /// Total owned units across all records.
    pub fn aggregate_quantity(&self) -> u32 {
        self.stock.records().map(|(_, r)| r.quantity).sum()
    }

    /// Total reserved units across all records.
    pub fn aggregate_reserved(&self) -> u32 {
        self.stock.records().map(|(_, r)| r.reserved).sum()
    }

    /// Available units of the addressed record, if it exists.
    pub fn available(&self, variant: Option<&str>) -> Option<u32> {
        self.stock.record(variant).map(StockRecord::available)
    }

    /// Returns the record addressed by an optional variant label.
    pub fn record(&self, variant: Option<&str>) -> Option<&StockRecord> {
        self.stock.record(variant)
    }

    /// Verifies the at-rest invariants of every record.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (label, record) in self.stock.records() {
            let location = match label {
                Some(label) => format!("{}/{}", self.id, label),
                None => self.id.to_string(),
            };
            record.check_invariants(location)?;
        }
        Ok(())
    }
}

/// A broken stock invariant, reported with the record it was found on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{location}: reserved {reserved} does not match reservation entries totalling {entries}")]
    ReservedMismatch {
        location: String,
        reserved: u32,
        entries: u32,
    },

    #[error("{location}: reserved {reserved} exceeds quantity {quantity}")]
    Oversold {
        location: String,
        quantity: u32,
        reserved: u32,
    },

    #[error("{location}: empty reservation entry for session {session_id}")]
    EmptyEntry {
        location: String,
        session_id: SessionId,
    },
}
