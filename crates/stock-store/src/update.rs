//! Per-record conditional updates against stock records.
//!
//! Every update addresses exactly one stock record and carries its own match
//! condition. An update that does not match leaves the record untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stock::{Product, ReservationEntry, StockLevel, StockRecord};
use crate::{ProductId, SessionId};

/// Address of one stock record: a product and, for variant products, a size label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockTarget {
    pub product_id: ProductId,
    pub variant: Option<String>,
}

impl std::fmt::Display for StockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(label) => write!(f, "{} (size {})", self.product_id, label),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// What a conditional update does once its record matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockMutation {
    /// Matches when `quantity - reserved >= quantity` (and a variant is in stock).
    /// Increments `reserved` and appends a reservation entry.
    Hold {
        quantity: u32,
        reserved_at: DateTime<Utc>,
    },
    /// Matches when the session holds an entry. Removes the session's entries
    /// and decrements `reserved` by the amount they held.
    Release,
    /// Matches when the session holds exactly `quantity` on the record.
    /// Removes the session's entries and decrements both `quantity` and
    /// `reserved` by that amount.
    Commit { quantity: u32 },
}

/// A conditional update on one stock record on behalf of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub target: StockTarget,
    pub session_id: SessionId,
    pub mutation: StockMutation,
}

impl StockUpdate {
    pub fn hold(
        target: StockTarget,
        session_id: SessionId,
        quantity: u32,
        reserved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target,
            session_id,
            mutation: StockMutation::Hold {
                quantity,
                reserved_at,
            },
        }
    }

    pub fn release(target: StockTarget, session_id: SessionId) -> Self {
        Self {
            target,
            session_id,
            mutation: StockMutation::Release,
        }
    }

    pub fn commit(target: StockTarget, session_id: SessionId, quantity: u32) -> Self {
        Self {
            target,
            session_id,
            mutation: StockMutation::Commit { quantity },
        }
    }
}

/// Counters reported by the store for one submitted batch of updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub matched: u64,
    pub modified: u64,
    pub inserted: u64,
    pub upserted: u64,
    pub deleted: u64,
    /// Whether each update, in submission order, matched its record.
    pub op_matched: Vec<bool>,
}

impl BatchOutcome {
    /// Records the result of the next update in the batch.
    pub fn record(&mut self, matched: bool) {
        self.op_matched.push(matched);
        if matched {
            self.matched += 1;
            self.modified += 1;
        }
    }
}

impl StockRecord {
    /// Removes every entry the session holds, returning their total, or
    /// `None` when the session holds nothing here.
    fn take_reservations(&mut self, session_id: &SessionId) -> Option<u32> {
        if !self.is_held_by(session_id) {
            return None;
        }
        let held = self.held_by(session_id);
        self.reservations
            .retain(|entry| &entry.session_id != session_id);
        Some(held)
    }

    /// Applies a mutation if its condition holds. Returns whether it matched.
    pub fn apply(
        &mut self,
        session_id: &SessionId,
        mutation: &StockMutation,
        require_in_stock: bool,
    ) -> bool {
        match mutation {
            StockMutation::Hold {
                quantity,
                reserved_at,
            } => {
                if *quantity == 0
                    || self.available() < *quantity
                    || (require_in_stock && !self.in_stock)
                {
                    return false;
                }
                self.reserved += quantity;
                self.reservations.push(ReservationEntry {
                    session_id: session_id.clone(),
                    quantity: *quantity,
                    reserved_at: *reserved_at,
                });
                true
            }
            StockMutation::Release => match self.take_reservations(session_id) {
                Some(held) => {
                    self.reserved = self.reserved.saturating_sub(held);
                    true
                }
                None => false,
            },
            StockMutation::Commit { quantity } => {
                if *quantity == 0 || self.held_by(session_id) != *quantity {
                    return false;
                }
                self.take_reservations(session_id);
                self.quantity = self.quantity.saturating_sub(*quantity);
                self.reserved = self.reserved.saturating_sub(*quantity);
                self.recompute_in_stock();
                true
            }
        }
    }
}

impl Product {
    /// Applies an update addressed to this product. Returns whether it matched.
    ///
    /// Simple and variant products are dispatched here once; a simple target
    /// never matches a variant product and vice versa.
    pub fn apply(&mut self, update: &StockUpdate) -> bool {
        let require_in_stock = matches!(self.stock, StockLevel::Variants(_));
        match self.stock.record_mut(update.target.variant.as_deref()) {
            Some(record) => record.apply(&update.session_id, &update.mutation, require_in_stock),
            None => false,
        }
    }

    /// Returns true if the session holds stock on any record of the product.
    pub fn is_held_by(&self, session_id: &SessionId) -> bool {
        self.stock
            .records()
            .any(|(_, record)| record.is_held_by(session_id))
    }

    /// Releases the session's holds on every record of the product and
    /// returns the number of records it held.
    pub fn release_session(&mut self, session_id: &SessionId) -> u64 {
        let release = StockMutation::Release;
        match &mut self.stock {
            StockLevel::Simple(record) => u64::from(record.apply(session_id, &release, false)),
            StockLevel::Variants(variants) => variants
                .values_mut()
                .map(|record| u64::from(record.apply(session_id, &release, false)))
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionId {
        SessionId::new(id)
    }

    fn simple_target() -> StockTarget {
        StockTarget {
            product_id: ProductId::new("SKU-001"),
            variant: None,
        }
    }

    fn variant_target(label: &str) -> StockTarget {
        StockTarget {
            product_id: ProductId::new("TEE"),
            variant: Some(label.to_string()),
        }
    }

    #[test]
    fn hold_matches_only_when_enough_is_available() {
        let mut product = Product::simple("SKU-001", 2);
        let s1 = session("cs_test_one");

        assert!(product.apply(&StockUpdate::hold(simple_target(), s1.clone(), 2, Utc::now())));
        assert!(!product.apply(&StockUpdate::hold(
            simple_target(),
            session("cs_test_two"),
            1,
            Utc::now()
        )));

        let record = product.record(None).unwrap();
        assert_eq!(record.reserved, 2);
        assert_eq!(record.reservations.len(), 1);
        assert_eq!(record.held_by(&s1), 2);
        product.check_invariants().unwrap();
    }

    #[test]
    fn release_restores_record_exactly() {
        let mut product = Product::simple("SKU-001", 5);
        let before = product.clone();
        let s1 = session("cs_test_one");

        product.apply(&StockUpdate::hold(simple_target(), s1.clone(), 3, Utc::now()));
        assert!(product.apply(&StockUpdate::release(simple_target(), s1.clone())));
        assert_eq!(product, before);

        // Nothing left to release.
        assert!(!product.apply(&StockUpdate::release(simple_target(), s1)));
    }

    #[test]
    fn release_only_removes_the_sessions_own_entries() {
        let mut product = Product::simple("SKU-001", 5);
        product.apply(&StockUpdate::hold(simple_target(), session("cs_test_a"), 2, Utc::now()));
        product.apply(&StockUpdate::hold(simple_target(), session("cs_test_b"), 1, Utc::now()));

        product.apply(&StockUpdate::release(simple_target(), session("cs_test_a")));

        let record = product.record(None).unwrap();
        assert_eq!(record.reserved, 1);
        assert_eq!(record.reservations.len(), 1);
        assert_eq!(record.reservations[0].session_id, session("cs_test_b"));
        product.check_invariants().unwrap();
    }

    #[test]
    fn commit_decrements_quantity_and_reserved_together() {
        let mut product = Product::simple("SKU-001", 1);
        let s1 = session("cs_test_one");
        product.apply(&StockUpdate::hold(simple_target(), s1.clone(), 1, Utc::now()));

        assert!(product.apply(&StockUpdate::commit(simple_target(), s1.clone(), 1)));

        let record = product.record(None).unwrap();
        assert_eq!(record.quantity, 0);
        assert_eq!(record.reserved, 0);
        assert!(record.reservations.is_empty());
        assert!(!record.in_stock);

        // A second commit finds no reservation to convert.
        assert!(!product.apply(&StockUpdate::commit(simple_target(), s1, 1)));
    }

    #[test]
    fn commit_must_match_the_held_amount() {
        let mut product = Product::simple("SKU-001", 5);
        let s1 = session("cs_test_one");
        product.apply(&StockUpdate::hold(simple_target(), s1.clone(), 1, Utc::now()));
        let before = product.clone();

        assert!(!product.apply(&StockUpdate::commit(simple_target(), s1.clone(), 3)));
        assert!(!product.apply(&StockUpdate::commit(simple_target(), s1.clone(), 0)));
        assert_eq!(product, before);

        assert!(product.apply(&StockUpdate::commit(simple_target(), s1, 1)));
        let record = product.record(None).unwrap();
        assert_eq!(record.quantity, 4);
        assert_eq!(record.reserved, 0);
        product.check_invariants().unwrap();
    }

    #[test]
    fn release_session_clears_every_variant() {
        let mut product = Product::with_variants("TEE", [("S", 3), ("M", 3), ("L", 3)]);
        let s1 = session("cs_test_one");
        product.apply(&StockUpdate::hold(variant_target("S"), s1.clone(), 1, Utc::now()));
        product.apply(&StockUpdate::hold(variant_target("M"), s1.clone(), 2, Utc::now()));
        product.apply(&StockUpdate::hold(variant_target("L"), session("cs_test_two"), 1, Utc::now()));

        assert!(product.is_held_by(&s1));
        assert_eq!(product.release_session(&s1), 2);
        assert!(!product.is_held_by(&s1));
        assert_eq!(product.aggregate_reserved(), 1);
        assert_eq!(product.release_session(&s1), 0);
        product.check_invariants().unwrap();
    }

    #[test]
    fn variant_hold_requires_in_stock_flag() {
        let mut product = Product::with_variants("TEE", [("S", 3), ("M", 3)]);
        if let StockLevel::Variants(variants) = &mut product.stock {
            variants.get_mut("S").unwrap().in_stock = false;
        }

        assert!(!product.apply(&StockUpdate::hold(
            variant_target("S"),
            session("cs_test_one"),
            1,
            Utc::now()
        )));
        assert!(product.apply(&StockUpdate::hold(
            variant_target("M"),
            session("cs_test_one"),
            1,
            Utc::now()
        )));
        assert!(!product.apply(&StockUpdate::hold(
            variant_target("XL"),
            session("cs_test_one"),
            1,
            Utc::now()
        )));
        assert_eq!(product.aggregate_reserved(), 1);
    }

    #[test]
    fn simple_target_never_matches_variant_product() {
        let mut product = Product::with_variants("TEE", [("S", 3)]);
        assert!(!product.apply(&StockUpdate::hold(
            StockTarget {
                product_id: ProductId::new("TEE"),
                variant: None,
            },
            session("cs_test_one"),
            1,
            Utc::now()
        )));
    }

    #[test]
    fn zero_quantity_hold_never_matches() {
        let mut product = Product::simple("SKU-001", 3);
        assert!(!product.apply(&StockUpdate::hold(
            simple_target(),
            session("cs_test_one"),
            0,
            Utc::now()
        )));
    }

    #[test]
    fn batch_outcome_counts_matches() {
        let mut outcome = BatchOutcome::default();
        outcome.record(true);
        outcome.record(false);
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 1);
        assert_eq!(outcome.op_matched, vec![true, false]);
    }
}
