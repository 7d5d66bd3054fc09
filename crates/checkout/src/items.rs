//! Line item validation and merging.

use stock_store::LineItem;

use crate::error::{CheckoutError, Result};

/// Rejects empty requests, zero quantities and empty variant labels.
pub fn validate_items(items: &[LineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(CheckoutError::NoItems);
    }
    for item in items {
        if item.quantity == 0 {
            return Err(CheckoutError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            });
        }
        if item.variant.as_deref().is_some_and(|label| label.trim().is_empty()) {
            return Err(CheckoutError::InvalidVariant(item.product_id.clone()));
        }
    }
    Ok(())
}

/// Combines line items addressing the same stock record, keeping the order
/// in which each record first appears.
///
/// A session holds at most one conditional update per record, so repeated
/// lines must be summed before they are submitted.
pub fn merge_line_items(items: &[LineItem]) -> Vec<LineItem> {
    let mut merged: Vec<LineItem> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|existing| existing.target() == item.target()) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => merged.push(item.clone()),
        }
    }
    merged
}
