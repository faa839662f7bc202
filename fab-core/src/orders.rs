//! Order numbers from the line's order export.

use crate::errors::Result;
use anyhow::Context;
use std::fs;
use std::path::Path;

const ORDER_MARKER: &str = "order-no: ";

/// Unique order numbers in first-seen order. The value runs from the marker to
/// the next comma.
pub fn parse_orders(text: &str) -> Vec<String> {
    let mut orders: Vec<String> = Vec::new();
    for line in text.lines() {
        let Some((_, rest)) = line.split_once(ORDER_MARKER) else {
            continue;
        };
        let order = rest.split(',').next().unwrap_or_default().trim();
        if order.is_empty() || orders.iter().any(|o| o == order) {
            continue;
        }
        orders.push(order.to_string());
    }
    orders
}

pub fn read_orders(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read order file {}", path.display()))?;
    Ok(parse_orders(&text))
}
