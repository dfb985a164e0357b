// src/heuristics/mod.rs

mod lines;
mod prices;
mod repair;

use serde::Deserialize;
use serde::Serialize;

/// Whether a line item is a part or a labor charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Part,
    Labor,
}

/// A single repair line item recovered from office notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairLineItem {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub extended_price: f64,
}

/// Everything the structured parser recovers from one notes blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedRepair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    pub items: Vec<RepairLineItem>,
    pub total_parts: f64,
    pub total_labor: f64,
    pub total_price: f64,
}

impl ParsedRepair {
    /// Build a result from finalized items, summing per kind in item order and
    /// rounding each category total before the grand total.
    pub fn assemble(invoice_number: Option<String>, items: Vec<RepairLineItem>) -> Self {
        let mut total_parts = 0.0;
        let mut total_labor = 0.0;
        for item in &items {
            match item.kind {
                ItemKind::Part => total_parts += item.extended_price,
                ItemKind::Labor => total_labor += item.extended_price,
            }
        }
        let total_parts = round_cents(total_parts);
        let total_labor = round_cents(total_labor);

        Self {
            invoice_number,
            items,
            total_parts,
            total_labor,
            total_price: round_cents(total_parts + total_labor),
        }
    }
}

/// Result of the regex-only fallback: every dollar amount in the notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceExtraction {
    pub prices: Vec<f64>,
    pub total: f64,
    pub has_labor: bool,
}

/// An item still being accumulated by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub kind: ItemKind,
    pub description: String,
    pub part_number: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
}

impl PendingItem {
    pub fn part(description: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Part,
            description: description.into(),
            part_number: None,
            quantity: 1.0,
            unit_price: 0.0,
        }
    }

    pub fn labor() -> Self {
        Self {
            kind: ItemKind::Labor,
            description: "Labor".to_string(),
            part_number: None,
            quantity: 1.0,
            unit_price: 0.0,
        }
    }

    /// Commit the item if it carries a positive price.
    pub fn finalize(self) -> Option<RepairLineItem> {
        if !is_positive(self.unit_price) {
            return None;
        }
        Some(RepairLineItem {
            kind: self.kind,
            extended_price: round_cents(self.unit_price * self.quantity),
            description: self.description,
            part_number: self.part_number,
            quantity: self.quantity,
            unit_price: self.unit_price,
        })
    }
}

/// Round half away from zero to whole cents.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Parse pasted invoice text into parts and labor line items.
///
/// Returns `None` for blank notes, or when nothing priced and no invoice
/// number was found.
pub fn parse_office_notes(text: &str) -> Option<ParsedRepair> {
    repair::parse(text)
}

/// Sum every `$` amount in the notes without trying to structure them.
pub fn extract_prices(text: &str) -> PriceExtraction {
    prices::extract(text)
}
