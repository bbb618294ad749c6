//! Ranked candidates for lines the matcher could not link.
//!
//! Suggestions only help a reviewer; nothing here ever links a line.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::TenantId;
use stockledger_products::{Catalog, StockItem};

/// Uppercase words kept as-is when tidying a supplier description.
const ACRONYMS: [&str; 9] = ["TNT", "LED", "USB", "PVC", "MDF", "PP", "PE", "EAN", "SKU"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub item: StockItem,
    pub sku: String,
    pub label: String,
    /// Token overlap in [0, 1], two decimal places.
    pub score: Decimal,
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_uppercase)
        .collect()
}

/// Jaccard overlap between the description and each active catalog item's
/// label + SKU. Zero-overlap items are dropped; ties break on SKU.
pub fn suggest<C: Catalog + ?Sized>(
    catalog: &C,
    tenant_id: TenantId,
    description: &str,
    limit: usize,
) -> Vec<MatchSuggestion> {
    let wanted = tokens(description);
    if wanted.is_empty() || limit == 0 {
        return vec![];
    }

    let mut ranked: Vec<MatchSuggestion> = catalog
        .entries(tenant_id)
        .into_iter()
        .filter(|e| e.active)
        .filter_map(|e| {
            let have = tokens(&format!("{} {}", e.label, e.sku));
            let shared = wanted.intersection(&have).count();
            if shared == 0 {
                return None;
            }
            let union = wanted.union(&have).count();
            let score = (Decimal::from(shared) / Decimal::from(union)).round_dp(2);
            Some(MatchSuggestion {
                item: e.item,
                sku: e.sku,
                label: e.label,
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.sku.cmp(&b.sku)));
    ranked.truncate(limit);
    ranked
}

/// Tidy a raw supplier description into a proposed product name:
/// collapsed whitespace, capitalized words, short words and acronyms upper.
pub fn suggested_name(description: &str) -> String {
    description
        .split_whitespace()
        .map(|word| {
            let upper = word.to_uppercase();
            if ACRONYMS.contains(&upper.as_str()) || word.chars().count() <= 2 {
                upper
            } else {
                let lower = word.to_lowercase();
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
