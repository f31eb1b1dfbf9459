//! Business transforms applied to rows fetched from the data tier.
//!
//! All functions here are pure: the same input always yields the same output.

use serde_json::{json, Value};

/// Stock above which a clearance discount applies.
const OVERSTOCK_THRESHOLD: u64 = 500;

/// Stock below which a scarcity markup applies.
const SCARCE_THRESHOLD: u64 = 50;

/// Pricing rule chosen for a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingRule {
    Clearance,
    Standard,
    Scarcity,
}

impl PricingRule {
    pub fn for_stock(stock: u64) -> Self {
        if stock > OVERSTOCK_THRESHOLD {
            PricingRule::Clearance
        } else if stock < SCARCE_THRESHOLD {
            PricingRule::Scarcity
        } else {
            PricingRule::Standard
        }
    }

    /// Price multiplier in percent.
    pub fn percent(&self) -> u64 {
        match self {
            PricingRule::Clearance => 90,
            PricingRule::Standard => 100,
            PricingRule::Scarcity => 115,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PricingRule::Clearance => "clearance",
            PricingRule::Standard => "standard",
            PricingRule::Scarcity => "scarcity",
        }
    }
}

/// Add `calculated_price` and `pricing_rule` to a product row.
pub fn apply_pricing(mut product: Value) -> Value {
    let base_cents = product["base_price_cents"].as_u64().unwrap_or_default();
    let stock = product["stock"].as_u64().unwrap_or_default();
    let rule = PricingRule::for_stock(stock);
    let cents = base_cents * rule.percent() / 100;
    if let Some(obj) = product.as_object_mut() {
        obj.insert("calculated_price".into(), json!(cents as f64 / 100.0));
        obj.insert("pricing_rule".into(), json!(rule.as_str()));
    }
    product
}

/// Add display fields to a user row.
pub fn enrich_user(mut user: Value) -> Value {
    let name = user["name"].as_str().unwrap_or_default().to_string();
    let domain = user["email"]
        .as_str()
        .and_then(|e| e.split_once('@'))
        .map(|(_, d)| d.to_string())
        .unwrap_or_default();
    if let Some(obj) = user.as_object_mut() {
        obj.insert("display_name".into(), json!(name.to_uppercase()));
        obj.insert("email_domain".into(), json!(domain));
    }
    user
}

/// Attach a size summary to a general query result.
pub fn summarize_inventory(mut result: Value) -> Value {
    let rows = result["rows"].as_u64().unwrap_or_default();
    let bucket = match rows {
        0..=10 => "small",
        11..=50 => "medium",
        _ => "large",
    };
    if let Some(obj) = result.as_object_mut() {
        obj.insert("summary".into(), json!({ "rows": rows, "bucket": bucket }));
    }
    result
}
