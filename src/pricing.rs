//! Tiered multiplier pricing with charm rounding.

use crate::models::SourceMarketplace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const TIER_COUNT: usize = 6;
const TIERED_CHARM_THRESHOLD: f64 = 20.0;

#[derive(Debug, Error)]
pub enum PricingConfigError {
    #[error("unable to read pricing config: {0}")]
    Io(String),
    #[error("invalid pricing config: {0}")]
    Parse(String),
    #[error("table `{source}` must have exactly {TIER_COUNT} tiers, found {found}")]
    TierCount { r#source: String, found: usize },
    #[error("table `{source}` has a non-positive multiplier or price ceiling")]
    NonPositive { r#source: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CharmStrategy {
    #[default]
    #[serde(rename = "always_99")]
    Always99,
    #[serde(rename = "always_49")]
    Always49,
    #[serde(rename = "tiered")]
    Tiered,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    pub max_price: f64,
    pub multiplier: f64,
}

impl PriceTier {
    pub const fn new(max_price: f64, multiplier: f64) -> Self {
        Self {
            max_price,
            multiplier,
        }
    }
}

/// Six ascending price bands plus the multiplier for anything above the last ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub tiers: Vec<PriceTier>,
    pub catch_all: f64,
}

impl TierTable {
    pub fn new(tiers: [PriceTier; TIER_COUNT], catch_all: f64) -> Self {
        let mut table = Self {
            tiers: tiers.to_vec(),
            catch_all,
        };
        table.sort();
        table
    }

    fn sort(&mut self) {
        self.tiers
            .sort_by(|a, b| a.max_price.total_cmp(&b.max_price));
    }

    /// First tier whose ceiling is strictly above `total`, else the catch-all.
    pub fn multiplier_for(&self, total: f64) -> f64 {
        self.tiers
            .iter()
            .find(|tier| tier.max_price > total)
            .map(|tier| tier.multiplier)
            .unwrap_or(self.catch_all)
    }

    fn validate(&self, source: &str) -> Result<(), PricingConfigError> {
        if self.tiers.len() != TIER_COUNT {
            return Err(PricingConfigError::TierCount {
                source: source.to_string(),
                found: self.tiers.len(),
            });
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.catch_all)
            || self
                .tiers
                .iter()
                .any(|t| !positive(t.max_price) || !positive(t.multiplier))
        {
            return Err(PricingConfigError::NonPositive {
                source: source.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default)]
    pub strategy: CharmStrategy,
    pub tables: HashMap<SourceMarketplace, TierTable>,
}

impl Default for PricingSettings {
    fn default() -> Self {
        let amazon = TierTable::new(
            [
                PriceTier::new(10.0, 2.5),
                PriceTier::new(20.0, 2.2),
                PriceTier::new(35.0, 2.0),
                PriceTier::new(50.0, 1.8),
                PriceTier::new(75.0, 1.6),
                PriceTier::new(100.0, 1.5),
            ],
            1.4,
        );
        let walmart = TierTable::new(
            [
                PriceTier::new(10.0, 2.4),
                PriceTier::new(20.0, 2.1),
                PriceTier::new(35.0, 1.9),
                PriceTier::new(50.0, 1.7),
                PriceTier::new(75.0, 1.55),
                PriceTier::new(100.0, 1.45),
            ],
            1.35,
        );
        let aliexpress = TierTable::new(
            [
                PriceTier::new(5.0, 3.5),
                PriceTier::new(10.0, 3.0),
                PriceTier::new(20.0, 2.6),
                PriceTier::new(35.0, 2.2),
                PriceTier::new(50.0, 1.9),
                PriceTier::new(100.0, 1.7),
            ],
            1.5,
        );
        let tables = HashMap::from([
            (SourceMarketplace::Amazon, amazon.clone()),
            (SourceMarketplace::Walmart, walmart),
            (SourceMarketplace::Aliexpress, aliexpress),
            (SourceMarketplace::Other, amazon),
        ]);
        Self {
            strategy: CharmStrategy::default(),
            tables,
        }
    }
}

impl PricingSettings {
    pub fn from_yaml_str(raw: &str) -> Result<Self, PricingConfigError> {
        let mut settings: Self =
            serde_yaml::from_str(raw).map_err(|err| PricingConfigError::Parse(err.to_string()))?;
        for (source, table) in settings.tables.iter_mut() {
            table.validate(source.as_str())?;
            table.sort();
        }
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, PricingConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| PricingConfigError::Io(format!("{}: {err}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    /// Table for `source`, falling back to the `other` table, then the built-in Amazon table.
    pub fn table_for(&self, source: SourceMarketplace) -> TierTable {
        self.tables
            .get(&source)
            .or_else(|| self.tables.get(&SourceMarketplace::Other))
            .cloned()
            .unwrap_or_else(|| {
                Self::default()
                    .tables
                    .remove(&SourceMarketplace::Amazon)
                    .unwrap_or_else(|| TierTable::new([PriceTier::new(f64::MAX, 1.0); TIER_COUNT], 1.0))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceQuote {
    pub total: f64,
    pub multiplier: f64,
    pub raw: f64,
    pub price: f64,
}

impl PriceQuote {
    fn zero() -> Self {
        Self {
            total: 0.0,
            multiplier: 0.0,
            raw: 0.0,
            price: 0.0,
        }
    }
}

/// Computes the destination sale price.
///
/// A non-positive source cost short-circuits to a zero quote without applying
/// any multiplier or rounding. An explicit multiplier, when positive, bypasses
/// the tier lookup.
pub fn quote(
    source_cost: f64,
    delivery_fee: f64,
    source: SourceMarketplace,
    explicit_multiplier: Option<f64>,
    settings: &PricingSettings,
) -> PriceQuote {
    if !source_cost.is_finite() || source_cost <= 0.0 {
        return PriceQuote::zero();
    }
    let delivery = if delivery_fee.is_finite() {
        delivery_fee.max(0.0)
    } else {
        0.0
    };
    let total = source_cost + delivery;
    let multiplier = explicit_multiplier
        .filter(|m| m.is_finite() && *m > 0.0)
        .unwrap_or_else(|| settings.table_for(source).multiplier_for(total));
    let raw = total * multiplier;
    PriceQuote {
        total,
        multiplier,
        raw,
        price: charm_round(raw, settings.strategy),
    }
}

pub fn price(
    source_cost: f64,
    delivery_fee: f64,
    source: SourceMarketplace,
    explicit_multiplier: Option<f64>,
    settings: &PricingSettings,
) -> f64 {
    quote(source_cost, delivery_fee, source, explicit_multiplier, settings).price
}

pub fn charm_round(raw: f64, strategy: CharmStrategy) -> f64 {
    let base = raw.floor();
    let cents = match strategy {
        CharmStrategy::Always99 => 0.99,
        CharmStrategy::Always49 => 0.49,
        CharmStrategy::Tiered if raw < TIERED_CHARM_THRESHOLD => 0.99,
        CharmStrategy::Tiered => 0.95,
    };
    round_two(base + cents)
}

/// Parses scraped money strings such as `"$1,299.99"`, `"US $12"` or `"FREE"`.
///
/// Anything without digits parses to zero.
pub fn parse_money(raw: &str) -> f64 {
    let mut digits = String::new();
    let mut seen_digit = false;
    for ch in raw.trim().chars() {
        match ch {
            '0'..='9' => {
                digits.push(ch);
                seen_digit = true;
            }
            '.' if seen_digit => digits.push('.'),
            ',' => {}
            _ if seen_digit && ch.is_whitespace() => break,
            _ if seen_digit && ch.is_alphabetic() => break,
            _ => {}
        }
    }
    digits.parse::<f64>().unwrap_or(0.0)
}

fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(value: f64) -> i64 {
        ((value * 100.0).round() as i64) % 100
    }

    fn settings(strategy: CharmStrategy) -> PricingSettings {
        PricingSettings {
            strategy,
            ..PricingSettings::default()
        }
    }

    fn scenario_table() -> TierTable {
        TierTable::new(
            [
                PriceTier::new(10.0, 2.5),
                PriceTier::new(15.0, 2.3),
                PriceTier::new(25.0, 2.0),
                PriceTier::new(50.0, 1.8),
                PriceTier::new(75.0, 1.6),
                PriceTier::new(100.0, 1.5),
            ],
            1.3,
        )
    }

    #[test]
    fn non_positive_cost_is_zero() {
        let s = settings(CharmStrategy::Always99);
        for cost in [0.0, -1.0, -250.0, f64::NAN] {
            assert_eq!(price(cost, 5.0, SourceMarketplace::Amazon, Some(3.0), &s), 0.0);
        }
    }

    #[test]
    fn ceiling_is_exclusive() {
        // 12 + 3 = 15 is not below tier two's 15 ceiling, so tier three (2.0) applies.
        let mut s = settings(CharmStrategy::Always99);
        s.tables.insert(SourceMarketplace::Amazon, scenario_table());
        let q = quote(12.0, 3.0, SourceMarketplace::Amazon, None, &s);
        assert_eq!(q.total, 15.0);
        assert_eq!(q.multiplier, 2.0);
        assert_eq!(q.price, 30.99);

        let below = quote(11.0, 3.0, SourceMarketplace::Amazon, None, &s);
        assert_eq!(below.multiplier, 2.3);
        assert_eq!(below.price, 32.99);
    }

    #[test]
    fn exactly_one_tier_or_catch_all() {
        let table = scenario_table();
        assert_eq!(table.multiplier_for(0.5), 2.5);
        assert_eq!(table.multiplier_for(9.99), 2.5);
        assert_eq!(table.multiplier_for(10.0), 2.3);
        assert_eq!(table.multiplier_for(99.99), 1.5);
        assert_eq!(table.multiplier_for(100.0), 1.3);
        assert_eq!(table.multiplier_for(10_000.0), 1.3);
    }

    #[test]
    fn tiers_are_consulted_in_ascending_order() {
        let table = TierTable::new(
            [
                PriceTier::new(100.0, 1.5),
                PriceTier::new(10.0, 2.5),
                PriceTier::new(50.0, 1.8),
                PriceTier::new(15.0, 2.3),
                PriceTier::new(75.0, 1.6),
                PriceTier::new(25.0, 2.0),
            ],
            1.3,
        );
        assert_eq!(table, scenario_table());
        assert_eq!(table.multiplier_for(5.0), 2.5);
    }

    #[test]
    fn explicit_multiplier_bypasses_tiers() {
        let s = settings(CharmStrategy::Always49);
        let q = quote(10.0, 0.0, SourceMarketplace::Walmart, Some(1.25), &s);
        assert_eq!(q.multiplier, 1.25);
        assert_eq!(q.price, 12.49);
        let ignored = quote(10.0, 0.0, SourceMarketplace::Walmart, Some(0.0), &s);
        assert_eq!(ignored.multiplier, 2.1);
    }

    #[test]
    fn charm_strategies() {
        for raw in [0.2, 3.0, 19.999, 20.0, 57.31, 1234.5] {
            assert_eq!(cents(charm_round(raw, CharmStrategy::Always99)), 99);
            assert_eq!(cents(charm_round(raw, CharmStrategy::Always49)), 49);
        }
        assert_eq!(charm_round(19.5, CharmStrategy::Tiered), 19.99);
        assert_eq!(charm_round(20.0, CharmStrategy::Tiered), 20.95);
        assert_eq!(charm_round(45.10, CharmStrategy::Tiered), 45.95);
        assert_eq!(charm_round(7.0, CharmStrategy::Always49), 7.49);
    }

    #[test]
    fn parses_scraped_money() {
        assert_eq!(parse_money("$12.00"), 12.0);
        assert_eq!(parse_money("US $1,299.99"), 1299.99);
        assert_eq!(parse_money("12.50 USD"), 12.5);
        assert_eq!(parse_money("FREE"), 0.0);
        assert_eq!(parse_money(""), 0.0);
        assert_eq!(parse_money("$3.99 delivery"), 3.99);
    }

    #[test]
    fn yaml_settings_validate_and_sort() {
        let raw = r#"
strategy: tiered
tables:
  amazon:
    catch_all: 1.3
    tiers:
      - { max_price: 100, multiplier: 1.5 }
      - { max_price: 10, multiplier: 2.5 }
      - { max_price: 15, multiplier: 2.3 }
      - { max_price: 25, multiplier: 2.0 }
      - { max_price: 50, multiplier: 1.8 }
      - { max_price: 75, multiplier: 1.6 }
"#;
        let s = PricingSettings::from_yaml_str(raw).expect("settings");
        assert_eq!(s.strategy, CharmStrategy::Tiered);
        assert_eq!(s.tables[&SourceMarketplace::Amazon], scenario_table());
        // no `other` table configured: falls back to built-in amazon
        assert_eq!(s.table_for(SourceMarketplace::Walmart).catch_all, 1.4);

        let short = "tables:\n  amazon:\n    catch_all: 1.3\n    tiers:\n      - { max_price: 10, multiplier: 2.5 }\n";
        assert!(matches!(
            PricingSettings::from_yaml_str(short),
            Err(PricingConfigError::TierCount { found: 1, .. })
        ));
    }
}
