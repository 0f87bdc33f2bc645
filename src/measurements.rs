//! Package weight and size parsed from free-form specification entries
//! such as `"10 x 5 x 3 inches; 1.2 Pounds"`.

use crate::ebay::listing::{DimensionsPayload, PackageWeightAndSizePayload, WeightPayload};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

const DEFAULT_WEIGHT_LB: f64 = 1.0;

const LENGTH_TO_INCHES: &[(&str, f64)] = &[
    ("in", 1.0),
    ("ft", 12.0),
    ("cm", 0.3937007874),
    ("mm", 0.03937007874),
];

const WEIGHT_TO_POUNDS: &[(&str, f64)] = &[
    ("lb", 1.0),
    ("oz", 0.0625),
    ("kg", 2.20462262),
    ("g", 0.00220462262),
];

static WEIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(pounds?|lbs?|ounces?|oz|kilograms?|kgs?|grams?|g)\b")
        .expect("valid weight pattern")
});

static DIMENSIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(\d+(?:\.\d+)?)\s*(?:x|×|\*)\s*(\d+(?:\.\d+)?)\s*(?:x|×|\*)\s*(\d+(?:\.\d+)?)\s*(inches|inch|in\b|"|centimeters?|cm|millimeters?|mm|feet|foot|ft)?"#,
    )
    .expect("valid dimensions pattern")
});

/// Builds the package payload; weight defaults to one pound, size is omitted when unknown.
pub fn package_from_specifications(specs: &BTreeMap<String, String>) -> PackageWeightAndSizePayload {
    let weight = specs
        .iter()
        .filter(|(key, _)| key.to_lowercase().contains("weight"))
        .chain(specs.iter().filter(|(key, _)| key.to_lowercase().contains("dimension")))
        .find_map(|(_, value)| parse_weight_pounds(value))
        .unwrap_or(DEFAULT_WEIGHT_LB);

    let dimensions = specs
        .iter()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            key.contains("dimension") || key.contains("size")
        })
        .find_map(|(_, value)| parse_dimensions_inches(value))
        .map(|(length, width, height)| DimensionsPayload {
            height: round_one(height),
            length: round_one(length),
            width: round_one(width),
            unit: "INCH",
        });

    PackageWeightAndSizePayload {
        weight: WeightPayload {
            value: round_two(weight).max(0.01),
            unit: "POUND",
        },
        dimensions,
    }
}

pub fn parse_weight_pounds(text: &str) -> Option<f64> {
    let caps = WEIGHT_RE.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    if number <= 0.0 {
        return None;
    }
    let unit = normalize_weight_unit(caps.get(2)?.as_str())?;
    let factor = WEIGHT_TO_POUNDS.iter().find(|(key, _)| *key == unit)?.1;
    Some(number * factor)
}

/// Returns `(length, width, height)` in inches; a missing unit is read as inches.
pub fn parse_dimensions_inches(text: &str) -> Option<(f64, f64, f64)> {
    let caps = DIMENSIONS_RE.captures(text)?;
    let mut values = [0.0f64; 3];
    for (slot, idx) in values.iter_mut().zip(1..=3) {
        *slot = caps.get(idx)?.as_str().parse().ok()?;
    }
    if values.iter().any(|v| *v <= 0.0) {
        return None;
    }
    let unit = caps
        .get(4)
        .map(|m| normalize_length_unit(m.as_str()))
        .unwrap_or(Some("in"))?;
    let factor = LENGTH_TO_INCHES.iter().find(|(key, _)| *key == unit)?.1;
    Some((values[0] * factor, values[1] * factor, values[2] * factor))
}

fn normalize_length_unit(text: &str) -> Option<&'static str> {
    match text.trim().to_lowercase().as_str() {
        "inch" | "inches" | "in" | "\"" => Some("in"),
        "foot" | "feet" | "ft" => Some("ft"),
        "centimeter" | "centimeters" | "cm" => Some("cm"),
        "millimeter" | "millimeters" | "mm" => Some("mm"),
        _ => None,
    }
}

fn normalize_weight_unit(text: &str) -> Option<&'static str> {
    match text.trim().to_lowercase().as_str() {
        "pound" | "pounds" | "lb" | "lbs" => Some("lb"),
        "ounce" | "ounces" | "oz" => Some("oz"),
        "kilogram" | "kilograms" | "kg" | "kgs" => Some("kg"),
        "gram" | "grams" | "g" => Some("g"),
        _ => None,
    }
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn weight_units() {
        assert_eq!(parse_weight_pounds("2 Pounds"), Some(2.0));
        assert_eq!(parse_weight_pounds("8 oz"), Some(0.5));
        assert!((parse_weight_pounds("1.5 kg").unwrap() - 3.3069).abs() < 1e-3);
        assert!((parse_weight_pounds("500 grams").unwrap() - 1.1023).abs() < 1e-3);
        assert_eq!(parse_weight_pounds("heavy"), None);
    }

    #[test]
    fn dimensions_units() {
        assert_eq!(parse_dimensions_inches("10 x 5 x 3 inches"), Some((10.0, 5.0, 3.0)));
        assert_eq!(parse_dimensions_inches("2 x 1 x 1 ft"), Some((24.0, 12.0, 12.0)));
        let (l, w, h) = parse_dimensions_inches("25.4 x 12.7 x 2.54 cm").unwrap();
        assert!((l - 10.0).abs() < 1e-6 && (w - 5.0).abs() < 1e-6 && (h - 1.0).abs() < 1e-6);
        assert_eq!(parse_dimensions_inches("4 x 4"), None);
    }

    #[test]
    fn amazon_style_product_dimensions() {
        let package = package_from_specifications(&specs(&[(
            "Product Dimensions",
            "10 x 5 x 3 inches; 1.2 Pounds",
        )]));
        assert_eq!(package.weight.value, 1.2);
        assert_eq!(package.weight.unit, "POUND");
        let dims = package.dimensions.expect("dimensions");
        assert_eq!((dims.length, dims.width, dims.height), (10.0, 5.0, 3.0));
    }

    #[test]
    fn explicit_weight_key_wins() {
        let package = package_from_specifications(&specs(&[
            ("Item Weight", "12 Ounces"),
            ("Product Dimensions", "10 x 5 x 3 inches; 3 Pounds"),
        ]));
        assert_eq!(package.weight.value, 0.75);
    }

    #[test]
    fn defaults_to_one_pound() {
        let package = package_from_specifications(&specs(&[("Color", "Blue")]));
        assert_eq!(package.weight.value, 1.0);
        assert!(package.dimensions.is_none());
    }
}
