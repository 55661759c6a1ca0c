// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Numeric view of resource quantities (`500m`, `2Gi`, `1e3`), enough to compare limits
//! against requests.

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("invalid quantity {0:?}")]
pub struct QuantityError(pub String);

pub fn parse_quantity(quantity: &Quantity) -> Result<f64, QuantityError> {
    parse_str(quantity.0.trim())
}

fn parse_str(s: &str) -> Result<f64, QuantityError> {
    let err = || QuantityError(s.to_string());
    if s.is_empty() {
        return Err(err());
    }

    let number_end = s
        .char_indices()
        .find(|(i, c)| {
            let sign = *i == 0 && (*c == '+' || *c == '-');
            !(c.is_ascii_digit() || *c == '.' || sign)
        })
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);
    let value: f64 = number.parse().map_err(|_| err())?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exp if exp.starts_with(['e', 'E']) => {
            let exponent: i32 = exp[1..].parse().map_err(|_| err())?;
            10f64.powi(exponent)
        }
        _ => return Err(err()),
    };
    Ok(value * multiplier)
}

pub fn compare(a: &Quantity, b: &Quantity) -> Result<Ordering, QuantityError> {
    let a = parse_quantity(a)?;
    let b = parse_quantity(b)?;
    Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[rstest]
    #[case("1", 1.0)]
    #[case("500m", 0.5)]
    #[case("2Gi", 2.0 * 1024.0 * 1024.0 * 1024.0)]
    #[case("1.5k", 1500.0)]
    #[case("1e3", 1000.0)]
    #[case("-2", -2.0)]
    fn test_parse_quantity(#[case] raw: &str, #[case] expected: f64) {
        let got = parse_quantity(&q(raw)).unwrap();
        assert!((got - expected).abs() < 1e-9, "{raw}: {got} != {expected}");
    }

    #[rstest]
    #[case("")]
    #[case("Gi")]
    #[case("12Xi")]
    #[case("1e")]
    fn test_parse_quantity_rejects(#[case] raw: &str) {
        assert!(parse_quantity(&q(raw)).is_err());
    }

    #[test]
    fn test_compare_across_suffixes() {
        assert_eq!(compare(&q("1Gi"), &q("1G")).unwrap(), Ordering::Greater);
        assert_eq!(compare(&q("1000m"), &q("1")).unwrap(), Ordering::Equal);
        assert_eq!(compare(&q("2"), &q("4")).unwrap(), Ordering::Less);
    }

    proptest! {
        #[test]
        fn binary_suffix_is_exact(n in 0u32..1_000_000) {
            let got = parse_quantity(&q(&format!("{n}Ki"))).unwrap();
            prop_assert_eq!(got, f64::from(n) * 1024.0);
        }

        #[test]
        fn binary_suffix_outweighs_decimal(n in 1u32..1_000_000) {
            prop_assert_eq!(
                compare(&q(&format!("{n}Mi")), &q(&format!("{n}M"))).unwrap(),
                Ordering::Greater
            );
        }
    }
}
