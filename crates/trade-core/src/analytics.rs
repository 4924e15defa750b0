//! Derived analytic metrics.
//!
//! These are the pure calculations every transformer shares: growth rate,
//! competition classification, opportunity scoring, tariff estimation and
//! the deterministic placeholders used when a provider is silent.

use crate::country;
use crate::types::CompetitionLevel;

/// Minimum estimated value (USD) for an opportunity to be surfaced.
pub const MIN_OPPORTUNITY_VALUE: f64 = 1_000_000.0;

/// Upper bound of a plausible tariff rate, in percent.
pub const MAX_PLAUSIBLE_TARIFF: f64 = 50.0;

/// Range of placeholder tariff rates, in percent.
pub const PLACEHOLDER_TARIFF_RANGE: (f64, f64) = (2.0, 15.0);

/// Percentage change from `previous` to `latest`.
///
/// Defined as `0` when `previous` is zero so callers never see NaN or infinity.
#[must_use]
pub fn growth_rate(latest: f64, previous: f64) -> f64 {
    if previous == 0.0 || !previous.is_finite() || !latest.is_finite() {
        return 0.0;
    }
    (latest - previous) / previous * 100.0
}

/// Growth between the two most recent periods of a `(period, value)` series.
///
/// The series may be in any order. Fewer than two periods yields `0`.
#[must_use]
pub fn growth_from_series(series: &[(String, f64)]) -> f64 {
    let mut sorted: Vec<&(String, f64)> = series.iter().collect();
    sorted.sort_by(|a, b| b.0.cmp(&a.0));
    match sorted.as_slice() {
        [latest, previous, ..] => growth_rate(latest.1, previous.1),
        _ => 0.0,
    }
}

/// Classifies competition from trade-balance symmetry.
///
/// A heavily lopsided relationship implies fewer active competing suppliers.
/// With no trade at all the ratio is taken as zero.
#[must_use]
pub fn competition_level(exports: f64, imports: f64) -> CompetitionLevel {
    let total = exports + imports;
    let balance_ratio = if total > 0.0 {
        (exports - imports).abs() / total
    } else {
        0.0
    };

    if balance_ratio > 0.5 {
        CompetitionLevel::Low
    } else if balance_ratio > 0.2 {
        CompetitionLevel::Medium
    } else {
        CompetitionLevel::High
    }
}

/// Heuristic opportunity score in `[0, 100]`.
///
/// Base 50, plus value tiers (>$1B +30, >$100M +20, >$10M +10) and growth
/// tiers (>20% +20, >10% +15, >5% +10, >0% +5). Nothing is subtracted.
#[must_use]
pub fn opportunity_score(trade_value: f64, growth_rate: f64) -> u8 {
    let mut score = 50.0_f64;

    score += if trade_value > 1_000_000_000.0 {
        30.0
    } else if trade_value > 100_000_000.0 {
        20.0
    } else if trade_value > 10_000_000.0 {
        10.0
    } else {
        0.0
    };

    score += if growth_rate > 20.0 {
        20.0
    } else if growth_rate > 10.0 {
        15.0
    } else if growth_rate > 5.0 {
        10.0
    } else if growth_rate > 0.0 {
        5.0
    } else {
        0.0
    };

    score.clamp(0.0, 100.0) as u8
}

/// Clamps a tariff figure into the plausible band.
#[must_use]
pub fn clamp_tariff(rate: f64) -> f64 {
    if rate.is_nan() {
        return 0.0;
    }
    rate.clamp(0.0, MAX_PLAUSIBLE_TARIFF)
}

/// Unclamped tariff implied by the CIF/FOB valuation spread.
///
/// Returns `None` unless both values are present and FOB is positive.
#[must_use]
pub fn tariff_from_valuation(cif: Option<f64>, fob: Option<f64>) -> Option<f64> {
    match (cif, fob) {
        (Some(cif), Some(fob)) if fob > 0.0 && cif > 0.0 => Some((cif - fob) / fob * 100.0),
        _ => None,
    }
}

/// Deterministic placeholder tariff for a market.
///
/// The same seed always yields the same rate, so fallback output is
/// reproducible. Callers must tag the result as an estimate.
#[must_use]
pub fn placeholder_tariff(seed: &str) -> f64 {
    let (low, high) = PLACEHOLDER_TARIFF_RANGE;
    let mut rng = seeded_rng(seed);
    round2(low + rng.f64() * (high - low))
}

/// A random generator seeded from a stable hash of `seed`.
#[must_use]
pub fn seeded_rng(seed: &str) -> fastrand::Rng {
    fastrand::Rng::with_seed(fnv1a(seed.as_bytes()))
}

/// 64-bit FNV-1a. Stable across platforms and compiler versions.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Rounds to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Display name of an HS chapter, or `"Other"`.
#[must_use]
pub fn category_name(code: &str) -> &'static str {
    match hs_chapter(code) {
        Some(1..=5) => "Animals & Animal Products",
        Some(6..=14) => "Vegetable Products",
        Some(15) => "Animal & Vegetable Fats",
        Some(16..=24) => "Foodstuffs & Beverages",
        Some(25..=27) => "Mineral Products & Fuels",
        Some(30) => "Pharmaceutical Products",
        Some(28..=38) => "Chemicals",
        Some(39..=40) => "Plastics & Rubber",
        Some(41..=43) => "Hides & Leather",
        Some(44..=49) => "Wood & Paper Products",
        Some(50..=63) => "Textiles & Apparel",
        Some(64..=67) => "Footwear & Headgear",
        Some(68..=71) => "Stone, Glass & Precious Metals",
        Some(72..=83) => "Base Metals",
        Some(84) => "Machinery",
        Some(85) => "Electrical Equipment",
        Some(86..=89) => "Vehicles & Transport Equipment",
        Some(90..=92) => "Instruments",
        Some(93..=99) => "Miscellaneous Manufactured Goods",
        _ if code.eq_ignore_ascii_case("TOTAL") => "All Products",
        _ => "Other",
    }
}

/// Compliance-style requirements for shipping `category` into `destination`.
///
/// Deterministic: the same inputs always yield the same list in the same order.
#[must_use]
pub fn compliance_requirements(category: &str, destination: &str) -> Vec<String> {
    let mut requirements = vec![
        "Certificate of origin".to_string(),
        "Commercial invoice and packing list".to_string(),
    ];
    let chapter = hs_chapter(category);

    match chapter {
        Some(1..=24) => {
            requirements.push("Sanitary and phytosanitary certificate".to_string());
        }
        Some(30) => {
            requirements.push("Product registration with the health authority".to_string());
        }
        Some(28..=38) => requirements.push("Safety data sheet".to_string()),
        Some(50..=63) => requirements.push("Fibre content labelling".to_string()),
        Some(84 | 85) => {
            requirements.push("Product safety conformity assessment".to_string());
        }
        Some(87) => requirements.push("Vehicle type approval".to_string()),
        _ => {}
    }

    let eu = country::by_iso3(destination).is_some_and(|c| c.eu_member);
    if eu && matches!(chapter, Some(84 | 85 | 90)) {
        requirements.push("CE marking".to_string());
    }
    if eu {
        requirements.push("EORI registration".to_string());
    }

    requirements
}

/// HS chapter (first two digits) of a commodity code.
fn hs_chapter(code: &str) -> Option<u8> {
    code.get(..2)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_rate_zero_denominator() {
        assert_eq!(growth_rate(100.0, 0.0), 0.0);
        assert_eq!(growth_rate(0.0, 0.0), 0.0);
        assert_eq!(growth_rate(150.0, 100.0), 50.0);
        assert_eq!(growth_rate(50.0, 100.0), -50.0);
    }

    #[test]
    fn test_growth_from_series_needs_two_periods() {
        assert_eq!(growth_from_series(&[]), 0.0);
        assert_eq!(growth_from_series(&[("2022".into(), 10.0)]), 0.0);

        let series = vec![
            ("2020".to_string(), 50.0),
            ("2022".to_string(), 120.0),
            ("2021".to_string(), 100.0),
        ];
        assert_eq!(growth_from_series(&series), 20.0);
    }

    #[test]
    fn test_competition_thresholds() {
        assert_eq!(competition_level(90.0, 10.0), CompetitionLevel::Low);
        assert_eq!(competition_level(70.0, 30.0), CompetitionLevel::Medium);
        assert_eq!(competition_level(60.0, 40.0), CompetitionLevel::High);
        assert_eq!(competition_level(50.0, 50.0), CompetitionLevel::High);
        assert_eq!(competition_level(0.0, 0.0), CompetitionLevel::High);
    }

    #[test]
    fn test_opportunity_score_boundaries() {
        assert_eq!(opportunity_score(2_000_000_000.0, 25.0), 100);
        assert_eq!(opportunity_score(500_000.0, -5.0), 50);
        assert_eq!(opportunity_score(200_000_000.0, 12.0), 85);
        assert_eq!(opportunity_score(20_000_000.0, 6.0), 70);
        assert_eq!(opportunity_score(20_000_000.0, 0.5), 65);
    }

    #[test]
    fn test_tariff_from_valuation() {
        assert_eq!(tariff_from_valuation(Some(110.0), Some(100.0)), Some(10.0));
        assert_eq!(tariff_from_valuation(Some(110.0), None), None);
        assert_eq!(tariff_from_valuation(Some(110.0), Some(0.0)), None);
        assert_eq!(clamp_tariff(80.0), 50.0);
        assert_eq!(clamp_tariff(-3.0), 0.0);
    }

    #[test]
    fn test_placeholder_tariff_is_deterministic_and_bounded() {
        let a = placeholder_tariff("DEU:8703");
        let b = placeholder_tariff("DEU:8703");
        assert_eq!(a, b);

        for seed in ["USA:01", "CHN:85", "BRA:TOTAL", ""] {
            let rate = placeholder_tariff(seed);
            assert!((2.0..=15.0).contains(&rate), "{seed} -> {rate}");
        }
    }

    #[test]
    fn test_category_names() {
        assert_eq!(category_name("8703"), "Vehicles & Transport Equipment");
        assert_eq!(category_name("30"), "Pharmaceutical Products");
        assert_eq!(category_name("TOTAL"), "All Products");
        assert_eq!(category_name("x"), "Other");
    }

    #[test]
    fn test_compliance_requirements() {
        let food_us = compliance_requirements("0201", "USA");
        assert!(food_us.contains(&"Sanitary and phytosanitary certificate".to_string()));
        assert!(!food_us.iter().any(|r| r == "CE marking"));

        let machinery_de = compliance_requirements("84", "DEU");
        assert!(machinery_de.contains(&"CE marking".to_string()));
        assert!(machinery_de.contains(&"EORI registration".to_string()));
        assert_eq!(machinery_de, compliance_requirements("84", "DEU"));
    }
}
