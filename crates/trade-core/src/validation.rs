//! Structural and range checks for canonical entities.
//!
//! Hard errors block use of an entity; warnings are reported but the entity
//! is kept.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::analytics::MAX_PLAUSIBLE_TARIFF;
use crate::types::{CountryIndicators, ExportOpportunity, MarketData, ProductStat, TradeStats};

/// Default freshness threshold for `last_updated`.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Default tolerance, in percentage points, on product share sums.
pub const DEFAULT_SHARE_TOLERANCE: f64 = 0.01;

/// Outcome of validating one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// False when any hard error was found.
    pub is_valid: bool,
    /// Hard errors.
    pub errors: Vec<String>,
    /// Soft warnings.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// An entity the [`Validator`] knows how to check.
pub trait Validate {
    /// Records problems with `self` into `report`.
    fn check(&self, validator: &Validator, report: &mut ValidationReport);
}

/// Entity validator with configurable thresholds.
#[derive(Clone, Copy, Debug)]
pub struct Validator {
    stale_after: Duration,
    tolerance: f64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl Validator {
    /// A validator warning about data older than `stale_after`.
    #[must_use]
    pub const fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            tolerance: DEFAULT_SHARE_TOLERANCE,
        }
    }

    /// Overrides the share-sum tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Validates any supported entity.
    #[must_use]
    pub fn validate<E: Validate + ?Sized>(&self, entity: &E) -> ValidationReport {
        let mut report = ValidationReport::new();
        entity.check(self, &mut report);
        report
    }

    fn check_identifier(report: &mut ValidationReport, field: &str, value: &str) {
        if value.trim().is_empty() {
            report.error(format!("missing {field}"));
        }
    }

    fn check_freshness(&self, report: &mut ValidationReport, last_updated: DateTime<Utc>) {
        let limit = TimeDelta::from_std(self.stale_after).unwrap_or(TimeDelta::MAX);
        let age = Utc::now().signed_duration_since(last_updated);
        if age > limit {
            report.warn(format!(
                "data is stale: last updated {} ({} hours ago)",
                last_updated.to_rfc3339(),
                age.num_hours()
            ));
        }
    }
}

impl Validate for [ProductStat] {
    fn check(&self, validator: &Validator, report: &mut ValidationReport) {
        let total: f64 = self.iter().map(|p| p.percentage).sum();
        if total > 100.0 + validator.tolerance {
            report.warn(format!("product shares sum to {total:.2}%, above 100%"));
        }
    }
}

impl Validate for TradeStats {
    fn check(&self, validator: &Validator, report: &mut ValidationReport) {
        Validator::check_identifier(report, "country code", &self.country_code);
        if self.total_exports < 0.0 || self.total_imports < 0.0 {
            report.error(format!(
                "negative trade totals for {}: exports {}, imports {}",
                self.country_code, self.total_exports, self.total_imports
            ));
        }
        self.top_exports.check(validator, report);
        self.top_imports.check(validator, report);
        validator.check_freshness(report, self.last_updated);
    }
}

impl Validate for MarketData {
    fn check(&self, validator: &Validator, report: &mut ValidationReport) {
        Validator::check_identifier(report, "country code", &self.country_code);
        Validator::check_identifier(report, "product category", &self.product_category);
        if self.market_size < 0.0 {
            report.error(format!(
                "negative market size {} for {}",
                self.market_size, self.country_code
            ));
        }
        if let Some(reported) = self.reported_tariff_rate {
            if !(0.0..=MAX_PLAUSIBLE_TARIFF).contains(&reported) {
                report.warn(format!(
                    "implausible tariff {reported:.2}% for {} clamped to {:.2}%",
                    self.country_code, self.tariff_rate
                ));
            }
        }
        validator.check_freshness(report, self.last_updated);
    }
}

impl Validate for ExportOpportunity {
    fn check(&self, _validator: &Validator, report: &mut ValidationReport) {
        Validator::check_identifier(report, "country code", &self.country_code);
        Validator::check_identifier(report, "product category", &self.product_category);
        if self.opportunity_score > 100 {
            report.error(format!(
                "opportunity score {} outside [0, 100]",
                self.opportunity_score
            ));
        }
        if self.estimated_value < 0.0 {
            report.error(format!("negative estimated value {}", self.estimated_value));
        }
    }
}

impl Validate for CountryIndicators {
    fn check(&self, validator: &Validator, report: &mut ValidationReport) {
        Validator::check_identifier(report, "country code", &self.country_code);
        if self.exports < 0.0 || self.imports < 0.0 || self.gdp < 0.0 {
            report.error(format!("negative indicator values for {}", self.country_code));
        }
        if let Some(tariff) = self.tariff_rate {
            if !(0.0..=MAX_PLAUSIBLE_TARIFF).contains(&tariff) {
                report.warn(format!(
                    "implausible tariff {tariff:.2}% for {}",
                    self.country_code
                ));
            }
        }
        validator.check_freshness(report, self.last_updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompetitionLevel, OpportunityProvenance, Reliability, TariffBasis};

    fn market() -> MarketData {
        MarketData {
            country_code: "DEU".into(),
            country_name: "Germany".into(),
            product_category: "85".into(),
            market_size: 1.0e9,
            growth_rate: 3.0,
            competition_level: CompetitionLevel::High,
            tariff_rate: 4.0,
            reported_tariff_rate: Some(4.0),
            tariff_basis: TariffBasis::CifFobSpread,
            trade_volume: 2.0e9,
            period: "2022".into(),
            source: "comtrade".into(),
            reliability: Reliability::High,
            last_updated: Utc::now(),
        }
    }

    fn product(percentage: f64) -> ProductStat {
        ProductStat {
            code: "85".into(),
            name: "Electrical Equipment".into(),
            value: 1.0,
            percentage,
            growth_rate: 0.0,
        }
    }

    #[test]
    fn test_valid_market() {
        let report = Validator::default().validate(&market());
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_negative_market_size_is_an_error() {
        let mut m = market();
        m.market_size = -1.0;
        let report = Validator::default().validate(&m);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_missing_identifiers_are_errors() {
        let mut m = market();
        m.country_code = String::new();
        m.product_category = " ".into();
        let report = Validator::default().validate(&m);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_implausible_tariff_and_stale_data_are_warnings() {
        let mut m = market();
        m.reported_tariff_rate = Some(72.0);
        m.tariff_rate = 50.0;
        m.last_updated = Utc::now() - TimeDelta::days(3);
        let report = Validator::default().validate(&m);
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_product_shares_above_100_warn() {
        let validator = Validator::default();
        let ok = vec![product(60.0), product(40.0)];
        assert!(validator.validate(ok.as_slice()).warnings.is_empty());

        let over = vec![product(60.0), product(45.0)];
        let report = validator.validate(over.as_slice());
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_opportunity_score_out_of_range() {
        let opportunity = ExportOpportunity {
            country_code: "USA".into(),
            country_name: "United States".into(),
            product_category: "85".into(),
            product_name: "Electrical Equipment".into(),
            estimated_value: 5.0e6,
            growth_rate: 1.0,
            opportunity_score: 120,
            requirements: vec![],
            provenance: OpportunityProvenance::Derived,
            period: "2022".into(),
        };
        let report = Validator::default().validate(&opportunity);
        assert!(!report.is_valid);
    }
}
