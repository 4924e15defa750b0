//! Synthetic datasets served when live data is off or unavailable.
//!
//! Everything here is deterministic: the ten major economies come from a
//! fixed table of approximate figures and every other country shares one
//! default profile. Product and partner splits come from generators seeded
//! with the ISO3 code. Entities are tagged with the
//! `fallback` source, placeholder tariffs and synthesized provenance so they
//! are never mistaken for provider data.

use chrono::{DateTime, Utc};
use trade_core::analytics::{
    MIN_OPPORTUNITY_VALUE, category_name, competition_level, compliance_requirements,
    opportunity_score, placeholder_tariff, round2, seeded_rng,
};
use trade_core::country::{self, Country, MAJOR_ECONOMIES};
use trade_core::{
    CountryIndicators, DashboardStats, ExportOpportunity, MarketData, OpportunityProvenance,
    ProductStat, Reliability, TariffBasis, TradePartner, TradeStats,
};

/// Source tag of synthetic entities.
pub const FALLBACK_SOURCE: &str = "fallback";

/// Number of economies listed in a dashboard.
pub const DASHBOARD_TOP: usize = 5;

/// HS chapters used for synthetic product breakdowns.
const PRODUCT_CHAPTERS: &[&str] = &["84", "85", "87", "27", "30", "90", "39", "72"];

/// Number of partners in a synthetic [`TradeStats`].
const PARTNERS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Profile {
    gdp: f64,
    gdp_growth: f64,
    exports: f64,
    imports: f64,
    tariff: f64,
}

const fn profile(gdp: f64, gdp_growth: f64, exports: f64, imports: f64, tariff: f64) -> Profile {
    Profile {
        gdp,
        gdp_growth,
        exports,
        imports,
        tariff,
    }
}

/// Approximate annual figures in USD, goods and services.
const PROFILES: &[(&str, Profile)] = &[
    ("USA", profile(25.46e12, 1.9, 3.01e12, 3.97e12, 1.5)),
    ("CHN", profile(17.96e12, 3.0, 3.72e12, 3.14e12, 3.0)),
    ("DEU", profile(4.08e12, 1.8, 2.07e12, 1.97e12, 1.3)),
    ("JPN", profile(4.23e12, 1.0, 0.92e12, 1.08e12, 1.9)),
    ("GBR", profile(3.07e12, 4.1, 0.97e12, 1.11e12, 1.3)),
    ("FRA", profile(2.78e12, 2.5, 0.99e12, 1.11e12, 1.3)),
    ("IND", profile(3.39e12, 7.0, 0.77e12, 0.90e12, 4.5)),
    ("ITA", profile(2.05e12, 3.7, 0.76e12, 0.77e12, 1.3)),
    ("BRA", profile(1.92e12, 2.9, 0.38e12, 0.34e12, 7.2)),
    ("CAN", profile(2.14e12, 3.4, 0.67e12, 0.66e12, 1.5)),
];

/// Figures used for every economy outside [`PROFILES`].
const DEFAULT_PROFILE: Profile = profile(0.5e12, 2.5, 0.15e12, 0.16e12, 5.0);

fn lookup_profile(iso3: &str) -> Profile {
    PROFILES
        .iter()
        .find(|(code, _)| *code == iso3)
        .map_or(DEFAULT_PROFILE, |(_, profile)| *profile)
}

/// Generator of synthetic entities for one reference year.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntheticData {
    year: i32,
    as_of: DateTime<Utc>,
}

impl SyntheticData {
    /// Synthetic data for `year`, stamped with the current time.
    #[must_use]
    pub fn new(year: i32) -> Self {
        Self::at(year, Utc::now())
    }

    /// Synthetic data for `year`, stamped with `as_of`.
    #[must_use]
    pub const fn at(year: i32, as_of: DateTime<Utc>) -> Self {
        Self { year, as_of }
    }

    fn period(&self) -> String {
        self.year.to_string()
    }

    /// Trade snapshot of `country`.
    #[must_use]
    pub fn trade_stats(&self, country: &Country) -> TradeStats {
        let profile = lookup_profile(country.iso3);
        TradeStats {
            country_code: country.iso3.to_string(),
            country_name: country.name.to_string(),
            total_exports: profile.exports,
            total_imports: profile.imports,
            top_exports: products(&format!("{}:exports", country.iso3), profile.exports),
            top_imports: products(&format!("{}:imports", country.iso3), profile.imports),
            top_partners: partners(country, profile.exports + profile.imports),
            period: self.period(),
            source: FALLBACK_SOURCE.to_string(),
            last_updated: self.as_of,
        }
    }

    /// Market snapshot of `product_category` in `country`.
    #[must_use]
    pub fn market_data(&self, country: &Country, product_category: &str) -> MarketData {
        let profile = lookup_profile(country.iso3);
        let seed = format!("{}:{product_category}", country.iso3);
        let mut rng = seeded_rng(&format!("market:{seed}"));

        let (import_share, export_share) = if product_category.eq_ignore_ascii_case("TOTAL") {
            (1.0, 1.0)
        } else {
            (0.02 + rng.f64() * 0.1, 0.02 + rng.f64() * 0.1)
        };
        let market_size = (profile.imports * import_share).round();
        let exports = (profile.exports * export_share).round();

        MarketData {
            country_code: country.iso3.to_string(),
            country_name: country.name.to_string(),
            product_category: product_category.to_string(),
            market_size,
            growth_rate: round2(-3.0 + rng.f64() * 15.0),
            competition_level: competition_level(exports, market_size),
            tariff_rate: placeholder_tariff(&seed),
            reported_tariff_rate: None,
            tariff_basis: TariffBasis::Placeholder,
            trade_volume: exports + market_size,
            period: self.period(),
            source: FALLBACK_SOURCE.to_string(),
            reliability: Reliability::Estimated,
            last_updated: self.as_of,
        }
    }

    /// Macro indicators of `country`.
    #[must_use]
    pub fn country_indicators(&self, country: &Country) -> CountryIndicators {
        let profile = lookup_profile(country.iso3);
        CountryIndicators {
            country_code: country.iso3.to_string(),
            country_name: country.name.to_string(),
            period: self.period(),
            gdp: profile.gdp,
            gdp_growth: profile.gdp_growth,
            exports: profile.exports,
            imports: profile.imports,
            tariff_rate: Some(profile.tariff),
            source: FALLBACK_SOURCE.to_string(),
            last_updated: self.as_of,
        }
    }

    /// Opportunities for `exporter` selling `product_category` into `countries`.
    #[must_use]
    pub fn export_opportunities(
        &self,
        exporter: &Country,
        countries: &[&Country],
        product_category: &str,
    ) -> Vec<ExportOpportunity> {
        countries
            .iter()
            .filter(|c| c.iso3 != exporter.iso3)
            .filter_map(|c| {
                let market = self.market_data(c, product_category);
                let mut rng =
                    seeded_rng(&format!("opportunity:{}:{}", exporter.iso3, market.country_code));
                let estimated_value = (market.market_size * (0.01 + rng.f64() * 0.04)).round();
                (estimated_value > MIN_OPPORTUNITY_VALUE).then(|| ExportOpportunity {
                    country_code: market.country_code,
                    country_name: market.country_name,
                    product_category: product_category.to_string(),
                    product_name: category_name(product_category).to_string(),
                    estimated_value,
                    growth_rate: market.growth_rate,
                    opportunity_score: opportunity_score(estimated_value, market.growth_rate),
                    requirements: compliance_requirements(product_category, c.iso3),
                    provenance: OpportunityProvenance::Synthesized,
                    period: self.period(),
                })
            })
            .collect()
    }

    /// Dashboard over the major economies.
    #[must_use]
    pub fn dashboard_stats(&self) -> DashboardStats {
        let indicators: Vec<CountryIndicators> = MAJOR_ECONOMIES
            .iter()
            .filter_map(|code| country::by_iso3(code))
            .map(|c| self.country_indicators(c))
            .collect();
        DashboardStats::from_indicators(&indicators, DASHBOARD_TOP)
    }
}

/// Product lines whose shares sum to well under 100%.
fn products(seed: &str, total: f64) -> Vec<ProductStat> {
    let mut rng = seeded_rng(seed);
    let mut weights: Vec<(&str, f64)> = PRODUCT_CHAPTERS
        .iter()
        .map(|code| (*code, 1.0 + rng.f64() * 9.0))
        .collect();
    let weight_sum: f64 = weights.iter().map(|(_, w)| w).sum();
    // Listed chapters cover 70% of the total; the rest is "other".
    for (_, weight) in &mut weights {
        *weight = *weight / weight_sum * 70.0;
    }
    weights.sort_by(|a, b| b.1.total_cmp(&a.1));

    weights
        .into_iter()
        .map(|(code, percentage)| ProductStat {
            code: code.to_string(),
            name: category_name(code).to_string(),
            value: (total * percentage / 100.0).round(),
            percentage: round2(percentage),
            growth_rate: round2(-5.0 + rng.f64() * 15.0),
        })
        .collect()
}

fn partners(country: &Country, volume: f64) -> Vec<TradePartner> {
    let mut rng = seeded_rng(&format!("{}:partners", country.iso3));
    let mut shares: Vec<(&Country, f64)> = MAJOR_ECONOMIES
        .iter()
        .filter(|code| **code != country.iso3)
        .filter_map(|code| country::by_iso3(code))
        .map(|c| (c, 2.0 + rng.f64() * 12.0))
        .collect();
    shares.sort_by(|a, b| b.1.total_cmp(&a.1));
    shares.truncate(PARTNERS);

    shares
        .into_iter()
        .map(|(partner, percentage)| TradePartner {
            country_code: partner.iso3.to_string(),
            country_name: partner.name.to_string(),
            value: (volume * percentage / 100.0).round(),
            percentage: round2(percentage),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trade_core::Validator;

    fn synthetic() -> SyntheticData {
        SyntheticData::at(2022, Utc::now())
    }

    fn country(code: &str) -> &'static Country {
        country::by_iso3(code).unwrap()
    }

    #[test]
    fn test_synthetic_data_is_deterministic() {
        let a = SyntheticData::at(2022, DateTime::<Utc>::UNIX_EPOCH);
        let b = SyntheticData::at(2022, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(a.trade_stats(country("USA")), b.trade_stats(country("USA")));
        assert_eq!(
            a.market_data(country("VNM"), "85"),
            b.market_data(country("VNM"), "85")
        );
        assert_eq!(a.dashboard_stats(), b.dashboard_stats());
    }

    #[test]
    fn test_trade_stats_are_tagged_and_valid() {
        let stats = synthetic().trade_stats(country("DEU"));
        assert_eq!(stats.source, FALLBACK_SOURCE);
        assert_eq!(stats.period, "2022");
        assert_eq!(stats.total_exports, 2.07e12);
        assert_eq!(stats.top_partners.len(), PARTNERS);
        assert!(stats.top_partners.iter().all(|p| p.country_code != "DEU"));

        let shares: f64 = stats.top_exports.iter().map(|p| p.percentage).sum();
        assert!(shares <= 100.0);
        let report = Validator::default().validate(&stats);
        assert!(report.is_valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_market_data_is_marked_as_estimate() {
        let market = synthetic().market_data(country("JPN"), "87");
        assert_eq!(market.tariff_basis, TariffBasis::Placeholder);
        assert_eq!(market.reliability, Reliability::Estimated);
        assert!(market.reported_tariff_rate.is_none());
        assert!((2.0..=15.0).contains(&market.tariff_rate));
        assert!(market.market_size > 0.0);
        assert!(Validator::default().validate(&market).is_valid);

        let total = synthetic().market_data(country("JPN"), "TOTAL");
        assert_eq!(total.market_size, 1.08e12);
    }

    #[test]
    fn test_unlisted_countries_use_default_profile() {
        let sgp = synthetic().country_indicators(country("SGP"));
        let zaf = synthetic().country_indicators(country("ZAF"));
        assert_eq!(sgp.gdp, DEFAULT_PROFILE.gdp);
        assert_eq!(zaf.gdp, DEFAULT_PROFILE.gdp);
        assert_eq!(sgp.country_name, "Singapore");
    }

    #[test]
    fn test_export_opportunities_exclude_exporter() {
        let countries: Vec<&Country> = ["USA", "DEU", "CHN", "FRA"]
            .iter()
            .map(|c| country(c))
            .collect();
        let opportunities = synthetic().export_opportunities(country("USA"), &countries, "85");

        assert_eq!(opportunities.len(), 3);
        for opportunity in &opportunities {
            assert_ne!(opportunity.country_code, "USA");
            assert_eq!(opportunity.provenance, OpportunityProvenance::Synthesized);
            assert!(opportunity.estimated_value > MIN_OPPORTUNITY_VALUE);
            assert!(opportunity.opportunity_score <= 100);
        }
        let deu = opportunities.iter().find(|o| o.country_code == "DEU").unwrap();
        assert!(deu.requirements.iter().any(|r| r == "CE marking"));
    }

    #[test]
    fn test_dashboard_covers_major_economies() {
        let dashboard = synthetic().dashboard_stats();
        assert_eq!(dashboard.country_count, MAJOR_ECONOMIES.len());
        assert_eq!(dashboard.top_economies.len(), DASHBOARD_TOP);
        assert_eq!(dashboard.top_economies[0].country_code, "USA");
    }
}
