//! World Bank observations to canonical entities.
//!
//! The World Bank only reports country-level aggregates, so market data and
//! opportunities are macro proxies for the `TOTAL` category.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use trade_core::analytics::{
    MIN_OPPORTUNITY_VALUE, category_name, clamp_tariff, competition_level,
    compliance_requirements, growth_from_series, opportunity_score, placeholder_tariff, round2,
};
use trade_core::country;
use trade_core::{
    CountryIndicators, ExportOpportunity, MarketData, OpportunityProvenance, ProductStat,
    Reliability, TariffBasis, TradeStats, TradeTransformer,
};

use crate::indicators::{
    EXPORTS, GDP, GDP_GROWTH, IMPORTS, MERCHANDISE_EXPORTS, SERVICE_EXPORTS, TARIFF,
};
use crate::{PROVIDER_NAME, WbObservation};

/// Category code of the macro proxies.
const TOTAL: &str = "TOTAL";

/// Transformer for World Bank observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldBankTransformer {
    as_of: DateTime<Utc>,
}

/// Observations of one country.
struct CountrySeries<'a> {
    iso3: String,
    name: String,
    rows: Vec<&'a WbObservation>,
}

impl CountrySeries<'_> {
    /// `(year, value)` pairs of `indicator`, skipping nulls.
    fn series(&self, indicator: &str) -> Vec<(String, f64)> {
        self.rows
            .iter()
            .filter(|o| o.indicator.id == indicator)
            .filter_map(|o| o.value.filter(|v| v.is_finite()).map(|v| (o.date.clone(), v)))
            .collect()
    }

    /// Most recent non-null value of `indicator`.
    fn latest(&self, indicator: &str) -> Option<(String, f64)> {
        self.series(indicator)
            .into_iter()
            .max_by(|a, b| a.0.cmp(&b.0))
    }

    fn value(&self, indicator: &str) -> f64 {
        self.latest(indicator).map_or(0.0, |(_, v)| v)
    }

    fn growth(&self, indicator: &str) -> f64 {
        round2(growth_from_series(&self.series(indicator)))
    }

    fn indicator_name(&self, indicator: &str) -> Option<String> {
        self.rows
            .iter()
            .find(|o| o.indicator.id == indicator && !o.indicator.value.is_empty())
            .map(|o| o.indicator.value.clone())
    }
}

fn by_country(records: &[WbObservation]) -> Vec<CountrySeries<'_>> {
    let mut grouped: BTreeMap<String, Vec<&WbObservation>> = BTreeMap::new();
    for record in records {
        let iso3 = record.iso3().to_uppercase();
        if !iso3.is_empty() {
            grouped.entry(iso3).or_default().push(record);
        }
    }
    grouped
        .into_iter()
        .map(|(iso3, rows)| {
            let name = rows
                .iter()
                .find(|o| !o.country.value.is_empty())
                .map_or_else(|| country::display_name(&iso3), |o| o.country.value.clone());
            CountrySeries { iso3, name, rows }
        })
        .collect()
}

impl WorldBankTransformer {
    /// A transformer stamping entities with `as_of`.
    #[must_use]
    pub const fn new(as_of: DateTime<Utc>) -> Self {
        Self { as_of }
    }

    /// Macro indicators of one country.
    ///
    /// Each figure is the latest year with a value. Returns `None` when the
    /// payload carries no values at all.
    #[must_use]
    pub fn to_indicators(
        &self,
        records: &[WbObservation],
        country_code: &str,
        country_name: &str,
    ) -> Option<CountryIndicators> {
        let rows: Vec<&WbObservation> = records.iter().filter(|o| o.value.is_some()).collect();
        if rows.is_empty() {
            return None;
        }
        let series = CountrySeries {
            iso3: country_code.to_string(),
            name: country_name.to_string(),
            rows,
        };
        let period = [GDP, GDP_GROWTH, EXPORTS, IMPORTS]
            .iter()
            .filter_map(|i| series.latest(i).map(|(date, _)| date))
            .max()
            .unwrap_or_default();

        Some(CountryIndicators {
            country_code: series.iso3.clone(),
            country_name: series.name.clone(),
            period,
            gdp: series.value(GDP),
            gdp_growth: round2(series.value(GDP_GROWTH)),
            exports: series.value(EXPORTS),
            imports: series.value(IMPORTS),
            tariff_rate: series.latest(TARIFF).map(|(_, v)| round2(v)),
            source: PROVIDER_NAME.to_string(),
            last_updated: self.as_of,
        })
    }

    fn market(&self, series: &CountrySeries<'_>, product_category: &str) -> Option<MarketData> {
        let (period, market_size) = series.latest(IMPORTS)?;
        let exports = series.value(EXPORTS);

        let (tariff_rate, reported_tariff_rate, tariff_basis, reliability) =
            match series.latest(TARIFF) {
                Some((_, reported)) => (
                    round2(clamp_tariff(reported)),
                    Some(round2(reported)),
                    TariffBasis::Reported,
                    Reliability::Medium,
                ),
                None => (
                    placeholder_tariff(&format!("{}:{product_category}", series.iso3)),
                    None,
                    TariffBasis::Placeholder,
                    Reliability::Estimated,
                ),
            };

        Some(MarketData {
            country_code: series.iso3.clone(),
            country_name: series.name.clone(),
            product_category: product_category.to_string(),
            market_size,
            growth_rate: series.growth(IMPORTS),
            competition_level: competition_level(exports, market_size),
            tariff_rate,
            reported_tariff_rate,
            tariff_basis,
            trade_volume: exports + market_size,
            period,
            source: PROVIDER_NAME.to_string(),
            reliability,
            last_updated: self.as_of,
        })
    }
}

impl TradeTransformer for WorldBankTransformer {
    type Record = WbObservation;

    fn to_trade_stats(
        &self,
        records: &[WbObservation],
        country_code: &str,
        country_name: &str,
    ) -> TradeStats {
        let series = CountrySeries {
            iso3: country_code.to_string(),
            name: country_name.to_string(),
            rows: records.iter().collect(),
        };
        let period = [EXPORTS, IMPORTS]
            .iter()
            .filter_map(|i| series.latest(i).map(|(date, _)| date))
            .max()
            .unwrap_or_default();

        TradeStats {
            country_code: series.iso3.clone(),
            country_name: series.name.clone(),
            total_exports: series.value(EXPORTS),
            total_imports: series.value(IMPORTS),
            top_exports: self.to_product_stats(records, 10),
            top_imports: Vec::new(),
            top_partners: Vec::new(),
            period,
            source: PROVIDER_NAME.to_string(),
            last_updated: self.as_of,
        }
    }

    fn to_market_data(&self, records: &[WbObservation], product_category: &str) -> Vec<MarketData> {
        by_country(records)
            .iter()
            .filter_map(|series| self.market(series, product_category))
            .collect()
    }

    fn to_export_opportunities(
        &self,
        records: &[WbObservation],
        excluded_country: &str,
    ) -> Vec<ExportOpportunity> {
        by_country(records)
            .into_iter()
            .filter(|series| !series.iso3.eq_ignore_ascii_case(excluded_country))
            .filter_map(|series| {
                let (period, imports) = series.latest(IMPORTS)?;
                if imports <= MIN_OPPORTUNITY_VALUE {
                    return None;
                }
                let growth = series.growth(IMPORTS);
                Some(ExportOpportunity {
                    requirements: compliance_requirements(TOTAL, &series.iso3),
                    country_code: series.iso3,
                    country_name: series.name,
                    product_category: TOTAL.to_string(),
                    product_name: category_name(TOTAL).to_string(),
                    estimated_value: imports,
                    growth_rate: growth,
                    opportunity_score: opportunity_score(imports, growth),
                    provenance: OpportunityProvenance::Derived,
                    period,
                })
            })
            .collect()
    }

    /// Export composition: merchandise and services lines.
    fn to_product_stats(&self, records: &[WbObservation], limit: usize) -> Vec<ProductStat> {
        let series = CountrySeries {
            iso3: String::new(),
            name: String::new(),
            rows: records.iter().collect(),
        };

        let mut lines: Vec<ProductStat> = [
            (MERCHANDISE_EXPORTS, "Merchandise exports"),
            (SERVICE_EXPORTS, "Service exports"),
        ]
        .into_iter()
        .filter_map(|(code, fallback)| {
            let (_, value) = series.latest(code)?;
            Some(ProductStat {
                code: code.to_string(),
                name: series
                    .indicator_name(code)
                    .unwrap_or_else(|| fallback.to_string()),
                value,
                percentage: 0.0,
                growth_rate: series.growth(code),
            })
        })
        .collect();

        let total: f64 = lines.iter().map(|l| l.value).sum();
        if total > 0.0 {
            for line in &mut lines {
                line.percentage = round2(line.value / total * 100.0);
            }
        }
        lines.sort_by(|a, b| b.value.total_cmp(&a.value));
        lines.truncate(limit);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WbRef;
    use trade_core::{CompetitionLevel, Validator};

    fn obs(iso3: &str, indicator: &str, date: &str, value: Option<f64>) -> WbObservation {
        WbObservation {
            indicator: WbRef {
                id: indicator.to_string(),
                value: String::new(),
            },
            country: WbRef {
                id: String::new(),
                value: country::display_name(iso3),
            },
            country_iso3: iso3.to_string(),
            date: date.to_string(),
            value,
        }
    }

    fn transformer() -> WorldBankTransformer {
        WorldBankTransformer::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn germany() -> Vec<WbObservation> {
        vec![
            obs("DEU", GDP, "2022", Some(4.08e12)),
            obs("DEU", GDP, "2023", None),
            obs("DEU", GDP_GROWTH, "2022", Some(1.8)),
            obs("DEU", EXPORTS, "2022", Some(2.0e12)),
            obs("DEU", IMPORTS, "2022", Some(1.9e12)),
            obs("DEU", IMPORTS, "2021", Some(1.6e12)),
            obs("DEU", TARIFF, "2021", Some(1.82)),
            obs("DEU", MERCHANDISE_EXPORTS, "2022", Some(1.65e12)),
            obs("DEU", SERVICE_EXPORTS, "2022", Some(0.35e12)),
        ]
    }

    #[test]
    fn test_indicators_use_latest_non_null_values() {
        let indicators = transformer()
            .to_indicators(&germany(), "DEU", "Germany")
            .unwrap();
        assert_eq!(indicators.period, "2022");
        assert_eq!(indicators.gdp, 4.08e12);
        assert_eq!(indicators.gdp_growth, 1.8);
        assert_eq!(indicators.tariff_rate, Some(1.82));
        assert_eq!(indicators.trade_balance(), 0.1e12);
        assert!(Validator::default().validate(&indicators).is_valid);
    }

    #[test]
    fn test_indicators_none_without_values() {
        let records = vec![obs("DEU", GDP, "2023", None)];
        assert!(transformer().to_indicators(&records, "DEU", "Germany").is_none());
    }

    #[test]
    fn test_trade_stats_and_export_composition() {
        let stats = transformer().to_trade_stats(&germany(), "DEU", "Germany");
        assert_eq!(stats.total_exports, 2.0e12);
        assert_eq!(stats.total_imports, 1.9e12);
        assert_eq!(stats.top_exports.len(), 2);
        assert_eq!(stats.top_exports[0].code, MERCHANDISE_EXPORTS);
        assert_eq!(stats.top_exports[0].percentage, 82.5);
        assert!(stats.top_partners.is_empty());
    }

    #[test]
    fn test_market_proxy_with_reported_tariff() {
        let markets = transformer().to_market_data(&germany(), TOTAL);
        assert_eq!(markets.len(), 1);
        let m = &markets[0];
        assert_eq!(m.country_code, "DEU");
        assert_eq!(m.market_size, 1.9e12);
        assert_eq!(m.growth_rate, 18.75);
        assert_eq!(m.tariff_rate, 1.82);
        assert_eq!(m.tariff_basis, TariffBasis::Reported);
        assert_eq!(m.reliability, Reliability::Medium);
        assert_eq!(m.competition_level, CompetitionLevel::High);
    }

    #[test]
    fn test_market_proxy_without_tariff_uses_placeholder() {
        let records = vec![obs("USA", IMPORTS, "2022", Some(3.9e12))];
        let markets = transformer().to_market_data(&records, TOTAL);
        assert_eq!(markets[0].tariff_basis, TariffBasis::Placeholder);
        assert_eq!(markets[0].reliability, Reliability::Estimated);
        assert_eq!(markets, transformer().to_market_data(&records, TOTAL));
    }

    #[test]
    fn test_opportunities_skip_excluded_country() {
        let mut records = germany();
        records.push(obs("USA", IMPORTS, "2022", Some(3.9e12)));
        records.push(obs("USA", IMPORTS, "2021", Some(3.4e12)));

        let opportunities = transformer().to_export_opportunities(&records, "deu");
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].country_code, "USA");
        assert_eq!(opportunities[0].product_category, TOTAL);
        assert_eq!(opportunities[0].product_name, "All Products");
        // +30 for value, +15 for 14.71% growth.
        assert_eq!(opportunities[0].opportunity_score, 95);
    }
}
