//! Comtrade records to canonical entities.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use trade_core::analytics::{
    MIN_OPPORTUNITY_VALUE, category_name, clamp_tariff, competition_level,
    compliance_requirements, growth_from_series, opportunity_score, placeholder_tariff, round2,
    tariff_from_valuation,
};
use trade_core::country;
use trade_core::{
    ExportOpportunity, MarketData, OpportunityProvenance, ProductStat, Reliability, TariffBasis,
    TradePartner, TradeStats, TradeTransformer,
};

use crate::{ComtradeRecord, PROVIDER_NAME};

/// Number of partners kept in [`TradeStats::top_partners`].
const TOP_PARTNERS: usize = 5;

/// Number of product lines kept per direction in [`TradeStats`].
const TOP_PRODUCTS: usize = 10;

/// Transformer for Comtrade records.
///
/// `as_of` is the fetch time of the payload and becomes every entity's
/// `last_updated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComtradeTransformer {
    as_of: DateTime<Utc>,
}

impl ComtradeTransformer {
    /// A transformer stamping entities with `as_of`.
    #[must_use]
    pub const fn new(as_of: DateTime<Utc>) -> Self {
        Self { as_of }
    }
}

fn latest_period<'a>(records: impl IntoIterator<Item = &'a ComtradeRecord>) -> Option<String> {
    records
        .into_iter()
        .filter(|r| !r.period.is_empty())
        .map(|r| r.period.clone())
        .max()
}

/// World-partner rows when there are any, otherwise all rows.
fn prefer_world<'a>(rows: &[&'a ComtradeRecord]) -> Vec<&'a ComtradeRecord> {
    if rows.iter().any(|r| r.is_world()) {
        rows.iter().copied().filter(|r| r.is_world()).collect()
    } else {
        rows.to_vec()
    }
}

/// `TOTAL` rows when there are any, otherwise all rows.
fn prefer_total<'a>(rows: &[&'a ComtradeRecord]) -> Vec<&'a ComtradeRecord> {
    if rows.iter().any(|r| r.is_total()) {
        rows.iter().copied().filter(|r| r.is_total()).collect()
    } else {
        rows.to_vec()
    }
}

fn total_value(rows: &[&ComtradeRecord]) -> f64 {
    rows.iter().map(|r| r.value()).sum()
}

/// A flow's total for one period, without double counting commodity lines
/// or partner rows.
fn flow_total(rows: &[&ComtradeRecord]) -> f64 {
    total_value(&prefer_total(&prefer_world(rows)))
}

/// Per-period totals of `rows`.
fn series(rows: &[&ComtradeRecord]) -> Vec<(String, f64)> {
    let mut by_period: BTreeMap<&str, Vec<&ComtradeRecord>> = BTreeMap::new();
    for row in rows {
        by_period.entry(row.period.as_str()).or_default().push(*row);
    }
    by_period
        .into_iter()
        .map(|(period, rows)| (period.to_string(), flow_total(&rows)))
        .collect()
}

fn reporter_iso(record: &ComtradeRecord) -> String {
    if record.reporter_iso.is_empty() {
        country::by_m49(record.reporter_code)
            .map_or_else(|| record.reporter_code.to_string(), |c| c.iso3.to_string())
    } else {
        record.reporter_iso.clone()
    }
}

fn reporter_name(record: &ComtradeRecord, iso: &str) -> String {
    if record.reporter_desc.is_empty() {
        country::display_name(iso)
    } else {
        record.reporter_desc.clone()
    }
}

fn product_name(record: &ComtradeRecord) -> String {
    if record.cmd_desc.is_empty() {
        category_name(&record.cmd_code).to_string()
    } else {
        record.cmd_desc.clone()
    }
}

/// Rows grouped by reporter ISO3, in code order.
fn by_reporter(records: &[ComtradeRecord]) -> BTreeMap<String, Vec<&ComtradeRecord>> {
    let mut grouped: BTreeMap<String, Vec<&ComtradeRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(reporter_iso(record)).or_default().push(record);
    }
    grouped
}

impl ComtradeTransformer {
    fn product_lines(rows: &[&ComtradeRecord], limit: usize) -> Vec<ProductStat> {
        let lines: Vec<&ComtradeRecord> = rows.iter().copied().filter(|r| !r.is_total()).collect();
        let lines = prefer_world(&lines);
        let Some(latest) = latest_period(lines.iter().copied()) else {
            return Vec::new();
        };

        let mut by_code: BTreeMap<&str, Vec<&ComtradeRecord>> = BTreeMap::new();
        for line in &lines {
            by_code.entry(line.cmd_code.as_str()).or_default().push(*line);
        }

        let mut stats: Vec<ProductStat> = by_code
            .into_values()
            .filter_map(|rows| {
                let current: Vec<&ComtradeRecord> =
                    rows.iter().copied().filter(|r| r.period == latest).collect();
                let first = current.first()?;
                Some(ProductStat {
                    code: first.cmd_code.clone(),
                    name: product_name(first),
                    value: total_value(&current),
                    percentage: 0.0,
                    growth_rate: round2(growth_from_series(&series(&rows))),
                })
            })
            .collect();

        let total: f64 = stats.iter().map(|s| s.value).sum();
        for stat in &mut stats {
            if total > 0.0 {
                stat.percentage = round2(stat.value / total * 100.0);
            }
        }
        stats.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.code.cmp(&b.code)));
        stats.truncate(limit);
        stats
    }

    fn partners(rows: &[&ComtradeRecord]) -> Vec<TradePartner> {
        let partner_rows: Vec<&ComtradeRecord> =
            rows.iter().copied().filter(|r| !r.is_world()).collect();
        let partner_rows = prefer_total(&partner_rows);

        let mut by_partner: BTreeMap<u16, (String, String, f64)> = BTreeMap::new();
        for row in partner_rows {
            let entry = by_partner.entry(row.partner_code).or_insert_with(|| {
                let known = country::by_m49(row.partner_code);
                let code = if row.partner_iso.is_empty() {
                    known.map_or_else(|| row.partner_code.to_string(), |c| c.iso3.to_string())
                } else {
                    row.partner_iso.clone()
                };
                let name = if row.partner_desc.is_empty() {
                    country::display_name(&code)
                } else {
                    row.partner_desc.clone()
                };
                (code, name, 0.0)
            });
            entry.2 += row.value();
        }

        let total: f64 = by_partner.values().map(|(_, _, v)| v).sum();
        let mut partners: Vec<TradePartner> = by_partner
            .into_values()
            .map(|(country_code, country_name, value)| TradePartner {
                country_code,
                country_name,
                value,
                percentage: if total > 0.0 {
                    round2(value / total * 100.0)
                } else {
                    0.0
                },
            })
            .collect();
        partners.sort_by(|a, b| {
            b.value
                .total_cmp(&a.value)
                .then_with(|| a.country_code.cmp(&b.country_code))
        });
        partners.truncate(TOP_PARTNERS);
        partners
    }

    fn market(
        &self,
        rows: &[&ComtradeRecord],
        iso: &str,
        product_category: &str,
    ) -> Option<MarketData> {
        let first = rows.first()?;
        let latest = latest_period(rows.iter().copied())?;
        let category_rows: Vec<&ComtradeRecord> = {
            let matching: Vec<&ComtradeRecord> = rows
                .iter()
                .copied()
                .filter(|r| r.cmd_code.eq_ignore_ascii_case(product_category))
                .collect();
            if matching.is_empty() { rows.to_vec() } else { matching }
        };

        let imports: Vec<&ComtradeRecord> =
            category_rows.iter().copied().filter(|r| r.is_import()).collect();
        let exports: Vec<&ComtradeRecord> =
            category_rows.iter().copied().filter(|r| r.is_export()).collect();
        let latest_imports: Vec<&ComtradeRecord> =
            imports.iter().copied().filter(|r| r.period == latest).collect();
        let latest_exports: Vec<&ComtradeRecord> =
            exports.iter().copied().filter(|r| r.period == latest).collect();

        let market_size = flow_total(&latest_imports);
        let export_value = flow_total(&latest_exports);

        let valued = prefer_total(&prefer_world(&latest_imports));
        let cif: Option<f64> = valued.iter().map(|r| r.cif_value).sum();
        let fob: Option<f64> = valued.iter().map(|r| r.fob_value).sum();
        let (tariff_rate, reported_tariff_rate, tariff_basis, reliability) =
            match tariff_from_valuation(cif, fob) {
                Some(reported) => (
                    round2(clamp_tariff(reported)),
                    Some(round2(reported)),
                    TariffBasis::CifFobSpread,
                    Reliability::High,
                ),
                None => (
                    placeholder_tariff(&format!("{iso}:{product_category}")),
                    None,
                    TariffBasis::Placeholder,
                    Reliability::Estimated,
                ),
            };

        Some(MarketData {
            country_code: iso.to_string(),
            country_name: reporter_name(first, iso),
            product_category: product_category.to_string(),
            market_size,
            growth_rate: round2(growth_from_series(&series(&imports))),
            competition_level: competition_level(export_value, market_size),
            tariff_rate,
            reported_tariff_rate,
            tariff_basis,
            trade_volume: export_value + market_size,
            period: latest,
            source: PROVIDER_NAME.to_string(),
            reliability,
            last_updated: self.as_of,
        })
    }
}

impl TradeTransformer for ComtradeTransformer {
    type Record = ComtradeRecord;

    fn to_trade_stats(
        &self,
        records: &[ComtradeRecord],
        country_code: &str,
        country_name: &str,
    ) -> TradeStats {
        let period = latest_period(records).unwrap_or_default();
        let current: Vec<&ComtradeRecord> = records.iter().filter(|r| r.period == period).collect();
        let (exports, imports): (Vec<&ComtradeRecord>, Vec<&ComtradeRecord>) = (
            current.iter().copied().filter(|r| r.is_export()).collect(),
            current.iter().copied().filter(|r| r.is_import()).collect(),
        );

        let all_exports: Vec<&ComtradeRecord> = records.iter().filter(|r| r.is_export()).collect();
        let all_imports: Vec<&ComtradeRecord> = records.iter().filter(|r| r.is_import()).collect();

        TradeStats {
            country_code: country_code.to_string(),
            country_name: country_name.to_string(),
            total_exports: flow_total(&exports),
            total_imports: flow_total(&imports),
            top_exports: Self::product_lines(&all_exports, TOP_PRODUCTS),
            top_imports: Self::product_lines(&all_imports, TOP_PRODUCTS),
            top_partners: Self::partners(&current),
            period,
            source: PROVIDER_NAME.to_string(),
            last_updated: self.as_of,
        }
    }

    fn to_market_data(
        &self,
        records: &[ComtradeRecord],
        product_category: &str,
    ) -> Vec<MarketData> {
        by_reporter(records)
            .iter()
            .filter_map(|(iso, rows)| self.market(rows, iso, product_category))
            .collect()
    }

    fn to_export_opportunities(
        &self,
        records: &[ComtradeRecord],
        excluded_country: &str,
    ) -> Vec<ExportOpportunity> {
        let mut opportunities = Vec::new();

        for (iso, rows) in by_reporter(records) {
            if iso.eq_ignore_ascii_case(excluded_country) {
                continue;
            }
            let imports: Vec<&ComtradeRecord> =
                rows.iter().copied().filter(|r| r.is_import()).collect();
            let only_totals = imports.iter().all(|r| r.is_total());
            let codes: BTreeSet<&str> = imports
                .iter()
                .filter(|r| only_totals || !r.is_total())
                .map(|r| r.cmd_code.as_str())
                .collect();

            for code in codes {
                let lines: Vec<&ComtradeRecord> =
                    imports.iter().copied().filter(|r| r.cmd_code == code).collect();
                let Some(latest) = latest_period(lines.iter().copied()) else {
                    continue;
                };
                let current: Vec<&ComtradeRecord> =
                    lines.iter().copied().filter(|r| r.period == latest).collect();
                let value = flow_total(&current);
                if value <= MIN_OPPORTUNITY_VALUE {
                    continue;
                }

                let growth = round2(growth_from_series(&series(&lines)));
                let first = current[0];
                opportunities.push(ExportOpportunity {
                    country_code: iso.clone(),
                    country_name: reporter_name(first, &iso),
                    product_category: code.to_string(),
                    product_name: product_name(first),
                    estimated_value: value,
                    growth_rate: growth,
                    opportunity_score: opportunity_score(value, growth),
                    requirements: compliance_requirements(code, &iso),
                    provenance: OpportunityProvenance::Derived,
                    period: latest,
                });
            }
        }
        opportunities
    }

    fn to_product_stats(&self, records: &[ComtradeRecord], limit: usize) -> Vec<ProductStat> {
        let rows: Vec<&ComtradeRecord> = records.iter().collect();
        Self::product_lines(&rows, limit)
    }
}
