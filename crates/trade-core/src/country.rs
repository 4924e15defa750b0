//! Country reference table.
//!
//! Providers disagree on how to name countries: the World Bank uses ISO3
//! codes while Comtrade uses UN M49 numeric codes (with a few
//! Comtrade-specific exceptions such as 251 for France and 699 for India).
//! This table maps between them for the economies the service knows about.

use serde::Serialize;

/// A country known to the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Country {
    /// ISO 3166-1 alpha-3 code.
    pub iso3: &'static str,
    /// Reporter/partner code used by Comtrade.
    pub m49: u16,
    /// Display name.
    pub name: &'static str,
    /// Member of the European Union.
    pub eu_member: bool,
}

const fn country(iso3: &'static str, m49: u16, name: &'static str, eu_member: bool) -> Country {
    Country {
        iso3,
        m49,
        name,
        eu_member,
    }
}

/// All countries the service can resolve.
pub const COUNTRIES: &[Country] = &[
    country("USA", 842, "United States", false),
    country("CHN", 156, "China", false),
    country("DEU", 276, "Germany", true),
    country("JPN", 392, "Japan", false),
    country("GBR", 826, "United Kingdom", false),
    country("FRA", 251, "France", true),
    country("IND", 699, "India", false),
    country("ITA", 380, "Italy", true),
    country("BRA", 76, "Brazil", false),
    country("CAN", 124, "Canada", false),
    country("KOR", 410, "Republic of Korea", false),
    country("MEX", 484, "Mexico", false),
    country("NLD", 528, "Netherlands", true),
    country("ESP", 724, "Spain", true),
    country("AUS", 36, "Australia", false),
    country("CHE", 757, "Switzerland", false),
    country("SGP", 702, "Singapore", false),
    country("BEL", 56, "Belgium", true),
    country("POL", 616, "Poland", true),
    country("SWE", 752, "Sweden", true),
    country("TUR", 792, "Turkey", false),
    country("IDN", 360, "Indonesia", false),
    country("SAU", 682, "Saudi Arabia", false),
    country("ZAF", 710, "South Africa", false),
    country("VNM", 704, "Viet Nam", false),
    country("ARE", 784, "United Arab Emirates", false),
];

/// ISO3 codes queried when the caller does not name any countries.
pub const MAJOR_ECONOMIES: &[&str] = &[
    "USA", "CHN", "DEU", "JPN", "GBR", "FRA", "IND", "ITA", "BRA", "CAN",
];

/// Comtrade's partner code for "World".
pub const WORLD_M49: u16 = 0;

/// Looks up a country by ISO3 code, case-insensitively.
#[must_use]
pub fn by_iso3(code: &str) -> Option<&'static Country> {
    let code = code.trim();
    COUNTRIES.iter().find(|c| c.iso3.eq_ignore_ascii_case(code))
}

/// Looks up a country by its Comtrade numeric code.
#[must_use]
pub fn by_m49(code: u16) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.m49 == code)
}

/// Display name for an ISO3 code, falling back to the code itself.
#[must_use]
pub fn display_name(code: &str) -> String {
    by_iso3(code).map_or_else(|| code.to_uppercase(), |c| c.name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_iso3() {
        let usa = by_iso3("usa").unwrap();
        assert_eq!(usa.m49, 842);
        assert_eq!(usa.name, "United States");
        assert!(by_iso3("XXX").is_none());
    }

    #[test]
    fn test_lookup_by_m49_uses_comtrade_codes() {
        assert_eq!(by_m49(251).unwrap().iso3, "FRA");
        assert_eq!(by_m49(699).unwrap().iso3, "IND");
        assert!(by_m49(WORLD_M49).is_none());
    }

    #[test]
    fn test_major_economies_are_resolvable() {
        for code in MAJOR_ECONOMIES {
            assert!(by_iso3(code).is_some(), "{code} missing from table");
        }
    }

    #[test]
    fn test_display_name_falls_back_to_code() {
        assert_eq!(display_name("DEU"), "Germany");
        assert_eq!(display_name("zzz"), "ZZZ");
    }
}
