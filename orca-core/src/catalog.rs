//! Pair catalog: the static registry of pairs and the symbol universe derived from it.
//!
//! The catalog ships with a built-in set of crypto pairs and can also be loaded
//! from a TOML file of `[[pairs]]` tables:
//!
//! ```toml
//! [[pairs]]
//! symbol1 = "ETHUSDT"
//! symbol2 = "ADAUSDT"
//! category = "layer1"
//! description = "Ethereum vs Cardano"
//! ```

use crate::domain::{PairCategory, TradingPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("read catalog file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize catalog: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("pair {0} not found")]
    PairNotFound(String),

    #[error("duplicate pair {0}")]
    DuplicatePair(String),

    #[error("pair {0} uses the same symbol twice")]
    DegeneratePair(String),
}

/// Availability of each symbol on the exchange, produced once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolAvailability(BTreeMap<String, bool>);

impl SymbolAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, available: bool) {
        self.0.insert(symbol.into(), available);
    }

    /// Unknown symbols count as unavailable.
    pub fn is_available(&self, symbol: &str) -> bool {
        self.0.get(symbol).copied().unwrap_or(false)
    }

    pub fn available_symbols(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.0.values().filter(|ok| **ok).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(s, ok)| (s.as_str(), *ok))
    }
}

impl FromIterator<(String, bool)> for SymbolAvailability {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Counts describing the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStatistics {
    pub total_pairs: usize,
    pub pairs_per_category: BTreeMap<PairCategory, usize>,
    pub unique_symbols: usize,
    pub categories: Vec<PairCategory>,
}

/// The pair catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCatalog {
    pairs: Vec<TradingPair>,
}

impl PairCatalog {
    /// Build a catalog, rejecting duplicate pair names and self-pairs.
    pub fn new(pairs: Vec<TradingPair>) -> Result<Self, CatalogError> {
        let mut seen = BTreeSet::new();
        for pair in &pairs {
            let name = pair.pair_name();
            if pair.symbol1 == pair.symbol2 {
                return Err(CatalogError::DegeneratePair(name));
            }
            if !seen.insert(name.clone()) {
                return Err(CatalogError::DuplicatePair(name));
            }
        }
        Ok(Self { pairs })
    }

    /// Load a catalog from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a catalog from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let parsed: PairCatalog = toml::from_str(content)?;
        Self::new(parsed.pairs)
    }

    /// Serialize the catalog to TOML.
    pub fn to_toml(&self) -> Result<String, CatalogError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The built-in crypto pair set.
    pub fn default_crypto() -> Self {
        let pairs = vec![
            TradingPair::new("ETHUSDT", "ADAUSDT", PairCategory::Layer1, "Ethereum vs Cardano"),
            TradingPair::new("ETHUSDT", "SOLUSDT", PairCategory::Layer1, "Ethereum vs Solana"),
            TradingPair::new("ADAUSDT", "DOTUSDT", PairCategory::Layer1, "Cardano vs Polkadot"),
            TradingPair::new("UNIUSDT", "SUSHIUSDT", PairCategory::Defi, "DEX protocols"),
            TradingPair::new("AAVEUSDT", "COMPUSDT", PairCategory::Defi, "Lending protocols"),
            TradingPair::new(
                "ETHUSDT",
                "LINKUSDT",
                PairCategory::CrossEcosystem,
                "Ethereum vs Oracle",
            ),
            TradingPair::new(
                "SOLUSDT",
                "RAYUSDT",
                PairCategory::CrossEcosystem,
                "Solana ecosystem",
            ),
        ];
        Self { pairs }
    }

    pub fn all_pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs_by_category(&self, category: PairCategory) -> Vec<&TradingPair> {
        self.pairs.iter().filter(|p| p.category == category).collect()
    }

    pub fn pair_by_name(&self, pair_name: &str) -> Option<&TradingPair> {
        self.pairs.iter().find(|p| p.pair_name() == pair_name)
    }

    /// The two symbols of a named pair.
    pub fn symbols_for_pair(&self, pair_name: &str) -> Result<(&str, &str), CatalogError> {
        self.pair_by_name(pair_name)
            .map(|p| p.symbols())
            .ok_or_else(|| CatalogError::PairNotFound(pair_name.to_string()))
    }

    /// Every symbol used by any pair, deduplicated and sorted.
    pub fn all_symbols(&self) -> Vec<String> {
        self.pairs
            .iter()
            .flat_map(|p| [p.symbol1.clone(), p.symbol2.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Pair name → whether both of its symbols are available.
    pub fn validate_pair_availability(
        &self,
        availability: &SymbolAvailability,
    ) -> BTreeMap<String, bool> {
        self.pairs
            .iter()
            .map(|pair| {
                let first = availability.is_available(&pair.symbol1);
                let second = availability.is_available(&pair.symbol2);
                let ok = first && second;
                if !ok {
                    warn!(
                        pair = %pair.pair_name(),
                        symbol1 = %pair.symbol1,
                        symbol1_available = first,
                        symbol2 = %pair.symbol2,
                        symbol2_available = second,
                        "pair not available"
                    );
                }
                (pair.pair_name(), ok)
            })
            .collect()
    }

    /// Pairs whose symbols are both available, in catalog order.
    pub fn available_pairs(&self, availability: &SymbolAvailability) -> Vec<&TradingPair> {
        let valid = self.validate_pair_availability(availability);
        self.pairs
            .iter()
            .filter(|p| valid.get(&p.pair_name()).copied().unwrap_or(false))
            .collect()
    }

    pub fn statistics(&self) -> CatalogStatistics {
        let mut pairs_per_category = BTreeMap::new();
        for pair in &self.pairs {
            *pairs_per_category.entry(pair.category).or_insert(0) += 1;
        }
        CatalogStatistics {
            total_pairs: self.pairs.len(),
            categories: pairs_per_category.keys().copied().collect(),
            pairs_per_category,
            unique_symbols: self.all_symbols().len(),
        }
    }

    /// Log the catalog grouped by category.
    pub fn log_summary(&self) {
        let stats = self.statistics();
        info!(
            total_pairs = stats.total_pairs,
            unique_symbols = stats.unique_symbols,
            "trading pair catalog"
        );
        for category in PairCategory::ALL {
            let pairs = self.pairs_by_category(category);
            if pairs.is_empty() {
                continue;
            }
            info!(category = category.title(), pairs = pairs.len(), "pair group");
            for pair in pairs {
                info!(pair = %pair.pair_name(), "  {}", pair.description);
            }
        }
    }
}

impl Default for PairCatalog {
    fn default() -> Self {
        Self::default_crypto()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn availability(entries: &[(&str, bool)]) -> SymbolAvailability {
        entries.iter().map(|(s, ok)| (s.to_string(), *ok)).collect()
    }

    #[test]
    fn default_catalog_has_seven_pairs() {
        let c = PairCatalog::default_crypto();
        assert_eq!(c.len(), 7);
        assert_eq!(c.pairs_by_category(PairCategory::Layer1).len(), 3);
        assert_eq!(c.pairs_by_category(PairCategory::Defi).len(), 2);
        assert_eq!(c.pairs_by_category(PairCategory::CrossEcosystem).len(), 2);
    }

    #[test]
    fn all_symbols_is_unique_and_sorted() {
        let symbols = PairCatalog::default_crypto().all_symbols();
        assert_eq!(symbols.len(), 10);
        let mut sorted = symbols.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(symbols, sorted);
        assert!(symbols.contains(&"ETHUSDT".to_string()));
    }

    #[test]
    fn pair_lookup() {
        let c = PairCatalog::default_crypto();
        assert_eq!(c.symbols_for_pair("AAVEUSDT_COMPUSDT").unwrap(), ("AAVEUSDT", "COMPUSDT"));
        assert!(matches!(
            c.symbols_for_pair("BTCUSDT_ETHUSDT"),
            Err(CatalogError::PairNotFound(_))
        ));
    }

    #[test]
    fn pair_with_unavailable_leg_is_excluded() {
        let pair = TradingPair::new("ETHUSDT", "LINKUSDT", PairCategory::CrossEcosystem, "");
        let c = PairCatalog::new(vec![pair]).unwrap();
        let avail = availability(&[("ETHUSDT", true), ("LINKUSDT", false)]);

        assert!(c.available_pairs(&avail).is_empty());
        assert_eq!(c.validate_pair_availability(&avail)["ETHUSDT_LINKUSDT"], false);
    }

    #[test]
    fn missing_symbol_counts_as_unavailable() {
        let c = PairCatalog::default_crypto();
        let avail = availability(&[("ETHUSDT", true), ("ADAUSDT", true)]);
        let names: Vec<String> = c.available_pairs(&avail).iter().map(|p| p.pair_name()).collect();
        assert_eq!(names, vec!["ETHUSDT_ADAUSDT"]);
    }

    #[test]
    fn toml_roundtrip() {
        let c = PairCatalog::default_crypto();
        let toml_str = c.to_toml().unwrap();
        let parsed = PairCatalog::from_toml(&toml_str).unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn rejects_duplicates() {
        let toml_str = r#"
            [[pairs]]
            symbol1 = "ETHUSDT"
            symbol2 = "ADAUSDT"
            category = "layer1"
            description = "a"

            [[pairs]]
            symbol1 = "ETHUSDT"
            symbol2 = "ADAUSDT"
            category = "defi"
            description = "b"
        "#;
        assert!(matches!(
            PairCatalog::from_toml(toml_str),
            Err(CatalogError::DuplicatePair(_))
        ));
    }

    #[test]
    fn statistics_counts_categories() {
        let stats = PairCatalog::default_crypto().statistics();
        assert_eq!(stats.total_pairs, 7);
        assert_eq!(stats.unique_symbols, 10);
        assert_eq!(stats.pairs_per_category[&PairCategory::Defi], 2);
        assert_eq!(stats.categories.len(), 3);
    }

    #[test]
    fn availability_counts() {
        let avail = availability(&[("A", true), ("B", false), ("C", true)]);
        assert_eq!(avail.available_count(), 2);
        assert_eq!(avail.available_symbols(), vec!["A", "C"]);
        assert!(!avail.is_available("Z"));
    }
}
