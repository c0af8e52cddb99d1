//! Trading pairs tracked together for relative-value analysis.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grouping of pairs in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairCategory {
    Layer1,
    Defi,
    CrossEcosystem,
}

impl PairCategory {
    pub const ALL: [PairCategory; 3] = [
        PairCategory::Layer1,
        PairCategory::Defi,
        PairCategory::CrossEcosystem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PairCategory::Layer1 => "layer1",
            PairCategory::Defi => "defi",
            PairCategory::CrossEcosystem => "cross_ecosystem",
        }
    }

    /// Heading used in catalog summaries.
    pub fn title(&self) -> &'static str {
        match self {
            PairCategory::Layer1 => "Layer 1",
            PairCategory::Defi => "DeFi",
            PairCategory::CrossEcosystem => "Cross-Ecosystem",
        }
    }
}

impl fmt::Display for PairCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two symbols tracked as a pair. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol1: String,
    pub symbol2: String,
    pub category: PairCategory,
    pub description: String,
}

impl TradingPair {
    pub fn new(
        symbol1: impl Into<String>,
        symbol2: impl Into<String>,
        category: PairCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            symbol1: symbol1.into(),
            symbol2: symbol2.into(),
            category,
            description: description.into(),
        }
    }

    /// `SYMBOL1_SYMBOL2`
    pub fn pair_name(&self) -> String {
        format!("{}_{}", self.symbol1, self.symbol2)
    }

    pub fn symbols(&self) -> (&str, &str) {
        (&self.symbol1, &self.symbol2)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pair_name(), self.category)
    }
}
