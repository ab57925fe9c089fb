//! Shared enums used across satgrab.
//! Includes `ProviderKind` (catalog selection, CLI value enum) and
//! `ProductKind` (what an output raster holds).
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Planet,
    #[value(name = "digital_globe", alias = "dg")]
    DigitalGlobe,
    Landsat,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Planet => "planet",
            ProviderKind::DigitalGlobe => "digital_globe",
            ProviderKind::Landsat => "landsat",
        }
    }

    /// Look up a provider by the name used in config files and size tables.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "planet" => Some(ProviderKind::Planet),
            "digital_globe" | "digitalglobe" | "dg" => Some(ProviderKind::DigitalGlobe),
            "landsat" => Some(ProviderKind::Landsat),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Color-corrected visual rendering.
    Style,
    /// Single-band band-algebra index.
    Index,
    /// Unstyled mosaic.
    Raw,
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProductKind::Style => "style",
            ProductKind::Index => "index",
            ProductKind::Raw => "raw",
        };
        write!(f, "{}", s)
    }
}
