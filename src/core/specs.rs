//! Image specifications: the layered key/value configuration every pipeline
//! run reads. Common keys are typed fields; anything else lands in `extra`
//! and is interpreted by the provider that recognizes it.
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::processing::color::CoarseParams;
use crate::error::{Error, Result};
use crate::types::ProviderKind;

pub const DEFAULT_STYLES: [&str; 2] = ["base", "vibrant"];

/// Parameters for catalog search, scene compilation and post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpecs {
    /// Maximum cloud cover, percent.
    pub clouds: f64,
    /// Minimum fraction of the bbox a scene must cover.
    pub min_intersect: f64,
    #[serde(rename = "startDate", with = "flexible_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(rename = "endDate", with = "flexible_date")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(rename = "N_images")]
    pub n_images: usize,
    /// Minimum spacing in days between accepted scenes; 0 disables.
    pub skip_days: u32,
    pub write_styles: Vec<String>,
    pub landcover_indices: Vec<String>,
    /// Keep only derived products (downsized); delete the raw mosaic.
    pub thumbnails: bool,
    /// Prefix for staged and output file names.
    pub file_header: String,
    pub bbox_rescaling: f64,
    /// Minimum bbox side per provider, km.
    pub min_size: BTreeMap<String, f64>,
    /// Maximum bbox side per provider, km.
    pub max_size: BTreeMap<String, f64>,
    pub color: CoarseParams,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ImageSpecs {
    fn default() -> Self {
        Self {
            clouds: 10.0,
            min_intersect: 0.9,
            start_date: NaiveDate::from_ymd_opt(2008, 9, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
            end_date: None,
            n_images: 1,
            skip_days: 0,
            write_styles: DEFAULT_STYLES.iter().map(|s| s.to_string()).collect(),
            landcover_indices: Vec::new(),
            thumbnails: false,
            file_header: String::new(),
            bbox_rescaling: 1.0,
            min_size: BTreeMap::new(),
            max_size: BTreeMap::new(),
            color: CoarseParams::default(),
            extra: Map::new(),
        }
    }
}

/// A change a provider made to the values it reads from the specs, reported
/// instead of silently rewriting the caller's configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecAdjustment {
    pub key: String,
    pub from: Value,
    pub to: Value,
    pub reason: String,
}

impl SpecAdjustment {
    pub fn new<K: Into<String>, R: Into<String>>(key: K, from: Value, to: Value, reason: R) -> Self {
        let adj = Self {
            key: key.into(),
            from,
            to,
            reason: reason.into(),
        };
        warn!(
            "Adjusting spec '{}': {} -> {} ({})",
            adj.key, adj.from, adj.to, adj.reason
        );
        adj
    }
}

fn merge_layer(base: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (key, value) in layer {
        base.insert(key, value);
    }
}

impl ImageSpecs {
    /// Build specs from defaults, then an optional JSON file, then explicit
    /// overrides. Later layers replace earlier ones key by key.
    pub fn layered(file: Option<&Path>, overrides: &Map<String, Value>) -> Result<Self> {
        let mut merged = match serde_json::to_value(Self::default())? {
            Value::Object(map) => map,
            _ => return Err(Error::config("default specs did not serialize to an object")),
        };

        if let Some(path) = file {
            debug!("Loading specs from {:?}", path);
            let text = std::fs::read_to_string(path)?;
            let layer: Value = serde_json::from_str(&text)
                .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
            match layer {
                Value::Object(map) => merge_layer(&mut merged, map),
                _ => {
                    return Err(Error::config(format!(
                        "{}: specs file must hold a JSON object",
                        path.display()
                    )));
                }
            }
        }
        merge_layer(&mut merged, overrides.clone());

        let specs: Self = serde_json::from_value(Value::Object(merged))
            .map_err(|e| Error::config(format!("malformed specs: {}", e)))?;
        specs.validate()?;
        Ok(specs)
    }

    /// Return a copy with `overrides` layered on top.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => return Err(Error::config("specs did not serialize to an object")),
        };
        merge_layer(&mut merged, overrides.clone());
        let specs: Self = serde_json::from_value(Value::Object(merged))
            .map_err(|e| Error::config(format!("malformed specs: {}", e)))?;
        specs.validate()?;
        Ok(specs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.clouds) {
            return Err(Error::config(format!(
                "clouds must be within [0, 100], got {}",
                self.clouds
            )));
        }
        if !(0.0..=1.0).contains(&self.min_intersect) {
            return Err(Error::config(format!(
                "min_intersect must be within [0, 1], got {}",
                self.min_intersect
            )));
        }
        if self.n_images == 0 {
            return Err(Error::config("N_images must be at least 1"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(Error::config(format!(
                    "startDate {} is not before endDate {}",
                    start, end
                )));
            }
        }
        if !(self.bbox_rescaling > 0.0) {
            return Err(Error::config(format!(
                "bbox_rescaling must be positive, got {}",
                self.bbox_rescaling
            )));
        }
        for (table, sizes) in [("min_size", &self.min_size), ("max_size", &self.max_size)] {
            for (name, km) in sizes {
                if ProviderKind::from_name(name).is_none() {
                    return Err(Error::config(format!("{}: unknown provider '{}'", table, name)));
                }
                if !(*km > 0.0) {
                    return Err(Error::config(format!("{}.{} must be positive", table, name)));
                }
            }
        }
        self.color.validate()
    }

    /// Deserialize the provider-specific keys out of `extra`. Unknown keys are
    /// ignored so one specs file can serve several providers.
    pub fn provider_settings<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.extra.clone()))
            .map_err(|e| Error::config(format!("provider settings: {}", e)))
    }

    /// Effective end of the search window.
    pub fn end_or_now(&self) -> DateTime<Utc> {
        self.end_date.unwrap_or_else(Utc::now)
    }

    pub fn uses_default_styles(&self) -> bool {
        self.write_styles.iter().map(String::as_str).eq(DEFAULT_STYLES)
    }

    pub fn wants_indices(&self) -> bool {
        !self.landcover_indices.is_empty()
    }

    pub fn size_limits(&self, provider: ProviderKind) -> (Option<f64>, Option<f64>) {
        (
            self.min_size.get(provider.as_str()).copied(),
            self.max_size.get(provider.as_str()).copied(),
        )
    }
}

/// Accept RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("unrecognized date '{}'", s))
}

mod flexible_date {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Option<DateTime<Utc>>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match v {
            Some(dt) => s.serialize_some(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| parse_date(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
