//! Color correction for visual products.
//!
//! Two stages run on a `(bands, rows, cols)` stack of raw pixel values, where
//! zero marks nodata and is never touched:
//!
//! 1. **Coarse adjustment** ([`coarse_adjust`]): percentile-based linear
//!    stretch of the combined histogram, then of each band onto the combined
//!    range, then atmospheric darkening of the green and blue low ends.
//!    Every sub-step whose fraction is zero is skipped, so [`CoarseParams::NULL`]
//!    is the identity.
//! 2. **Fine tuning** ([`render_rgb`]): normalize to `[0, 1]`, then gamma,
//!    sigmoidal contrast and saturation from a named [`StyleParams`] bundle,
//!    quantized to 8 bits.
use ndarray::{Array3, ArrayViewMut, Axis, Dimension, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::histogram::HistogramStats;
use crate::error::{Error, Result};

/// Parameters of the coarse histogram adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseParams {
    /// Low/high reference percentiles of the nonzero histogram.
    pub percentiles: [f64; 2],
    /// How far the combined stretch moves from the natural min/max toward
    /// the percentiles (0 = no stretch, 1 = full percentile clip).
    pub cut_frac: f64,
    /// Same, per band; also maps each band onto the combined range.
    pub band_cut_frac: f64,
    /// Fraction of the green band's low percentile subtracted from it.
    pub green_atmos_frac: f64,
    /// Fraction of the blue band's low percentile subtracted from it.
    pub blue_atmos_frac: f64,
}

impl CoarseParams {
    pub const NULL: Self = Self {
        percentiles: [5.0, 95.0],
        cut_frac: 0.0,
        band_cut_frac: 0.0,
        green_atmos_frac: 0.0,
        blue_atmos_frac: 0.0,
    };

    pub fn is_null(&self) -> bool {
        self.cut_frac == 0.0
            && self.band_cut_frac == 0.0
            && self.green_atmos_frac == 0.0
            && self.blue_atmos_frac == 0.0
    }

    pub fn validate(&self) -> Result<()> {
        let [lo, hi] = self.percentiles;
        if !(0.0 <= lo && lo < hi && hi <= 100.0) {
            return Err(Error::config(format!(
                "color.percentiles must satisfy 0 <= low < high <= 100, got [{}, {}]",
                lo, hi
            )));
        }
        for (name, v) in [
            ("cut_frac", self.cut_frac),
            ("band_cut_frac", self.band_cut_frac),
            ("green_atmos_frac", self.green_atmos_frac),
            ("blue_atmos_frac", self.blue_atmos_frac),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::config(format!(
                    "color.{} must be within [0, 1], got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

impl Default for CoarseParams {
    fn default() -> Self {
        Self {
            percentiles: [5.0, 95.0],
            cut_frac: 0.75,
            band_cut_frac: 0.5,
            green_atmos_frac: 0.25,
            blue_atmos_frac: 0.5,
        }
    }
}

/// Fine-tuning bundle for one named visual style.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleParams {
    /// Exponent applied to normalized values; below 1 brightens.
    pub gamma: f64,
    /// Sigmoid steepness; 0 disables the sigmoid.
    pub contrast: f64,
    /// Sigmoid midpoint in `[0, 1]`.
    pub bias: f64,
    /// Chroma scale around luminance; 1 leaves colors unchanged.
    pub saturation: f64,
}

impl StyleParams {
    pub const IDENTITY: Self = Self {
        gamma: 1.0,
        contrast: 0.0,
        bias: 0.5,
        saturation: 1.0,
    };

    /// Parameters of a known style, or `None` for names we don't render.
    pub fn lookup(name: &str) -> Option<Self> {
        let params = match name.to_ascii_lowercase().as_str() {
            "base" => Self {
                gamma: 0.9,
                contrast: 3.0,
                bias: 0.4,
                saturation: 1.0,
            },
            "vibrant" => Self {
                gamma: 0.8,
                contrast: 6.0,
                bias: 0.45,
                saturation: 1.35,
            },
            "matte" => Self {
                gamma: 0.95,
                contrast: 0.0,
                bias: 0.5,
                saturation: 0.85,
            },
            "landsat" => Self {
                gamma: 0.75,
                contrast: 0.0,
                bias: 0.5,
                saturation: 1.1,
            },
            _ => return None,
        };
        Some(params)
    }

    fn sigmoid(&self, x: f64) -> f64 {
        if self.contrast <= 0.0 {
            return x;
        }
        let (beta, alpha) = (self.contrast, self.bias);
        let s = |v: f64| 1.0 / (1.0 + (beta * (alpha - v)).exp());
        let (s0, s1) = (s(0.0), s(1.0));
        ((s(x) - s0) / (s1 - s0)).clamp(0.0, 1.0)
    }
}

/// Low/high cut points moved `frac` of the way from min/max to the percentiles.
fn cut_points(stats: &HistogramStats, percentiles: [f64; 2], frac: f64) -> (f64, f64) {
    let p_lo = stats.percentile(percentiles[0]);
    let p_hi = stats.percentile(percentiles[1]);
    (
        stats.min + frac * (p_lo - stats.min),
        stats.max - frac * (stats.max - p_hi),
    )
}

/// Linearly map nonzero values from `[lo, hi]` onto `[out_min, out_max]`.
fn stretch<D: Dimension>(
    mut view: ArrayViewMut<'_, f64, D>,
    (lo, hi): (f64, f64),
    (out_min, out_max): (f64, f64),
) {
    if hi - lo <= f64::EPSILON {
        return;
    }
    let scale = (out_max - out_min) / (hi - lo);
    view.mapv_inplace(|v| {
        if v == 0.0 {
            v
        } else {
            (out_min + (v - lo) * scale).clamp(out_min, out_max)
        }
    });
}

/// Coarse histogram adjustment in place; see the module docs.
pub fn coarse_adjust(img: &mut Array3<f64>, params: &CoarseParams) {
    if params.is_null() {
        return;
    }

    if params.cut_frac > 0.0 {
        let stats = HistogramStats::of_array(img);
        if !stats.is_empty() {
            let cuts = cut_points(&stats, params.percentiles, params.cut_frac);
            debug!(
                "Combined stretch [{:.2}, {:.2}] -> [{:.2}, {:.2}]",
                cuts.0, cuts.1, stats.min, stats.max
            );
            stretch(img.view_mut(), cuts, (stats.min, stats.max));
        }
    }

    if params.band_cut_frac > 0.0 {
        let combined = HistogramStats::of_array(img);
        if !combined.is_empty() {
            for band in img.axis_iter_mut(Axis(0)) {
                let stats = HistogramStats::of_array(&band);
                if stats.is_empty() {
                    continue;
                }
                let cuts = cut_points(&stats, params.percentiles, params.band_cut_frac);
                stretch(band, cuts, (combined.min, combined.max));
            }
        }
    }

    for (idx, frac) in [(1, params.green_atmos_frac), (2, params.blue_atmos_frac)] {
        if frac <= 0.0 || idx >= img.len_of(Axis(0)) {
            continue;
        }
        let mut band = img.index_axis_mut(Axis(0), idx);
        let stats = HistogramStats::of_array(&band);
        if stats.is_empty() {
            continue;
        }
        let shift = frac * stats.percentile(params.percentiles[0]);
        debug!("Atmospheric shift on band {}: {:.3}", idx, shift);
        band.mapv_inplace(|v| {
            if v == 0.0 {
                v
            } else {
                (v - shift).max(f64::MIN_POSITIVE)
            }
        });
    }
}

/// Render the first three bands of `img` as an 8-bit RGB stack with `style`.
/// Pixels that are zero in all three bands stay zero.
pub fn render_rgb(img: &Array3<f64>, style: &StyleParams) -> Result<Array3<u8>> {
    let (bands, rows, cols) = img.dim();
    if bands < 3 {
        return Err(Error::Processing(format!(
            "RGB rendering needs 3 bands, got {}",
            bands
        )));
    }
    let max = img
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);

    let mut out = Array3::<u8>::zeros((3, rows, cols));
    if max <= 0.0 {
        return Ok(out);
    }

    let (r_in, g_in, b_in) = (
        img.index_axis(Axis(0), 0),
        img.index_axis(Axis(0), 1),
        img.index_axis(Axis(0), 2),
    );
    let mut planes = out.axis_iter_mut(Axis(0));
    let (Some(r_out), Some(g_out), Some(b_out)) = (planes.next(), planes.next(), planes.next())
    else {
        return Err(Error::Processing("RGB output allocation failed".into()));
    };

    Zip::from(&r_in)
        .and(&g_in)
        .and(&b_in)
        .and(r_out)
        .and(g_out)
        .and(b_out)
        .for_each(|&r, &g, &b, ro, go, bo| {
            if r == 0.0 && g == 0.0 && b == 0.0 {
                return;
            }
            let tone = |v: f64| {
                let v = (v / max).clamp(0.0, 1.0).powf(style.gamma);
                style.sigmoid(v)
            };
            let (r, g, b) = (tone(r), tone(g), tone(b));
            let lum = 0.299 * r + 0.587 * g + 0.114 * b;
            let sat = |c: f64| {
                if style.saturation == 1.0 {
                    c
                } else {
                    (lum + style.saturation * (c - lum)).clamp(0.0, 1.0)
                }
            };
            *ro = (sat(r) * 255.0).round() as u8;
            *go = (sat(g) * 255.0).round() as u8;
            *bo = (sat(b) * 255.0).round() as u8;
        });
    Ok(out)
}
