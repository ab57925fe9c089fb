use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const RED: usize = 0;
const GREEN: usize = 1;
const NIR: usize = 3;

/// Band-algebra products computed from an R, G, B, NIR stack.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandcoverIndex {
    /// (nir - red) / (nir + red)
    Ndvi,
    /// (green - nir) / (green + nir)
    Ndwi,
}

impl LandcoverIndex {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ndvi" => Some(LandcoverIndex::Ndvi),
            "ndwi" => Some(LandcoverIndex::Ndwi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LandcoverIndex::Ndvi => "ndvi",
            LandcoverIndex::Ndwi => "ndwi",
        }
    }

    /// Compute the index over a canonical-order stack with at least 4 bands.
    pub fn compute(&self, stack: &Array3<f64>) -> Result<Array2<f32>> {
        let bands = stack.len_of(Axis(0));
        if bands <= NIR {
            return Err(Error::Processing(format!(
                "{} needs a near-infrared band; stack has {} bands",
                self, bands
            )));
        }
        let band = |i| stack.index_axis(Axis(0), i);
        Ok(match self {
            LandcoverIndex::Ndvi => normalized_diff(band(NIR), band(RED)),
            LandcoverIndex::Ndwi => normalized_diff(band(GREEN), band(NIR)),
        })
    }
}

impl std::fmt::Display for LandcoverIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized difference: (a - b) / (a + b) with zero handling
pub fn normalized_diff(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Array2<f32> {
    let mut result = Array2::<f32>::zeros(a.dim());
    Zip::from(&a).and(&b).and(&mut result).for_each(|&a_val, &b_val, res| {
        let sum = a_val + b_val;
        *res = if sum.abs() > 1e-10 {
            ((a_val - b_val) / sum) as f32
        } else {
            0.0
        };
    });
    result
}
