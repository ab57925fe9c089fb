//! Raster toolchain adapter: reprojection, crop+reband and merge through the
//! GDAL command-line utilities. Every operation reads a local file and writes
//! a new one next to it; callers own both paths.
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::geometry::BoundingBox;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with status {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{0}")]
    InvalidInput(String),
}

/// Geometric raster operations used by mosaic reconciliation.
pub trait RasterToolchain: Send + Sync {
    /// Warp `src` into `target_crs` (e.g. `EPSG:32633`).
    fn reproject(&self, src: &Path, target_crs: &str) -> Result<PathBuf, ToolchainError>;

    /// Crop to `window` (lon/lat) and keep `bands` (1-based) in the given order.
    fn crop_and_reband(
        &self,
        src: &Path,
        window: &BoundingBox,
        bands: &[u32],
    ) -> Result<PathBuf, ToolchainError>;

    /// Mosaic `srcs` into one raster; later inputs win where they overlap.
    fn merge(&self, srcs: &[PathBuf]) -> Result<PathBuf, ToolchainError>;

    /// Keep `bands` (1-based) in the given order.
    fn reband(&self, src: &Path, bands: &[u32]) -> Result<PathBuf, ToolchainError>;
}

/// Derived path `{dir}/{stem}{suffix}.tif`.
pub fn derived_path(src: &Path, suffix: &str) -> PathBuf {
    let stem = src
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("raster");
    src.with_file_name(format!("{}{}.tif", stem, suffix))
}

fn band_args(bands: &[u32]) -> Vec<String> {
    bands
        .iter()
        .flat_map(|b| ["-b".to_string(), b.to_string()])
        .collect()
}

/// `gdalwarp` / `gdal_translate` invocations.
#[derive(Debug, Clone)]
pub struct GdalToolchain {
    gdalwarp: String,
    gdal_translate: String,
    /// Warp memory and block cache, MB
    cache_mb: u32,
}

impl Default for GdalToolchain {
    fn default() -> Self {
        Self {
            gdalwarp: "gdalwarp".into(),
            gdal_translate: "gdal_translate".into(),
            cache_mb: 1000,
        }
    }
}

impl GdalToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries<S: Into<String>>(gdalwarp: S, gdal_translate: S) -> Self {
        Self {
            gdalwarp: gdalwarp.into(),
            gdal_translate: gdal_translate.into(),
            ..Self::default()
        }
    }

    fn run(&self, program: &str, args: &[String]) -> Result<(), ToolchainError> {
        debug!("{} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ToolchainError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ToolchainError::ExitStatus {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    pub fn reproject_args(src: &Path, dst: &Path, target_crs: &str) -> Vec<String> {
        vec![
            "-overwrite".into(),
            "-t_srs".into(),
            target_crs.into(),
            "-r".into(),
            "bilinear".into(),
            "-co".into(),
            "COMPRESS=LZW".into(),
            src.display().to_string(),
            dst.display().to_string(),
        ]
    }

    pub fn crop_args(src: &Path, dst: &Path, window: &BoundingBox, bands: &[u32]) -> Vec<String> {
        let mut args: Vec<String> = vec!["-projwin_srs".into(), "EPSG:4326".into(), "-projwin".into()];
        args.extend(window.gdal_projwin().iter().map(|v| v.to_string()));
        args.extend(band_args(bands));
        args.extend(["-co".to_string(), "COMPRESS=LZW".to_string()]);
        if bands.len() == 3 {
            args.extend(["-co".to_string(), "PHOTOMETRIC=RGB".to_string()]);
        }
        args.push(src.display().to_string());
        args.push(dst.display().to_string());
        args
    }

    pub fn merge_args(&self, srcs: &[PathBuf], dst: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-overwrite".into(),
            "--config".into(),
            "GDAL_CACHEMAX".into(),
            self.cache_mb.to_string(),
            "-wm".into(),
            self.cache_mb.to_string(),
            "-r".into(),
            "bilinear".into(),
            "-srcnodata".into(),
            "0".into(),
            "-co".into(),
            "COMPRESS=LZW".into(),
        ];
        args.extend(srcs.iter().map(|p| p.display().to_string()));
        args.push(dst.display().to_string());
        args
    }

    pub fn reband_args(src: &Path, dst: &Path, bands: &[u32]) -> Vec<String> {
        let mut args = band_args(bands);
        args.extend(["-co".to_string(), "COMPRESS=LZW".to_string()]);
        args.push(src.display().to_string());
        args.push(dst.display().to_string());
        args
    }
}

impl RasterToolchain for GdalToolchain {
    fn reproject(&self, src: &Path, target_crs: &str) -> Result<PathBuf, ToolchainError> {
        info!("Reprojecting {:?} to {}", src, target_crs);
        let dst = derived_path(src, "-reproj");
        self.run(&self.gdalwarp, &Self::reproject_args(src, &dst, target_crs))?;
        Ok(dst)
    }

    fn crop_and_reband(
        &self,
        src: &Path,
        window: &BoundingBox,
        bands: &[u32],
    ) -> Result<PathBuf, ToolchainError> {
        if bands.is_empty() {
            return Err(ToolchainError::InvalidInput("no bands requested".into()));
        }
        let dst = derived_path(src, &format!("_{}", window.tag()));
        self.run(&self.gdal_translate, &Self::crop_args(src, &dst, window, bands))?;
        Ok(dst)
    }

    fn merge(&self, srcs: &[PathBuf]) -> Result<PathBuf, ToolchainError> {
        let first = srcs
            .first()
            .ok_or_else(|| ToolchainError::InvalidInput("nothing to merge".into()))?;
        info!("Merging {} rasters", srcs.len());
        let dst = derived_path(first, "-merged");
        self.run(&self.gdalwarp, &self.merge_args(srcs, &dst))?;
        Ok(dst)
    }

    fn reband(&self, src: &Path, bands: &[u32]) -> Result<PathBuf, ToolchainError> {
        if bands.is_empty() {
            return Err(ToolchainError::InvalidInput("no bands requested".into()));
        }
        let dst = derived_path(src, "-reband");
        self.run(&self.gdal_translate, &Self::reband_args(src, &dst, bands))?;
        Ok(dst)
    }
}
