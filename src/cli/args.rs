use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use satgrab::{DEFAULT_STAGING_DIR, ProviderKind};

#[derive(Parser, Debug)]
#[command(name = "satgrab", version, about = "Satellite imagery acquisition CLI")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable logging (to stderr; RUST_LOG is honored)
    #[arg(long, global = true, default_value_t = false)]
    pub log: bool,

    /// Debug-level logging; implies --log
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search, compile and grab the best scenes over an area
    Pull(PullArgs),
    /// Grab one catalog record by identifier
    PullId(PullIdArgs),
    /// Print cleaned catalog records without downloading
    Search(SearchArgs),
}

/// Where to look. Either --bbox, or --lat/--lon with an optional --scale.
#[derive(Args, Debug, Clone, Default)]
pub struct AreaArgs {
    /// Bounding box as minlon,minlat,maxlon,maxlat
    #[arg(long, allow_hyphen_values = true, conflicts_with_all = ["lat", "lon"])]
    pub bbox: Option<String>,

    /// Latitude of the area's center
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude of the area's center
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Side of the square area around --lat/--lon, km
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SpecArgs {
    /// Catalog provider (repeatable)
    #[arg(short, long = "provider", value_enum, default_values_t = [ProviderKind::Planet])]
    pub providers: Vec<ProviderKind>,

    /// JSON image specs file, layered over the defaults
    #[arg(long)]
    pub specs: Option<PathBuf>,

    /// Override one spec key; the value is parsed as JSON, else kept as a string (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Directory for downloads and intermediate rasters
    #[arg(long, default_value = DEFAULT_STAGING_DIR)]
    pub staging_dir: PathBuf,

    /// Copy finished products here and remove them from staging
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[command(flatten)]
    pub area: AreaArgs,

    #[command(flatten)]
    pub specs: SpecArgs,
}

#[derive(Args, Debug)]
pub struct PullIdArgs {
    /// Catalog identifier
    #[arg(long)]
    pub id: String,

    /// Provider-specific disambiguation (e.g. Planet item type)
    #[arg(long)]
    pub extra: Option<String>,

    #[command(flatten)]
    pub area: AreaArgs,

    #[command(flatten)]
    pub specs: SpecArgs,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Look up a single identifier instead of searching an area
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long, requires = "id")]
    pub extra: Option<String>,

    /// Maximum records printed per provider
    #[arg(long, default_value_t = 10)]
    pub max_records: usize,

    #[command(flatten)]
    pub area: AreaArgs,

    #[command(flatten)]
    pub specs: SpecArgs,
}
