use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use satgrab::api::handler::{GrabOutcome, GrabberHandler, LocalStore};
use satgrab::{
    BoundingBox, CancelToken, GdalToolchain, ImageSpecs, Pipeline, PullReport, RasterToolchain,
    SceneFailure, providers,
};

use super::args::{AreaArgs, CliArgs, Command, PullArgs, PullIdArgs, SearchArgs, SpecArgs};
use super::errors::AppError;

fn init_logging(log: bool, verbose: bool) {
    if !(log || verbose) {
        return;
    }
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `KEY=VALUE` pairs into a spec layer. Values that aren't JSON stay strings.
pub fn parse_overrides(pairs: &[String]) -> Result<Map<String, Value>, AppError> {
    let mut layer = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(AppError::InvalidOverride { pair: pair.clone() });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::InvalidOverride { pair: pair.clone() });
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        layer.insert(key.to_string(), value);
    }
    Ok(layer)
}

pub fn resolve_bbox(area: &AreaArgs) -> Result<BoundingBox, AppError> {
    if let Some(bbox) = &area.bbox {
        return Ok(BoundingBox::parse(bbox)?);
    }
    match (area.lat, area.lon) {
        (Some(lat), Some(lon)) => Ok(BoundingBox::from_scale(lat, lon, area.scale)?),
        (None, _) => Err(AppError::MissingArgument {
            arg: "--bbox or --lat".into(),
        }),
        (_, None) => Err(AppError::MissingArgument { arg: "--lon".into() }),
    }
}

fn load_specs(args: &SpecArgs) -> Result<ImageSpecs, AppError> {
    let overrides = parse_overrides(&args.overrides)?;
    Ok(ImageSpecs::layered(args.specs.as_deref(), &overrides)?)
}

fn toolchain() -> Arc<dyn RasterToolchain> {
    Arc::new(GdalToolchain::new())
}

fn failure_json(failure: &SceneFailure) -> Value {
    json!({
        "provider": failure.provider,
        "ids": failure.ids,
        "error": failure.error.to_string(),
    })
}

/// One entry per scene: the grabbed record, or the failure that replaced it.
pub fn report_json(outcomes: &[GrabOutcome]) -> Result<Value, AppError> {
    let mut entries = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        entries.push(match outcome {
            Ok(scene) => json!({ "ok": serde_json::to_value(scene)? }),
            Err(failure) => json!({ "failed": failure_json(failure) }),
        });
    }
    Ok(Value::Array(entries))
}

fn print_json(value: &Value) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn pull(args: PullArgs, cancel: &CancelToken) -> Result<(), AppError> {
    let bbox = resolve_bbox(&args.area)?;
    let specs = load_specs(&args.specs)?;
    let mut handler = GrabberHandler::from_kinds(
        &args.specs.providers,
        &specs,
        toolchain(),
        &args.specs.staging_dir,
    )?;
    if let Some(dir) = &args.specs.output_dir {
        handler = handler.with_store(Arc::new(LocalStore::new(dir)));
    }

    info!("Pulling {} over {}", providers_label(&args.specs), bbox);
    let outcomes = handler.grab(&bbox, cancel).await?;
    print_json(&report_json(&outcomes)?)?;

    let report = PullReport::of(&outcomes);
    info!("Processed: {}", report.processed);
    info!("Failed: {}", report.failed);
    if report.processed == 0 && report.failed > 0 {
        return Err(AppError::NothingGrabbed {
            failed: report.failed,
        });
    }
    Ok(())
}

async fn pull_id(args: PullIdArgs, cancel: &CancelToken) -> Result<(), AppError> {
    let bbox = resolve_bbox(&args.area)?;
    let specs = load_specs(&args.specs)?;
    let kind = *args.specs.providers.first().ok_or(AppError::MissingArgument {
        arg: "--provider".into(),
    })?;
    if args.specs.providers.len() > 1 {
        warn!("pull-id uses one provider; taking {}", kind);
    }
    let mut pipeline = Pipeline::new(
        providers::build(kind, &specs)?,
        toolchain(),
        &args.specs.staging_dir,
    );
    if let Some(dir) = &args.specs.output_dir {
        pipeline = pipeline.with_output_dir(dir);
    }
    let record = pipeline
        .pull_by_id(&bbox, &args.id, args.extra.as_deref(), cancel)
        .await?;
    info!("Successfully grabbed {}", args.id);
    print_json(&serde_json::to_value(&record)?)
}

async fn search(args: SearchArgs) -> Result<(), AppError> {
    let specs = load_specs(&args.specs)?;
    let mut report = Map::new();
    for &kind in &args.specs.providers {
        let pipeline = Pipeline::new(
            providers::build(kind, &specs)?,
            toolchain(),
            &args.specs.staging_dir,
        );
        let summaries = match (&args.id, &args.area) {
            (Some(id), _) => vec![pipeline.search_id_clean(id, args.extra.as_deref()).await?],
            (None, area) if area.bbox.is_none() && area.lat.is_some() && area.lon.is_some() => {
                let (lat, lon) = (area.lat.unwrap_or_default(), area.lon.unwrap_or_default());
                pipeline.search_latlon_clean(lat, lon, args.max_records).await?
            }
            (None, area) => {
                pipeline
                    .search_clean(&resolve_bbox(area)?, args.max_records)
                    .await?
            }
        };
        info!("{}: {} record(s)", kind, summaries.len());
        report.insert(kind.to_string(), serde_json::to_value(summaries)?);
    }
    print_json(&Value::Object(report))
}

fn providers_label(args: &SpecArgs) -> String {
    args.providers
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn run(args: CliArgs) -> Result<(), AppError> {
    init_logging(args.log, args.verbose);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling in-flight retrievals");
            trigger.cancel();
        }
    });

    match args.command {
        Command::Pull(pull_args) => pull(pull_args, &cancel).await,
        Command::PullId(id_args) => pull_id(id_args, &cancel).await,
        Command::Search(search_args) => search(search_args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use satgrab::ProviderKind;

    #[test]
    fn overrides_parse_json_with_string_fallback() {
        let layer = parse_overrides(&[
            "N_images=3".to_string(),
            "write_styles=[\"matte\"]".to_string(),
            "file_header=run_".to_string(),
        ])
        .unwrap();
        assert_eq!(layer["N_images"], json!(3));
        assert_eq!(layer["write_styles"], json!(["matte"]));
        assert_eq!(layer["file_header"], json!("run_"));
        assert!(parse_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_overrides(&["=1".to_string()]).is_err());
    }

    #[test]
    fn bbox_comes_from_either_form() {
        let explicit = AreaArgs {
            bbox: Some("-122.5,37.7,-122.4,37.8".into()),
            ..Default::default()
        };
        assert_eq!(resolve_bbox(&explicit).unwrap().min_lon(), -122.5);

        let point = AreaArgs {
            lat: Some(37.75),
            lon: Some(-122.45),
            scale: 2.0,
            ..Default::default()
        };
        let (dx, dy) = resolve_bbox(&point).unwrap().side_distances();
        assert!((dx - 2.0).abs() < 1e-6 && (dy - 2.0).abs() < 1e-6);

        let missing = AreaArgs {
            lat: Some(1.0),
            ..Default::default()
        };
        assert!(matches!(
            resolve_bbox(&missing),
            Err(AppError::MissingArgument { .. })
        ));
    }

    #[test]
    fn pull_accepts_repeated_providers_and_overrides() {
        let args = CliArgs::try_parse_from([
            "satgrab",
            "pull",
            "--bbox",
            "-122.5,37.7,-122.4,37.8",
            "--provider",
            "planet",
            "--provider",
            "dg",
            "--set",
            "clouds=5",
            "--log",
        ])
        .unwrap();
        assert!(args.log);
        let Command::Pull(pull) = args.command else {
            panic!("expected pull");
        };
        assert_eq!(
            pull.specs.providers,
            [ProviderKind::Planet, ProviderKind::DigitalGlobe]
        );
        assert_eq!(pull.specs.overrides, ["clouds=5"]);
        assert_eq!(pull.specs.staging_dir, std::path::PathBuf::from("tmp-staging"));
    }

    #[test]
    fn default_provider_is_planet() {
        let args = CliArgs::try_parse_from(["satgrab", "search", "--lat", "1", "--lon", "2"]).unwrap();
        let Command::Search(search) = args.command else {
            panic!("expected search");
        };
        assert_eq!(search.specs.providers, [ProviderKind::Planet]);
        assert_eq!(search.max_records, 10);
    }

    #[test]
    fn bbox_conflicts_with_point() {
        assert!(
            CliArgs::try_parse_from([
                "satgrab", "pull", "--bbox", "0,0,1,1", "--lat", "0.5", "--lon", "0.5"
            ])
            .is_err()
        );
    }

    #[test]
    fn failures_are_reported_with_their_ids() {
        let outcomes: Vec<GrabOutcome> = vec![Err(SceneFailure {
            provider: Some(ProviderKind::Landsat),
            ids: vec!["landsat_1".into()],
            error: satgrab::Error::NoAssets {
                ids: vec!["landsat_1".into()],
            },
        })];
        let report = report_json(&outcomes).unwrap();
        assert_eq!(report[0]["failed"]["provider"], "landsat");
        assert_eq!(report[0]["failed"]["ids"], json!(["landsat_1"]));
    }
}
