//! # Butterfly-access CLI
//!
//! Command-line interface for the butterfly-access library.
//! Computes settlement-to-facility travel-time tables against an
//! OSRM-compatible routing server.

use anyhow::{bail, Context};
use butterfly_access::{geojson, AccessibilityInput, Config, FacilityCategory, RunPlan};
use clap::Parser;
use log::error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

mod cli;

use cli::{check_overwrite_permission, resolve_output, OutputDestination, OverwriteBehavior};

/// Command-line interface for butterfly-access
#[derive(Parser, Debug)]
#[command(name = "butterfly-access")]
#[command(about = "Travel-time accessibility from settlements to facilities over a road network")]
#[command(long_about = "Computes, for every settlement inside a region, the travel time to the
nearest facility of each category and the distance to the nearest road:
  butterfly-access --region admin.geojson --region-name Bahia \\
      --settlements villages.geojson \\
      --poi hospitals=hospitals.geojson --poi banks=banks.geojson
  butterfly-access ... -                     # Write CSV to stdout
  butterfly-access ... --dry-run             # Show the tiling, no routing

File Overwrite Behavior:
  By default, you'll be prompted if destination file exists
  --force                          # Overwrite without asking
  --no-clobber                     # Never overwrite, fail if file exists")]
#[command(version = env!("BUTTERFLY_VERSION"))]
struct Cli {
    /// Region GeoJSON (Polygon or MultiPolygon features)
    #[arg(long)]
    region: PathBuf,

    /// Region feature to use, matched against the `name` property
    #[arg(long)]
    region_name: Option<String>,

    /// Settlements GeoJSON (Point features)
    #[arg(long)]
    settlements: PathBuf,

    /// Facility category as NAME=PATH, repeatable
    #[arg(long = "poi", value_name = "NAME=PATH", value_parser = parse_poi)]
    pois: Vec<(String, PathBuf)>,

    /// Single facility GeoJSON split into categories by --poi-type-field
    #[arg(long, requires = "poi_type_field")]
    poi_file: Option<PathBuf>,

    /// Property holding the facility category in --poi-file
    #[arg(long, requires = "poi_file")]
    poi_type_field: Option<String>,

    /// Output CSV path, or "-" for stdout
    #[arg(default_value = "")]
    output: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Routing server base URL
    #[arg(long)]
    osrm_url: Option<String>,

    /// Routing profile
    #[arg(long)]
    profile: Option<String>,

    /// Tile side length in kilometers
    #[arg(long)]
    tile_size: Option<f64>,

    /// Initial facility search time budget in seconds
    #[arg(long)]
    max_time: Option<f64>,

    /// Speed used to turn search time into distance, km/h
    #[arg(long)]
    max_speed: Option<f64>,

    /// Tiles computed concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Concurrent routing queries
    #[arg(long)]
    engine_pool_size: Option<usize>,

    /// Retries for failed routing queries
    #[arg(long)]
    retries: Option<u32>,

    /// Show the tiling and settlement counts without querying the routing engine
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Force overwrite existing files without prompting
    #[arg(short, long)]
    force: bool,

    /// Never overwrite existing files (fail if destination exists)
    #[arg(long)]
    no_clobber: bool,
}

fn parse_poi(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected NAME=PATH, got '{value}'")),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🦋 Butterfly-access v{} starting...", env!("BUTTERFLY_VERSION"));
    }

    if cli.force && cli.no_clobber {
        bail!("--force and --no-clobber cannot be used together");
    }

    let config = load_config(&cli)?;
    let input = load_input(&cli)?;

    if cli.dry_run {
        let plan = butterfly_access::plan(&input, &config.engine)?;
        print_plan(&plan);
        return Ok(());
    }

    let output = resolve_output(&input.region.name, &cli.output);
    if let OutputDestination::File(path) = &output {
        check_overwrite_permission(path, OverwriteBehavior::from_flags(cli.force, cli.no_clobber))?;
    }

    let progress = cli::ProgressManager::new(&format!(
        "🌐 Computing accessibility for {} via {}",
        input.region.name, config.routing.base_url
    ));
    let (table, report) = butterfly_access::compute(&input, &config, &progress).await?;

    match output {
        OutputDestination::File(path) => {
            let file = File::create(&path).with_context(|| format!("Cannot create {path}"))?;
            table.write_csv(BufWriter::new(file))?;
            eprintln!("📁 Saved to: {path}");
        }
        OutputDestination::Stdout => {
            table.write_csv(std::io::stdout().lock())?;
        }
    }

    eprintln!(
        "⏱️  Calculation time: {} ({} rows, {} tiles)",
        report.elapsed_display(),
        report.rows,
        report.tiles
    );
    Ok(())
}

/// Config file (if any) with CLI flags applied on top
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(url) = &cli.osrm_url {
        config.routing.base_url = url.clone();
    }
    if let Some(profile) = &cli.profile {
        config.routing.profile = profile.clone();
    }
    let engine = &mut config.engine;
    if let Some(v) = cli.tile_size {
        engine.tile_size_km = v;
    }
    if let Some(v) = cli.max_time {
        engine.max_time_secs = v;
    }
    if let Some(v) = cli.max_speed {
        engine.max_speed_kmh = v;
    }
    if let Some(v) = cli.concurrency {
        engine.concurrency = v;
    }
    if let Some(v) = cli.engine_pool_size {
        engine.engine_pool_size = v;
    }
    if let Some(v) = cli.retries {
        engine.max_retries = v;
    }
}

fn load_input(cli: &Cli) -> anyhow::Result<AccessibilityInput> {
    let region = geojson::load_region(&cli.region, cli.region_name.as_deref())
        .with_context(|| format!("Loading region from {}", cli.region.display()))?;
    let settlements = geojson::load_settlements(&cli.settlements)
        .with_context(|| format!("Loading settlements from {}", cli.settlements.display()))?;

    let mut categories: Vec<FacilityCategory> = Vec::new();
    for (name, path) in &cli.pois {
        let category = geojson::load_facilities(name, path)
            .with_context(|| format!("Loading '{name}' facilities from {}", path.display()))?;
        categories.push(category);
    }
    if let (Some(path), Some(field)) = (&cli.poi_file, &cli.poi_type_field) {
        let split = geojson::load_facilities_by_field(path, field)
            .with_context(|| format!("Loading facilities from {}", path.display()))?;
        categories.extend(split);
    }
    if categories.is_empty() {
        log::warn!("No facility categories given; only `nearest` will be computed");
    }

    log::info!(
        "Loaded region '{}', {} settlements, categories: {}",
        region.name,
        settlements.len(),
        categories
            .iter()
            .map(|c| format!("{} ({})", c.name, c.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(AccessibilityInput::new(region, settlements, categories))
}

fn print_plan(plan: &RunPlan) {
    let (columns, rows) = plan.dimensions;
    eprintln!(
        "🔍 [DRY RUN] Region '{}': {} tiles ({columns}x{rows}), {} would query the routing engine",
        plan.region,
        plan.tiles.len(),
        plan.active_tiles()
    );
    eprintln!(
        "🔍 [DRY RUN] {} of {} settlements inside the region",
        plan.settlements_in_region, plan.settlements_total
    );
    for tile in &plan.tiles {
        let status = if tile.empty { "outside region" } else { "" };
        eprintln!(
            "  tile {:>4}  [{:.4}, {:.4}]  {:>6} settlements  {status}",
            tile.index,
            tile.bounds.min().x,
            tile.bounds.min().y,
            tile.settlements
        );
    }
}
