use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use tilemosaic::config::MosaicConfig;
use tilemosaic::{
    ArcGisService, FetchOrchestrator, GdalTools, RetrievalPlan, RetryingService, TileService,
    TileWorkspace, execute_plan, plan_retrieval,
};

use crate::cli::{FetchConfig, PlanConfig};
use crate::progress::{apply_report, tile_progress_bar};

pub fn run_fetch(args: FetchConfig) -> Result<()> {
    let config = MosaicConfig::load(args.config.as_deref(), args.settings)?;
    print_request(&config);

    let service = RetryingService::new(
        ArcGisService::connect(config.url(), config.service_options())?,
        config.retries(),
    );
    let workspace = TileWorkspace::prepare(Some(args.output.clone()))
        .with_context(|| format!("Failed to prepare output directory {}", args.output.display()))?;
    println!(
        "  {} Tile directory: {}",
        "◎".blue(),
        workspace.root().display()
    );

    let description = service.describe()?;
    let plan = plan_retrieval(&config.request(), &description)?;
    print_plan(&plan);
    if plan.tiles.is_empty() {
        println!(
            "  {} No tiles overlap the requested area",
            "⚠".yellow().bold()
        );
        return Ok(());
    }

    let pb = tile_progress_bar(plan.tiles.len(), "Retrieving tiles");
    let orchestrator = FetchOrchestrator::new(&workspace)
        .workers(config.threads())
        .on_progress(|report| apply_report(&pb, report));
    let output = execute_plan(&plan, &service, &GdalTools::default(), &orchestrator);
    match &output {
        Ok(_) => pb.finish_with_message("tiles ready"),
        Err(_) => pb.abandon(),
    }
    let output = output.context("Tile retrieval failed")?;

    println!(
        "{} Retrieved {} tile{} at level {} ({} per pixel)",
        "✔".green().bold(),
        output.tile_count,
        if output.tile_count == 1 { "" } else { "s" },
        output.level.id,
        output.level.resolution
    );
    println!(
        "{} Mosaic written: {}",
        "✔".green().bold(),
        output.mosaic.display()
    );
    Ok(())
}

pub fn run_plan(args: PlanConfig) -> Result<()> {
    let config = MosaicConfig::load(args.config.as_deref(), args.settings)?;
    print_request(&config);
    let service = ArcGisService::connect(config.url(), config.service_options())?;
    let description = service.describe()?;
    println!(
        "  {} Service CRS: {}, {} level{}",
        "◎".blue(),
        description.projection,
        description.pyramid.levels().len(),
        if description.pyramid.levels().len() == 1 { "" } else { "s" }
    );
    let plan = plan_retrieval(&config.request(), &description)?;
    print_plan(&plan);
    Ok(())
}

fn print_request(config: &MosaicConfig) {
    let bbox = config.bbox();
    println!(
        "{} Service: {}",
        "ℹ".blue().bold(),
        config.url()
    );
    println!(
        "  {} Area ({}): X:[{:.6}..{:.6}] Y:[{:.6}..{:.6}]",
        "◎".blue(),
        config.bbox_crs(),
        bbox.min().x,
        bbox.max().x,
        bbox.min().y,
        bbox.max().y
    );
    println!(
        "  {} Requested resolution: {}",
        "◎".blue(),
        config.resolution()
    );
}

fn print_plan(plan: &RetrievalPlan) {
    println!(
        "{} Using level {} ({} per pixel)",
        "ℹ".blue().bold(),
        plan.level.id,
        plan.level.resolution
    );
    println!(
        "  {} Area ({}): X:[{:.3}..{:.3}] Y:[{:.3}..{:.3}]",
        "◎".blue(),
        plan.projection,
        plan.envelope.min().x,
        plan.envelope.max().x,
        plan.envelope.min().y,
        plan.envelope.max().y
    );
    let skipped = plan.candidate_count - plan.tiles.len();
    println!(
        "  {} {} tile{} to retrieve ({} outside the area skipped)",
        "◎".blue(),
        plan.tiles.len(),
        if plan.tiles.len() == 1 { "" } else { "s" },
        skipped
    );
}
