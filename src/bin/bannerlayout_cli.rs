//! BannerLayout CLI - Bridge interface for the banner service
//!
//! Commands: extract, resolve, fix-cta, crop
//! Outputs JSON to stdout, logs to stderr
//! Exit code 1 on bad input, 2 on pipeline failure

use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bannerlayout_core::{
    bbox::{crop_file, crop_to_content, CropError},
    config::PipelineConfig,
    extract::Extractor,
    fix_cta, init_tracing, normalize_value,
    repair::ChatRepairer,
    BannerPipeline, PipelineError,
};

#[derive(Parser)]
#[command(name = "bannerlayout-cli")]
#[command(about = "BannerLayout CLI - resolve model-generated banner layouts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline config (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover a normalized scene from raw model output
    Extract {
        /// Raw model output file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Extract, measure, and CTA-fix raw model output
    Resolve {
        /// Raw model output file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Re-center the CTA label on its shape in a scene
    FixCta {
        /// Scene JSON file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        scene: PathBuf,
    },

    /// Crop an image to its foreground
    Crop {
        /// Source image
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the crop; inline base64 PNG when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overrides the configured padding
        #[arg(short, long)]
        padding: Option<u32>,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match PipelineConfig::load_from_path(path) {
            Ok(c) => c,
            Err(e) => return fail(ExitCode::FAILURE, format!("Failed to load config: {}", e)),
        },
        None => PipelineConfig::default(),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => return fail(ExitCode::FAILURE, format!("Failed to start runtime: {}", e)),
    };

    match cli.command {
        Commands::Extract { input } => runtime.block_on(extract(&config, &input)),
        Commands::Resolve { input } => runtime.block_on(resolve(&config, &input)),
        Commands::FixCta { scene } => fix(&scene),
        Commands::Crop { input, output, padding } => {
            crop(&input, output.as_deref(), padding.unwrap_or(config.crop_padding))
        }
    }
}

async fn extract(config: &PipelineConfig, input: &Path) -> ExitCode {
    let raw = match read_input(input) {
        Ok(r) => r,
        Err(e) => return fail(ExitCode::FAILURE, format!("Failed to read input: {}", e)),
    };
    let repairer = match config.repair.clone().map(ChatRepairer::new).transpose() {
        Ok(r) => r,
        Err(e) => return fail(ExitCode::FAILURE, e.to_string()),
    };

    match Extractor::new(repairer).extract(&raw).await {
        Some(extraction) => emit(&json!({
            "success": true,
            "tier": extraction.tier,
            "scene": extraction.scene,
            "notes": extraction.report.notes,
        })),
        None => fail(ExitCode::from(2), "No scene could be extracted".to_string()),
    }
}

async fn resolve(config: &PipelineConfig, input: &Path) -> ExitCode {
    let raw = match read_input(input) {
        Ok(r) => r,
        Err(e) => return fail(ExitCode::FAILURE, format!("Failed to read input: {}", e)),
    };
    let pipeline = match BannerPipeline::from_config(config) {
        Ok(p) => p,
        Err(e) => return fail(ExitCode::FAILURE, e.to_string()),
    };

    match pipeline.resolve(&raw).await {
        Ok(banner) => emit(&json!({
            "success": true,
            "scene": banner.scene,
            "manifest": banner.manifest,
        })),
        Err(e @ PipelineError::ExtractionFailed(_)) => fail(ExitCode::from(2), e.to_string()),
        Err(e) => fail(ExitCode::FAILURE, e.to_string()),
    }
}

fn fix(path: &Path) -> ExitCode {
    let scene = read_input(path)
        .map_err(|e| format!("Failed to read scene: {}", e))
        .and_then(|text| serde_json::from_str(&text).map_err(|e| format!("Invalid JSON: {}", e)))
        .and_then(|value| normalize_value(value).map_err(|e| e.to_string()));

    match scene {
        Ok((mut scene, report)) => {
            let cta = fix_cta(&mut scene);
            emit(&json!({
                "success": true,
                "cta": cta,
                "scene": scene,
                "notes": report.notes,
            }))
        }
        Err(e) => fail(ExitCode::FAILURE, e),
    }
}

fn crop(input: &Path, output: Option<&Path>, padding: u32) -> ExitCode {
    if let Some(output) = output {
        return match crop_file(input, output, padding) {
            Ok(bounds) => emit(&json!({"success": true, "bounds": bounds, "output": output})),
            Err(e @ CropError::NoContent(..)) => fail(ExitCode::from(2), e.to_string()),
            Err(e) => fail(ExitCode::FAILURE, e.to_string()),
        };
    }

    let img = match image::open(input) {
        Ok(img) => img,
        Err(e) => return fail(ExitCode::FAILURE, format!("Failed to read image: {}", e)),
    };
    let (cropped, bounds) = match crop_to_content(&img, padding) {
        Ok(r) => r,
        Err(e) => return fail(ExitCode::from(2), e.to_string()),
    };

    let mut png = Vec::new();
    if let Err(e) = cropped.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png) {
        return fail(ExitCode::from(2), format!("Failed to encode crop: {}", e));
    }
    emit(&json!({
        "success": true,
        "bounds": bounds,
        "format": "png",
        "data_base64": base64::engine::general_purpose::STANDARD.encode(&png),
    }))
}

fn read_input(path: &Path) -> std::io::Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path)
    }
}

fn emit(value: &impl Serialize) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn fail(code: ExitCode, error: String) -> ExitCode {
    tracing::error!(%error, "command failed");
    println!("{}", json!({"success": false, "error": error}));
    code
}
