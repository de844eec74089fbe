use anyhow::{anyhow, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info};
use std::path::PathBuf;

use layerbom::notifier::VerbosityLevel;
use layerbom::{Notifier, Pipeline, PipelineConfig, RegistrySource, SbomFormat, SbomScope};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(help = "Images to pull (e.g., nginx:1.24.0-alpine3.17); defaults to the configured list")]
    images: Vec<String>,

    #[arg(short, long, help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Content-addressed layer cache directory")]
    cache_dir: Option<PathBuf>,

    #[arg(long, help = "OCI image layout directory shared by all images")]
    images_dir: Option<PathBuf>,

    #[arg(long, help = "Directory for the per-tag SBOM documents")]
    sboms_dir: Option<PathBuf>,

    #[arg(short, long, help = "Platform to select from multi-arch images (os/arch[/variant])")]
    platform: Option<String>,

    #[arg(short, long, value_enum, help = "SBOM output format")]
    format: Option<SbomFormat>,

    #[arg(short, long, value_enum, help = "What each SBOM covers")]
    scope: Option<SbomScope>,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if !self.images.is_empty() {
            config.images = self.images;
        }
        if let Some(dir) = self.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(dir) = self.images_dir {
            config.images_dir = dir;
        }
        if let Some(dir) = self.sboms_dir {
            config.sboms_dir = dir;
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(scope) = self.scope {
            config.scope = scope;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    env_logger::Builder::from_env(Env::default())
        .filter_level(VerbosityLevel::from(verbose).to_log_level())
        .init();

    let config = cli.into_config()?;

    info!("Starting layerbom with {} images", config.images.len());
    debug!("Cache directory: {}", config.cache_dir.display());
    debug!("Images directory: {}", config.images_dir.display());
    debug!("SBOM directory: {}", config.sboms_dir.display());
    debug!("Platform: {}, format: {}", config.platform, config.format);

    let source = RegistrySource::new(config.platform()?, config.insecure_registries.clone())
        .map_err(|e| anyhow!("Failed to initialize registry client: {}", e))?;

    let mut pipeline = Pipeline::new(source, &config, Notifier::new(verbose))?;
    let report = pipeline.run(&config.images)?;

    let failed: Vec<&str> = report.failures().map(|(key, _)| key).collect();
    if !failed.is_empty() {
        return Err(anyhow!(
            "SBOM generation failed for {} of {} images: {}",
            failed.len(),
            report.sboms.len(),
            failed.join(", ")
        ));
    }

    info!("Wrote {} SBOMs", report.written().count());
    Ok(())
}
