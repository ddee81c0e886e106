use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use licsync::{
    config::Config,
    geocode::{ExactMatchGeocoder, ReferenceLocatorBuilder},
    pipeline::{filter_only, Pipeline, Source},
    store::{ParquetLayer, TargetStore},
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "licsync")]
#[command(about = "Filter, geocode and publish the weekly liquor-license export", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML config file; built-in defaults when omitted
    #[arg(short, long, global = true, env = "LICSYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline and replace the layer
    Run {
        /// Local CSV export
        #[arg(short, long, conflicts_with = "url")]
        input: Option<PathBuf>,

        /// Zip archive URL (overrides source.url)
        #[arg(short, long)]
        url: Option<String>,

        /// Leave intermediate files in the work directory
        #[arg(long)]
        keep_intermediates: bool,
    },

    /// Filter an export to the jurisdiction only
    Filter {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rebuild the address locator from the reference data
    BuildLocator,

    /// Print the effective configuration as YAML
    ShowConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).with_context(|| format!("loading config {}", p.display())),
        None => {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            input,
            url,
            keep_intermediates,
        } => {
            config.keep_intermediates |= keep_intermediates;
            let source = Source::resolve(input, url, &config)?;
            info!(?source, layer = %config.layer, "startup");

            let store = ParquetLayer::new(config.layer_path(), config.mapping_table()?);
            let pipeline =
                Pipeline::new(&config, &ReferenceLocatorBuilder, &ExactMatchGeocoder, &store);
            match pipeline.run(&source) {
                Ok(summary) => {
                    info!(
                        published = summary.published,
                        unmatched = summary.unmatched,
                        report = %summary.report.display(),
                        layer_rows = store.row_count()?,
                        "all done"
                    );
                }
                Err(e) => {
                    error!("{:#}", e);
                    return Err(e);
                }
            }
        }
        Commands::Filter { input, output } => {
            let kept = filter_only(&config, &input, &output)?;
            info!(kept, output = %output.display(), "filtered export");
        }
        Commands::BuildLocator => {
            let store = ParquetLayer::new(config.layer_path(), config.mapping_table()?);
            let path = Pipeline::new(&config, &ReferenceLocatorBuilder, &ExactMatchGeocoder, &store)
                .build_locator()?;
            info!(path = %path.display(), "locator ready");
        }
        Commands::ShowConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }
    Ok(())
}
