use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geoscrub_core::storage::{IndexStorage, Storage};
use geoscrub_core::{Engine, SourceFileOptions};
use geoscrub_utils::{IndexUpdater, IndexUpdaterSettings, SourceItem};

use clap::Parser;

/// Build a geoscrub index from files or urls
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
enum Args {
    FromUrls(Urls),
    FromFiles(Files),
}

/// Build index from local GeoNames dumps
#[derive(clap::Args, Debug)]
#[command(version, about)]
struct Files {
    /// allCountries.txt
    #[arg(short, long)]
    all_countries: String,

    /// countryInfo.txt
    #[arg(short, long)]
    country_info: String,

    /// alternateNames.tsv
    #[arg(short = 'n', long)]
    alternate_names: Option<String>,

    /// allCountriesPostcodes.txt
    #[arg(short, long)]
    postcodes: Option<String>,

    /// Comma separated isolanguage codes to keep
    #[arg(short, long)]
    languages: Option<String>,

    /// Dump index to file
    #[arg(short, long)]
    output: String,
}

/// Build index from the geonames.org download server
#[derive(clap::Args, Debug)]
#[command(version, about)]
struct Urls {
    /// allCountries archive url
    #[arg(long)]
    all_countries_url: Option<String>,

    /// countryInfo.txt url
    #[arg(long)]
    country_info_url: Option<String>,

    /// alternateNames archive url
    #[arg(long)]
    alternate_names_url: Option<String>,

    /// postcodes archive url
    #[arg(long)]
    postcodes_url: Option<String>,

    /// Comma separated isolanguage codes to keep
    #[arg(short, long)]
    languages: Option<String>,

    /// Dump index to file
    #[arg(short, long)]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer());
    subscriber.init();

    let storage = Storage::new();

    match Args::parse() {
        Args::FromUrls(args) => {
            let mut settings = IndexUpdaterSettings::default();

            if let Some(url) = &args.all_countries_url {
                settings.all_countries = SourceItem {
                    url,
                    filename: Some("allCountries.txt"),
                };
            }
            if let Some(url) = &args.country_info_url {
                settings.country_info = SourceItem {
                    url,
                    filename: None,
                };
            }
            if let Some(url) = &args.alternate_names_url {
                settings.alternate_names = Some(SourceItem {
                    url,
                    filename: Some("alternateNamesV2.txt"),
                });
            }
            if let Some(url) = &args.postcodes_url {
                settings.postcodes = Some(SourceItem {
                    url,
                    filename: Some("allCountries.txt"),
                });
            }
            if let Some(languages) = &args.languages {
                settings.filter_languages = languages.split(',').collect();
            }

            let engine = IndexUpdater::new(settings)?.build().await?;
            storage
                .dump_to(&args.output, &engine)
                .map_err(|e| anyhow::anyhow!("On dump index to {}: {e}", args.output))?;
        }

        Args::FromFiles(args) => {
            let engine = Engine::new_from_files(
                SourceFileOptions {
                    all_countries: args.all_countries,
                    country_info: args.country_info,
                    alternate_names: args.alternate_names,
                    postcodes: args.postcodes,
                    filter_languages: if let Some(languages) = &args.languages {
                        languages.split(',').collect()
                    } else {
                        Vec::new()
                    },
                },
                Default::default(),
            )
            .map_err(|e| anyhow::anyhow!("Failed to build index: {e}"))?;

            storage
                .dump_to(&args.output, &engine)
                .map_err(|e| anyhow::anyhow!("On dump index to {}: {e}", args.output))?;
        }
    };

    Ok(())
}
