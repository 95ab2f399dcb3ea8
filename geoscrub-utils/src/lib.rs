//! Fetch the GeoNames dumps and build a geoscrub index out of them.
//!
//! The updater downloads `allCountries.txt`, `alternateNames.tsv`,
//! `countryInfo.txt` and the postcode dump (unpacking zip archives where
//! needed), remembers the source ETags in the index metadata, and can
//! cheaply tell whether any dump changed since an index was built.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use anyhow::Result;

use geoscrub_core::{Engine, EngineMetadata, SourceFileContentOptions};

#[derive(Clone, Copy)]
pub struct SourceItem<'a> {
    pub url: &'a str,
    /// Member to extract when the url is a zip archive.
    pub filename: Option<&'a str>,
}

pub struct IndexUpdaterSettings<'a> {
    pub http_timeout_ms: u64,
    pub all_countries: SourceItem<'a>,
    pub country_info: SourceItem<'a>,
    pub alternate_names: Option<SourceItem<'a>>,
    pub postcodes: Option<SourceItem<'a>>,
    pub filter_languages: Vec<&'a str>,
}

impl Default for IndexUpdaterSettings<'_> {
    fn default() -> Self {
        IndexUpdaterSettings {
            http_timeout_ms: 300_000,
            all_countries: SourceItem {
                url: "http://download.geonames.org/export/dump/allCountries.zip",
                filename: Some("allCountries.txt"),
            },
            country_info: SourceItem {
                url: "http://download.geonames.org/export/dump/countryInfo.txt",
                filename: None,
            },
            alternate_names: Some(SourceItem {
                url: "http://download.geonames.org/export/dump/alternateNamesV2.zip",
                filename: Some("alternateNamesV2.txt"),
            }),
            postcodes: Some(SourceItem {
                url: "http://download.geonames.org/export/zip/allCountries.zip",
                filename: Some("allCountries.txt"),
            }),
            filter_languages: Vec::new(),
        }
    }
}

pub struct IndexUpdater<'a> {
    http_client: reqwest::Client,
    settings: IndexUpdaterSettings<'a>,
}

impl<'a> IndexUpdater<'a> {
    pub fn new(settings: IndexUpdaterSettings<'a>) -> Result<Self> {
        Ok(IndexUpdater {
            http_client: reqwest::ClientBuilder::new()
                .timeout(std::time::Duration::from_millis(settings.http_timeout_ms))
                .build()?,
            settings,
        })
    }

    fn sources(&self) -> Vec<(&'static str, SourceItem<'a>)> {
        let mut sources = vec![
            ("all_countries", self.settings.all_countries),
            ("country_info", self.settings.country_info),
        ];
        if let Some(item) = self.settings.alternate_names {
            sources.push(("alternate_names", item));
        }
        if let Some(item) = self.settings.postcodes {
            sources.push(("postcodes", item));
        }
        sources
    }

    /// Whether any source dump changed since the index was built.
    pub async fn has_updates(&self, metadata: &EngineMetadata) -> Result<bool> {
        tracing::info!("Check updates");
        if metadata.source_etag.is_empty() {
            tracing::info!("Index has no source ETags");
            return Ok(true);
        }

        let sources = self.sources();
        let requests = sources.iter().map(|(_, item)| self.get_etag(item.url));
        let responses = futures::future::join_all(requests).await;

        for ((entry, _), etag) in sources.iter().zip(responses) {
            let current_etag = metadata
                .source_etag
                .get(*entry)
                .map(AsRef::as_ref)
                .unwrap_or("");
            if current_etag != etag? {
                tracing::info!("New version of {entry}");
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub async fn get_etag(&self, url: &str) -> Result<String> {
        tracing::info!("Try HEAD {url}");
        let response = self.http_client.head(url).send().await?;

        Ok(response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_default())
    }

    pub async fn fetch(&self, item: SourceItem<'a>) -> Result<(String, Vec<u8>)> {
        tracing::info!("Try GET {}", item.url);
        let response = self.http_client.get(item.url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("GET {} return status {}", item.url, response.status())
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_default();

        let content = response.bytes().await?.to_vec();
        tracing::info!("Downloaded {} size: {}", item.url, content.len());

        let content = if let Some(filename) = item.filename {
            tracing::info!("Unzip {filename}");
            let cursor = Cursor::new(content);
            let mut archive = zip::read::ZipArchive::new(cursor)?;
            let file = archive
                .by_name(filename)
                .map_err(|e| anyhow::anyhow!("On get file {filename} from archive: {e}"))?;
            file.bytes().collect::<std::io::Result<Vec<_>>>()?
        } else {
            content
        };

        Ok((etag, content))
    }

    /// Download everything and build a fresh engine.
    pub async fn build(self) -> Result<Engine> {
        let sources = self.sources();
        let requests = sources.iter().map(|(_, item)| self.fetch(*item));
        let responses = futures::future::join_all(requests).await;

        let mut results: HashMap<&str, (String, Vec<u8>)> = HashMap::new();
        for ((entry, _), response) in sources.iter().zip(responses) {
            let (etag, content) =
                response.map_err(|e| anyhow::anyhow!("On fetch {entry}: {e}"))?;
            results.insert(entry, (etag, content));
        }

        let source_etag: HashMap<String, String> = results
            .iter()
            .map(|(entry, (etag, _))| ((*entry).to_string(), etag.clone()))
            .collect();

        tracing::info!("Try to build index...");

        let into_string = |content: Vec<u8>| -> Result<String> {
            String::from_utf8(content).map_err(|e| anyhow::anyhow!("Invalid utf-8: {e}"))
        };

        Engine::new_from_files_content(
            SourceFileContentOptions {
                all_countries: into_string(
                    results
                        .remove("all_countries")
                        .ok_or_else(|| anyhow::anyhow!("allCountries file required"))?
                        .1,
                )?,
                country_info: into_string(
                    results
                        .remove("country_info")
                        .ok_or_else(|| anyhow::anyhow!("countryInfo file required"))?
                        .1,
                )?,
                alternate_names: match results.remove("alternate_names") {
                    Some((_, content)) => Some(into_string(content)?),
                    None => None,
                },
                postcodes: match results.remove("postcodes") {
                    Some((_, content)) => Some(into_string(content)?),
                    None => None,
                },
                filter_languages: self.settings.filter_languages,
            },
            source_etag,
        )
        .map_err(|e| anyhow::anyhow!("Failed to build index: {e}"))
    }
}
