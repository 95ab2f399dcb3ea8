//! Fuzzy (city, state, country) resolution against the GeoNames gazetteer.
//!
//! The [`Engine`] holds an immutable index built offline from the GeoNames
//! dumps and answers name-resolution queries: map a noisy CSC triple to the
//! administrative entity the user most plausibly meant, with a confidence
//! score and per-field status codes describing what had to change.
//!
//! ```no_run
//! use geoscrub_core::{Engine, ScrubOptions, SourceFileOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new_from_files(
//!     SourceFileOptions {
//!         all_countries: "allCountries.txt",
//!         country_info: "countryInfo.txt",
//!         alternate_names: Some("alternateNames.tsv"),
//!         postcodes: None,
//!         filter_languages: vec![],
//!     },
//!     Default::default(),
//! )?;
//!
//! let outcome = engine.csc_scrub(Some("Sydney"), Some("NSW"), Some("AU"), &ScrubOptions::default());
//! assert_eq!(outcome.result.unwrap().name, "Sydney");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use thiserror::Error;

pub mod expand;
pub mod index;
pub mod normalize;
mod scrub;
pub mod storage;

pub use index::{
    haversine_km, Collection, CountryRecord, CountryTable, Gid, IndexData, NameKey, PlaceRecord,
    PostcodeRecord, PostcodeTable, Scope, SourceFileContentOptions, SourceFileOptions,
};
pub use normalize::normalize;
pub use scrub::{
    FieldStatus, ScScrubOutcome, ScrubOptions, ScrubOutcome, StateLevel, StateMatch,
};

use normalize::clean_nonalpha;

/// Fatal problems. User-input issues never raise; only the index itself
/// being unavailable or inconsistent does.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index missing or unreadable: {0}")]
    IndexMissing(String),
    #[error("index integrity violation: {0}")]
    Integrity(String),
}

/// Which place collection an operation goes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoKind {
    Admin1,
    Admin2,
    Admd,
    City,
}

/// Written at build completion; an index without a build stamp is refused
/// at load time.
#[derive(
    Debug, Clone, Default, serde::Serialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
pub struct EngineMetadata {
    /// Unix seconds at build completion. Zero means unstamped.
    pub built_at: u64,
    /// ETags of the source dumps this index was built from.
    pub source_etag: HashMap<String, String>,
}

/// The resolver: an immutable gazetteer index plus its build metadata.
/// Queries are pure reads, so one `Engine` can be shared across threads.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Engine {
    pub data: IndexData,
    pub metadata: EngineMetadata,
}

impl Engine {
    pub fn new(data: IndexData, source_etag: HashMap<String, String>) -> Self {
        Engine {
            data,
            metadata: EngineMetadata {
                built_at: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(1),
                source_etag,
            },
        }
    }

    pub fn new_from_files<P: AsRef<std::path::Path>>(
        options: SourceFileOptions<P>,
        source_etag: HashMap<String, String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::new(IndexData::new_from_files(options)?, source_etag))
    }

    pub fn new_from_files_content(
        options: SourceFileContentOptions,
        source_etag: HashMap<String, String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::new(
            IndexData::new_from_files_content(options)?,
            source_etag,
        ))
    }

    /// Load a previously dumped index, refusing to start without a build
    /// stamp.
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, EngineError> {
        use storage::IndexStorage;

        let engine = storage::Storage::new().load_from(&path).map_err(|e| {
            EngineError::IndexMissing(format!("{}: {e}", path.as_ref().display()))
        })?;
        if engine.metadata.built_at == 0 {
            return Err(EngineError::IndexMissing(format!(
                "{}: no build stamp",
                path.as_ref().display()
            )));
        }
        Ok(engine)
    }

    fn collection(&self, kind: GeoKind) -> &Collection {
        match kind {
            GeoKind::Admin1 => &self.data.admin1,
            GeoKind::Admin2 => &self.data.admin2,
            GeoKind::Admd => &self.data.admind,
            GeoKind::City => &self.data.cities,
        }
    }

    /// Country info for any country token (ISO2, ISO3, name, alias).
    pub fn country_info(&self, token: &str) -> Option<&CountryRecord> {
        self.resolve_country(token)
    }

    /// Canonical name of an admin entity or city within a country.
    ///
    /// With `lang` the token is matched only against that language's names;
    /// otherwise against all names, then abbreviations.
    pub fn norm(
        &self,
        kind: GeoKind,
        country_code: &str,
        value: &str,
        lang: Option<&str>,
    ) -> Option<&str> {
        let key = normalize(clean_nonalpha(value));
        if key.is_empty() {
            return None;
        }
        let collection = self.collection(kind);
        let scope = Scope::country(country_code);

        if let Some(lang) = lang {
            return collection
                .find(NameKey::Lang { lang, name: &key }, scope)
                .first()
                .map(|r| r.name.as_str());
        }

        collection
            .find(NameKey::Name(&key), scope)
            .first()
            .map(|r| r.name.as_str())
            .or_else(|| {
                collection
                    .find(NameKey::Abbr(&key), scope)
                    .first()
                    .map(|r| r.name.as_str())
            })
    }

    /// Canonical country name for any country token.
    pub fn norm_country(&self, token: &str) -> Option<&str> {
        self.resolve_country(token).map(|c| c.name.as_str())
    }

    /// All cities matching a name, ordered by population.
    pub fn find_cities(&self, name: &str) -> Vec<&PlaceRecord> {
        let key = normalize(clean_nonalpha(name));
        if key.is_empty() {
            return Vec::new();
        }
        self.data.cities.find(NameKey::Name(&key), Scope::default())
    }

    /// All admin entities matching a state name, ordered by population.
    pub fn find_states(&self, name: &str, country: Option<&str>) -> Vec<&PlaceRecord> {
        let key = normalize(clean_nonalpha(name));
        if key.is_empty() {
            return Vec::new();
        }
        let iso: Option<String> = country
            .and_then(|c| self.resolve_country(c))
            .map(|c| c.iso.clone());
        let scope = Scope {
            country: iso.as_deref(),
            admin1: None,
        };

        let mut out: Vec<&PlaceRecord> = Vec::new();
        for collection in [&self.data.admin1, &self.data.admin2, &self.data.admind] {
            out.extend(collection.find(NameKey::Name(&key), scope));
            out.extend(collection.find(NameKey::Abbr(&key), scope));
        }
        out.sort_by_key(|r| (std::cmp::Reverse(r.population), r.gid));
        out.dedup_by_key(|r| r.gid);
        out
    }

    /// Expand an abbreviation to the canonical name within a country.
    pub fn expand_abbr(&self, kind: GeoKind, country_code: &str, abbr: &str) -> Option<&str> {
        let key = normalize(clean_nonalpha(abbr));
        if key.is_empty() {
            return None;
        }
        self.collection(kind)
            .find(NameKey::Abbr(&key), Scope::country(country_code))
            .first()
            .map(|r| r.name.as_str())
    }

    /// Expand a country abbreviation (e.g. `RUS`) to the canonical name.
    pub fn expand_country(&self, abbr: &str) -> Option<&str> {
        let key = normalize(clean_nonalpha(abbr));
        self.data
            .countries
            .find_abbr(&key)
            .first()
            .map(|c| c.name.as_str())
    }

    pub fn is_country(&self, token: &str) -> bool {
        self.resolve_country(token).is_some()
    }

    pub fn is_state(&self, state: &str, country: Option<&str>) -> bool {
        let iso: Option<String> = country
            .and_then(|c| self.resolve_country(c))
            .map(|c| c.iso.clone());
        self.resolve_state(state, iso.as_deref()).is_some()
    }

    /// Whether the name resolves as a city of the country, including via
    /// the postcode place names.
    pub fn is_city(&self, country_code: &str, name: &str) -> bool {
        self.resolve_city(name, Some(country_code), None).is_some()
            || self.is_postal_place(country_code, name)
    }

    pub fn is_postal_place(&self, country_code: &str, place: &str) -> bool {
        self.postcode_place(country_code, place).is_some()
    }

    /// Canonical place name from the postcode collection.
    pub fn postcode_place(&self, country_code: &str, place: &str) -> Option<&str> {
        let key = normalize(clean_nonalpha(place));
        if key.is_empty() {
            return None;
        }
        self.data
            .postcodes
            .find(&key, Some(country_code))
            .first()
            .map(|r| r.place_name.as_str())
    }

    /// Parent first-order division of a place.
    pub fn state_of(&self, place: &PlaceRecord) -> Option<&PlaceRecord> {
        let admin1 = place.admin1.as_deref()?;
        self.data.admin1.iter().find(|r| {
            r.country_code == place.country_code && r.admin1.as_deref() == Some(admin1)
        })
    }

    /// Capital city of a country.
    pub fn capital(&self, country_code: &str) -> Option<&PlaceRecord> {
        let country = self.resolve_country(country_code)?;
        self.data.cities.get(country.capital?)
    }

    /// Any record by its GeoNames id.
    pub fn get(&self, gid: Gid) -> Option<&PlaceRecord> {
        self.data
            .cities
            .get(gid)
            .or_else(|| self.data.admin1.get(gid))
            .or_else(|| self.data.admin2.get(gid))
            .or_else(|| self.data.admind.get(gid))
    }

    /// Check index invariants: every primary name must be reachable, and
    /// every capital or neighbour reference must resolve.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (kind, collection) in [
            ("admin1", &self.data.admin1),
            ("admin2", &self.data.admin2),
            ("admind", &self.data.admind),
            ("cities", &self.data.cities),
        ] {
            for record in collection.iter() {
                if !record.has_name(&normalize(&record.name)) {
                    return Err(EngineError::Integrity(format!(
                        "{kind} {}: primary name {:?} not indexed",
                        record.gid, record.name
                    )));
                }
            }
        }

        for country in self.data.countries.iter() {
            if !country.has_name(&normalize(&country.name)) {
                return Err(EngineError::Integrity(format!(
                    "country {}: primary name {:?} not indexed",
                    country.iso, country.name
                )));
            }
            if let Some(capital) = country.capital {
                if self.data.cities.get(capital).is_none() {
                    return Err(EngineError::Integrity(format!(
                        "country {}: capital gid {capital} not indexed",
                        country.iso
                    )));
                }
            }
            for neighbour in &country.neighbours {
                if self.data.countries.find_iso(neighbour).is_none() {
                    return Err(EngineError::Integrity(format!(
                        "country {}: unknown neighbour {neighbour:?}",
                        country.iso
                    )));
                }
            }
        }

        Ok(())
    }
}
