//! GeoNames ingest and the in-memory gazetteer index.
//!
//! The builder reads the raw GeoNames dumps (`allCountries.txt`,
//! `alternateNames.tsv`, `countryInfo.txt`, `allCountriesPostcodes.txt`),
//! splits them into typed collections (countries, admin1, admin2, admind,
//! cities, postcodes) and indexes every record under all of its normalized
//! name variants. The resolver only ever reads the result; nothing here is
//! touched at query time.

use std::collections::{HashMap, HashSet};
use std::error::Error;

use itertools::Itertools;
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use std::time::Instant;

use crate::expand::{derive_names, locational_barename, LOCATIONAL_COUNTRIES};
use crate::normalize::normalize;

pub type Gid = u64;

/// Language code GeoNames uses for abbreviation rows.
const LANG_ABBR: &str = "abbr";

/// Alternate-name rows with these language codes are never names.
const LANG_IGNORED: &[&str] = &["link", "wkdt", "post", "iata", "icao", "faac"];

pub fn skip_comment_lines(content: &str) -> String {
    content.lines().filter(|l| !l.starts_with('#')).join("\n")
}

fn split_content_to_n_parts(content: &str, n: usize) -> Vec<String> {
    if n == 0 || n == 1 {
        return vec![content.to_owned()];
    }

    let lines: Vec<&str> = content.lines().collect();
    lines.chunks(n).map(|chunk| chunk.join("\n")).collect()
}

pub struct SourceFileOptions<'a, P: AsRef<std::path::Path>> {
    pub all_countries: P,
    pub country_info: P,
    pub alternate_names: Option<P>,
    pub postcodes: Option<P>,
    pub filter_languages: Vec<&'a str>,
}

pub struct SourceFileContentOptions<'a> {
    pub all_countries: String,
    pub country_info: String,
    pub alternate_names: Option<String>,
    pub postcodes: Option<String>,
    pub filter_languages: Vec<&'a str>,
}

// The main 'geoname' table:
// geonameid, name, asciiname, alternatenames, latitude, longitude,
// feature class, feature code, country code, cc2, admin1 code, admin2 code,
// admin3 code, admin4 code, population, elevation, dem, timezone,
// modification date
#[derive(Debug, serde::Deserialize)]
struct GeonameRaw {
    gid: Gid,
    name: String,
    asciiname: String,
    _alternatenames: String,
    latitude: f32,
    longitude: f32,
    feature_class: String,
    feature_code: String,
    country_code: String,
    _cc2: String,
    admin1_code: String,
    admin2_code: String,
    _admin3_code: String,
    _admin4_code: String,
    population: u64,
    _elevation: String,
    _dem: String,
    _timezone: String,
    _modification_date: String,
}

// countryInfo.txt:
// ISO, ISO3, ISO-Numeric, fips, Country, Capital, Area, Population,
// Continent, tld, CurrencyCode, CurrencyName, Phone, Postal Code Format,
// Postal Code Regex, Languages, geonameid, neighbours, EquivalentFipsCode
#[derive(Debug, serde::Deserialize)]
struct CountryInfoRaw {
    iso: String,
    iso3: String,
    _iso_numeric: String,
    _fips: String,
    name: String,
    _capital: String,
    _area: String,
    population: u64,
    _continent: String,
    _tld: String,
    _currency_code: String,
    _currency_name: String,
    _phone: String,
    _postal_code_format: String,
    _postal_code_regex: String,
    languages: String,
    gid: Gid,
    neighbours: String,
    _equivalent_fips_code: String,
}

// alternateNames.tsv:
// alternateNameId, geonameid, isolanguage, alternate name, isPreferredName,
// isShortName, isColloquial, isHistoric, from, to
#[derive(Debug, serde::Deserialize)]
struct AlternateNameRaw {
    _alternate_name_id: u64,
    gid: Gid,
    isolanguage: String,
    alternate_name: String,
    _is_preferred_name: String,
    is_short_name: String,
    is_colloquial: String,
    is_historic: String,
    _from: String,
    _to: String,
}

// allCountriesPostcodes.txt:
// country code, postal code, place name, admin name1, admin code1,
// admin name2, admin code2, admin name3, admin code3, latitude, longitude,
// accuracy
#[derive(Debug, serde::Deserialize)]
struct PostcodeRaw {
    country_code: String,
    post_code: String,
    place_name: String,
    admin_name: String,
    _admin_code1: String,
    _admin_name2: String,
    _admin_code2: String,
    _admin_name3: String,
    _admin_code3: String,
    _latitude: String,
    _longitude: String,
    _accuracy: String,
}

/// A country, assembled from `countryInfo.txt` joined with its `PCL*` row
/// in `allCountries.txt`.
#[derive(Debug, Clone, serde::Serialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct CountryRecord {
    pub gid: Gid,
    pub iso: String,
    pub iso3: String,
    pub name: String,
    pub capital: Option<Gid>,
    pub latitude: f32,
    pub longitude: f32,
    pub population: u64,
    pub feature_class: String,
    pub feature_code: String,
    pub neighbours: Vec<String>,
    pub languages: Vec<String>,
    pub names: Vec<String>,
    pub names_lang: HashMap<String, Vec<String>>,
    pub abbr: Vec<String>,
}

impl CountryRecord {
    pub fn has_name(&self, key: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(key)).is_ok()
    }

    /// Languages spoken in this country, reduced to ISO 639-1 codes.
    pub fn spoken_iso639_1(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for code in &self.languages {
            let code = code.split('-').next().unwrap_or(code);
            if code.len() == 2 && !out.contains(&code) {
                out.push(code);
            }
        }
        out
    }

    pub fn speaks_english(&self) -> bool {
        self.spoken_iso639_1().contains(&"en")
    }
}

/// Any non-country administrative entity or populated place.
#[derive(Debug, Clone, serde::Serialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PlaceRecord {
    pub gid: Gid,
    pub name: String,
    pub asciiname: String,
    pub country_code: String,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub latitude: f32,
    pub longitude: f32,
    pub population: u64,
    pub feature_class: String,
    pub feature_code: String,
    pub names: Vec<String>,
    pub names_lang: HashMap<String, Vec<String>>,
    pub abbr: Vec<String>,
    pub admin1names: Vec<String>,
    pub admin2names: Vec<String>,
}

impl PlaceRecord {
    pub fn has_name(&self, key: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(key)).is_ok()
    }

    pub fn has_admin1name(&self, key: &str) -> bool {
        self.admin1names
            .binary_search_by(|n| n.as_str().cmp(key))
            .is_ok()
    }

    pub fn has_admin2name(&self, key: &str) -> bool {
        self.admin2names
            .binary_search_by(|n| n.as_str().cmp(key))
            .is_ok()
    }

    /// Great-circle distance to another place, in kilometers.
    pub fn distance_to(&self, other: &PlaceRecord) -> f32 {
        haversine_km(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PostcodeRecord {
    pub country_code: String,
    pub post_code: String,
    pub place_name: String,
    pub admin_name: String,
}

/// Which indexed name field a lookup goes against.
#[derive(Debug, Clone, Copy)]
pub enum NameKey<'a> {
    Name(&'a str),
    Abbr(&'a str),
    Lang { lang: &'a str, name: &'a str },
    Admin1Name(&'a str),
    Admin2Name(&'a str),
}

/// Equality constraints narrowing a name lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub country: Option<&'a str>,
    pub admin1: Option<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn country(country: &'a str) -> Self {
        Scope {
            country: Some(country),
            admin1: None,
        }
    }

    fn matches(&self, record: &PlaceRecord) -> bool {
        self.country.is_none_or(|cc| record.country_code == cc)
            && self
                .admin1
                .is_none_or(|a1| record.admin1.as_deref() == Some(a1))
    }
}

/// One typed collection of [`PlaceRecord`]s with inverted name indexes.
/// Buckets are pre-sorted by `(population desc, gid asc)` so multi-match
/// lookups come back in a deterministic best-first order.
#[derive(Debug, Clone, Default, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Collection {
    records: HashMap<Gid, PlaceRecord>,
    by_name: HashMap<String, Vec<Gid>>,
    by_abbr: HashMap<String, Vec<Gid>>,
    by_lang: HashMap<String, Vec<Gid>>,
    by_admin1name: HashMap<String, Vec<Gid>>,
    by_admin2name: HashMap<String, Vec<Gid>>,
}

fn lang_key(lang: &str, name: &str) -> String {
    format!("{lang}\t{name}")
}

impl Collection {
    fn build(records: Vec<PlaceRecord>) -> Self {
        let population: HashMap<Gid, u64> = records.iter().map(|r| (r.gid, r.population)).collect();

        let mut by_name: HashMap<String, Vec<Gid>> = HashMap::new();
        let mut by_abbr: HashMap<String, Vec<Gid>> = HashMap::new();
        let mut by_lang: HashMap<String, Vec<Gid>> = HashMap::new();
        let mut by_admin1name: HashMap<String, Vec<Gid>> = HashMap::new();
        let mut by_admin2name: HashMap<String, Vec<Gid>> = HashMap::new();

        for record in &records {
            for name in &record.names {
                by_name.entry(name.clone()).or_default().push(record.gid);
            }
            for abbr in &record.abbr {
                by_abbr.entry(abbr.clone()).or_default().push(record.gid);
            }
            for (lang, names) in &record.names_lang {
                for name in names {
                    by_lang
                        .entry(lang_key(lang, name))
                        .or_default()
                        .push(record.gid);
                }
            }
            for name in &record.admin1names {
                by_admin1name
                    .entry(name.clone())
                    .or_default()
                    .push(record.gid);
            }
            for name in &record.admin2names {
                by_admin2name
                    .entry(name.clone())
                    .or_default()
                    .push(record.gid);
            }
        }

        for bucket in [
            &mut by_name,
            &mut by_abbr,
            &mut by_lang,
            &mut by_admin1name,
            &mut by_admin2name,
        ] {
            for gids in bucket.values_mut() {
                gids.sort_unstable_by_key(|gid| (std::cmp::Reverse(population[gid]), *gid));
                gids.dedup();
            }
        }

        Collection {
            records: records.into_iter().map(|r| (r.gid, r)).collect(),
            by_name,
            by_abbr,
            by_lang,
            by_admin1name,
            by_admin2name,
        }
    }

    fn bucket(&self, key: NameKey) -> &[Gid] {
        let bucket = match key {
            NameKey::Name(name) => self.by_name.get(name),
            NameKey::Abbr(abbr) => self.by_abbr.get(abbr),
            NameKey::Lang { lang, name } => self.by_lang.get(&lang_key(lang, name)),
            NameKey::Admin1Name(name) => self.by_admin1name.get(name),
            NameKey::Admin2Name(name) => self.by_admin2name.get(name),
        };
        bucket.map(Vec::as_slice).unwrap_or_default()
    }

    /// All records matching `key` within `scope`, best first.
    pub fn find(&self, key: NameKey, scope: Scope) -> Vec<&PlaceRecord> {
        self.bucket(key)
            .iter()
            .filter_map(|gid| self.records.get(gid))
            .filter(|r| scope.matches(r))
            .collect()
    }

    pub fn count(&self, key: NameKey, scope: Scope) -> usize {
        self.bucket(key)
            .iter()
            .filter_map(|gid| self.records.get(gid))
            .filter(|r| scope.matches(r))
            .count()
    }

    pub fn get(&self, gid: Gid) -> Option<&PlaceRecord> {
        self.records.get(&gid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaceRecord> {
        self.records.values()
    }
}

/// Countries, indexed by ISO codes as well as by name.
#[derive(Debug, Clone, Default, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct CountryTable {
    records: HashMap<Gid, CountryRecord>,
    by_iso: HashMap<String, Gid>,
    by_iso3: HashMap<String, Gid>,
    by_name: HashMap<String, Vec<Gid>>,
    by_abbr: HashMap<String, Vec<Gid>>,
    by_lang: HashMap<String, Vec<Gid>>,
}

impl CountryTable {
    fn build(records: Vec<CountryRecord>) -> Self {
        let population: HashMap<Gid, u64> = records.iter().map(|r| (r.gid, r.population)).collect();

        let mut by_iso = HashMap::new();
        let mut by_iso3 = HashMap::new();
        let mut by_name: HashMap<String, Vec<Gid>> = HashMap::new();
        let mut by_abbr: HashMap<String, Vec<Gid>> = HashMap::new();
        let mut by_lang: HashMap<String, Vec<Gid>> = HashMap::new();

        for record in &records {
            by_iso.insert(record.iso.clone(), record.gid);
            by_iso3.insert(record.iso3.clone(), record.gid);
            for name in &record.names {
                by_name.entry(name.clone()).or_default().push(record.gid);
            }
            for abbr in &record.abbr {
                by_abbr.entry(abbr.clone()).or_default().push(record.gid);
            }
            for (lang, names) in &record.names_lang {
                for name in names {
                    by_lang
                        .entry(lang_key(lang, name))
                        .or_default()
                        .push(record.gid);
                }
            }
        }

        for bucket in [&mut by_name, &mut by_abbr, &mut by_lang] {
            for gids in bucket.values_mut() {
                gids.sort_unstable_by_key(|gid| (std::cmp::Reverse(population[gid]), *gid));
                gids.dedup();
            }
        }

        CountryTable {
            records: records.into_iter().map(|r| (r.gid, r)).collect(),
            by_iso,
            by_iso3,
            by_name,
            by_abbr,
            by_lang,
        }
    }

    pub fn get(&self, gid: Gid) -> Option<&CountryRecord> {
        self.records.get(&gid)
    }

    pub fn find_iso(&self, iso: &str) -> Option<&CountryRecord> {
        self.by_iso.get(iso).and_then(|gid| self.records.get(gid))
    }

    pub fn find_iso3(&self, iso3: &str) -> Option<&CountryRecord> {
        self.by_iso3.get(iso3).and_then(|gid| self.records.get(gid))
    }

    /// Countries matching a normalized name, best first.
    pub fn find_name(&self, key: &str) -> Vec<&CountryRecord> {
        self.by_name
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|gid| self.records.get(gid))
            .collect()
    }

    pub fn find_abbr(&self, key: &str) -> Vec<&CountryRecord> {
        self.by_abbr
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|gid| self.records.get(gid))
            .collect()
    }

    pub fn find_lang(&self, lang: &str, key: &str) -> Vec<&CountryRecord> {
        self.by_lang
            .get(&lang_key(lang, key))
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|gid| self.records.get(gid))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CountryRecord> {
        self.records.values()
    }
}

#[derive(Debug, Clone, Default, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PostcodeTable {
    records: Vec<PostcodeRecord>,
    by_place: HashMap<String, Vec<u32>>,
}

impl PostcodeTable {
    fn build(records: Vec<PostcodeRecord>) -> Self {
        let mut by_place: HashMap<String, Vec<u32>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            by_place
                .entry(normalize(&record.place_name))
                .or_default()
                .push(i as u32);
        }
        PostcodeTable { records, by_place }
    }

    pub fn find(&self, place_key: &str, country: Option<&str>) -> Vec<&PostcodeRecord> {
        self.by_place
            .get(place_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.records[i as usize])
            .filter(|r| country.is_none_or(|cc| r.country_code == cc))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Declarative per-country fixups applied after initial indexing.
enum PatchAction {
    AddCountryName {
        lang: &'static str,
        name: &'static str,
    },
    RemoveAdmin1Name {
        name: &'static str,
    },
    RemoveAdmin2Name {
        name: &'static str,
    },
}

struct CountryPatch {
    country: &'static str,
    action: PatchAction,
}

const COUNTRY_PATCHES: &[CountryPatch] = &[
    // The Moskva federal subject shadows the city otherwise.
    CountryPatch {
        country: "RU",
        action: PatchAction::RemoveAdmin1Name { name: "moscow" },
    },
    CountryPatch {
        country: "RU",
        action: PatchAction::AddCountryName {
            lang: "ru",
            name: "рф",
        },
    },
    CountryPatch {
        country: "IE",
        action: PatchAction::AddCountryName {
            lang: "en",
            name: "rep of ireland",
        },
    },
    // "Dublin" must resolve to the city, not the admin2 division.
    CountryPatch {
        country: "IE",
        action: PatchAction::RemoveAdmin2Name { name: "dublin" },
    },
];

/// The whole gazetteer. Immutable once built.
#[derive(Debug, Clone, Default, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct IndexData {
    pub countries: CountryTable,
    pub admin1: Collection,
    pub admin2: Collection,
    pub admind: Collection,
    pub cities: Collection,
    pub postcodes: PostcodeTable,
}

/// Accumulates the name variants of one entity while it is assembled.
#[derive(Default)]
struct NameBag {
    names: Vec<String>,
    names_lang: HashMap<String, Vec<String>>,
    abbr: Vec<String>,
}

impl NameBag {
    fn add(&mut self, key: String) {
        if !key.is_empty() {
            self.names.push(key);
        }
    }

    fn add_lang(&mut self, lang: &str, key: String) {
        if key.is_empty() {
            return;
        }
        let list = self.names_lang.entry(lang.to_string()).or_default();
        if !list.contains(&key) {
            list.push(key.clone());
        }
        self.names.push(key);
    }

    fn add_abbr(&mut self, key: String) {
        if !key.is_empty() {
            self.names.push(key.clone());
            self.abbr.push(key);
        }
    }

    fn finish(mut self) -> (Vec<String>, HashMap<String, Vec<String>>, Vec<String>) {
        self.names.sort();
        self.names.dedup();
        self.abbr.sort();
        self.abbr.dedup();
        (self.names, self.names_lang, self.abbr)
    }
}

struct AltName {
    lang: String,
    name: String,
    is_abbr: bool,
}

impl IndexData {
    pub fn new_from_files<P: AsRef<std::path::Path>>(
        SourceFileOptions {
            all_countries,
            country_info,
            alternate_names,
            postcodes,
            filter_languages,
        }: SourceFileOptions<P>,
    ) -> Result<Self, Box<dyn Error>> {
        Self::new_from_files_content(SourceFileContentOptions {
            all_countries: std::fs::read_to_string(all_countries)?,
            country_info: std::fs::read_to_string(country_info)?,
            alternate_names: match alternate_names {
                Some(p) => Some(std::fs::read_to_string(p)?),
                None => None,
            },
            postcodes: match postcodes {
                Some(p) => Some(std::fs::read_to_string(p)?),
                None => None,
            },
            filter_languages,
        })
    }

    pub fn new_from_files_content(
        SourceFileContentOptions {
            all_countries,
            country_info,
            alternate_names,
            postcodes,
            filter_languages,
        }: SourceFileContentOptions,
    ) -> Result<Self, Box<dyn Error>> {
        #[cfg(feature = "tracing")]
        let now = Instant::now();

        // country info first: it drives language filtering for everything else
        let country_info_rows = {
            let contents = skip_comment_lines(&country_info);
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_reader(contents.as_bytes());
            rdr.deserialize()
                .filter_map(|row| {
                    let record: CountryInfoRaw = row
                        .map_err(|_e| {
                            #[cfg(feature = "tracing")]
                            tracing::error!("On read country row: {_e}");
                            _e
                        })
                        .ok()?;
                    Some(record)
                })
                .collect::<Vec<CountryInfoRaw>>()
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Read {} countries took {}ms",
            country_info_rows.len(),
            now.elapsed().as_millis(),
        );

        let rows = split_content_to_n_parts(&all_countries, rayon::current_num_threads())
            .par_iter()
            .map(|chunk| {
                let mut rdr = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .delimiter(b'\t')
                    .from_reader(chunk.as_bytes());

                rdr.deserialize()
                    .filter_map(|row| {
                        let record: GeonameRaw = row.ok()?;
                        Some(record)
                    })
                    .collect::<Vec<GeonameRaw>>()
            })
            .reduce(Vec::new, |mut m1, ref mut m2| {
                m1.append(m2);
                m1
            });

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Read {} geoname rows took {}ms",
            rows.len(),
            now.elapsed().as_millis(),
        );

        let mut country_rows: HashMap<Gid, GeonameRaw> = HashMap::new();
        let mut admin1_rows: Vec<GeonameRaw> = Vec::new();
        let mut admin2_rows: Vec<GeonameRaw> = Vec::new();
        let mut admind_rows: Vec<GeonameRaw> = Vec::new();
        let mut city_rows: Vec<GeonameRaw> = Vec::new();
        let mut capitals: HashMap<String, Gid> = HashMap::new();

        let country_gids: HashSet<Gid> = country_info_rows.iter().map(|c| c.gid).collect();

        for row in rows {
            if country_gids.contains(&row.gid) && row.feature_code.starts_with("PCL") {
                country_rows.insert(row.gid, row);
                continue;
            }
            match (row.feature_class.as_str(), row.feature_code.as_str()) {
                // historical admin entities conflict with current names
                (_, "ADM1") => admin1_rows.push(row),
                (_, "ADM2") => admin2_rows.push(row),
                (_, "ADMD") => admind_rows.push(row),
                // abandoned and destroyed places are not resolvable targets
                ("P", "PPLQ") | ("P", "PPLW") => {}
                ("P", code) => {
                    if code == "PPLC" {
                        capitals.insert(row.country_code.clone(), row.gid);
                    }
                    city_rows.push(row);
                }
                _ => {}
            }
        }

        // alternate names, filtered down to the gids we keep
        let mut alt_names: HashMap<Gid, Vec<AltName>> = HashMap::new();
        if let Some(contents) = alternate_names {
            let city_gids: HashSet<Gid> = city_rows.iter().map(|r| r.gid).collect();
            let admin_gids: HashSet<Gid> = admin1_rows
                .iter()
                .chain(&admin2_rows)
                .chain(&admind_rows)
                .map(|r| r.gid)
                .collect();

            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_reader(contents.as_bytes());

            for row in rdr.deserialize() {
                let record: AlternateNameRaw = match row {
                    Ok(r) => r,
                    Err(_) => continue,
                };

                let is_city = city_gids.contains(&record.gid);
                if !is_city
                    && !admin_gids.contains(&record.gid)
                    && !country_gids.contains(&record.gid)
                {
                    continue;
                }

                if LANG_IGNORED.contains(&record.isolanguage.as_str()) {
                    continue;
                }
                if record.is_colloquial == "1" || record.is_historic == "1" {
                    continue;
                }
                // short names of cities are mostly noise
                if is_city && record.is_short_name == "1" {
                    continue;
                }
                if !filter_languages.is_empty()
                    && record.isolanguage != LANG_ABBR
                    && !record.isolanguage.is_empty()
                    && !filter_languages.contains(&record.isolanguage.as_str())
                {
                    continue;
                }

                alt_names.entry(record.gid).or_default().push(AltName {
                    is_abbr: record.isolanguage == LANG_ABBR,
                    lang: record.isolanguage,
                    name: record.alternate_name,
                });
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Read alternate names for {} entities took {}ms",
            alt_names.len(),
            now.elapsed().as_millis(),
        );

        // language codes spoken per country
        let spoken_by_cc: HashMap<String, Vec<String>> = country_info_rows
            .iter()
            .map(|c| {
                let mut spoken: Vec<String> = Vec::new();
                for code in c.languages.split(',') {
                    let code = code.split('-').next().unwrap_or(code);
                    if code.len() == 2 && !spoken.iter().any(|s| s == code) {
                        spoken.push(code.to_string());
                    }
                }
                (c.iso.clone(), spoken)
            })
            .collect();

        let speaks_english =
            |cc: &str| -> bool { spoken_by_cc.get(cc).is_none_or(|s| s.iter().any(|l| l == "en")) };

        let collect_names = |bag: &mut NameBag, gid: Gid, cc: &str| {
            let Some(alts) = alt_names.get(&gid) else {
                return;
            };
            let spoken = spoken_by_cc.get(cc);
            for alt in alts {
                if alt.is_abbr {
                    bag.add_abbr(normalize(&alt.name));
                } else if alt.lang.is_empty() {
                    // no language tag; index the name but don't claim a language
                    bag.add(normalize(&alt.name));
                } else if alt.lang == "en"
                    || spoken.is_some_and(|s| s.iter().any(|l| *l == alt.lang))
                {
                    bag.add_lang(&alt.lang, normalize(&alt.name));
                }
            }
        };

        // countries
        let mut countries: Vec<CountryRecord> = Vec::with_capacity(country_info_rows.len());
        for info in &country_info_rows {
            let geoname = country_rows.get(&info.gid);
            let mut bag = NameBag::default();
            bag.add_lang("en", normalize(&info.name));
            bag.add_lang("en", normalize(&info.iso));
            bag.add_lang("en", normalize(&info.iso3));
            if let Some(row) = geoname {
                bag.add_lang("en", normalize(&row.name));
                bag.add_lang("en", normalize(&row.asciiname));
            }
            collect_names(&mut bag, info.gid, &info.iso);
            bag.add_abbr(normalize(&info.iso));
            bag.add_abbr(normalize(&info.iso3));

            let (names, names_lang, abbr) = bag.finish();
            countries.push(CountryRecord {
                gid: info.gid,
                iso: info.iso.clone(),
                iso3: info.iso3.clone(),
                name: info.name.clone(),
                capital: capitals.get(&info.iso).copied(),
                latitude: geoname.map(|r| r.latitude).unwrap_or_default(),
                longitude: geoname.map(|r| r.longitude).unwrap_or_default(),
                population: info.population,
                feature_class: geoname
                    .map(|r| r.feature_class.clone())
                    .unwrap_or_else(|| "A".to_string()),
                feature_code: geoname
                    .map(|r| r.feature_code.clone())
                    .unwrap_or_else(|| "PCLI".to_string()),
                neighbours: info
                    .neighbours
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                languages: info
                    .languages
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                names,
                names_lang,
                abbr,
            });
        }

        let assemble = |row: &GeonameRaw, populated: bool| -> PlaceRecord {
            let mut bag = NameBag::default();
            bag.add_lang("en", normalize(&row.name));
            bag.add_lang("en", normalize(&row.asciiname));
            collect_names(&mut bag, row.gid, &row.country_code);

            let known = bag.names.clone();
            for derived in derive_names(
                &row.country_code,
                &row.name,
                &row.asciiname,
                &known,
                populated,
                speaks_english(&row.country_code),
            ) {
                bag.add_lang(derived.lang, normalize(&derived.text));
            }

            let (names, names_lang, abbr) = bag.finish();
            PlaceRecord {
                gid: row.gid,
                name: row.name.clone(),
                asciiname: row.asciiname.clone(),
                country_code: row.country_code.clone(),
                admin1: (!row.admin1_code.is_empty()).then(|| row.admin1_code.clone()),
                admin2: (!row.admin2_code.is_empty()).then(|| row.admin2_code.clone()),
                latitude: row.latitude,
                longitude: row.longitude,
                population: row.population,
                feature_class: row.feature_class.clone(),
                feature_code: row.feature_code.clone(),
                names,
                names_lang,
                abbr,
                admin1names: Vec::new(),
                admin2names: Vec::new(),
            }
        };

        let mut admin1: Vec<PlaceRecord> = admin1_rows.iter().map(|r| assemble(r, false)).collect();
        for record in &mut admin1 {
            record.admin1names = record.names.clone();
        }
        dedup_collection(&mut admin1);
        apply_place_patches(&mut admin1, PatchKind::Admin1);

        let admin1_by_code: HashMap<String, usize> = admin1
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                r.admin1
                    .as_ref()
                    .map(|a1| (format!("{}.{}", r.country_code, a1), i))
            })
            .collect();

        let mut admin2: Vec<PlaceRecord> = admin2_rows.iter().map(|r| assemble(r, false)).collect();
        for record in &mut admin2 {
            record.admin2names = record.names.clone();
            if let Some(a1) = record.admin1.as_ref() {
                if let Some(&i) = admin1_by_code.get(&format!("{}.{}", record.country_code, a1)) {
                    record.admin1names = admin1[i].names.clone();
                }
            }
        }
        dedup_collection(&mut admin2);
        apply_place_patches(&mut admin2, PatchKind::Admin2);

        let admin2_by_code: HashMap<String, usize> = admin2
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match (&r.admin1, &r.admin2) {
                (Some(a1), Some(a2)) => Some((format!("{}.{}.{}", r.country_code, a1, a2), i)),
                _ => None,
            })
            .collect();

        let inherit = |record: &mut PlaceRecord| {
            if let Some(a1) = record.admin1.as_ref() {
                if let Some(&i) = admin1_by_code.get(&format!("{}.{}", record.country_code, a1)) {
                    record.admin1names = admin1[i].names.clone();
                }
                if let Some(a2) = record.admin2.as_ref() {
                    if let Some(&i) =
                        admin2_by_code.get(&format!("{}.{}.{}", record.country_code, a1, a2))
                    {
                        record.admin2names = admin2[i].names.clone();
                    }
                }
            }
        };

        let mut admind: Vec<PlaceRecord> = admind_rows.iter().map(|r| assemble(r, false)).collect();
        for record in &mut admind {
            inherit(record);
        }
        dedup_collection(&mut admind);

        let mut cities: Vec<PlaceRecord> = city_rows.iter().map(|r| assemble(r, true)).collect();
        for record in &mut cities {
            inherit(record);
        }
        dedup_collection(&mut cities);
        append_locational_barenames(&mut cities);

        apply_country_patches(&mut countries);

        let postcode_records = match postcodes {
            Some(contents) => {
                let mut rdr = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .delimiter(b'\t')
                    .flexible(true)
                    .from_reader(contents.as_bytes());
                rdr.deserialize()
                    .filter_map(|row| {
                        let record: PostcodeRaw = row.ok()?;
                        Some(PostcodeRecord {
                            country_code: record.country_code,
                            post_code: record.post_code,
                            place_name: record.place_name,
                            admin_name: record.admin_name,
                        })
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let data = IndexData {
            countries: CountryTable::build(countries),
            admin1: Collection::build(admin1),
            admin2: Collection::build(admin2),
            admind: Collection::build(admind),
            cities: Collection::build(cities),
            postcodes: PostcodeTable::build(postcode_records),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Index ready (countries {}, admin1 {}, admin2 {}, admind {}, cities {}, postcodes {}). took {}ms",
            data.countries.len(),
            data.admin1.len(),
            data.admin2.len(),
            data.admind.len(),
            data.cities.len(),
            data.postcodes.len(),
            now.elapsed().as_millis(),
        );

        Ok(data)
    }
}

/// No two same-kind entities in one `(countryCode, admin1)` may share a
/// normalized primary name; the most populous one wins.
fn dedup_collection(records: &mut Vec<PlaceRecord>) {
    records.sort_by_cached_key(|r| {
        (
            r.country_code.clone(),
            r.admin1.clone().unwrap_or_default(),
            normalize(&r.name),
            std::cmp::Reverse(r.population),
            r.gid,
        )
    });
    records.dedup_by(|a, b| {
        a.country_code == b.country_code
            && a.admin1 == b.admin1
            && normalize(&a.name) == normalize(&b.name)
    });
}

/// Add "X on Y" / "X by the Y" barenames for cities, unless another city in
/// the same `(countryCode, admin1)` already claims the bare form.
fn append_locational_barenames(cities: &mut [PlaceRecord]) {
    let claimed: HashSet<(String, String, String)> = cities
        .iter()
        .filter(|r| LOCATIONAL_COUNTRIES.contains(&r.country_code.as_str()))
        .map(|r| {
            (
                r.country_code.clone(),
                r.admin1.clone().unwrap_or_default(),
                normalize(&r.name),
            )
        })
        .collect();

    for record in cities.iter_mut() {
        if !LOCATIONAL_COUNTRIES.contains(&record.country_code.as_str()) {
            continue;
        }
        let Some(bare) = locational_barename(&record.name) else {
            continue;
        };
        let key = normalize(&bare);
        let owner = (
            record.country_code.clone(),
            record.admin1.clone().unwrap_or_default(),
            key.clone(),
        );
        if claimed.contains(&owner) {
            continue;
        }
        if !record.has_name(&key) {
            record.names.push(key.clone());
            record.names.sort();
            let list = record.names_lang.entry("en".to_string()).or_default();
            if !list.contains(&key) {
                list.push(key);
            }
        }
    }
}

enum PatchKind {
    Admin1,
    Admin2,
}

fn apply_place_patches(records: &mut [PlaceRecord], kind: PatchKind) {
    for patch in COUNTRY_PATCHES {
        let name = match (&kind, &patch.action) {
            (PatchKind::Admin1, PatchAction::RemoveAdmin1Name { name }) => *name,
            (PatchKind::Admin2, PatchAction::RemoveAdmin2Name { name }) => *name,
            _ => continue,
        };
        for record in records.iter_mut().filter(|r| r.country_code == patch.country) {
            record.names.retain(|n| n != name);
            record.admin1names.retain(|n| n != name);
            record.admin2names.retain(|n| n != name);
            for list in record.names_lang.values_mut() {
                list.retain(|n| n != name);
            }
        }
    }
}

fn apply_country_patches(countries: &mut [CountryRecord]) {
    for patch in COUNTRY_PATCHES {
        let PatchAction::AddCountryName { lang, name } = &patch.action else {
            continue;
        };
        for record in countries
            .iter_mut()
            .filter(|r| r.iso == patch.country)
        {
            let key = normalize(name);
            if !record.names.contains(&key) {
                record.names.push(key.clone());
                record.names.sort();
            }
            let list = record.names_lang.entry(lang.to_string()).or_default();
            if !list.contains(&key) {
                list.push(key);
            }
        }
    }
}

fn to_radians(degrees: f32) -> f32 {
    degrees * std::f32::consts::PI / 180.0
}

/// Haversine great-circle distance in kilometers.
pub fn haversine_km(lat1: f32, lng1: f32, lat2: f32, lng2: f32) -> f32 {
    const EARTH_RADIUS_KM: f32 = 6371.0;
    let hav = |theta: f32| (theta / 2.0).sin().powi(2);

    let (fi1, lam1, fi2, lam2) = (
        to_radians(lat1),
        to_radians(lng1),
        to_radians(lat2),
        to_radians(lng2),
    );
    2.0 * EARTH_RADIUS_KM
        * (hav(fi2 - fi1) + fi1.cos() * fi2.cos() * hav(lam2 - lam1))
            .sqrt()
            .asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_oslo_trondheim() {
        let d = haversine_km(59.91273, 10.74609, 63.43049, 10.39506);
        assert!((d - 392.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn skip_comments() {
        let content = "# header\nAU\tAUS\n# more\nGB\tGBR";
        assert_eq!(skip_comment_lines(content), "AU\tAUS\nGB\tGBR");
    }

    #[test]
    fn scope_matching() {
        let record = PlaceRecord {
            gid: 1,
            name: "Sydney".into(),
            asciiname: "Sydney".into(),
            country_code: "AU".into(),
            admin1: Some("02".into()),
            admin2: None,
            latitude: 0.0,
            longitude: 0.0,
            population: 0,
            feature_class: "P".into(),
            feature_code: "PPL".into(),
            names: vec!["sydney".into()],
            names_lang: HashMap::new(),
            abbr: Vec::new(),
            admin1names: Vec::new(),
            admin2names: Vec::new(),
        };

        assert!(Scope::default().matches(&record));
        assert!(Scope::country("AU").matches(&record));
        assert!(!Scope::country("GB").matches(&record));
        assert!(Scope {
            country: Some("AU"),
            admin1: Some("02")
        }
        .matches(&record));
        assert!(!Scope {
            country: Some("AU"),
            admin1: Some("03")
        }
        .matches(&record));
    }
}
