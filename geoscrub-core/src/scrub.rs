//! Country, state and city resolution, and the CSC scrubber that ties the
//! three together.
//!
//! The scrubber takes a noisy `(city, state, country)` triple, tries every
//! combination of trusting and overriding the three fields, and reports
//! what it had to change: each field ends up `O` (matched as given), `M`
//! (present but overridden) or `D` (missing and derived). User input never
//! produces an error; an unresolvable query comes back as an empty outcome.

use crate::expand::query_alternates;
use crate::index::{CountryRecord, NameKey, PlaceRecord, Scope};
use crate::normalize::{clean_nonalpha, normalize};
use crate::Engine;

/// ISO2 codes of US outlying areas that show up in the state field of US
/// addresses. `(San Juan, PR, US)` really means country PR.
const US_OUTLYING_AREAS: &[&str] = &["PR", "GU", "VI", "AS", "MP", "UM"];

/// How a scrubbed field relates to the input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FieldStatus {
    /// Matched as given.
    #[serde(rename = "O")]
    Original,
    /// Present, but overridden to achieve a match.
    #[serde(rename = "M")]
    Modified,
    /// Missing, supplied by the resolver.
    #[serde(rename = "D")]
    Derived,
}

impl FieldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldStatus::Original => "O",
            FieldStatus::Modified => "M",
            FieldStatus::Derived => "D",
        }
    }

    fn penalty(self) -> f32 {
        match self {
            FieldStatus::Original => 0.0,
            FieldStatus::Modified => 0.1,
            FieldStatus::Derived => 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrubOptions {
    /// Include the full candidate list instead of only the winner.
    pub verbose: bool,
}

/// Result of [`Engine::csc_scrub`].
#[derive(Debug, serde::Serialize)]
pub struct ScrubOutcome<'a> {
    pub result: Option<&'a PlaceRecord>,
    pub score: f32,
    pub cc_status: Option<FieldStatus>,
    pub st_status: Option<FieldStatus>,
    /// Cardinality of the final candidate set, before tie-breaking.
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<&'a PlaceRecord>,
}

impl ScrubOutcome<'_> {
    fn no_match() -> Self {
        ScrubOutcome {
            result: None,
            score: 0.0,
            cc_status: None,
            st_status: None,
            count: 0,
            candidates: Vec::new(),
        }
    }
}

/// Result of [`Engine::sc_scrub`].
#[derive(Debug, serde::Serialize)]
pub struct ScScrubOutcome<'a> {
    pub result: Option<&'a PlaceRecord>,
    pub score: f32,
    pub cc_status: Option<FieldStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateLevel {
    Admin1,
    Admin2,
}

/// An admin entity acting as the "state" of a query.
#[derive(Debug, Clone, Copy)]
pub struct StateMatch<'a> {
    pub record: &'a PlaceRecord,
    pub level: StateLevel,
}

impl StateMatch<'_> {
    fn admin1_code(&self) -> Option<&str> {
        self.record.admin1.as_deref()
    }
}

impl Engine {
    /// Match a country token (ISO2, ISO3, English or native name) to its
    /// country record. Ambiguous names go to the most populous match.
    pub fn resolve_country(&self, token: &str) -> Option<&CountryRecord> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let upper = token.to_uppercase();
        if let Some(country) = self.data.countries.find_iso(&upper) {
            return Some(country);
        }
        if let Some(country) = self.data.countries.find_iso3(&upper) {
            return Some(country);
        }

        let key = normalize(token);
        if key.is_empty() {
            return None;
        }
        let matches = self.data.countries.find_name(&key);
        if matches.len() > 1 {
            #[cfg(feature = "tracing")]
            tracing::debug!("ambiguous country name {token:?}, picking most populous");
        }
        if let Some(country) = matches.first().copied() {
            return Some(country);
        }

        self.data.countries.find_abbr(&key).first().copied()
    }

    /// Match a state token against ADM1 (falling back to ADM2 for countries
    /// that don't address in English). `country` may be None to search
    /// globally; the caller can then adopt the discovered country.
    pub fn resolve_state(&self, token: &str, country: Option<&str>) -> Option<StateMatch<'_>> {
        let key = normalize(clean_nonalpha(token));
        if key.is_empty() {
            return None;
        }

        let scope = Scope {
            country,
            admin1: None,
        };

        let hits = self.data.admin1.find(NameKey::Name(&key), scope);
        if let Some(record) = hits.first().copied() {
            return Some(StateMatch {
                record,
                level: StateLevel::Admin1,
            });
        }

        let hits = self.data.admin1.find(NameKey::Abbr(&key), scope);
        if let Some(record) = hits.first().copied() {
            return Some(StateMatch {
                record,
                level: StateLevel::Admin1,
            });
        }

        if country.is_some_and(|cc| !self.speaks_english(cc)) {
            let hits = self.data.admin2.find(NameKey::Name(&key), scope);
            if let Some(record) = hits.first().copied() {
                return Some(StateMatch {
                    record,
                    level: StateLevel::Admin2,
                });
            }
        }

        None
    }

    /// Match a city token against populated places, most specific scope
    /// first, with ADMD/ADM2 fallback for non-English toponyms.
    pub fn resolve_city(
        &self,
        token: &str,
        country: Option<&str>,
        admin1: Option<&str>,
    ) -> Option<&PlaceRecord> {
        let key = normalize(clean_nonalpha(token));
        if key.is_empty() {
            return None;
        }

        let mut scopes = Vec::with_capacity(3);
        if country.is_some() && admin1.is_some() {
            scopes.push(Scope { country, admin1 });
        }
        if country.is_some() {
            scopes.push(Scope {
                country,
                admin1: None,
            });
        }
        scopes.push(Scope::default());

        for scope in &scopes {
            if let Some(record) = self.data.cities.find(NameKey::Name(&key), *scope).first().copied() {
                return Some(record);
            }
        }

        if country.is_some_and(|cc| !self.speaks_english(cc)) {
            for collection in [&self.data.admind, &self.data.admin2] {
                for scope in &scopes {
                    if let Some(record) = collection.find(NameKey::Name(&key), *scope).first().copied() {
                        return Some(record);
                    }
                }
            }
        }

        None
    }

    /// Scrub a `(city, state, country)` triple into its best candidate.
    ///
    /// Never fails on user input; an unresolvable query yields an outcome
    /// with no result, `count` 0 and score 0.
    pub fn csc_scrub(
        &self,
        city: Option<&str>,
        state: Option<&str>,
        country: Option<&str>,
        options: &ScrubOptions,
    ) -> ScrubOutcome<'_> {
        let city_raw = city.map(clean_nonalpha).filter(|s| !s.is_empty());
        let state_raw = state.map(clean_nonalpha).filter(|s| !s.is_empty());
        let country_raw = country.map(clean_nonalpha).filter(|s| !s.is_empty());

        if city_raw.is_none() && state_raw.is_none() && country_raw.is_none() {
            return ScrubOutcome::no_match();
        }

        let had_state = state_raw.is_some();
        let had_country = country_raw.is_some();

        // The city token as given, then its derived alternates.
        let city_keys: Vec<String> = match city_raw {
            Some(raw) => {
                let (cleaned, alternates) = query_alternates(raw);
                let mut keys = vec![normalize(&cleaned)];
                keys.extend(alternates.iter().map(|a| normalize(a)));
                keys.retain(|k| !k.is_empty());
                keys.dedup();
                keys
            }
            None => Vec::new(),
        };

        // Country, as claimed by the input.
        let input_country_iso: Option<String> = country_raw.and_then(|tok| {
            let tok = if tok.eq_ignore_ascii_case("uk") { "GB" } else { tok };
            self.resolve_country(tok).map(|c| c.iso.clone())
        });
        let mut country_rec: Option<&CountryRecord> = input_country_iso
            .as_deref()
            .and_then(|iso| self.data.countries.find_iso(iso));

        // US outlying areas passed in the state field take over the country.
        let mut state_tok = state_raw;
        let mut territory_state = false;
        if let (Some(st), Some(c)) = (state_tok, country_rec) {
            if c.iso == "US" {
                if let Some(territory) = self.resolve_country(st) {
                    if territory.iso != "US"
                        && US_OUTLYING_AREAS.contains(&territory.iso.as_str())
                    {
                        country_rec = Some(territory);
                        state_tok = None;
                        territory_state = true;
                    }
                }
            }
        }

        // State resolution within the candidate country.
        let state_key = state_tok.map(|s| normalize(clean_nonalpha(s)));
        let mut state_match: Option<StateMatch> = None;
        if let Some(st) = state_tok {
            state_match = self.resolve_state(st, country_rec.map(|c| c.iso.as_str()));

            if state_match.is_none() && country_rec.is_some() {
                // The state isn't in the claimed country. If the (city, state)
                // pair is unique somewhere else, the country field is wrong.
                if let (Some(city_key), Some(st_key)) = (city_keys.first(), state_key.as_deref()) {
                    let global = self.cities_with_state(city_key, st_key, None);
                    if global.len() == 1
                        && country_rec.is_some_and(|c| c.iso != global[0].country_code)
                    {
                        country_rec = self.data.countries.find_iso(&global[0].country_code);
                        state_match =
                            self.resolve_state(st, country_rec.map(|c| c.iso.as_str()));
                    }
                }
            }
        }

        // A state discovered without (or against) a country supplies one.
        if country_rec.is_none() {
            if let Some(sm) = &state_match {
                country_rec = self.data.countries.find_iso(&sm.record.country_code);
            }
        }

        // City resolution, tightest scope first, alternates within each rung.
        let cc = country_rec.map(|c| c.iso.as_str());
        let admin1 = state_match.as_ref().and_then(|m| m.admin1_code());
        let mut candidates: Vec<&PlaceRecord> = Vec::new();

        if !city_keys.is_empty() && cc.is_some() {
            let mut scopes = Vec::with_capacity(2);
            if admin1.is_some() {
                scopes.push(Scope {
                    country: cc,
                    admin1,
                });
            }
            scopes.push(Scope {
                country: cc,
                admin1: None,
            });

            'found: {
                for scope in &scopes {
                    for key in &city_keys {
                        candidates = self.data.cities.find(NameKey::Name(key), *scope);
                        if !candidates.is_empty() {
                            break 'found;
                        }
                    }
                }
                // Non-English countries address wards and districts as cities
                // (e.g. 港区 resolves to the Minato-ku division).
                if cc.is_some_and(|cc| !self.speaks_english(cc)) {
                    for collection in [&self.data.admind, &self.data.admin2] {
                        for scope in &scopes {
                            for key in &city_keys {
                                candidates = collection.find(NameKey::Name(key), *scope);
                                if !candidates.is_empty() {
                                    break 'found;
                                }
                            }
                        }
                    }
                }
            }
        }

        // Perhaps the state field is really a city.
        if candidates.is_empty() && cc.is_some() {
            if let Some(st_key) = state_key.as_deref() {
                candidates = self.data.cities.find(
                    NameKey::Name(st_key),
                    Scope {
                        country: cc,
                        admin1: None,
                    },
                );
            }
        }

        // Drop the country entirely and search globally.
        if candidates.is_empty() && !city_keys.is_empty() {
            if let Some(st_key) = state_key.as_deref() {
                for key in &city_keys {
                    candidates = self.cities_with_state(key, st_key, None);
                    if !candidates.is_empty() {
                        break;
                    }
                }
            }
            if candidates.is_empty() {
                for key in &city_keys {
                    candidates = self.data.cities.find(NameKey::Name(key), Scope::default());
                    if !candidates.is_empty() {
                        break;
                    }
                }
            }
        }

        let Some(winner) = candidates.first().copied() else {
            return ScrubOutcome::no_match();
        };

        let cc_status = if had_country {
            match input_country_iso.as_deref() {
                Some(iso) if iso == winner.country_code && !territory_state => {
                    FieldStatus::Original
                }
                _ => FieldStatus::Modified,
            }
        } else {
            FieldStatus::Derived
        };

        let st_status = if territory_state {
            FieldStatus::Original
        } else if had_state {
            let respected = state_key.as_deref().is_some_and(|k| {
                winner.has_admin1name(k)
                    || winner.has_admin2name(k)
                    || state_match.as_ref().is_some_and(|m| {
                        m.record.country_code == winner.country_code
                            && m.record.admin1.as_deref() == winner.admin1.as_deref()
                    })
            });
            if respected {
                FieldStatus::Original
            } else {
                FieldStatus::Modified
            }
        } else {
            FieldStatus::Derived
        };

        let score = (1.0 - cc_status.penalty() - st_status.penalty()).max(0.0);

        ScrubOutcome {
            result: Some(winner),
            score,
            cc_status: Some(cc_status),
            st_status: Some(st_status),
            count: candidates.len(),
            candidates: if options.verbose {
                candidates
            } else {
                Vec::new()
            },
        }
    }

    /// Validate a `(state, country)` pair, correcting the country when the
    /// state is unique without it.
    pub fn sc_scrub(&self, state: &str, country: Option<&str>) -> ScScrubOutcome<'_> {
        let state = clean_nonalpha(state);
        let key = normalize(state);
        if key.is_empty() {
            return ScScrubOutcome {
                result: None,
                score: 0.0,
                cc_status: None,
            };
        }

        let iso: Option<String> = country
            .and_then(|c| self.resolve_country(c))
            .map(|c| c.iso.clone());

        let collections = [
            (&self.data.admin1, NameKey::Admin1Name(key.as_str())),
            (&self.data.admin2, NameKey::Admin2Name(key.as_str())),
            (&self.data.admind, NameKey::Name(key.as_str())),
        ];

        let mut seen: Vec<&PlaceRecord> = Vec::new();
        for (collection, name_key) in collections {
            if let Some(cc) = iso.as_deref() {
                seen.extend(collection.find(name_key, Scope::country(cc)));
                if seen.len() == 1 {
                    return ScScrubOutcome {
                        result: Some(seen[0]),
                        score: 0.9,
                        cc_status: Some(FieldStatus::Original),
                    };
                }
                if !seen.is_empty() {
                    // more than one candidate, nothing reliable to report
                    break;
                }
            }

            seen.extend(collection.find(name_key, Scope::default()));
            if seen.len() == 1 {
                return ScScrubOutcome {
                    result: Some(seen[0]),
                    score: 0.8,
                    cc_status: Some(FieldStatus::Derived),
                };
            }
        }

        ScScrubOutcome {
            result: None,
            score: 0.0,
            cc_status: None,
        }
    }

    /// Cities (or admin divisions standing in for them) matching a city
    /// name whose parent admin matches a state name.
    fn cities_with_state(
        &self,
        city_key: &str,
        state_key: &str,
        country: Option<&str>,
    ) -> Vec<&PlaceRecord> {
        let scope = Scope {
            country,
            admin1: None,
        };

        let by_admin1: Vec<&PlaceRecord> = self
            .data
            .cities
            .find(NameKey::Name(city_key), scope)
            .into_iter()
            .filter(|r| r.has_admin1name(state_key))
            .collect();
        if !by_admin1.is_empty() {
            return by_admin1;
        }

        let by_admin2: Vec<&PlaceRecord> = self
            .data
            .cities
            .find(NameKey::Name(city_key), scope)
            .into_iter()
            .filter(|r| r.has_admin2name(state_key))
            .collect();
        if !by_admin2.is_empty() {
            return by_admin2;
        }

        // Perhaps the "city" is itself an admin2 or admind entity.
        for collection in [&self.data.admin2, &self.data.admind] {
            let hits: Vec<&PlaceRecord> = collection
                .find(NameKey::Name(city_key), scope)
                .into_iter()
                .filter(|r| r.has_admin1name(state_key))
                .collect();
            if !hits.is_empty() {
                return hits;
            }
        }

        Vec::new()
    }

    pub(crate) fn speaks_english(&self, country_code: &str) -> bool {
        self.data
            .countries
            .find_iso(country_code)
            .map(|c| c.speaks_english())
            .unwrap_or(true)
    }
}
