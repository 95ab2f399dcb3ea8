use std::env::temp_dir;
use std::error::Error;

use geoscrub_core::storage::{IndexStorage, Storage};
use geoscrub_core::{Engine, FieldStatus, GeoKind, ScrubOptions, SourceFileOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn get_engine() -> Result<Engine, Box<dyn Error>> {
    Engine::new_from_files(
        SourceFileOptions {
            all_countries: "tests/misc/all-countries.txt",
            country_info: "tests/misc/country-info.txt",
            alternate_names: Some("tests/misc/alternate-names.txt"),
            postcodes: Some("tests/misc/postcodes.txt"),
            filter_languages: vec![],
        },
        Default::default(),
    )
}

fn assert_score(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "score {actual} != {expected}"
    );
}

#[test]
fn resolve_country_by_code_and_name() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    assert_eq!(engine.country_info("AU").unwrap().name, "Australia");
    assert_eq!(engine.country_info("AUS").unwrap().name, "Australia");
    assert_eq!(engine.country_info("australia").unwrap().iso, "AU");
    assert_eq!(engine.country_info("russian federation").unwrap().iso, "RU");
    assert_eq!(engine.country_info("россия").unwrap().iso, "RU");
    assert_eq!(engine.country_info("UK").unwrap().iso, "GB");
    assert_eq!(engine.norm_country("JP"), Some("Japan"));
    assert!(engine.country_info("atlantis").is_none());
    assert!(engine.country_info("").is_none());
    Ok(())
}

#[test]
fn scrub_exact_match() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("Sydney"), Some("NSW"), Some("AU"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Sydney");
    assert_eq!(result.country_code, "AU");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_eq!(outcome.count, 1);
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn scrub_corrects_wrong_country() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("Sydney"), Some("NSW"), Some("GB"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Sydney");
    assert_eq!(result.country_code, "AU");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Modified));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 0.9);
    Ok(())
}

#[test]
fn scrub_derives_missing_country() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("Sydney"), Some("NSW"), None, &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Sydney");
    assert_eq!(result.country_code, "AU");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Derived));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 0.8);
    Ok(())
}

#[test]
fn scrub_no_match() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("Foobar"), Some("XZ"), Some("ZZ"), &Default::default());
    assert!(outcome.result.is_none());
    assert_eq!(outcome.count, 0);
    assert_score(outcome.score, 0.0);
    assert!(outcome.cc_status.is_none());
    assert!(outcome.st_status.is_none());

    let empty = engine.csc_scrub(None, None, None, &Default::default());
    assert!(empty.result.is_none());
    assert_eq!(empty.count, 0);
    Ok(())
}

#[test]
fn scrub_strips_city_suffix() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(
        Some("Clinton Township"),
        Some("MI"),
        Some("US"),
        &Default::default(),
    );
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Clinton");
    assert_eq!(result.country_code, "US");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert!(outcome.score >= 0.9);

    // both forms land on the same entity
    let direct = engine.csc_scrub(Some("Clinton"), Some("MI"), Some("US"), &Default::default());
    assert_eq!(direct.result.unwrap().gid, result.gid);
    Ok(())
}

#[test]
fn scrub_saint_st_variants() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("St Francis"), Some("WI"), Some("US"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Saint Francis");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn scrub_japanese_names() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("札幌市"), Some("北海道"), Some("JP"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Sapporo");
    assert_eq!(result.country_code, "JP");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn scrub_ward_falls_back_to_admin2() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("港区"), Some("東京都"), Some("JP"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Minato-ku");
    assert_eq!(result.feature_code, "ADM2");
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn scrub_us_outlying_area_as_state() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("San Juan"), Some("PR"), Some("US"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "San Juan");
    assert_eq!(result.country_code, "PR");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Modified));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 0.9);
    Ok(())
}

#[test]
fn scrub_locational_barename() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("Cardiff"), Some("CA"), Some("US"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Cardiff-by-the-Sea");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_eq!(outcome.st_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn scrub_hyphen_and_space_forms_match() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(
        Some("Annandale on Hudson"),
        Some("NY"),
        Some("US"),
        &Default::default(),
    );
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Annandale-on-Hudson");
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn scrub_whitespace_and_case_insensitive() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let a = engine.csc_scrub(Some("  Sydney  "), Some(" NSW "), Some(" AU "), &Default::default());
    let b = engine.csc_scrub(Some("Sydney"), Some("NSW"), Some("AU"), &Default::default());
    let c = engine.csc_scrub(Some("sydney"), Some("nsw"), Some("au"), &Default::default());
    let d = engine.csc_scrub(Some("SYDNEY"), Some("NSW"), Some("AU"), &Default::default());

    for other in [&b, &c, &d] {
        assert_eq!(a.result.unwrap().gid, other.result.unwrap().gid);
        assert_eq!(a.cc_status, other.cc_status);
        assert_eq!(a.st_status, other.st_status);
        assert_score(a.score, other.score);
    }
    Ok(())
}

#[test]
fn scrub_is_idempotent() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let first = engine.csc_scrub(Some("Sydney"), Some("NSW"), Some("GB"), &Default::default());
    let winner = first.result.unwrap();
    let state = engine.state_of(winner).map(|s| s.name.clone());

    let again = engine.csc_scrub(
        Some(&winner.name),
        state.as_deref(),
        Some(&winner.country_code),
        &Default::default(),
    );
    assert_eq!(again.result.unwrap().gid, winner.gid);
    assert_eq!(again.cc_status, Some(FieldStatus::Original));
    assert_eq!(again.st_status, Some(FieldStatus::Original));
    assert_score(again.score, 1.0);
    Ok(())
}

#[test]
fn scrub_city_only_derives_both() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(Some("moscow"), None, None, &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "Moscow");
    assert_eq!(result.country_code, "RU");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Derived));
    assert_eq!(outcome.st_status, Some(FieldStatus::Derived));
    assert_score(outcome.score, 0.6);
    Ok(())
}

#[test]
fn scrub_state_field_as_city() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(None, Some("San Juan"), Some("PR"), &Default::default());
    let result = outcome.result.unwrap();
    assert_eq!(result.name, "San Juan");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_eq!(outcome.st_status, Some(FieldStatus::Modified));
    assert_score(outcome.score, 0.9);
    Ok(())
}

#[test]
fn scrub_verbose_returns_candidates() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.csc_scrub(
        Some("Sydney"),
        None,
        None,
        &ScrubOptions { verbose: true },
    );
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.candidates.len(), 2);
    // ordered by population: Australia first, then Nova Scotia
    assert_eq!(outcome.candidates[0].country_code, "AU");
    assert_eq!(outcome.candidates[1].country_code, "CA");

    let quiet = engine.csc_scrub(Some("Sydney"), None, None, &Default::default());
    assert_eq!(quiet.count, 2);
    assert!(quiet.candidates.is_empty());
    Ok(())
}

#[test]
fn norm_canonicalizes_names() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    assert_eq!(
        engine.norm(GeoKind::Admin1, "AU", "nsw", None),
        Some("State of New South Wales")
    );
    assert_eq!(
        engine.norm(GeoKind::Admin1, "AU", "new south wales", None),
        Some("State of New South Wales")
    );
    assert_eq!(engine.norm(GeoKind::City, "RU", "Москва", Some("ru")), Some("Moscow"));
    assert_eq!(engine.norm(GeoKind::City, "JP", "札幌市", Some("ja")), Some("Sapporo"));
    assert_eq!(engine.norm(GeoKind::Admin2, "IE", "dublin city", None), Some("Dublin City"));
    assert_eq!(engine.norm(GeoKind::City, "AU", "perth", None), None);
    Ok(())
}

#[test]
fn find_cities_ordered_by_population() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let cities = engine.find_cities("sydney");
    assert_eq!(cities.len(), 2);
    assert_eq!(cities[0].country_code, "AU");
    assert_eq!(cities[1].country_code, "CA");

    assert!(engine.find_cities("nowhere").is_empty());
    Ok(())
}

#[test]
fn find_states_merges_collections() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let states = engine.find_states("nsw", None);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name, "State of New South Wales");

    let tokyo = engine.find_states("tokyo", Some("JP"));
    assert_eq!(tokyo.len(), 1);
    assert_eq!(tokyo[0].feature_code, "ADM1");
    Ok(())
}

#[test]
fn expand_abbreviations() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    assert_eq!(
        engine.expand_abbr(GeoKind::Admin1, "AU", "nsw"),
        Some("State of New South Wales")
    );
    assert_eq!(engine.expand_abbr(GeoKind::Admin1, "US", "wi"), Some("Wisconsin"));
    assert_eq!(engine.expand_country("RUS"), Some("Russia"));
    assert_eq!(engine.expand_country("zzz"), None);
    Ok(())
}

#[test]
fn capitals_resolve() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    assert_eq!(engine.capital("AU").unwrap().name, "Canberra");
    assert_eq!(engine.capital("JP").unwrap().name, "Tokyo");
    assert_eq!(engine.capital("japan").unwrap().name, "Tokyo");
    assert!(engine.capital("CA").is_none());
    Ok(())
}

#[test]
fn membership_predicates() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    assert!(engine.is_country("ru"));
    assert!(engine.is_state("NSW", Some("Australia")));
    assert!(!engine.is_state("NSW", Some("GB")));
    assert!(engine.is_city("JP", "Sapporo"));
    assert!(engine.is_city("JP", "札幌"));
    assert!(!engine.is_city("AU", "auckland"));
    Ok(())
}

#[test]
fn postcode_places() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    assert!(engine.is_postal_place("AU", "randwick"));
    assert!(!engine.is_postal_place("NZ", "randwick"));
    // a postcode-only place still counts as a city of the country
    assert!(engine.is_city("AU", "Randwick"));
    assert_eq!(engine.postcode_place("US", "clinton township"), Some("Clinton Township"));
    Ok(())
}

#[test]
fn country_patches_applied() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    // Russian-language alias for the country
    assert_eq!(engine.country_info("рф").unwrap().iso, "RU");
    assert_eq!(engine.country_info("rep of ireland").unwrap().iso, "IE");

    // the Moskva federal subject no longer answers to "moscow"
    assert!(!engine.is_state("moscow", Some("RU")));
    let outcome = engine.csc_scrub(Some("moscow"), None, Some("RU"), &Default::default());
    assert_eq!(outcome.result.unwrap().feature_code, "PPLC");

    // "dublin" means the city, not the county-level division
    let outcome = engine.csc_scrub(Some("dublin"), None, Some("IE"), &Default::default());
    assert_eq!(outcome.result.unwrap().name, "Dublin");
    let sc = engine.sc_scrub("dublin", Some("IE"));
    assert!(sc.result.is_none());
    Ok(())
}

#[test]
fn sc_scrub_state_country_pairs() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let outcome = engine.sc_scrub("nsw", Some("AU"));
    assert_eq!(outcome.result.unwrap().name, "State of New South Wales");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Original));
    assert_score(outcome.score, 0.9);

    // wrong country, but the state is globally unique
    let outcome = engine.sc_scrub("nsw", None);
    assert_eq!(outcome.result.unwrap().name, "State of New South Wales");
    assert_eq!(outcome.cc_status, Some(FieldStatus::Derived));
    assert_score(outcome.score, 0.8);
    Ok(())
}

#[test]
fn storage_roundtrip() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;

    let path = temp_dir().join("geoscrub-test-index.rkyv");
    let storage = Storage::new();
    storage.dump_to(&path, &engine)?;

    let metadata = storage.read_metadata(&path)?.unwrap();
    assert!(metadata.built_at > 0);

    let loaded = Engine::load_from_path(&path)?;
    let outcome = loaded.csc_scrub(Some("Sydney"), Some("NSW"), Some("AU"), &Default::default());
    assert_eq!(outcome.result.unwrap().gid, 2147714);
    assert_score(outcome.score, 1.0);
    Ok(())
}

#[test]
fn load_missing_index_fails() {
    init();
    let err = Engine::load_from_path("/nonexistent/geoscrub-index.rkyv").unwrap_err();
    assert!(err.to_string().contains("index missing"));
}

#[test]
fn index_invariants_hold() -> Result<(), Box<dyn Error>> {
    init();
    let engine = get_engine()?;
    engine.validate()?;
    Ok(())
}

// Relies on dedup behavior for suffixed city pairs (Cranberry vs Cranberry
// City in one state) that is still undecided; keep disabled until the
// intended winner is pinned down.
#[test]
#[ignore]
fn scrub_cranberry_city() {
    let engine = get_engine().unwrap();
    let outcome = engine.csc_scrub(Some("Cranberry City"), Some("PA"), Some("US"), &Default::default());
    assert_eq!(outcome.result.unwrap().name, "Cranberry");
}
