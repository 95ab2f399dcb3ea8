use std::sync::Arc;
use std::time::Instant;

use ntex::web::{self, middleware, App, HttpRequest, HttpResponse};
use ntex_cors::Cors;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geoscrub_core::{CountryRecord, Engine, GeoKind, PlaceRecord, ScrubOptions};

mod settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub struct ScrubQuery {
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    /// include every candidate, not only the winner
    verbose: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CountryQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct NormQuery {
    /// one of `admin1`, `admin2`, `admind`, `cities`
    collection: String,
    country: String,
    name: String,
    /// isolanguage code
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CitiesQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct StatesQuery {
    name: String,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapitalQuery {
    country: String,
}

#[derive(Serialize)]
pub struct PlaceItem<'a> {
    gid: u64,
    name: &'a str,
    country_code: &'a str,
    admin1: Option<&'a str>,
    admin2: Option<&'a str>,
    latitude: f32,
    longitude: f32,
    population: u64,
    feature_code: &'a str,
}

impl<'a> PlaceItem<'a> {
    pub fn from_place(item: &'a PlaceRecord) -> Self {
        PlaceItem {
            gid: item.gid,
            name: &item.name,
            country_code: &item.country_code,
            admin1: item.admin1.as_deref(),
            admin2: item.admin2.as_deref(),
            latitude: item.latitude,
            longitude: item.longitude,
            population: item.population,
            feature_code: &item.feature_code,
        }
    }
}

#[derive(Serialize)]
pub struct CountryItem<'a> {
    gid: u64,
    iso: &'a str,
    iso3: &'a str,
    name: &'a str,
    capital: Option<u64>,
    population: u64,
    languages: &'a [String],
    neighbours: &'a [String],
}

impl<'a> CountryItem<'a> {
    pub fn from_country(item: &'a CountryRecord) -> Self {
        CountryItem {
            gid: item.gid,
            iso: &item.iso,
            iso3: &item.iso3,
            name: &item.name,
            capital: item.capital,
            population: item.population,
            languages: &item.languages,
            neighbours: &item.neighbours,
        }
    }
}

#[derive(Serialize)]
pub struct ScrubResult<'a> {
    result: Option<PlaceItem<'a>>,
    score: f32,
    cc_status: Option<&'static str>,
    st_status: Option<&'static str>,
    count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    candidates: Vec<PlaceItem<'a>>,
    /// elapsed time in ms
    time: usize,
}

#[derive(Serialize)]
pub struct CountryResult<'a> {
    country: Option<CountryItem<'a>>,
    time: usize,
}

#[derive(Serialize)]
pub struct NormResult<'a> {
    name: Option<&'a str>,
    time: usize,
}

#[derive(Serialize)]
pub struct PlacesResult<'a> {
    items: Vec<PlaceItem<'a>>,
    time: usize,
}

#[derive(Serialize)]
pub struct CapitalResult<'a> {
    city: Option<PlaceItem<'a>>,
    time: usize,
}

pub async fn scrub(
    engine: web::types::State<Arc<Engine>>,
    web::types::Query(query): web::types::Query<ScrubQuery>,
    _req: HttpRequest,
) -> HttpResponse {
    let now = Instant::now();

    let outcome = engine.csc_scrub(
        query.city.as_deref(),
        query.state.as_deref(),
        query.country.as_deref(),
        &ScrubOptions {
            verbose: query.verbose.unwrap_or(false),
        },
    );

    HttpResponse::Ok().json(&ScrubResult {
        result: outcome.result.map(PlaceItem::from_place),
        score: outcome.score,
        cc_status: outcome.cc_status.map(|s| s.as_str()),
        st_status: outcome.st_status.map(|s| s.as_str()),
        count: outcome.count,
        candidates: outcome
            .candidates
            .iter()
            .map(|c| PlaceItem::from_place(c))
            .collect(),
        time: now.elapsed().as_millis() as usize,
    })
}

pub async fn country(
    engine: web::types::State<Arc<Engine>>,
    web::types::Query(query): web::types::Query<CountryQuery>,
    _req: HttpRequest,
) -> HttpResponse {
    let now = Instant::now();

    let country = engine
        .country_info(&query.name)
        .map(CountryItem::from_country);

    HttpResponse::Ok().json(&CountryResult {
        country,
        time: now.elapsed().as_millis() as usize,
    })
}

pub async fn norm(
    engine: web::types::State<Arc<Engine>>,
    web::types::Query(query): web::types::Query<NormQuery>,
    _req: HttpRequest,
) -> HttpResponse {
    let now = Instant::now();

    let kind = match query.collection.as_str() {
        "admin1" => GeoKind::Admin1,
        "admin2" => GeoKind::Admin2,
        "admind" => GeoKind::Admd,
        "cities" | "city" => GeoKind::City,
        other => {
            return HttpResponse::BadRequest().body(format!("invalid collection: {other}"));
        }
    };

    let name = engine.norm(kind, &query.country, &query.name, query.lang.as_deref());

    HttpResponse::Ok().json(&NormResult {
        name,
        time: now.elapsed().as_millis() as usize,
    })
}

pub async fn cities(
    engine: web::types::State<Arc<Engine>>,
    web::types::Query(query): web::types::Query<CitiesQuery>,
    _req: HttpRequest,
) -> HttpResponse {
    let now = Instant::now();

    let items = engine
        .find_cities(&query.name)
        .into_iter()
        .map(PlaceItem::from_place)
        .collect();

    HttpResponse::Ok().json(&PlacesResult {
        items,
        time: now.elapsed().as_millis() as usize,
    })
}

pub async fn states(
    engine: web::types::State<Arc<Engine>>,
    web::types::Query(query): web::types::Query<StatesQuery>,
    _req: HttpRequest,
) -> HttpResponse {
    let now = Instant::now();

    let items = engine
        .find_states(&query.name, query.country.as_deref())
        .into_iter()
        .map(PlaceItem::from_place)
        .collect();

    HttpResponse::Ok().json(&PlacesResult {
        items,
        time: now.elapsed().as_millis() as usize,
    })
}

pub async fn capital(
    engine: web::types::State<Arc<Engine>>,
    web::types::Query(query): web::types::Query<CapitalQuery>,
    _req: HttpRequest,
) -> HttpResponse {
    let now = Instant::now();

    let city = engine.capital(&query.country).map(PlaceItem::from_place);

    HttpResponse::Ok().json(&CapitalResult {
        city,
        time: now.elapsed().as_millis() as usize,
    })
}

#[ntex::main]
async fn main() -> std::io::Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer());
    subscriber.init();

    tracing::info!("geoscrub v{VERSION}");

    let settings = settings::Settings::new().expect("On read settings");
    tracing::info!("Settings are:\n{:#?}", settings);

    let index_path = settings.index_path();
    let engine = Engine::load_from_path(&index_path)
        .unwrap_or_else(|e| panic!("On load index from {}: {e}", index_path.display()));

    tracing::info!(
        "Index loaded (built at {}, countries {}, cities {})",
        engine.metadata.built_at,
        engine.data.countries.len(),
        engine.data.cities.len(),
    );

    let shared_engine = Arc::new(engine);
    let settings_clone = settings.clone();

    let listen_on = format!("{}:{}", settings.host, settings.port);
    tracing::info!("Listen on {}", listen_on);

    web::server(move || {
        let shared_engine = shared_engine.clone();
        let settings = settings_clone.clone();

        App::new()
            .state(shared_engine)
            .wrap(middleware::Logger::default())
            .wrap(Cors::default())
            .service(web::scope(&settings.url_path_prefix).service((
                web::resource("/api/scrub").to(scrub),
                web::resource("/api/country").to(country),
                web::resource("/api/norm").to(norm),
                web::resource("/api/cities").to(cities),
                web::resource("/api/states").to(states),
                web::resource("/api/capital").to(capital),
            )))
    })
    .bind(listen_on)?
    .run()
    .await
}
