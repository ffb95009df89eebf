//! HTTP geocoders behind one [`GeoProvider`] trait.
//!
//! Every provider returns raw hits; acceptance (country, place level,
//! name match, bounding box) is decided by the resolver so all backends
//! are held to the same rules.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const VISICOM_URL: &str = "https://api.visicom.ua/data-api/5.0/uk/geocode.json";
const OPENCAGE_URL: &str = "https://api.opencagedata.com/geocode/v1/json";
const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const DEFAULT_USER_AGENT: &str = "alert-relay/0.1";
const MAX_HITS: &str = "5";

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Daily / monthly allowance used up; the provider is useless until
    /// restart.
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Administrative level of a hit.  Only settlements are ever accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceLevel {
    Settlement,
    District,
    Region,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub name: String,
    /// First-level region as the provider spells it.
    pub region: Option<String>,
    pub country_code: Option<String>,
    pub level: PlaceLevel,
    pub lat: f64,
    pub lon: f64,
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, city: &str, region_hint: Option<&str>) -> Result<Vec<GeoHit>, ProviderError>;
}

fn query_text(city: &str, region_hint: Option<&str>) -> String {
    match region_hint {
        Some(region) => format!("{city}, {}", region.replace(" обл.", " область")),
        None => city.to_string(),
    }
}

/// Map a non-success status to an error.  `quota` lists the statuses the
/// provider uses for "allowance exhausted".
fn check_status(status: StatusCode, quota: &[u16]) -> Result<(), ProviderError> {
    if status.is_success() {
        Ok(())
    } else if quota.contains(&status.as_u16()) {
        Err(ProviderError::QuotaExceeded)
    } else {
        Err(ProviderError::Status(status.as_u16()))
    }
}

// ───────────────────────────── Visicom ───────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum VisicomResponse {
    Collection { features: Vec<VisicomFeature> },
    Single(VisicomFeature),
    /// `{}` when nothing matched.
    Empty(serde_json::Value),
}

#[derive(Deserialize)]
struct VisicomFeature {
    properties: VisicomProperties,
    geo_centroid: Option<PointGeometry>,
}

#[derive(Deserialize)]
struct VisicomProperties {
    name: String,
    #[serde(default)]
    categories: String,
    #[serde(default)]
    level1: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Deserialize)]
struct PointGeometry {
    /// GeoJSON order: `[lon, lat]`.
    coordinates: (f64, f64),
}

pub struct VisicomProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl VisicomProvider {
    pub fn new(client: Client, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }
}

fn visicom_level(categories: &str) -> PlaceLevel {
    if categories.contains("adm_settlement") {
        PlaceLevel::Settlement
    } else if categories.contains("adm_level1") {
        PlaceLevel::Region
    } else if categories.contains("adm_level2") || categories.contains("adm_district") {
        PlaceLevel::District
    } else {
        PlaceLevel::Other
    }
}

#[async_trait]
impl GeoProvider for VisicomProvider {
    fn name(&self) -> &'static str {
        "visicom"
    }

    async fn lookup(&self, city: &str, region_hint: Option<&str>) -> Result<Vec<GeoHit>, ProviderError> {
        let text = query_text(city, region_hint);
        let response = self
            .client
            .get(VISICOM_URL)
            .timeout(self.timeout)
            .query(&[
                ("text", text.as_str()),
                ("categories", "adm_settlement"),
                ("country", "ua"),
                ("limit", MAX_HITS),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        check_status(response.status(), &[402, 403])?;

        let features = match response.json::<VisicomResponse>().await? {
            VisicomResponse::Collection { features } => features,
            VisicomResponse::Single(feature) => vec![feature],
            VisicomResponse::Empty(_) => Vec::new(),
        };
        Ok(features
            .into_iter()
            .filter_map(|f| {
                let (lon, lat) = f.geo_centroid?.coordinates;
                Some(GeoHit {
                    level: visicom_level(&f.properties.categories),
                    name: f.properties.name,
                    region: f.properties.level1,
                    country_code: f.properties.country_code.or_else(|| Some("ua".into())),
                    lat,
                    lon,
                })
            })
            .collect())
    }
}

// ───────────────────────────── OpenCage ──────────────────────────────────

#[derive(Deserialize)]
struct OpenCageResponse {
    #[serde(default)]
    results: Vec<OpenCageResult>,
}

#[derive(Deserialize)]
struct OpenCageResult {
    components: OpenCageComponents,
    geometry: OpenCageGeometry,
}

#[derive(Deserialize)]
struct OpenCageComponents {
    #[serde(rename = "_type", default)]
    kind: String,
    state: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    hamlet: Option<String>,
}

#[derive(Deserialize)]
struct OpenCageGeometry {
    lat: f64,
    lng: f64,
}

pub struct OpenCageProvider {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl OpenCageProvider {
    pub fn new(client: Client, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }
}

fn place_level(kind: &str) -> PlaceLevel {
    match kind {
        "city" | "town" | "village" | "hamlet" | "suburb" | "neighbourhood" => PlaceLevel::Settlement,
        "state" => PlaceLevel::Region,
        "county" | "district" | "state_district" | "municipality" => PlaceLevel::District,
        _ => PlaceLevel::Other,
    }
}

#[async_trait]
impl GeoProvider for OpenCageProvider {
    fn name(&self) -> &'static str {
        "opencage"
    }

    async fn lookup(&self, city: &str, region_hint: Option<&str>) -> Result<Vec<GeoHit>, ProviderError> {
        let q = query_text(city, region_hint);
        let response = self
            .client
            .get(OPENCAGE_URL)
            .timeout(self.timeout)
            .query(&[
                ("q", q.as_str()),
                ("key", self.api_key.as_str()),
                ("countrycode", "ua"),
                ("language", "uk"),
                ("limit", MAX_HITS),
                ("no_annotations", "1"),
            ])
            .send()
            .await?;
        check_status(response.status(), &[402])?;

        let body: OpenCageResponse = response.json().await?;
        Ok(body
            .results
            .into_iter()
            .filter_map(|r| {
                let c = r.components;
                let name = c.city.or(c.town).or(c.village).or(c.hamlet)?;
                Some(GeoHit {
                    name,
                    region: c.state,
                    country_code: c.country_code,
                    level: place_level(&c.kind),
                    lat: r.geometry.lat,
                    lon: r.geometry.lng,
                })
            })
            .collect())
    }
}

// ───────────────────────────── Nominatim ─────────────────────────────────

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    addresstype: String,
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Deserialize, Default)]
struct NominatimAddress {
    state: Option<String>,
    country_code: Option<String>,
}

pub struct NominatimProvider {
    client: Client,
    user_agent: String,
    timeout: Duration,
}

impl NominatimProvider {
    pub fn new(client: Client, user_agent: String, timeout: Duration) -> Self {
        Self {
            client,
            user_agent,
            timeout,
        }
    }
}

#[async_trait]
impl GeoProvider for NominatimProvider {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn lookup(&self, city: &str, region_hint: Option<&str>) -> Result<Vec<GeoHit>, ProviderError> {
        let q = query_text(city, region_hint);
        let response = self
            .client
            .get(NOMINATIM_URL)
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .query(&[
                ("q", q.as_str()),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("countrycodes", "ua"),
                ("accept-language", "uk"),
                ("limit", MAX_HITS),
            ])
            .send()
            .await?;
        check_status(response.status(), &[])?;

        let places: Vec<NominatimPlace> = response.json().await?;
        Ok(places
            .into_iter()
            .filter_map(|p| {
                let lat = p.lat.parse().ok()?;
                let lon = p.lon.parse().ok()?;
                Some(GeoHit {
                    name: p.name,
                    region: p.address.state,
                    country_code: p.address.country_code,
                    level: place_level(&p.addresstype),
                    lat,
                    lon,
                })
            })
            .collect())
    }
}

// ───────────────────────────── Config ────────────────────────────────────

/// Build the provider chain from environment variables, in priority order.
///
/// | Env var                | Default           | Description                      |
/// |------------------------|-------------------|----------------------------------|
/// | `VISICOM_API_KEY`      | —                 | Enables Visicom (first choice)   |
/// | `OPENCAGE_API_KEY`     | —                 | Enables OpenCage                 |
/// | `NOMINATIM_ENABLED`    | `true`            | Enables OSM Nominatim (last)     |
/// | `NOMINATIM_USER_AGENT` | `alert-relay/0.1` | Required by the Nominatim policy |
/// | `GEOCODER_TIMEOUT_MS`  | `4000`            | Per-request timeout              |
pub fn providers_from_env() -> Vec<Box<dyn GeoProvider>> {
    let timeout = geocoder_timeout_from_env();
    let client = Client::new();
    let mut chain: Vec<Box<dyn GeoProvider>> = Vec::new();

    if let Some(key) = non_empty_env("VISICOM_API_KEY") {
        chain.push(Box::new(VisicomProvider::new(client.clone(), key, timeout)));
    }
    if let Some(key) = non_empty_env("OPENCAGE_API_KEY") {
        chain.push(Box::new(OpenCageProvider::new(client.clone(), key, timeout)));
    }
    let nominatim = std::env::var("NOMINATIM_ENABLED")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    if nominatim {
        let agent = non_empty_env("NOMINATIM_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.into());
        chain.push(Box::new(NominatimProvider::new(client, agent, timeout)));
    }

    let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
    info!("Geocoder chain: [{}], timeout={}ms", names.join(", "), timeout.as_millis());
    chain
}

pub fn geocoder_timeout_from_env() -> Duration {
    let ms = std::env::var("GEOCODER_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4000);
    debug!("GEOCODER_TIMEOUT_MS={ms}");
    Duration::from_millis(ms)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_hint_is_spelled_out_in_the_query() {
        assert_eq!(query_text("Богодухів", Some("Харківська обл.")), "Богодухів, Харківська область");
        assert_eq!(query_text("Суми", None), "Суми");
    }

    #[test]
    fn quota_statuses_are_distinguished() {
        assert!(matches!(check_status(StatusCode::PAYMENT_REQUIRED, &[402]), Err(ProviderError::QuotaExceeded)));
        assert!(matches!(check_status(StatusCode::FORBIDDEN, &[402]), Err(ProviderError::Status(403))));
        assert!(check_status(StatusCode::OK, &[402]).is_ok());
    }

    #[test]
    fn visicom_payload_shapes_decode() {
        let collection = r#"{"type":"FeatureCollection","features":[{"type":"Feature",
            "properties":{"name":"Богодухів","categories":"adm_settlement","level1":"Харківська область","country_code":"ua"},
            "geo_centroid":{"type":"Point","coordinates":[35.52,50.16]}}]}"#;
        match serde_json::from_str::<VisicomResponse>(collection).unwrap() {
            VisicomResponse::Collection { features } => {
                assert_eq!(features.len(), 1);
                assert_eq!(visicom_level(&features[0].properties.categories), PlaceLevel::Settlement);
                assert_eq!(features[0].geo_centroid.as_ref().unwrap().coordinates, (35.52, 50.16));
            }
            _ => panic!("expected a collection"),
        }
        assert!(matches!(serde_json::from_str::<VisicomResponse>("{}").unwrap(), VisicomResponse::Empty(_)));
    }

    #[test]
    fn nominatim_payload_decodes() {
        let body = r#"[{"lat":"50.9077","lon":"34.7981","name":"Суми","addresstype":"city",
            "address":{"city":"Суми","state":"Сумська область","country_code":"ua"}}]"#;
        let places: Vec<NominatimPlace> = serde_json::from_str(body).unwrap();
        assert_eq!(places[0].address.state.as_deref(), Some("Сумська область"));
        assert_eq!(place_level(&places[0].addresstype), PlaceLevel::Settlement);
        assert_eq!(place_level("state"), PlaceLevel::Region);
    }
}
