//! Geocoder — address to comune/provincia/regione and a routing macro-area.
//!
//! Talks to an Azure-Maps-style search API: a forward lookup for the
//! coordinates, then a reverse lookup for the administrative names.
//! Every failure becomes a `GeocodeResult::Unresolved` marker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::GeocodeError;
use crate::pipeline::types::{
    ADDRESS_DETAILS_NOT_FOUND, ADDRESS_NOT_FOUND, GeocodeResult, MacroArea,
};

pub const DEFAULT_GEOCODER_API_BASE: &str = "https://atlas.microsoft.com";

pub const DEFAULT_GEOCODER_TIMEOUT: Duration = Duration::from_secs(10);

const API_VERSION: &str = "1.0";

const NORD: &[&str] = &[
    "lombardia",
    "lombardy",
    "piemonte",
    "piedmont",
    "veneto",
    "liguria",
    "friuli venezia giulia",
    "trentino alto adige",
    "trentino south tyrol",
    "valle d'aosta",
    "aosta valley",
];

const CENTRO: &[&str] = &["toscana", "tuscany", "umbria", "lazio", "emilia romagna"];

const SUD: &[&str] = &[
    "marche",
    "abruzzo",
    "campania",
    "puglia",
    "apulia",
    "basilicata",
    "calabria",
    "sicilia",
    "sicily",
    "sardegna",
    "sardinia",
    "molise",
];

/// Map a region name to its macro-area. Case and `-`/space are ignored and
/// a typographic apostrophe counts as `'`;
/// bilingual names like `Trentino-Alto Adige/Südtirol` match on the first half.
pub fn classify_region(regione: &str) -> MacroArea {
    let first = regione.split('/').next().unwrap_or_default();
    let normalized = first
        .to_lowercase()
        .replace('\u{2019}', "'")
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("d' ", "d'");

    if NORD.contains(&normalized.as_str()) {
        MacroArea::Nord
    } else if CENTRO.contains(&normalized.as_str()) {
        MacroArea::Centro
    } else if SUD.contains(&normalized.as_str()) {
        MacroArea::Sud
    } else {
        MacroArea::Unknown
    }
}

/// Resolves free-text addresses.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> GeocodeResult;
}

/// `Geocoder` over the Azure Maps search endpoints.
pub struct AzureMapsGeocoder {
    client: Client,
    api_key: SecretString,
    base: String,
}

impl AzureMapsGeocoder {
    pub fn new(
        api_key: SecretString,
        base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeocodeError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &str) -> Result<serde_json::Value, GeocodeError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .query(&[
                ("api-version", API_VERSION),
                ("query", query),
                ("subscription-key", self.api_key.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| GeocodeError::RequestFailed(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| GeocodeError::RequestFailed(e.without_url().to_string()))
    }

    /// Address to `(lat, lon)`.
    pub async fn forward(&self, address: &str) -> Result<(f64, f64), GeocodeError> {
        let json = self.get_json("/search/address/json", address).await?;
        let position = &json["results"][0]["position"];
        match (position["lat"].as_f64(), position["lon"].as_f64()) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err(GeocodeError::NoMatch),
        }
    }

    /// Coordinates to `(comune, provincia, regione)`; missing names are `N/A`.
    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<(String, String, String), GeocodeError> {
        let json = self
            .get_json("/search/address/reverse/json", &format!("{lat},{lon}"))
            .await?;
        let address = &json["addresses"][0]["address"];
        if address.is_null() {
            return Err(GeocodeError::NoMatch);
        }
        let field = |key: &str| address[key].as_str().unwrap_or("N/A").to_string();
        Ok((
            field("municipality"),
            field("countrySecondarySubdivision"),
            field("countrySubdivision"),
        ))
    }
}

#[async_trait]
impl Geocoder for AzureMapsGeocoder {
    async fn geocode(&self, address: &str) -> GeocodeResult {
        let (lat, lon) = match self.forward(address).await {
            Ok(coords) => coords,
            Err(e) => {
                warn!(address, error = %e, "Forward geocoding failed");
                return GeocodeResult::unresolved(ADDRESS_NOT_FOUND);
            }
        };

        match self.reverse(lat, lon).await {
            Ok((comune, provincia, regione)) => {
                let macro_area = classify_region(&regione);
                debug!(address, %comune, %regione, %macro_area, "Geocoded address");
                GeocodeResult::Resolved {
                    comune,
                    provincia,
                    regione,
                    macro_area,
                }
            }
            Err(e) => {
                warn!(address, lat, lon, error = %e, "Reverse geocoding failed");
                GeocodeResult::unresolved(ADDRESS_DETAILS_NOT_FOUND)
            }
        }
    }
}
