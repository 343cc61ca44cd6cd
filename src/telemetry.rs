// Telemetry provider: signed HTTP client, record decoding and the retrying front used by jobs.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{error, instrument, warn};

use crate::config::ApiConfig;
use crate::models::{ConnectStatus, StationId, StationReading, UserConnection};

type HmacSha256 = Hmac<Sha256>;

const ONLINE_USERS_URI: &str = "/openapi/broadcast/online-users";
const STATIONS_URI: &str = "/openapi/stream/stations";
const DYNAMIC_INFO_URI: &str = "/openapi/stream/stations/dynamic-info";
const SUCCESS_CODE: &str = "SUCCESS";
// Upper bound on pages walked per listing.
const MAX_PAGES: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("{uri} returned HTTP {status}")]
    Http { uri: String, status: u16 },

    #[error("{uri} returned API code {code}")]
    Api { uri: String, code: String },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response from {uri}: {reason}")]
    Decode { uri: String, reason: String },

    #[error("signing error: {0}")]
    Signing(String),
}

/// Result of a retried fetch. Exhaustion is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    Ready(T),
    Unavailable,
}

impl<T> Fetch<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Total record count when the provider reports it.
    pub total: Option<u64>,
}

/// Static station attributes from the station listing.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInfo {
    pub id: StationId,
    pub station_name: String,
    pub identification_name: String,
}

/// Live connectivity of one station from the dynamic-info endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StationStatus {
    pub station_id: StationId,
    pub station_name: String,
    pub connect_status: ConnectStatus,
}

/// Raw provider calls. One call, one attempt; retry and paging live in [`Telemetry`].
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn online_users(&self, page: u32, size: u32)
    -> Result<Page<UserConnection>, TelemetryError>;

    async fn list_stations(&self, page: u32, size: u32) -> Result<Page<StationInfo>, TelemetryError>;

    async fn station_statuses(&self, ids: &[StationId])
    -> Result<Vec<StationStatus>, TelemetryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failure (0-based): base * 2^(attempt + 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt + 1)
    }
}

impl From<&ApiConfig> for RetryPolicy {
    fn from(cfg: &ApiConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }
}

/// Runs `call` up to `policy.max_attempts` times with exponential backoff between attempts.
pub async fn fetch_with_retry<T, F, Fut>(operation: &str, policy: RetryPolicy, mut call: F) -> Fetch<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TelemetryError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match call().await {
            Ok(value) => return Fetch::Ready(value),
            Err(e) => {
                warn!(operation, attempt = attempt + 1, error = %e, "Telemetry call failed");
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }
    error!(operation, attempts, "Telemetry unavailable after retries");
    Fetch::Unavailable
}

/// Retrying, paginating front over a [`TelemetrySource`].
#[derive(Clone)]
pub struct Telemetry {
    source: Arc<dyn TelemetrySource>,
    retry: RetryPolicy,
    page_size: u32,
}

impl Telemetry {
    pub fn new(source: Arc<dyn TelemetrySource>, retry: RetryPolicy, page_size: u32) -> Self {
        Self {
            source,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// Every online user connection across all pages.
    pub async fn fetch_online_users(&self) -> Fetch<Vec<UserConnection>> {
        fetch_with_retry("online_users", self.retry, || async {
            collect_pages(self.page_size, |page, size| self.source.online_users(page, size)).await
        })
        .await
    }

    /// Full station list merged with live status. An empty station list or an empty
    /// status response counts as unavailable.
    pub async fn fetch_stations(&self) -> Fetch<Vec<StationReading>> {
        let Fetch::Ready(infos) = fetch_with_retry("list_stations", self.retry, || async {
            collect_pages(self.page_size, |page, size| self.source.list_stations(page, size)).await
        })
        .await
        else {
            return Fetch::Unavailable;
        };
        if infos.is_empty() {
            error!(operation = "list_stations", "Provider returned no stations");
            return Fetch::Unavailable;
        }

        let ids: Vec<StationId> = infos.iter().map(|s| s.id.clone()).collect();
        let Fetch::Ready(statuses) = fetch_with_retry("station_statuses", self.retry, || {
            self.source.station_statuses(&ids)
        })
        .await
        else {
            return Fetch::Unavailable;
        };

        let readings = merge_station_info(&infos, statuses);
        if readings.is_empty() {
            error!(operation = "station_statuses", stations = infos.len(), "Provider returned no usable station status");
            return Fetch::Unavailable;
        }
        Fetch::Ready(readings)
    }
}

/// Identification names come from the listing; name and status from the live call.
pub fn merge_station_info(infos: &[StationInfo], statuses: Vec<StationStatus>) -> Vec<StationReading> {
    let idents: HashMap<&StationId, &str> = infos
        .iter()
        .map(|s| (&s.id, s.identification_name.as_str()))
        .collect();
    statuses
        .into_iter()
        .map(|s| StationReading {
            identification_name: idents
                .get(&s.station_id)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            station_id: s.station_id,
            station_name: s.station_name,
            connect_status: s.connect_status,
        })
        .collect()
}

async fn collect_pages<T, F, Fut>(size: u32, mut fetch: F) -> Result<Vec<T>, TelemetryError>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, TelemetryError>>,
{
    let mut all = Vec::new();
    for page in 1..=MAX_PAGES {
        let Page { records, total } = fetch(page, size).await?;
        let short_page = records.len() < size as usize;
        all.extend(records);
        let complete = total.is_some_and(|t| all.len() as u64 >= t);
        if short_page || complete {
            break;
        }
    }
    Ok(all)
}

/// Hex HMAC-SHA256 over `"{METHOD} {URI} {k1=v1&k2=v2...}"`, header names lowercased and sorted.
pub fn sign(
    secret: &str,
    method: &str,
    uri: &str,
    headers: &[(&str, String)],
) -> Result<String, TelemetryError> {
    let sorted: BTreeMap<String, &str> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect();
    let header_string = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let payload = format!("{method} {uri} {header_string}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TelemetryError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// HTTP implementation of [`TelemetrySource`].
pub struct ApiClient {
    client: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
    sign_method: String,
}

impl ApiClient {
    pub fn new(cfg: &ApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build telemetry HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            access_key: cfg
                .access_key
                .clone()
                .context("api.access_key is missing (set API_ACCESS_KEY)")?,
            secret_key: cfg
                .secret_key
                .clone()
                .context("api.secret_key is missing (set API_SECRET_KEY)")?,
            sign_method: cfg.sign_method.clone(),
        })
    }

    /// Sends one signed request and returns the `data` member of a successful envelope.
    #[instrument(skip(self, query, body), fields(operation = "telemetry_call"))]
    async fn call(
        &self,
        method: Method,
        uri: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, TelemetryError> {
        let x_headers = [
            ("X-Nonce", uuid::Uuid::new_v4().simple().to_string()),
            ("X-Access-Key", self.access_key.clone()),
            ("X-Sign-Method", self.sign_method.clone()),
            ("X-Timestamp", chrono::Utc::now().timestamp_millis().to_string()),
        ];
        let signature = sign(&self.secret_key, method.as_str(), uri, &x_headers)?;

        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, uri))
            .query(query)
            .header("Sign", signature)
            .header("Accept-Language", "en-US");
        for (name, value) in &x_headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::Http {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }
        let envelope: Value = response.json().await?;
        unwrap_envelope(uri, envelope)
    }
}

#[async_trait]
impl TelemetrySource for ApiClient {
    async fn online_users(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Page<UserConnection>, TelemetryError> {
        let data = self
            .call(
                Method::GET,
                ONLINE_USERS_URI,
                &[("page", page.to_string()), ("size", size.to_string())],
                None,
            )
            .await?;
        decode_page(ONLINE_USERS_URI, &data, decode_user)
    }

    async fn list_stations(&self, page: u32, size: u32) -> Result<Page<StationInfo>, TelemetryError> {
        let data = self
            .call(
                Method::GET,
                STATIONS_URI,
                &[
                    ("page", page.to_string()),
                    ("size", size.to_string()),
                    ("count", "true".to_string()),
                ],
                None,
            )
            .await?;
        decode_page(STATIONS_URI, &data, decode_station_info)
    }

    async fn station_statuses(
        &self,
        ids: &[StationId],
    ) -> Result<Vec<StationStatus>, TelemetryError> {
        let body = json!({ "ids": ids.iter().map(StationId::to_json).collect::<Vec<_>>() });
        let data = self
            .call(Method::POST, DYNAMIC_INFO_URI, &[], Some(body))
            .await?;
        let items = data.as_array().ok_or_else(|| TelemetryError::Decode {
            uri: DYNAMIC_INFO_URI.to_string(),
            reason: "data is not an array".to_string(),
        })?;
        Ok(decode_records(DYNAMIC_INFO_URI, items, decode_station_status))
    }
}

/// `{"code": "SUCCESS", "data": ...}` → `data`; any other code is an API failure.
pub fn unwrap_envelope(uri: &str, mut envelope: Value) -> Result<Value, TelemetryError> {
    let code = envelope
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if code != SUCCESS_CODE {
        return Err(TelemetryError::Api {
            uri: uri.to_string(),
            code,
        });
    }
    match envelope.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(TelemetryError::Decode {
            uri: uri.to_string(),
            reason: "missing data".to_string(),
        }),
    }
}

/// `data.records` with an optional `data.total`.
pub fn decode_page<T>(
    uri: &str,
    data: &Value,
    decode: fn(&Value) -> Option<T>,
) -> Result<Page<T>, TelemetryError> {
    let records = data
        .get("records")
        .and_then(Value::as_array)
        .ok_or_else(|| TelemetryError::Decode {
            uri: uri.to_string(),
            reason: "data.records is not an array".to_string(),
        })?;
    Ok(Page {
        records: decode_records(uri, records, decode),
        total: data.get("total").and_then(Value::as_u64),
    })
}

fn decode_records<T>(uri: &str, items: &[Value], decode: fn(&Value) -> Option<T>) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| {
            let decoded = decode(item);
            if decoded.is_none() {
                warn!(uri, record = %item, "Skipping malformed telemetry record");
            }
            decoded
        })
        .collect()
}

fn decode_user(v: &Value) -> Option<UserConnection> {
    Some(UserConnection {
        station_group: v
            .get("masterStationName")
            .and_then(Value::as_str)
            .unwrap_or(crate::aggregation::UNKNOWN_STATION)
            .to_string(),
        status: v.get("status")?.as_i64()?,
    })
}

fn decode_station_info(v: &Value) -> Option<StationInfo> {
    Some(StationInfo {
        id: StationId::from_json(v.get("id")?)?,
        station_name: v.get("stationName")?.as_str()?.trim().to_string(),
        identification_name: v
            .get("identificationName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn decode_station_status(v: &Value) -> Option<StationStatus> {
    Some(StationStatus {
        station_id: StationId::from_json(v.get("stationId")?)?,
        station_name: v.get("stationName")?.as_str()?.trim().to_string(),
        connect_status: ConnectStatus::from_code(v.get("connectStatus")?.as_i64()?)?,
    })
}
