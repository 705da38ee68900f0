//! Netatmo weather API client.
//!
//! Every call asks the [`TokenManager`] for a valid access token first, then
//! issues the request and decodes the `body` of the response envelope.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, error, field::display};

use crate::{
    auth::{Clock, ClientCredentials, SAFETY_MARGIN, SystemClock, TokenEndpoint, TokenManager},
    codec,
    decode::{decode_measurements_with_types, decode_station_data},
    error::{Error, Result},
    model::{MeasureRequest, Measurements, StationData},
    transport::{HttpRequest, ReqwestTransport, Transport},
};

/// Default base URL of the Netatmo API.
pub const DEFAULT_BASE_URL: &str = "https://api.netatmo.com";

/// Configuration for [`NetatmoClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for the API (defaults to production)
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Lead time before token expiry at which tokens are refreshed
    pub safety_margin: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            safety_margin: SAFETY_MARGIN,
        }
    }
}

impl ClientConfig {
    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }
}

#[derive(Debug)]
pub struct NetatmoClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    tokens: TokenManager,
}

impl NetatmoClient {
    /// Create a client talking HTTP through `reqwest`.
    pub fn new(client: ClientCredentials, config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self::with_transport(
            Arc::new(transport),
            Arc::new(SystemClock),
            client,
            config,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        client: ClientCredentials,
        config: ClientConfig,
    ) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let endpoint = TokenEndpoint::new(Arc::clone(&transport), &base_url, client);

        Self {
            transport,
            base_url,
            tokens: TokenManager::new(endpoint, clock, config.safety_margin),
        }
    }

    /// The token manager backing this client.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Fetch the user's stations and their modules.
    pub async fn get_station_data(&self, favorites: bool) -> Result<StationData> {
        let query = vec![("get_favorites".to_string(), favorites.to_string())];
        let body = self.authenticated_get("/api/getstationsdata", query).await?;

        decode_station_data(&body).inspect_err(|e| log_decode_error(e, &body))
    }

    /// Fetch historical measurements for one module.
    pub async fn get_measure(&self, request: &MeasureRequest) -> Result<Measurements> {
        let types = codec::types_for_scale(&request.capabilities, request.scale);

        let mut query = vec![
            ("device_id".to_string(), request.device_id.clone()),
            ("module_id".to_string(), request.module_id.clone()),
            ("scale".to_string(), request.scale.as_str().to_string()),
            ("type".to_string(), codec::type_param(&types)),
        ];
        if let Some(begin) = request.date_begin {
            query.push(("date_begin".to_string(), begin.timestamp().to_string()));
        }
        if let Some(end) = request.date_end {
            query.push(("date_end".to_string(), end.timestamp().to_string()));
        }
        query.extend([
            ("limit".to_string(), request.limit.to_string()),
            ("optimize".to_string(), request.optimize.to_string()),
            ("real_time".to_string(), request.real_time.to_string()),
        ]);

        let body = self.authenticated_get("/api/getmeasure", query).await?;

        decode_measurements_with_types(&body, &types).inspect_err(|e| log_decode_error(e, &body))
    }

    /// Issue a bearer-authenticated GET and return the `body` of the envelope.
    async fn authenticated_get(&self, path: &str, query: Vec<(String, String)>) -> Result<Value> {
        let token = self.tokens.ensure_valid().await?;

        let request = HttpRequest::get(format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .query(query);

        debug!(path, "sending request");
        let mut res = self
            .transport
            .execute(request)
            .await
            .map_err(Error::from)
            .inspect_err(log_error)?;

        let Some(body) = res.body.get_mut("body").map(Value::take) else {
            let err = Error::malformed("response without body", &res.body);
            log_error(&err);
            return Err(err);
        };
        Ok(body)
    }
}

/// Decoding failures are contract violations; log the whole body.
fn log_decode_error(err: &Error, body: &Value) {
    error!(%err, payload = %body, "unexpected response shape");
}

fn log_error(err: &Error) {
    let cause = err.transport().map(display);
    match err.payload() {
        Some(payload) => error!(%err, cause, payload, "request failed"),
        None => error!(%err, cause, "request failed"),
    }
}
