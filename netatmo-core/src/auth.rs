//! OAuth2 token lifecycle.
//!
//! [`TokenManager`] owns the current credentials and is the only thing that
//! mutates them. Every authenticated call goes through
//! [`TokenManager::ensure_valid`], which refreshes ahead of expiry and makes
//! concurrent callers share a single in-flight refresh: the server rotates
//! refresh tokens, so a second request with the same token would be rejected.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tracing::{error, field::display, info};

use crate::{
    error::{Error, Result, TransportError},
    transport::{HttpRequest, Transport},
};

/// Lead time before expiry at which a token is refreshed.
///
/// Seeded tokens, whose real expiry is unknown, are trusted for one margin
/// and refreshed after that.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(60);

const TOKEN_PATH: &str = "/oauth2/token";

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// OAuth scopes understood by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    ReadStation,
    ReadThermostat,
    WriteThermostat,
    ReadCamera,
    WriteCamera,
    AccessCamera,
    ReadPresence,
    AccessPresence,
    ReadHomecoach,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::ReadStation => "read_station",
            Scope::ReadThermostat => "read_thermostat",
            Scope::WriteThermostat => "write_thermostat",
            Scope::ReadCamera => "read_camera",
            Scope::WriteCamera => "write_camera",
            Scope::AccessCamera => "access_camera",
            Scope::ReadPresence => "read_presence",
            Scope::AccessPresence => "access_presence",
            Scope::ReadHomecoach => "read_homecoach",
        }
    }

    pub const fn all() -> &'static [Scope] {
        &[
            Scope::ReadStation,
            Scope::ReadThermostat,
            Scope::WriteThermostat,
            Scope::ReadCamera,
            Scope::WriteCamera,
            Scope::AccessCamera,
            Scope::ReadPresence,
            Scope::AccessPresence,
            Scope::ReadHomecoach,
        ]
    }

    /// Space-separated scope parameter.
    pub fn join(scopes: &[Scope]) -> String {
        scopes
            .iter()
            .map(Scope::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Scope {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Scope::all()
            .iter()
            .copied()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| anyhow::anyhow!("Unknown scope '{value}'."))
    }
}

/// Application id and secret issued by the vendor.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// An issued token set.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expire_in: Option<i64>,
}

/// Form-encoded calls to the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    transport: Arc<dyn Transport>,
    url: String,
    client: ClientCredentials,
}

impl TokenEndpoint {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, client: ClientCredentials) -> Self {
        Self {
            transport,
            url: format!("{}{TOKEN_PATH}", base_url.trim_end_matches('/')),
            client,
        }
    }

    async fn grant(
        &self,
        grant_type: &str,
        fields: Vec<(&str, &str)>,
        issued_at: DateTime<Utc>,
        previous_refresh: Option<&str>,
    ) -> std::result::Result<Credentials, TransportError> {
        let mut form = vec![
            ("grant_type".to_string(), grant_type.to_string()),
            ("client_id".to_string(), self.client.client_id.clone()),
            ("client_secret".to_string(), self.client.client_secret.clone()),
        ];
        form.extend(fields.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let res = self
            .transport
            .execute(HttpRequest::post_form(&self.url, form))
            .await?;

        let invalid = |message: String| TransportError {
            status: Some(res.status),
            message,
            body: Some(res.body.to_string()),
        };

        let token = TokenResponse::deserialize(&res.body)
            .map_err(|e| invalid(format!("invalid token response: {e}")))?;

        let lifetime = token
            .expires_in
            .or(token.expire_in)
            .ok_or_else(|| invalid("token response without expires_in".to_string()))?;

        let refresh_token = match (token.refresh_token, previous_refresh) {
            (Some(r), _) => r,
            (None, Some(prev)) => prev.to_string(),
            (None, None) => {
                return Err(invalid("token response without refresh_token".to_string()));
            }
        };

        let expires_at = Some(lifetime)
            .filter(|l| *l >= 0)
            .and_then(TimeDelta::try_seconds)
            .and_then(|l| issued_at.checked_add_signed(l))
            .ok_or_else(|| invalid("token response with out-of-range expires_in".to_string()))?;

        Ok(Credentials {
            access_token: token.access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// Externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Unauthenticated,
    Valid,
    Refreshing,
    Failed,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credentials>>>;

enum Phase {
    Unauthenticated,
    Valid(Credentials),
    Refreshing(RefreshFuture),
    Failed(Error),
}

/// Owns the credential set and serializes refreshes.
pub struct TokenManager {
    endpoint: TokenEndpoint,
    clock: Arc<dyn Clock>,
    safety_margin: TimeDelta,
    phase: Mutex<Phase>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl TokenManager {
    pub fn new(endpoint: TokenEndpoint, clock: Arc<dyn Clock>, safety_margin: Duration) -> Self {
        Self {
            endpoint,
            clock,
            safety_margin: TimeDelta::seconds(safety_margin.as_secs() as i64),
            phase: Mutex::new(Phase::Unauthenticated),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TokenState {
        match &*self.lock() {
            Phase::Unauthenticated => TokenState::Unauthenticated,
            Phase::Valid(_) => TokenState::Valid,
            Phase::Refreshing(_) => TokenState::Refreshing,
            Phase::Failed(_) => TokenState::Failed,
        }
    }

    /// Expiry of the current credentials, when there are any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match &*self.lock() {
            Phase::Valid(c) => Some(c.expires_at),
            _ => None,
        }
    }

    /// Install tokens obtained elsewhere.
    ///
    /// Their real lifetime is unknown, so they are trusted for one safety
    /// margin and then refreshed.
    pub fn seed(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        let credentials = Credentials {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: self.clock.now() + self.safety_margin + self.safety_margin,
        };
        *self.lock() = Phase::Valid(credentials);
    }

    /// Install only a refresh token. The first [`ensure_valid`](Self::ensure_valid)
    /// call refreshes.
    pub fn seed_refresh_token(&self, refresh_token: impl Into<String>) {
        let credentials = Credentials {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: self.clock.now(),
        };
        *self.lock() = Phase::Valid(credentials);
    }

    /// Trade an authorization code for a token set.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[Scope],
    ) -> Result<Credentials> {
        info!("Retrieving tokens");
        let scope = Scope::join(scopes);
        let fields = vec![
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ];
        self.acquire("authorization_code", fields).await
    }

    /// Trade a username and password for a token set.
    pub async fn authenticate_with_password(
        &self,
        username: &str,
        password: &str,
        scopes: &[Scope],
    ) -> Result<Credentials> {
        info!("Authenticating with password grant");
        let scope = Scope::join(scopes);
        let fields = vec![
            ("username", username),
            ("password", password),
            ("scope", scope.as_str()),
        ];
        self.acquire("password", fields).await
    }

    async fn acquire(&self, grant_type: &str, fields: Vec<(&str, &str)>) -> Result<Credentials> {
        let issued_at = self.clock.now();
        let outcome = self
            .endpoint
            .grant(grant_type, fields, issued_at, None)
            .await
            .map_err(Error::AuthExchange);

        match &outcome {
            Ok(c) => *self.lock() = Phase::Valid(c.clone()),
            Err(e) => {
                log_failure(e);
                *self.lock() = Phase::Failed(e.clone());
            }
        }
        outcome
    }

    fn needs_refresh(&self, credentials: &Credentials) -> bool {
        self.clock.now() >= credentials.expires_at - self.safety_margin
    }

    /// Return an access token that is good for at least the safety margin,
    /// refreshing first when needed.
    ///
    /// Callers arriving while a refresh is in flight wait for it and get its
    /// outcome; no second refresh request is sent. A failed refresh leaves the
    /// manager in [`TokenState::Failed`] until new tokens are seeded or
    /// exchanged.
    pub async fn ensure_valid(&self) -> Result<String> {
        let pending = {
            let mut phase = self.lock();
            match &*phase {
                Phase::Unauthenticated => return Err(Error::NotAuthenticated),
                Phase::Failed(e) => return Err(e.clone()),
                Phase::Refreshing(pending) => pending.clone(),
                Phase::Valid(c) if !self.needs_refresh(c) => return Ok(c.access_token.clone()),
                Phase::Valid(c) => {
                    let pending = self.start_refresh(c.refresh_token.clone());
                    *phase = Phase::Refreshing(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.clone().await;
        self.settle(&pending, &outcome);
        outcome.map(|c| c.access_token)
    }

    fn start_refresh(&self, refresh_token: String) -> RefreshFuture {
        let endpoint = self.endpoint.clone();
        let clock = Arc::clone(&self.clock);

        async move {
            info!("Refreshing token");
            let fields = vec![("refresh_token", refresh_token.as_str())];
            let outcome = endpoint
                .grant("refresh_token", fields, clock.now(), Some(refresh_token.as_str()))
                .await
                .map_err(Error::TokenRefresh);

            if let Err(e) = &outcome {
                log_failure(e);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Record a finished refresh, unless the credentials were replaced while
    /// it was in flight.
    fn settle(&self, pending: &RefreshFuture, outcome: &Result<Credentials>) {
        let mut phase = self.lock();
        let current = matches!(&*phase, Phase::Refreshing(p) if p.ptr_eq(pending));
        if current {
            *phase = match outcome {
                Ok(c) => Phase::Valid(c.clone()),
                Err(e) => Phase::Failed(e.clone()),
            };
        }
    }
}

fn log_failure(err: &Error) {
    let cause = err.transport().map(display);
    match err.payload() {
        Some(payload) => error!(%err, cause, payload, "token request failed"),
        None => error!(%err, cause, "token request failed"),
    }
}
