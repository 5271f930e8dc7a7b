//! OAuth2 password/refresh-token lifecycle for the identity service.
use crate::error::AuthError;
use crate::http::{HttpClient, HttpResponse};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

pub const USERNAME_VAR: &str = "DS_USER";
pub const PASSWORD_VAR: &str = "DS_PASS";

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Prefers explicit values and falls back to `lookup` (normally the process environment)
    /// for whichever half is missing.
    pub fn resolve(
        username: Option<&str>,
        password: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AuthError> {
        let username = username
            .map(str::to_owned)
            .or_else(|| lookup(USERNAME_VAR))
            .filter(|u| !u.is_empty());
        let password = password
            .map(str::to_owned)
            .or_else(|| lookup(PASSWORD_VAR))
            .filter(|p| !p.is_empty());
        match (username, password) {
            (Some(username), Some(password)) => Ok(Self { username, password }),
            _ => Err(AuthError::MissingCredentials),
        }
    }

    pub fn from_env(username: Option<&str>, password: Option<&str>) -> Result<Self, AuthError> {
        Self::resolve(username, password, |var| std::env::var(var).ok())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct AuthToken {
    access_token: String,
    refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|at| now >= at)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    refresh_expires_in: Option<i64>,
}

fn default_expires_in() -> i64 {
    600
}

/// `issued_at + seconds`, or an error when the lifetime does not fit in a timestamp.
fn expiry(issued_at: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>, AuthError> {
    TimeDelta::try_seconds(seconds.max(0))
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::MalformedResponse(format!("token lifetime out of range: {seconds}s")))
}

impl TokenResponse {
    fn into_token(self, issued_at: DateTime<Utc>) -> Result<AuthToken, AuthError> {
        let refresh_expires_at = match self.refresh_expires_in.filter(|s| *s > 0) {
            Some(seconds) => Some(expiry(issued_at, seconds)?),
            None => None,
        };
        Ok(AuthToken {
            expires_at: expiry(issued_at, self.expires_in)?,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            issued_at,
            refresh_expires_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Unauthenticated,
    Authenticated,
    Expired,
    Invalidated,
}

#[derive(Debug)]
enum TokenState {
    Unauthenticated,
    Authenticated(AuthToken),
    Invalidated,
}

/// Current state plus a counter bumped on every transition, so a refresh can tell whether the
/// session changed while its request was in flight.
#[derive(Debug)]
struct Session {
    state: TokenState,
    generation: u64,
}

impl Session {
    fn set(&mut self, state: TokenState) {
        self.state = state;
        self.generation += 1;
    }

    fn current(&self) -> Result<AuthToken, AuthError> {
        match &self.state {
            TokenState::Authenticated(token) => Ok(token.clone()),
            TokenState::Unauthenticated => Err(AuthError::NotAuthenticated),
            TokenState::Invalidated => Err(AuthError::Invalidated),
        }
    }
}

/// Shared by every concurrent caller. Refreshes are serialized: callers holding the same stale
/// token trigger a single token request and then all use its result.
pub struct TokenManager<H> {
    http: H,
    token_url: Url,
    client_id: String,
    session: Mutex<Session>,
    refreshing: tokio::sync::Mutex<()>,
}

impl<H: HttpClient> TokenManager<H> {
    pub fn new(http: H, token_url: Url, client_id: impl Into<String>) -> Self {
        Self {
            http,
            token_url,
            client_id: client_id.into(),
            session: Mutex::new(Session {
                state: TokenState::Unauthenticated,
                generation: 0,
            }),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> TokenStatus {
        match &self.session().state {
            TokenState::Unauthenticated => TokenStatus::Unauthenticated,
            TokenState::Invalidated => TokenStatus::Invalidated,
            TokenState::Authenticated(token) if token.is_expired(Utc::now()) => {
                TokenStatus::Expired
            }
            TokenState::Authenticated(_) => TokenStatus::Authenticated,
        }
    }

    /// The token currently held, if any.
    pub fn current(&self) -> Result<AuthToken, AuthError> {
        self.session().current()
    }

    /// Exchanges a username/password pair for a fresh token pair (password grant).
    pub async fn acquire(&self, credentials: &Credentials) -> Result<AuthToken, AuthError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("grant_type", "password"),
        ];
        let response = self.http.post_form(&self.token_url, &form).await?;
        let token = Self::parse_token(response)?;
        self.session().set(TokenState::Authenticated(token.clone()));
        info!(username = %credentials.username, "Acquired access token");
        Ok(token)
    }

    /// Exchanges `token`'s refresh token for a new pair. If another caller already replaced
    /// `token`, the stored pair is returned without a request. A refresh token rejected by the
    /// identity service is terminal: the manager is invalidated and the caller has to
    /// [`acquire`](Self::acquire) again. An unavailable identity service leaves the session as is.
    pub async fn refresh(&self, token: &AuthToken) -> Result<AuthToken, AuthError> {
        let _refreshing = self.refreshing.lock().await;
        let generation = {
            let session = self.session();
            match &session.state {
                TokenState::Authenticated(current) if current.refresh_token != token.refresh_token => {
                    debug!("Token already refreshed");
                    return Ok(current.clone());
                }
                TokenState::Authenticated(_) => session.generation,
                _ => return session.current(),
            }
        };

        let form = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", token.refresh_token.as_str()),
        ];
        let response = self.http.post_form(&self.token_url, &form).await?;
        let result = Self::parse_token(response);

        let mut session = self.session();
        if session.generation != generation {
            // Invalidated or re-acquired while the request was in flight.
            return session.current();
        }
        match result {
            Ok(fresh) => {
                session.set(TokenState::Authenticated(fresh.clone()));
                debug!("Refreshed access token");
                Ok(fresh)
            }
            Err(err @ AuthError::Rejected { .. }) => {
                warn!("Refresh token rejected, invalidating session");
                session.set(TokenState::Invalidated);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn invalidate(&self) {
        self.session().set(TokenState::Invalidated);
        info!("Access token invalidated");
    }

    /// GET with the current bearer token. A clock-expired token is refreshed before the call;
    /// an authorization failure triggers at most one refresh and one retry.
    pub async fn authorized_get(&self, url: &Url) -> Result<HttpResponse, AuthError> {
        let mut token = self.current()?;
        let mut refreshed = false;
        if token.is_expired(Utc::now()) {
            token = self.refresh(&token).await?;
            refreshed = true;
        }

        let response = self.http.get(url, Some(token.access_token())).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }
        if refreshed {
            return Err(AuthError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        debug!(status = response.status, "Authorization failed, refreshing once");
        let token = self.refresh(&token).await?;
        let response = self.http.get(url, Some(token.access_token())).await?;
        if response.is_unauthorized() {
            return Err(AuthError::Rejected {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    /// 429 and 5xx mean the identity service could not answer; any other failure status is a
    /// rejection of the submitted grant.
    fn parse_token(response: HttpResponse) -> Result<AuthToken, AuthError> {
        if response.status == 429 || response.status >= 500 {
            return Err(AuthError::Unavailable {
                status: response.status,
                body: response.body,
            });
        }
        if !response.is_success() {
            return Err(AuthError::Rejected {
                status: response.status,
                body: response.body,
            });
        }
        let parsed: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        parsed.into_token(Utc::now())
    }
}
