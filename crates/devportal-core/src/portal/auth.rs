//! Login and session-state management.
//!
//! [`AuthSession`] owns one authenticated session against the portal:
//! 1. `login` exchanges credentials for a session cookie and loads the team list
//! 2. the login form's application key is scraped once, unless configured
//! 3. CSRF tokens are discovered lazily, before the first mutating request
//! 4. every request is dispatched with a [`Session`] snapshot taken at send time

use log::{debug, info};
use reqwest::header::SET_COOKIE;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::config::PortalConfig;
use crate::portal::csrf::{CSRF_HEADER, CSRF_TS_HEADER, CsrfTokenStore, CsrfTokens};
use crate::portal::error::ClientError;
use crate::portal::models::Team;
use crate::portal::transport::{ApiRequest, RawResponse, RetryingTransport};

/// Login credentials. Only lives for the duration of a login call.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Wrap a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Account name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    fn is_incomplete(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Snapshot of an authenticated session.
///
/// The CSRF token and timestamp are held as one optional pair.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    cookie: String,
    csrf: Option<CsrfTokens>,
    default_team_id: Option<String>,
}

impl Session {
    /// A session holding only a cookie.
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            csrf: None,
            default_team_id: None,
        }
    }

    /// Attach a CSRF token pair.
    #[must_use]
    pub fn with_csrf(mut self, tokens: CsrfTokens) -> Self {
        self.csrf = Some(tokens);
        self
    }

    /// Session cookie in `<name>=<value>;` form.
    #[must_use]
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// CSRF tokens, once discovered.
    #[must_use]
    pub const fn csrf(&self) -> Option<&CsrfTokens> {
        self.csrf.as_ref()
    }

    /// CSRF token value.
    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf.as_ref().map(|t| t.token.as_str())
    }

    /// CSRF timestamp value.
    #[must_use]
    pub fn csrf_timestamp(&self) -> Option<&str> {
        self.csrf.as_ref().map(|t| t.timestamp.as_str())
    }

    /// Team used for resource calls.
    #[must_use]
    pub fn default_team_id(&self) -> Option<&str> {
        self.default_team_id.as_deref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookie", &"<redacted>")
            .field("has_csrf", &self.csrf.is_some())
            .field("default_team_id", &self.default_team_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    cookie: String,
    default_team_id: Option<String>,
    teams: Vec<Team>,
}

#[derive(Debug, Clone)]
struct Endpoints {
    login_url: String,
    teams_path: String,
    landing_path: String,
    cookie_name: String,
    api_key_url: String,
}

/// Owns the lifecycle of one authenticated session.
///
/// Lock order is discovery, then CSRF store, then session state. The
/// discovery mutex is the only lock held across a network call; readers
/// that need tokens and state take each read lock in turn.
#[derive(Debug)]
pub struct AuthSession {
    transport: RetryingTransport,
    endpoints: Endpoints,
    api_key: OnceCell<String>,
    state: RwLock<Option<SessionState>>,
    csrf: RwLock<CsrfTokenStore>,
    discovery: Mutex<()>,
}

impl AuthSession {
    /// Create a logged-out session manager.
    #[must_use]
    pub fn new(transport: RetryingTransport, portal: &PortalConfig) -> Self {
        Self {
            transport,
            endpoints: Endpoints {
                login_url: portal.login_url.clone(),
                teams_path: portal.teams_path.clone(),
                landing_path: portal.landing_path.clone(),
                cookie_name: portal.cookie_name.clone(),
                api_key_url: portal.api_key_url.clone(),
            },
            api_key: OnceCell::new_with(portal.app_id_key.clone()),
            state: RwLock::new(None),
            csrf: RwLock::new(CsrfTokenStore::new()),
            discovery: Mutex::new(()),
        }
    }

    /// Transport used for every request.
    #[must_use]
    pub const fn transport(&self) -> &RetryingTransport {
        &self.transport
    }

    /// Log in with a username and password.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidCredentials`] if either field is empty or
    /// the service rejects them, or any transport error raised on the way.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        self.login_with(&Credentials::new(username, password)).await
    }

    /// Log in with prepared [`Credentials`].
    ///
    /// On success the session cookie and team list replace any previous
    /// session, and previously discovered CSRF tokens are dropped. Rejected
    /// credentials also drop any previous session; transport failures leave
    /// it untouched.
    ///
    /// # Errors
    ///
    /// See [`Self::login`].
    pub async fn login_with(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        let result = self.authenticate(credentials).await;
        if matches!(result, Err(ClientError::InvalidCredentials)) {
            self.reset().await;
        }
        result
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        if credentials.is_incomplete() {
            return Err(ClientError::InvalidCredentials);
        }

        let api_key = self.api_key().await?;
        let request = ApiRequest::post(&self.endpoints.login_url)
            .form("appleId", credentials.username.as_str())
            .form("accountPassword", credentials.password.as_str())
            .form("appIdKey", api_key);

        debug!("logging in as {}", credentials.username);
        let response = self.transport.send(None, &request).await?;
        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            debug!("login rejected with status {status}");
            return Err(ClientError::InvalidCredentials);
        }

        let cookie = extract_session_cookie(&response, &self.endpoints.cookie_name)
            .ok_or(ClientError::InvalidCredentials)?;

        let teams = self.fetch_teams(&Session::new(cookie.as_str())).await?;
        let default_team_id = teams.first().map(|t| t.team_id.clone());

        {
            let _discovery = self.discovery.lock().await;
            self.csrf.write().await.clear();
            *self.state.write().await = Some(SessionState {
                cookie: cookie.clone(),
                default_team_id: default_team_id.clone(),
                teams,
            });
        }

        info!("logged in as {}", credentials.username);
        Ok(Session {
            cookie,
            csrf: None,
            default_team_id,
        })
    }

    /// Drop the session: cookie, CSRF tokens and team selection.
    pub async fn logout(&self) {
        self.reset().await;
        info!("logged out");
    }

    async fn reset(&self) {
        let _discovery = self.discovery.lock().await;
        self.csrf.write().await.clear();
        *self.state.write().await = None;
    }

    /// Application key sent with the login form.
    ///
    /// A configured key is used as is. Otherwise the key is read once from
    /// the login link on the configured page and reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the page carries no key,
    /// or any transport error raised while fetching it.
    pub async fn api_key(&self) -> Result<String, ClientError> {
        self.api_key
            .get_or_try_init(|| async {
                let request = ApiRequest::get(&self.endpoints.api_key_url);
                let response = self.transport.execute(None, &request).await?;
                let key = extract_api_key(response.body()).ok_or_else(|| {
                    ClientError::unexpected("login page did not provide an application key")
                })?;
                debug!("discovered application key");
                Ok::<_, ClientError>(key)
            })
            .await
            .cloned()
    }

    /// Whether a login has succeeded and not been reset.
    pub async fn is_logged_in(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Return the CSRF tokens, discovering them on first use.
    ///
    /// Only one discovery request is in flight at a time; concurrent callers
    /// wait for it and reuse its result. Callers that only read the session
    /// are not blocked by a discovery in progress.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] without a session,
    /// [`ClientError::SessionExpired`] if the landing page bounces to login,
    /// or [`ClientError::UnexpectedResponse`] if the tokens are missing.
    pub async fn ensure_csrf_tokens(&self) -> Result<CsrfTokens, ClientError> {
        if let Some(tokens) = self.csrf.read().await.get() {
            return Ok(tokens.clone());
        }

        let _discovery = self.discovery.lock().await;
        if let Some(tokens) = self.csrf.read().await.get() {
            return Ok(tokens.clone());
        }

        let cookie = self.cookie().await?;
        let request = ApiRequest::get(&self.endpoints.landing_path);
        let response = self
            .transport
            .execute(Some(&Session::new(cookie)), &request)
            .await?;

        let tokens = extract_csrf_tokens(&response).ok_or_else(|| {
            ClientError::unexpected("landing page did not provide CSRF tokens")
        })?;
        self.csrf
            .write()
            .await
            .set(tokens.token.as_str(), tokens.timestamp.as_str());

        info!("discovered CSRF tokens");
        Ok(tokens)
    }

    /// Snapshot of the current session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] without a session.
    pub async fn session(&self) -> Result<Session, ClientError> {
        let (cookie, default_team_id) = {
            let state = self.state.read().await;
            let state = state.as_ref().ok_or(ClientError::NotLoggedIn)?;
            (state.cookie.clone(), state.default_team_id.clone())
        };
        let csrf = self.csrf.read().await.get().cloned();

        Ok(Session {
            cookie,
            csrf,
            default_team_id,
        })
    }

    /// Teams available to the account, as loaded at login.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] without a session.
    pub async fn teams(&self) -> Result<Vec<Team>, ClientError> {
        let state = self.state.read().await;
        state
            .as_ref()
            .map(|s| s.teams.clone())
            .ok_or(ClientError::NotLoggedIn)
    }

    /// Store the team resolved by the caller as the one used for resource calls.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] without a session.
    pub async fn select_team(&self, team_id: impl Into<String>) -> Result<(), ClientError> {
        let team_id = team_id.into();
        let mut state = self.state.write().await;
        let state = state.as_mut().ok_or(ClientError::NotLoggedIn)?;
        debug!("using team {team_id}");
        state.default_team_id = Some(team_id);
        Ok(())
    }

    /// Team used for resource calls.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] without a session, or
    /// [`ClientError::NoTeams`] if the account has no team.
    pub async fn team_id(&self) -> Result<String, ClientError> {
        let state = self.state.read().await;
        let state = state.as_ref().ok_or(ClientError::NotLoggedIn)?;
        state.default_team_id.clone().ok_or(ClientError::NoTeams)
    }

    /// Dispatch a request with the current session attached.
    ///
    /// Mutating requests trigger CSRF discovery first; once known, tokens are
    /// attached to every request.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`] from discovery, dispatch or classification.
    pub async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ClientError> {
        if request.is_mutating() {
            self.ensure_csrf_tokens().await?;
        }
        let session = self.session().await?;
        self.transport.execute(Some(&session), request).await
    }

    async fn cookie(&self) -> Result<String, ClientError> {
        let state = self.state.read().await;
        state
            .as_ref()
            .map(|s| s.cookie.clone())
            .ok_or(ClientError::NotLoggedIn)
    }

    async fn fetch_teams(&self, session: &Session) -> Result<Vec<Team>, ClientError> {
        let request = ApiRequest::post(&self.endpoints.teams_path);
        let body = self
            .transport
            .execute(Some(session), &request)
            .await?
            .json()?;

        let teams = body
            .get("teams")
            .cloned()
            .ok_or_else(|| ClientError::Decode("missing teams in team list response".to_string()))?;
        serde_json::from_value(teams)
            .map_err(|e| ClientError::Decode(format!("parsing team list: {e}")))
    }
}

/// Pull `<name>=<value>;` for the session cookie out of the `Set-Cookie` headers.
fn extract_session_cookie(response: &RawResponse, cookie_name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| {
            let pair = value.split(';').next()?.trim();
            let (name, val) = pair.split_once('=')?;
            (name.trim() == cookie_name && !val.is_empty()).then(|| format!("{}={val};", name.trim()))
        })
}

/// Find the hex `appIdKey` query value in a login link.
fn extract_api_key(page: &str) -> Option<String> {
    const MARKER: &str = "appIdKey=";
    page.match_indices(MARKER).find_map(|(start, _)| {
        let rest = &page[start + MARKER.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(rest.len());
        (end > 0).then(|| rest[..end].to_string())
    })
}

/// Read the CSRF pair from response headers, or from a JSON body.
fn extract_csrf_tokens(response: &RawResponse) -> Option<CsrfTokens> {
    if let (Some(token), Some(timestamp)) =
        (response.header(CSRF_HEADER), response.header(CSRF_TS_HEADER))
    {
        return Some(CsrfTokens {
            token: token.to_string(),
            timestamp: timestamp.to_string(),
        });
    }

    let body: serde_json::Value = serde_json::from_str(response.body()).ok()?;
    let token = body.get(CSRF_HEADER)?.as_str()?;
    let timestamp = body.get(CSRF_TS_HEADER)?.as_str()?;
    Some(CsrfTokens {
        token: token.to_string(),
        timestamp: timestamp.to_string(),
    })
}
