//! HTTP transport with timeout-triggered retry and response classification.
//!
//! Every outbound call of the client goes through [`RetryingTransport`]. The
//! transport is stateless with respect to the session: callers hand it a
//! [`Session`] snapshot whose cookie and CSRF tokens are attached as headers.

use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{COOKIE, HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, StatusCode, Url};

use crate::portal::auth::Session;
use crate::portal::csrf::{CSRF_HEADER, CSRF_TS_HEADER};
use crate::portal::error::ClientError;

/// Lowest retry budget the transport accepts for timed-out requests.
pub const MIN_RETRIES: u32 = 5;

/// Default per-attempt request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Path fragment whose appearance in a redirect target marks an expired session.
pub const DEFAULT_LOGIN_MARKER: &str = "/login";

/// How timed-out requests are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. Budgets below [`MIN_RETRIES`] are raised to it.
    #[must_use]
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(MIN_RETRIES),
            retry_delay,
        }
    }

    /// Additional attempts allowed after the first one.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts, first try included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Pause before each retry.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MIN_RETRIES, DEFAULT_TIMEOUT)
    }
}

/// One logical request: method, path, form parameters and extra headers.
///
/// Paths are resolved against the transport's base URL unless they are
/// already absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    form: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    mutating: bool,
}

impl ApiRequest {
    /// Start a request with an explicit method.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            form: Vec::new(),
            headers: Vec::new(),
            mutating: false,
        }
    }

    /// Start a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Start a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Append a form parameter. Repeated keys are sent repeatedly.
    #[must_use]
    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    /// Append a form parameter for every value.
    #[must_use]
    pub fn form_each<I, V>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.form
            .extend(values.into_iter().map(|v| (key.to_string(), v.into())));
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Mark the request as state-changing, so CSRF tokens are acquired first.
    #[must_use]
    pub const fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    /// Whether the request changes server state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        self.mutating
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Relative or absolute request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Form parameters in insertion order.
    #[must_use]
    pub fn form_fields(&self) -> &[(String, String)] {
        &self.form
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl RawResponse {
    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// All response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body text.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if the body is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, ClientError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ClientError::Decode(format!("parsing response body: {e}")))
    }
}

/// Executes requests with retry on timeout and classifies the outcome.
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
    login_marker: String,
}

impl RetryingTransport {
    /// Start building a transport for the given base URL.
    pub fn builder(base_url: impl Into<String>) -> RetryingTransportBuilder {
        RetryingTransportBuilder::new(base_url)
    }

    /// Retry policy in effect.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Dispatch a request, retrying timeouts, without interpreting the response.
    ///
    /// Attaches the session cookie and, when known, the CSRF headers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TransportTimeout`] once the retry budget is
    /// exhausted, or [`ClientError::TransportError`] for any other fault.
    pub async fn send(
        &self,
        session: Option<&Session>,
        request: &ApiRequest,
    ) -> Result<RawResponse, ClientError> {
        let url = self.resolve(request.path())?;
        let attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("{} {url} (attempt {attempt}/{attempts})", request.method());

            match self.attempt(session, request, url.clone()).await {
                Ok(response) => {
                    debug!("{} {url} -> {}", request.method(), response.status);
                    return Ok(response);
                }
                Err(err) if err.is_timeout() => {
                    if attempt >= attempts {
                        warn!("{} {url} timed out {attempt} times, giving up", request.method());
                        return Err(ClientError::TransportTimeout {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    warn!(
                        "{} {url} timed out (attempt {attempt}/{attempts}), retrying",
                        request.method()
                    );
                    let delay = self.retry.retry_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(ClientError::TransportError(err)),
            }
        }
    }

    /// Dispatch a request and classify the response.
    ///
    /// # Errors
    ///
    /// Besides the transport failures of [`Self::send`]:
    /// - [`ClientError::SessionExpired`] on 401/403 or a redirect to the login page
    /// - [`ClientError::HttpStatus`] on any other non-success status
    /// - [`ClientError::UnexpectedResponse`] when a success body carries a
    ///   non-zero `resultCode`
    pub async fn execute(
        &self,
        session: Option<&Session>,
        request: &ApiRequest,
    ) -> Result<RawResponse, ClientError> {
        let response = self.send(session, request).await?;
        self.classify(response)
    }

    fn classify(&self, response: RawResponse) -> Result<RawResponse, ClientError> {
        let status = response.status;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::SessionExpired);
        }

        if status.is_redirection()
            && response
                .header(LOCATION.as_str())
                .is_some_and(|location| location.contains(&self.login_marker))
        {
            return Err(ClientError::SessionExpired);
        }

        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                body: response.body,
            });
        }

        match application_error(&response.body) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    async fn attempt(
        &self,
        session: Option<&Session>,
        request: &ApiRequest,
        url: Url,
    ) -> Result<RawResponse, reqwest::Error> {
        let mut builder = self.client.request(request.method().clone(), url);

        if let Some(session) = session {
            builder = builder.header(COOKIE, session.cookie());
            if let Some(tokens) = session.csrf() {
                builder = builder
                    .header(CSRF_HEADER, tokens.token.as_str())
                    .header(CSRF_TS_HEADER, tokens.timestamp.as_str());
            }
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url, ClientError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")));
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")))
    }
}

/// Builder for [`RetryingTransport`].
#[derive(Debug)]
pub struct RetryingTransportBuilder {
    base_url: String,
    timeout: Duration,
    retry: Option<RetryPolicy>,
    login_marker: String,
}

impl RetryingTransportBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: None,
            login_marker: DEFAULT_LOGIN_MARKER.to_string(),
        }
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retry policy. Defaults to [`MIN_RETRIES`] retries, each preceded by
    /// a pause of one timeout period.
    #[must_use]
    pub const fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Redirect-target fragment that marks an expired session.
    #[must_use]
    pub fn login_marker(mut self, marker: impl Into<String>) -> Self {
        self.login_marker = marker.into();
        self
    }

    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] for a malformed base URL, or
    /// [`ClientError::TransportError`] if the HTTP client cannot be created.
    pub fn build(self) -> Result<RetryingTransport, ClientError> {
        let mut base = self.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).map_err(|e| ClientError::InvalidUrl(format!("{base}: {e}")))?;

        let client = Client::builder()
            .timeout(self.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(ClientError::TransportError)?;

        Ok(RetryingTransport {
            client,
            base_url,
            retry: self
                .retry
                .unwrap_or_else(|| RetryPolicy::new(MIN_RETRIES, self.timeout)),
            login_marker: self.login_marker,
        })
    }
}

/// Detect an application error embedded in an otherwise successful body.
fn application_error(body: &str) -> Option<ClientError> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let code = value.get("resultCode")?.as_i64()?;
    if code == 0 {
        return None;
    }

    let message = ["userString", "resultString"]
        .iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .map_or_else(|| format!("request failed with result code {code}"), str::to_string);

    Some(ClientError::UnexpectedResponse {
        message,
        result_code: Some(code),
    })
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Instant;

    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::portal::csrf::CsrfTokens;

    fn transport(server: &MockServer) -> RetryingTransport {
        RetryingTransport::builder(server.uri())
            .timeout(Duration::from_millis(500))
            .retry_policy(RetryPolicy::new(MIN_RETRIES, Duration::ZERO))
            .build()
            .expect("transport")
    }

    #[test]
    fn retry_budget_never_drops_below_minimum() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        assert_eq!(policy.max_retries(), MIN_RETRIES);
        assert_eq!(policy.max_attempts(), MIN_RETRIES + 1);

        let generous = RetryPolicy::new(9, Duration::ZERO);
        assert_eq!(generous.max_attempts(), 10);
    }

    #[test]
    fn default_retry_delay_is_one_timeout_period() {
        let transport = RetryingTransport::builder("https://example.com/api")
            .timeout(Duration::from_secs(7))
            .build()
            .expect("transport");
        assert_eq!(transport.retry_policy().retry_delay(), Duration::from_secs(7));
    }

    #[test]
    fn application_error_reads_user_string_first() {
        let err = application_error(r#"{"resultCode": 35, "userString": "taken", "resultString": "other"}"#);
        match err {
            Some(ClientError::UnexpectedResponse {
                message,
                result_code,
            }) => {
                assert_eq!(message, "taken");
                assert_eq!(result_code, Some(35));
            }
            other => panic!("expected unexpected response, got {other:?}"),
        }

        assert!(application_error(r#"{"resultCode": 0}"#).is_none());
        assert!(application_error("<html></html>").is_none());
    }

    #[tokio::test]
    async fn attaches_cookie_and_csrf_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/account/ios/device/listDevices.action"))
            .and(header("cookie", "myacinfo=abcdef;"))
            .and(header("csrf", "top_secret"))
            .and(header("csrf_ts", "123123"))
            .and(body_string_contains("pageSize=10"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"devices": []}"#))
            .expect(1)
            .mount(&server)
            .await;

        let session = Session::new("myacinfo=abcdef;").with_csrf(CsrfTokens {
            token: "top_secret".to_string(),
            timestamp: "123123".to_string(),
        });
        let request = ApiRequest::post("account/ios/device/listDevices.action").form("pageSize", "10");

        let response = transport(&server)
            .execute(Some(&session), &request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_surface_after_the_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(100);
        let transport = RetryingTransport::builder(server.uri())
            .timeout(timeout)
            .build()
            .expect("transport");

        let start = Instant::now();
        let result = transport.send(None, &ApiRequest::get("slow")).await;
        let elapsed = start.elapsed();

        match result {
            Err(ClientError::TransportTimeout { attempts, .. }) => assert!(attempts >= 6),
            other => panic!("expected timeout, got {other:?}"),
        }
        let requests = server.received_requests().await.expect("recorded requests");
        assert!(requests.len() >= 6, "only {} attempts", requests.len());
        assert!(elapsed > timeout * 10, "finished after {elapsed:?}");
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let transport = RetryingTransport::builder(server.uri())
            .timeout(Duration::from_millis(100))
            .retry_policy(RetryPolicy::new(MIN_RETRIES, Duration::ZERO))
            .build()
            .expect("transport");

        let response = transport
            .execute(None, &ApiRequest::get("flaky"))
            .await
            .expect("third attempt succeeds");
        assert_eq!(response.body(), "{}");
        let requests = server.received_requests().await.expect("recorded requests");
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn connection_failures_are_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let transport = RetryingTransport::builder(format!("http://{addr}"))
            .timeout(Duration::from_secs(2))
            .build()
            .expect("transport");

        let start = Instant::now();
        let result = transport.send(None, &ApiRequest::get("anything")).await;
        assert!(matches!(result, Err(ClientError::TransportError(_))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn login_redirect_means_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://idmsa.example.com/login?appIdKey=1"),
            )
            .mount(&server)
            .await;

        let result = transport(&server)
            .execute(Some(&Session::new("myacinfo=old;")), &ApiRequest::get("account"))
            .await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
    }

    #[tokio::test]
    async fn unauthorized_means_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = transport(&server)
            .execute(None, &ApiRequest::post("account/listTeams.action"))
            .await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let result = transport(&server).execute(None, &ApiRequest::get("x")).await;
        match result {
            Err(ClientError::HttpStatus { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected http status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn embedded_error_message_is_passed_through_verbatim() {
        let server = MockServer::start().await;
        let body = r#"{"resultCode": 35, "userString": "Multiple profiles found with the name &#x27;Test Name 3&#x27;.  Please remove the duplicate profiles and try again.\\nThere are no current certificates on this team matching the provided certificate IDs."}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let result = transport(&server)
            .execute(None, &ApiRequest::post("createProvisioningProfile.action"))
            .await;

        let expected = r"Multiple profiles found with the name &#x27;Test Name 3&#x27;.  Please remove the duplicate profiles and try again.\nThere are no current certificates on this team matching the provided certificate IDs.";
        match result {
            Err(err @ ClientError::UnexpectedResponse { .. }) => {
                assert_eq!(err.to_string(), expected);
                assert!(!err.to_string().contains('\n'));
            }
            other => panic!("expected unexpected response, got {other:?}"),
        }
    }

    #[test]
    fn relative_paths_resolve_under_the_base() {
        let transport = RetryingTransport::builder("https://developer.example.com/services-account/QH65B2")
            .build()
            .expect("transport");
        let url = transport
            .resolve("account/listTeams.action")
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://developer.example.com/services-account/QH65B2/account/listTeams.action"
        );

        let absolute = transport
            .resolve("https://idmsa.example.com/IDMSWebAuth/authenticate")
            .expect("url");
        assert_eq!(absolute.host_str(), Some("idmsa.example.com"));
    }
}
