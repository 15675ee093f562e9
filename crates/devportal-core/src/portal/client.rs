//! Developer portal client.
//!
//! Wraps an [`AuthSession`] and a [`Paginator`] and maps each resource
//! operation (apps, devices, certificates, provisioning profiles) onto a
//! request. List calls are paged; create, delete and revoke calls are marked
//! mutating so the session acquires CSRF tokens before sending them.

use std::time::Duration;

use log::debug;

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::portal::auth::AuthSession;
use crate::portal::error::ClientError;
use crate::portal::models::{AppIdKind, Record};
use crate::portal::paginate::{PageRequest, Paginator, records_from_page};
use crate::portal::transport::{ApiRequest, RetryPolicy, RetryingTransport};

const LIST_APPS: &str = "account/ios/identifiers/listAppIds.action";
const ADD_APP: &str = "account/ios/identifiers/addAppId.action";
const DELETE_APP: &str = "account/ios/identifiers/deleteAppId.action";
const LIST_DEVICES: &str = "account/ios/device/listDevices.action";
const ADD_DEVICE: &str = "account/ios/device/addDevice.action";
const LIST_CERTIFICATES: &str = "account/ios/certificate/listCertRequests.action";
const SUBMIT_CERTIFICATE: &str = "account/ios/certificate/submitCertificateRequest.action";
const REVOKE_CERTIFICATE: &str = "account/ios/certificate/revokeCertificate.action";
const LIST_PROFILES: &str = "account/ios/profile/listProvisioningProfiles.action";
const CREATE_PROFILE: &str = "account/ios/profile/createProvisioningProfile.action";
const DELETE_PROFILE: &str = "account/ios/profile/deleteProvisioningProfile.action";

/// Developer portal API client.
#[derive(Debug)]
pub struct PortalClient {
    session: AuthSession,
    paginator: Paginator,
}

impl PortalClient {
    /// Assemble a client from its parts.
    #[must_use]
    pub const fn new(session: AuthSession, paginator: Paginator) -> Self {
        Self { session, paginator }
    }

    /// Build a client from the application configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URLs are invalid or the HTTP client
    /// cannot be created.
    pub fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        let timeout = Duration::from_secs(config.http.timeout_secs.max(1));
        let retry_delay = config
            .http
            .retry_delay_secs
            .map_or(timeout, Duration::from_secs);

        let transport = RetryingTransport::builder(&config.portal.base_url)
            .timeout(timeout)
            .retry_policy(RetryPolicy::new(config.http.max_retries, retry_delay))
            .login_marker(&config.portal.login_path_marker)
            .build()?;

        let session = AuthSession::new(transport, &config.portal);
        Ok(Self::new(session, Paginator::new(config.http.page_size)))
    }

    /// The underlying session.
    #[must_use]
    pub const fn session(&self) -> &AuthSession {
        &self.session
    }

    /// List all app identifiers.
    ///
    /// # Errors
    ///
    /// Returns any [`ClientError`] raised while fetching a page.
    pub async fn apps(&self) -> Result<Vec<Record>, ClientError> {
        self.list(LIST_APPS, "appIds", Vec::new()).await
    }

    /// Register an app identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it.
    pub async fn create_app(
        &self,
        kind: AppIdKind,
        name: &str,
        bundle_id: &str,
    ) -> Result<Record, ClientError> {
        let request = self
            .team_request(ADD_APP)
            .await?
            .form("type", kind.as_str())
            .form("name", name)
            .form("identifier", bundle_id)
            .mutating();
        self.record(&request, Some("appId")).await
    }

    /// Delete an app identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it.
    pub async fn delete_app(&self, app_id: &str) -> Result<Record, ClientError> {
        let request = self
            .team_request(DELETE_APP)
            .await?
            .form("appIdId", app_id)
            .mutating();
        self.record(&request, None).await
    }

    /// List all registered devices.
    ///
    /// # Errors
    ///
    /// Returns any [`ClientError`] raised while fetching a page.
    pub async fn devices(&self) -> Result<Vec<Record>, ClientError> {
        self.list(LIST_DEVICES, "devices", Vec::new()).await
    }

    /// Register a device by name and UDID.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it.
    pub async fn create_device(&self, name: &str, udid: &str) -> Result<Record, ClientError> {
        let request = self
            .team_request(ADD_DEVICE)
            .await?
            .form("name", name)
            .form("deviceNumber", udid)
            .mutating();
        self.record(&request, Some("device")).await
    }

    /// List certificates of the given type ids.
    ///
    /// # Errors
    ///
    /// Returns any [`ClientError`] raised while fetching a page.
    pub async fn certificates(&self, type_ids: &[String]) -> Result<Vec<Record>, ClientError> {
        let types = vec![("types", type_ids.join(","))];
        self.list(LIST_CERTIFICATES, "certRequests", types).await
    }

    /// Submit a certificate signing request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it.
    pub async fn create_certificate(
        &self,
        type_id: &str,
        csr: &str,
        app_id: Option<&str>,
    ) -> Result<Record, ClientError> {
        let mut request = self
            .team_request(SUBMIT_CERTIFICATE)
            .await?
            .form("type", type_id)
            .form("csrContent", csr);
        if let Some(app_id) = app_id {
            request = request.form("appIdId", app_id);
        }
        self.record(&request.mutating(), Some("certRequest")).await
    }

    /// Revoke a certificate. Returns the revoked certificate records.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it.
    pub async fn revoke_certificate(
        &self,
        certificate_id: &str,
        type_id: &str,
    ) -> Result<Vec<Record>, ClientError> {
        let request = self
            .team_request(REVOKE_CERTIFICATE)
            .await?
            .form("certificateId", certificate_id)
            .form("type", type_id)
            .mutating();
        let body = self.session.send(&request).await?.json()?;
        records_from_page(&body, "certRequests")
    }

    /// List all provisioning profiles.
    ///
    /// # Errors
    ///
    /// Returns any [`ClientError`] raised while fetching a page.
    pub async fn provisioning_profiles(&self) -> Result<Vec<Record>, ClientError> {
        self.list(LIST_PROFILES, "provisioningProfiles", Vec::new()).await
    }

    /// Create a provisioning profile.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it,
    /// for example when the name is already taken.
    pub async fn create_provisioning_profile(
        &self,
        name: &str,
        distribution_method: &str,
        app_id: &str,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Record, ClientError> {
        let request = self
            .team_request(CREATE_PROFILE)
            .await?
            .form("provisioningProfileName", name)
            .form("appIdId", app_id)
            .form("distributionType", distribution_method)
            .form_each("certificateIds", certificate_ids.iter().map(String::as_str))
            .form_each("deviceIds", device_ids.iter().map(String::as_str))
            .mutating();
        self.record(&request, Some("provisioningProfile")).await
    }

    /// Delete a provisioning profile.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedResponse`] if the service refuses it.
    pub async fn delete_provisioning_profile(&self, profile_id: &str) -> Result<Record, ClientError> {
        let request = self
            .team_request(DELETE_PROFILE)
            .await?
            .form("provisioningProfileId", profile_id)
            .mutating();
        self.record(&request, None).await
    }

    async fn team_request(&self, path: &str) -> Result<ApiRequest, ClientError> {
        let team_id = self.session.team_id().await?;
        Ok(ApiRequest::post(path).form("teamId", team_id))
    }

    async fn list(
        &self,
        path: &str,
        key: &str,
        params: Vec<(&str, String)>,
    ) -> Result<Vec<Record>, ClientError> {
        let team_id = self.session.team_id().await?;
        let session = &self.session;
        let team_id = team_id.as_str();
        let params = params.as_slice();

        let records = self
            .paginator
            .fetch_all(move |page: PageRequest| {
                let mut request = ApiRequest::post(path).form("teamId", team_id);
                for (name, value) in page.form_fields() {
                    request = request.form(name, value);
                }
                for (name, value) in params {
                    request = request.form(*name, value.as_str());
                }
                async move {
                    let body = session.send(&request).await?.json()?;
                    records_from_page(&body, key)
                }
            })
            .await?;

        debug!("{path}: {} record(s)", records.len());
        Ok(records)
    }

    /// Send a request and return the record under `key`, or the whole body.
    async fn record(&self, request: &ApiRequest, key: Option<&str>) -> Result<Record, ClientError> {
        let body = self.session.send(request).await?.json()?;
        let value = match key {
            Some(key) => body
                .get(key)
                .cloned()
                .ok_or_else(|| ClientError::Decode(format!("missing `{key}` in response")))?,
            None => body,
        };
        match value {
            serde_json::Value::Object(record) => Ok(record),
            _ => Err(ClientError::Decode("response is not an object".to_string())),
        }
    }
}
