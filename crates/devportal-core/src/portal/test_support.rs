//! Mock-server fixtures shared by the portal tests.

use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::PortalConfig;
use crate::portal::auth::AuthSession;
use crate::portal::transport::{MIN_RETRIES, RetryPolicy, RetryingTransport};

pub(crate) fn portal_config(server: &MockServer) -> PortalConfig {
    PortalConfig {
        base_url: server.uri(),
        login_url: format!("{}/IDMSWebAuth/authenticate", server.uri()),
        landing_path: "account/overview.action".to_string(),
        teams_path: "account/listTeams.action".to_string(),
        cookie_name: "myacinfo".to_string(),
        login_path_marker: "/login".to_string(),
        api_key_url: format!("{}/membercenter/index.action", server.uri()),
        app_id_key: Some("0123abcdef123123".to_string()),
    }
}

pub(crate) fn auth_session(server: &MockServer) -> AuthSession {
    auth_session_with(&portal_config(server))
}

pub(crate) fn auth_session_with(config: &PortalConfig) -> AuthSession {
    let transport = RetryingTransport::builder(&config.base_url)
        .timeout(Duration::from_secs(2))
        .retry_policy(RetryPolicy::new(MIN_RETRIES, Duration::ZERO))
        .login_marker(&config.login_path_marker)
        .build()
        .expect("transport");
    AuthSession::new(transport, config)
}

pub(crate) async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/IDMSWebAuth/authenticate"))
        .and(body_string_contains("accountPassword=so_secret"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("set-cookie", "myacinfo=abcdef; Domain=example.com; Path=/; Secure; HttpOnly")
                .insert_header("location", "/account/"),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/IDMSWebAuth/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login failed</html>"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/account/listTeams.action"))
        .and(header("cookie", "myacinfo=abcdef;"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "teams": [
                {
                    "status": "active",
                    "teamId": "XXXXXXXXXX",
                    "type": "Company/Organization",
                    "memberships": [],
                    "currentTeamMember": {"roles": ["TEAM_ADMIN"], "teamMemberId": "HQR8N4GAAA"},
                    "name": "SpaceShip"
                },
                {
                    "status": "active",
                    "teamId": "YYYYYYYYYY",
                    "type": "Individual",
                    "memberships": [],
                    "currentTeamMember": {"roles": ["TEAM_MEMBER"], "teamMemberId": "ABCDEF1234"},
                    "name": "Second"
                }
            ],
            "resultCode": 0
        })))
        .mount(server)
        .await;
}

