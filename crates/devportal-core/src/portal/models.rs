//! Data models for the developer portal.

use serde::{Deserialize, Serialize};

/// A server-provided record, kept as an opaque string-keyed JSON map.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A team the account belongs to.
///
/// Fields the client does not interpret are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Team identifier used on every resource call.
    pub team_id: String,
    /// Display name of the team.
    #[serde(default)]
    pub name: String,
    /// Team type (e.g. `Company/Organization`, `Individual`).
    #[serde(rename = "type", default)]
    pub team_type: String,
    /// The logged-in user's membership in this team.
    #[serde(default)]
    pub current_team_member: TeamMember,
    /// Program memberships of the team, in server order.
    #[serde(default)]
    pub memberships: Vec<Record>,
    /// Any other fields returned by the server.
    #[serde(flatten)]
    pub extra: Record,
}

/// The current user's role within a team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    /// Team-member identifier, an alternative identity for the team.
    #[serde(default)]
    pub team_member_id: Option<String>,
    /// Roles held by the user, in server order.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Any other fields returned by the server.
    #[serde(flatten)]
    pub extra: Record,
}

/// Kind of app identifier to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppIdKind {
    /// Matches exactly one bundle identifier.
    Explicit,
    /// Matches a bundle identifier prefix ending in `*`.
    Wildcard,
}

impl AppIdKind {
    /// Wire value sent as the `type` parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Wildcard => "wildcard",
        }
    }
}

impl std::fmt::Display for AppIdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
