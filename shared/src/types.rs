use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single round trip against one of the backing stores.
///
/// `NotFound` is kept distinct from `Request` so callers can fall back
/// (default map) or report "not found" without swallowing outages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store request failed: {0}")]
    Request(String),
}

// ========== COUNTRY ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Country {
    pub country_id: String,
    /// Display name ("ADMIN" in the emitted feature properties).
    pub admin: String,
    pub iso_a3: String,
    /// Opaque serialized GeoJSON geometry object, stored verbatim.
    pub geometry: String,
}

/// Projection used by the country-selection UI: identifier and display
/// name only, no geometry payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CountrySummary {
    pub country_id: String,
    pub admin: String,
}

// ========== MAP ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SavedMap {
    pub map_id: String,
    pub user_id: String,
    /// Unique per owning user.
    pub name: String,
    /// The submitted country-identifier list, stored as submitted.
    /// Geometry is re-derived from it on load, never persisted.
    pub countries: String,
    pub created_at: String,
}

impl SavedMap {
    pub fn new(user_id: &str, name: &str, countries: &str) -> Self {
        Self {
            map_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            countries: countries.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveMapRequest {
    pub map_name: Option<String>,
    pub country_list: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub country_list: String,
}

// ========== USER & ROLES ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

/// Row in the admin user listing: one user with their current role names.
#[derive(Debug, Serialize, Clone)]
pub struct UserRolesView {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
}

/// One entry in the role-assignment form: a known role and whether the
/// target user currently holds it. The same shape comes back on submit.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoleSelection {
    pub role_name: String,
    pub selected: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRolesRequest {
    pub roles: Vec<RoleSelection>,
}

impl UpdateRolesRequest {
    /// The desired role set: exactly the selected names.
    pub fn selected_roles(&self) -> std::collections::BTreeSet<String> {
        self.roles
            .iter()
            .filter(|r| r.selected)
            .map(|r| r.role_name.clone())
            .collect()
    }
}
