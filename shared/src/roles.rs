use aws_sdk_cognitoidentityprovider::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::responses;
use crate::types::{RoleSelection, StoreError, UpdateRolesRequest, UserRecord, UserRolesView};

/// Granted after a successful payment; gates the map-builder routes.
pub const PAID_USER_ROLE: &str = "PaidUser";
/// Gates the user-administration routes.
pub const SUPER_ADMIN_ROLE: &str = "SuperAdmin";

/// Identity/role store seam. Roles are a flat set of names per user;
/// the only mutation exposed above this trait is whole-set replacement
/// via [`replace_roles`].
#[allow(async_fn_in_trait)]
pub trait RoleStore {
    async fn roles_of(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError>;
    async fn add_role(&self, user_id: &str, role: &str) -> Result<(), StoreError>;
    async fn remove_role(&self, user_id: &str, role: &str) -> Result<(), StoreError>;
    async fn all_roles(&self) -> Result<Vec<String>, StoreError>;
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;
    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Error, PartialEq)]
pub enum RolesError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The replacement could not be applied and the compensation path
    /// restored the original set. Observable state is unchanged.
    #[error("role update failed, roles left unchanged")]
    UpdateFailed,

    /// The replacement failed and so did the compensation path. The
    /// user's role set needs operator attention.
    #[error("role update failed and rollback failed; roles may be inconsistent for user {0}")]
    RollbackFailed(String),

    #[error(transparent)]
    Store(StoreError),
}

fn store_err(user_id: &str, e: StoreError) -> RolesError {
    match e {
        StoreError::NotFound(_) => RolesError::UserNotFound(user_id.to_string()),
        other => RolesError::Store(other),
    }
}

/// Replace the user's entire role set with `desired` in one logical
/// step: remove every current role, then add every desired one. Any
/// failure mid-sequence rolls the applied steps back, so the caller
/// observes either the old set or the new set, never a partial one and
/// never an empty one.
pub async fn replace_roles<S: RoleStore>(
    store: &S,
    user_id: &str,
    desired: &BTreeSet<String>,
) -> Result<(), RolesError> {
    let current = store.roles_of(user_id).await.map_err(|e| store_err(user_id, e))?;

    let mut removed: Vec<&str> = Vec::new();
    for role in &current {
        if let Err(e) = store.remove_role(user_id, role).await {
            tracing::error!("Failed to remove role {} from {}: {}", role, user_id, e);
            return undo(store, user_id, &removed, &[]).await;
        }
        removed.push(role);
    }

    let mut added: Vec<&str> = Vec::new();
    for role in desired {
        if let Err(e) = store.add_role(user_id, role).await {
            tracing::error!("Failed to add role {} to {}: {}", role, user_id, e);
            return undo(store, user_id, &removed, &added).await;
        }
        added.push(role);
    }

    Ok(())
}

/// Compensation path: take out what was added, put back what was
/// removed. Always yields an error; `UpdateFailed` means the original
/// set was restored.
async fn undo<S: RoleStore>(
    store: &S,
    user_id: &str,
    removed: &[&str],
    added: &[&str],
) -> Result<(), RolesError> {
    for role in added {
        if let Err(e) = store.remove_role(user_id, role).await {
            tracing::error!("Rollback failed removing {} from {}: {}", role, user_id, e);
            return Err(RolesError::RollbackFailed(user_id.to_string()));
        }
    }
    for role in removed {
        if let Err(e) = store.add_role(user_id, role).await {
            tracing::error!("Rollback failed re-adding {} to {}: {}", role, user_id, e);
            return Err(RolesError::RollbackFailed(user_id.to_string()));
        }
    }
    Err(RolesError::UpdateFailed)
}

/// Admin index view model: every user with their current role names.
pub async fn list_users_with_roles<S: RoleStore>(
    store: &S,
) -> Result<Vec<UserRolesView>, RolesError> {
    let users = store.list_users().await.map_err(RolesError::Store)?;

    let mut views = Vec::with_capacity(users.len());
    for user in users {
        let roles = store
            .roles_of(&user.user_id)
            .await
            .map_err(|e| store_err(&user.user_id, e))?;
        views.push(UserRolesView {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            roles: roles.into_iter().collect(),
        });
    }
    Ok(views)
}

/// Role-assignment form view model: every known role, flagged with the
/// target user's current membership.
pub async fn role_assignment_form<S: RoleStore>(
    store: &S,
    user_id: &str,
) -> Result<Vec<RoleSelection>, RolesError> {
    let current = store.roles_of(user_id).await.map_err(|e| store_err(user_id, e))?;
    let all = store.all_roles().await.map_err(RolesError::Store)?;

    Ok(all
        .into_iter()
        .map(|role_name| RoleSelection {
            selected: current.contains(&role_name),
            role_name,
        })
        .collect())
}

pub struct CognitoRoleStore<'a> {
    pub client: &'a CognitoClient,
    pub user_pool_id: &'a str,
}

fn cognito_err<E, R>(what: &str, who: &str, e: &SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    if e.as_service_error().and_then(|se| se.code()) == Some("UserNotFoundException") {
        return StoreError::NotFound(format!("user {}", who));
    }
    tracing::error!("{} failed for {}: {:?}", what, who, e);
    StoreError::Request(format!("{} failed", what))
}

impl RoleStore for CognitoRoleStore<'_> {
    async fn roles_of(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError> {
        let mut roles = BTreeSet::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .admin_list_groups_for_user()
                .user_pool_id(self.user_pool_id)
                .username(user_id);
            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| cognito_err("admin_list_groups_for_user", user_id, &e))?;

            for group in result.groups() {
                if let Some(name) = group.group_name() {
                    roles.insert(name.to_string());
                }
            }

            match result.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(roles)
    }

    async fn add_role(&self, user_id: &str, role: &str) -> Result<(), StoreError> {
        self.client
            .admin_add_user_to_group()
            .user_pool_id(self.user_pool_id)
            .username(user_id)
            .group_name(role)
            .send()
            .await
            .map_err(|e| cognito_err("admin_add_user_to_group", user_id, &e))?;
        Ok(())
    }

    async fn remove_role(&self, user_id: &str, role: &str) -> Result<(), StoreError> {
        self.client
            .admin_remove_user_from_group()
            .user_pool_id(self.user_pool_id)
            .username(user_id)
            .group_name(role)
            .send()
            .await
            .map_err(|e| cognito_err("admin_remove_user_from_group", user_id, &e))?;
        Ok(())
    }

    async fn all_roles(&self) -> Result<Vec<String>, StoreError> {
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.list_groups().user_pool_id(self.user_pool_id);
            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| cognito_err("list_groups", self.user_pool_id, &e))?;

            for group in result.groups() {
                if let Some(name) = group.group_name() {
                    roles.push(name.to_string());
                }
            }

            match result.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(roles)
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users = Vec::new();
        let mut pagination_token: Option<String> = None;

        loop {
            let mut request = self.client.list_users().user_pool_id(self.user_pool_id);
            if let Some(token) = pagination_token.take() {
                request = request.pagination_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| cognito_err("list_users", self.user_pool_id, &e))?;

            for user in result.users() {
                // Admin group APIs address users by username, so the
                // username doubles as the user identifier.
                let Some(username) = user.username() else {
                    continue;
                };
                let email = user
                    .attributes()
                    .iter()
                    .find(|a| a.name() == "email")
                    .and_then(|a| a.value())
                    .unwrap_or_default()
                    .to_string();
                users.push(UserRecord {
                    user_id: username.to_string(),
                    username: username.to_string(),
                    email,
                });
            }

            match result.pagination_token() {
                Some(token) => pagination_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(users)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.client
            .admin_delete_user()
            .user_pool_id(self.user_pool_id)
            .username(user_id)
            .send()
            .await
            .map_err(|e| cognito_err("admin_delete_user", user_id, &e))?;
        Ok(())
    }
}

fn roles_error_response(err: RolesError) -> Result<Response<Body>, Error> {
    match err {
        RolesError::UserNotFound(user_id) => responses::error(
            StatusCode::NOT_FOUND,
            &format!("User with Id = {} cannot be found", user_id),
        ),
        RolesError::UpdateFailed => {
            responses::error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
        RolesError::RollbackFailed(_) => {
            responses::error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
        RolesError::Store(e) => responses::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// POST /payment/success - called after a completed payment; replaces
/// the acting user's roles with exactly PaidUser
pub async fn payment_successful(
    client: &CognitoClient,
    user_pool_id: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let store = CognitoRoleStore { client, user_pool_id };
    let desired = BTreeSet::from([PAID_USER_ROLE.to_string()]);

    match replace_roles(&store, user_id, &desired).await {
        Ok(()) => {
            tracing::info!("User {} upgraded to {}", user_id, PAID_USER_ROLE);
            responses::message(
                StatusCode::OK,
                "Payment successful! Your account now has full access.",
            )
        }
        Err(e) => roles_error_response(e),
    }
}

/// GET /admin/users - every user with their current roles
pub async fn list_users(
    client: &CognitoClient,
    user_pool_id: &str,
) -> Result<Response<Body>, Error> {
    let store = CognitoRoleStore { client, user_pool_id };

    match list_users_with_roles(&store).await {
        Ok(views) => responses::json(StatusCode::OK, &views),
        Err(e) => roles_error_response(e),
    }
}

/// DELETE /admin/users/{id}
pub async fn delete_user(
    client: &CognitoClient,
    user_pool_id: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let store = CognitoRoleStore { client, user_pool_id };

    match store.delete_user(user_id).await {
        Ok(()) => {
            tracing::info!("User {} deleted", user_id);
            responses::message(StatusCode::OK, "User deleted")
        }
        Err(StoreError::NotFound(_)) => {
            responses::error(StatusCode::NOT_FOUND, "User Not Found")
        }
        Err(e) => responses::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// GET /admin/users/{id}/roles - the role-assignment form view model
pub async fn get_role_assignments(
    client: &CognitoClient,
    user_pool_id: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let store = CognitoRoleStore { client, user_pool_id };

    match role_assignment_form(&store, user_id).await {
        Ok(form) => responses::json(StatusCode::OK, &form),
        Err(e) => roles_error_response(e),
    }
}

/// PUT /admin/users/{id}/roles - replace the target user's role set with
/// the selected roles
pub async fn update_role_assignments(
    client: &CognitoClient,
    user_pool_id: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateRolesRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to parse role-update body: {}", e);
            return responses::error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            );
        }
    };

    let store = CognitoRoleStore { client, user_pool_id };
    let desired = req.selected_roles();

    match replace_roles(&store, user_id, &desired).await {
        Ok(()) => {
            tracing::info!("Roles for {} replaced with {:?}", user_id, desired);
            responses::message(StatusCode::OK, "Roles updated successfully")
        }
        Err(e) => roles_error_response(e),
    }
}
