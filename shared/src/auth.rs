use aws_sdk_cognitoidentityprovider::types::AuthFlowType;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::responses;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub email: String,
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i32,
}

type HmacSha256 = Hmac<Sha256>;

/// SECRET_HASH required by Cognito when the app client has a secret:
/// Base64(HMAC-SHA256(client_secret, username + client_id)).
fn compute_secret_hash(username: &str, client_id: &str, client_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Map a Cognito auth failure onto the message shown to the user.
fn auth_failure_message(debug: &str) -> &'static str {
    if debug.contains("NotAuthorizedException") {
        "Incorrect email or password"
    } else if debug.contains("UserNotConfirmedException") {
        "Please verify your email before logging in"
    } else if debug.contains("UserNotFoundException") {
        "No account found with this email"
    } else if debug.contains("PasswordResetRequiredException") {
        "Password reset required"
    } else if debug.contains("TooManyRequestsException") {
        "Too many login attempts. Please try again later"
    } else {
        "Login failed. Please check your credentials"
    }
}

async fn run_auth_flow(
    client: &CognitoClient,
    client_id: &str,
    flow: AuthFlowType,
    parameters: &[(&str, &str)],
    username: &str,
) -> Result<Response<Body>, Error> {
    let mut request = client.initiate_auth().auth_flow(flow).client_id(client_id);
    for (key, value) in parameters {
        request = request.auth_parameters(*key, *value);
    }

    match request.send().await {
        Ok(response) => match response.authentication_result() {
            Some(result) => {
                tracing::info!("Authentication succeeded for {}", username);
                responses::json(
                    StatusCode::OK,
                    &TokenResponse {
                        id_token: result.id_token().unwrap_or_default().to_string(),
                        access_token: result.access_token().unwrap_or_default().to_string(),
                        refresh_token: result.refresh_token().map(|t| t.to_string()),
                        expires_in: result.expires_in(),
                    },
                )
            }
            None => {
                tracing::error!("No authentication result returned for {}", username);
                responses::error(StatusCode::UNAUTHORIZED, "Authentication failed")
            }
        },
        Err(e) => {
            let debug_repr = format!("{:?}", e);
            tracing::error!(
                "Cognito authentication error for {}: {}",
                username,
                debug_repr
            );
            responses::error(StatusCode::UNAUTHORIZED, auth_failure_message(&debug_repr))
        }
    }
}

/// POST /login
pub async fn login(
    client: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: LoginRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to parse login body: {}", e);
            return responses::error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            );
        }
    };

    tracing::info!("Login request for {}", req.email);
    let secret_hash = compute_secret_hash(&req.email, client_id, client_secret);

    run_auth_flow(
        client,
        client_id,
        AuthFlowType::UserPasswordAuth,
        &[
            ("USERNAME", &req.email),
            ("PASSWORD", &req.password),
            ("SECRET_HASH", &secret_hash),
        ],
        &req.email,
    )
    .await
}

/// POST /refresh
pub async fn refresh_token(
    client: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: RefreshRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to parse refresh body: {}", e);
            return responses::error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            );
        }
    };

    let secret_hash = compute_secret_hash(&req.email, client_id, client_secret);

    run_auth_flow(
        client,
        client_id,
        AuthFlowType::RefreshTokenAuth,
        &[
            ("REFRESH_TOKEN", &req.refresh_token),
            ("SECRET_HASH", &secret_hash),
        ],
        &req.email,
    )
    .await
}
