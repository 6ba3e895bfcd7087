use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

/// Serialize `value` into a JSON response with the CORS headers every
/// endpoint carries.
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?)
}

/// `{"message": ...}` body, used for workflow outcomes the UI shows as a
/// response-message string.
pub fn message(status: StatusCode, text: &str) -> Result<Response<Body>, Error> {
    json(status, &serde_json::json!({ "message": text }))
}

/// `{"error": ...}` body.
pub fn error(status: StatusCode, text: &str) -> Result<Response<Body>, Error> {
    json(status, &serde_json::json!({ "error": text }))
}

pub fn not_found() -> Result<Response<Body>, Error> {
    error(StatusCode::NOT_FOUND, "Not found")
}

pub fn method_not_allowed() -> Result<Response<Body>, Error> {
    error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn unauthorized() -> Result<Response<Body>, Error> {
    error(StatusCode::UNAUTHORIZED, "Missing or invalid credentials")
}

pub fn forbidden(role: &str) -> Result<Response<Body>, Error> {
    error(
        StatusCode::FORBIDDEN,
        &format!("This action requires the {} role", role),
    )
}
