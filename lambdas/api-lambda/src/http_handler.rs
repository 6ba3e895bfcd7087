use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use mapfolio_shared::{auth, countries, maps, responses, roles, AppState};
use std::env;
use std::sync::Arc;

/// The authenticated principal, resolved from the JWT claims the API
/// Gateway authorizer attaches. Every workflow takes this explicitly;
/// nothing reads identity from ambient state.
struct Caller {
    user_id: String,
    roles: Vec<String>,
}

impl Caller {
    fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// The cognito:groups claim arrives as a bracketed list, e.g.
/// "[PaidUser SuperAdmin]".
fn parse_groups(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn header<'a>(event: &'a Request, name: &str) -> Option<&'a str> {
    event.headers().get(name).and_then(|v| v.to_str().ok())
}

fn caller_identity(event: &Request) -> Option<Caller> {
    // X-User-Id / X-User-Groups override for local development
    if let Some(user_id) = header(event, "X-User-Id") {
        return Some(Caller {
            user_id: user_id.to_string(),
            roles: header(event, "X-User-Groups").map(parse_groups).unwrap_or_default(),
        });
    }

    let context = event.request_context();
    let jwt = context.authorizer().and_then(|auth| auth.jwt.as_ref())?;
    let user_id = jwt.claims.get("sub")?.to_string();
    let roles = jwt
        .claims
        .get("cognito:groups")
        .map(|g| parse_groups(g))
        .unwrap_or_default();

    Some(Caller { user_id, roles })
}

/// Main Lambda handler - routes requests to the map, country, role, and
/// auth endpoints
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == "OPTIONS" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET,POST,PUT,DELETE,OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type,Authorization,X-User-Id,X-User-Groups",
            )
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    // Auth endpoints (no JWT required)
    if path == "/login" || path == "/refresh" {
        if method != Method::POST {
            return responses::method_not_allowed();
        }
        let client_id = env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set");
        let client_secret =
            env::var("COGNITO_CLIENT_SECRET").expect("COGNITO_CLIENT_SECRET must be set");

        return if path == "/login" {
            auth::login(&state.cognito_client, &client_id, &client_secret, body).await
        } else {
            auth::refresh_token(&state.cognito_client, &client_id, &client_secret, body).await
        };
    }

    // Everything past this point acts on behalf of an authenticated user
    let Some(caller) = caller_identity(&event) else {
        return responses::unauthorized();
    };

    let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "mapfolio".to_string());
    // Only the role endpoints touch the user pool.
    let user_pool_id =
        || env::var("COGNITO_USER_POOL_ID").expect("COGNITO_USER_POOL_ID must be set");

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, parts.as_slice()) {
        // GET /dashboard - the user's default map, assembled for rendering
        (&Method::GET, ["dashboard"]) => {
            maps::render_default_map(&state.dynamo_client, &table_name, &caller.user_id).await
        }

        // GET /countries - selectable countries for the map builder
        (&Method::GET, ["countries"]) => {
            if !caller.has_role(roles::PAID_USER_ROLE) {
                return responses::forbidden(roles::PAID_USER_ROLE);
            }
            countries::list_countries(&state.dynamo_client, &table_name).await
        }

        // POST /maps/preview - assemble geometry without saving
        (&Method::POST, ["maps", "preview"]) => {
            maps::preview_map(&state.dynamo_client, &table_name, body).await
        }

        // POST /maps - save a named map
        (&Method::POST, ["maps"]) => {
            maps::create_map(&state.dynamo_client, &table_name, &caller.user_id, body).await
        }

        // GET /maps - list the caller's saved maps
        (&Method::GET, ["maps"]) => {
            maps::list_user_maps(&state.dynamo_client, &table_name, &caller.user_id).await
        }

        // POST /payment/success - grant PaidUser after a completed payment
        (&Method::POST, ["payment", "success"]) => {
            roles::payment_successful(&state.cognito_client, &user_pool_id(), &caller.user_id).await
        }

        // --- USER ADMINISTRATION (SuperAdmin only) ---
        (&Method::GET, ["admin", "users"]) => {
            if !caller.has_role(roles::SUPER_ADMIN_ROLE) {
                return responses::forbidden(roles::SUPER_ADMIN_ROLE);
            }
            roles::list_users(&state.cognito_client, &user_pool_id()).await
        }
        (&Method::DELETE, ["admin", "users", user_id]) => {
            if !caller.has_role(roles::SUPER_ADMIN_ROLE) {
                return responses::forbidden(roles::SUPER_ADMIN_ROLE);
            }
            roles::delete_user(&state.cognito_client, &user_pool_id(), user_id).await
        }
        (&Method::GET, ["admin", "users", user_id, "roles"]) => {
            if !caller.has_role(roles::SUPER_ADMIN_ROLE) {
                return responses::forbidden(roles::SUPER_ADMIN_ROLE);
            }
            roles::get_role_assignments(&state.cognito_client, &user_pool_id(), user_id).await
        }
        (&Method::PUT, ["admin", "users", user_id, "roles"]) => {
            if !caller.has_role(roles::SUPER_ADMIN_ROLE) {
                return responses::forbidden(roles::SUPER_ADMIN_ROLE);
            }
            roles::update_role_assignments(&state.cognito_client, &user_pool_id(), user_id, body)
                .await
        }

        _ => {
            tracing::warn!("No route matched - Method: {} Path: {}", method, path);
            responses::not_found()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_http::http::HeaderValue;

    #[test]
    fn groups_claim_parses_bracketed_lists() {
        assert_eq!(
            parse_groups("[PaidUser SuperAdmin]"),
            vec!["PaidUser", "SuperAdmin"]
        );
        assert_eq!(
            parse_groups("PaidUser,SuperAdmin"),
            vec!["PaidUser", "SuperAdmin"]
        );
        assert_eq!(parse_groups("[]"), Vec::<String>::new());
        assert_eq!(parse_groups("  "), Vec::<String>::new());
    }

    #[test]
    fn caller_resolves_from_dev_override_headers() {
        let mut request = Request::default();
        request
            .headers_mut()
            .insert("X-User-Id", HeaderValue::from_static("alice"));
        request
            .headers_mut()
            .insert("X-User-Groups", HeaderValue::from_static("[PaidUser]"));

        let caller = caller_identity(&request).unwrap();
        assert_eq!(caller.user_id, "alice");
        assert!(caller.has_role("PaidUser"));
        assert!(!caller.has_role("SuperAdmin"));
    }

    #[test]
    fn missing_identity_yields_no_caller() {
        let request = Request::default();
        assert!(caller_identity(&request).is_none());
    }
}
