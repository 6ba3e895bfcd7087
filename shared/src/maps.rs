use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;
use thiserror::Error;

use crate::countries::DynamoCountryStore;
use crate::geometry::{self, GeometryError};
use crate::responses;
use crate::types::{PreviewRequest, SaveMapRequest, SavedMap, StoreError};

/// The map rendered on the dashboard when the user has not picked one.
pub const DEFAULT_MAP_NAME: &str = "Default";

#[derive(Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    /// The store already holds a map with this (owner, name) pair. The
    /// insert did not happen.
    DuplicateName,
}

/// Persistence seam for saved maps. `insert_new` must be atomic: the
/// (owner, name) uniqueness check and the write are one operation, so two
/// concurrent saves can never both land.
#[allow(async_fn_in_trait)]
pub trait MapStore {
    async fn insert_new(&self, map: &SavedMap) -> Result<SaveOutcome, StoreError>;
    async fn find(&self, user_id: &str, name: &str) -> Result<Option<SavedMap>, StoreError>;
    /// The first record in the entire store, regardless of owner. Used
    /// only as the default-map fallback.
    async fn first_map(&self) -> Result<Option<SavedMap>, StoreError>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SavedMap>, StoreError>;
}

#[derive(Debug, Error, PartialEq)]
pub enum MapsError {
    #[error("invalid submission: {}", .0.join(" "))]
    InvalidSubmission(Vec<String>),

    #[error("You have already created a map with that name. Please try again.")]
    DuplicateName,

    #[error("no maps exist yet")]
    NoMapsExist,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate the submitted form fields and insert the new map. A missing
/// or blank field aborts with every diagnostic collected; nothing is
/// written. The country list is stored as submitted, not as assembled
/// geometry.
pub async fn save_map<S: MapStore>(
    store: &S,
    user_id: &str,
    req: &SaveMapRequest,
) -> Result<SavedMap, MapsError> {
    let mut missing = Vec::new();

    let name = req.map_name.as_deref().unwrap_or("").trim();
    if name.is_empty() {
        missing.push("Map name from form does not exist.".to_string());
    }
    let countries = req.country_list.as_deref().unwrap_or("");
    if countries.trim().is_empty() {
        missing.push("Country list from form does not exist.".to_string());
    }
    if !missing.is_empty() {
        return Err(MapsError::InvalidSubmission(missing));
    }

    let map = SavedMap::new(user_id, name, countries);
    match store.insert_new(&map).await? {
        SaveOutcome::Created => Ok(map),
        SaveOutcome::DuplicateName => Err(MapsError::DuplicateName),
    }
}

/// Fetch the map saved under (user, name). The global first-map fallback
/// fires only when no such record exists; a failing store round trip
/// propagates instead of silently substituting an unrelated record.
pub async fn load_map<S: MapStore>(
    store: &S,
    user_id: &str,
    name: &str,
) -> Result<SavedMap, MapsError> {
    if let Some(map) = store.find(user_id, name).await? {
        return Ok(map);
    }

    match store.first_map().await? {
        Some(map) => Ok(map),
        None => Err(MapsError::NoMapsExist),
    }
}

pub struct DynamoMapStore<'a> {
    pub client: &'a DynamoClient,
    pub table_name: &'a str,
}

impl MapStore for DynamoMapStore<'_> {
    async fn insert_new(&self, map: &SavedMap) -> Result<SaveOutcome, StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(self.table_name)
            .item("PK", AttributeValue::S(format!("USER#{}", map.user_id)))
            .item("SK", AttributeValue::S(format!("MAP#{}", map.name)))
            .item("map_id", AttributeValue::S(map.map_id.clone()))
            .item("name", AttributeValue::S(map.name.clone()))
            .item("countries", AttributeValue::S(map.countries.clone()))
            .item("created_at", AttributeValue::S(map.created_at.clone()))
            // Uniqueness of (owner, name) lives here, not in an
            // application-level pre-check.
            .condition_expression("attribute_not_exists(PK) AND attribute_not_exists(SK)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(SaveOutcome::Created),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Ok(SaveOutcome::DuplicateName)
            }
            Err(e) => {
                tracing::error!("put_item failed for map '{}': {:?}", map.name, e);
                Err(StoreError::Request(format!("map insert failed: {}", e)))
            }
        }
    }

    async fn find(&self, user_id: &str, name: &str) -> Result<Option<SavedMap>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(self.table_name)
            .key("PK", AttributeValue::S(format!("USER#{}", user_id)))
            .key("SK", AttributeValue::S(format!("MAP#{}", name)))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("get_item failed for map '{}': {:?}", name, e);
                StoreError::Request(format!("map lookup failed: {}", e))
            })?;

        Ok(result.item().and_then(map_from_item))
    }

    async fn first_map(&self) -> Result<Option<SavedMap>, StoreError> {
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(self.table_name)
                .filter_expression("begins_with(SK, :prefix)")
                .expression_attribute_values(":prefix", AttributeValue::S("MAP#".to_string()));
            if let Some(key) = start_key.take() {
                request = request.set_exclusive_start_key(Some(key));
            }

            let result = request.send().await.map_err(|e| {
                tracing::error!("map scan failed: {:?}", e);
                StoreError::Request(format!("map scan failed: {}", e))
            })?;

            if let Some(map) = result.items().iter().find_map(map_from_item) {
                return Ok(Some(map));
            }

            match result.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => return Ok(None),
            }
        }
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SavedMap>, StoreError> {
        let result = self
            .client
            .query()
            .table_name(self.table_name)
            .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk", AttributeValue::S(format!("USER#{}", user_id)))
            .expression_attribute_values(":sk_prefix", AttributeValue::S("MAP#".to_string()))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("map query failed for user {}: {:?}", user_id, e);
                StoreError::Request(format!("map listing failed: {}", e))
            })?;

        Ok(result.items().iter().filter_map(map_from_item).collect())
    }
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

fn map_from_item(item: &HashMap<String, AttributeValue>) -> Option<SavedMap> {
    let user_id = item
        .get("PK")
        .and_then(|v| v.as_s().ok())
        .and_then(|pk| pk.strip_prefix("USER#"))
        .map(|s| s.to_string())?;

    Some(SavedMap {
        map_id: string_attr(item, "map_id")?,
        user_id,
        name: string_attr(item, "name")?,
        countries: string_attr(item, "countries")?,
        created_at: string_attr(item, "created_at")?,
    })
}

fn maps_error_response(err: MapsError) -> Result<Response<Body>, Error> {
    match err {
        MapsError::InvalidSubmission(messages) => {
            responses::message(StatusCode::BAD_REQUEST, &messages.join(" "))
        }
        err @ MapsError::DuplicateName => {
            responses::message(StatusCode::CONFLICT, &err.to_string())
        }
        MapsError::NoMapsExist => responses::error(StatusCode::NOT_FOUND, "No maps exist yet"),
        MapsError::Store(e) => responses::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn geometry_error_response(err: GeometryError) -> Result<Response<Body>, Error> {
    match err {
        GeometryError::EmptyCountryList
        | GeometryError::CountryNotFound(_)
        | GeometryError::MalformedGeometry(_) => {
            responses::error(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string())
        }
        GeometryError::Serialize(_) | GeometryError::Store(_) => {
            responses::error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

/// POST /maps - save a named map for the acting user
pub async fn create_map(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: SaveMapRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to parse save-map body: {}", e);
            return responses::error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            );
        }
    };

    let store = DynamoMapStore { client, table_name };
    match save_map(&store, user_id, &req).await {
        Ok(map) => {
            tracing::info!("Map '{}' saved for user {}", map.name, user_id);
            responses::message(StatusCode::CREATED, "Map saved successfully!")
        }
        Err(e) => maps_error_response(e),
    }
}

/// GET /maps - list the acting user's saved maps
pub async fn list_user_maps(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let store = DynamoMapStore { client, table_name };

    match store.list_for_user(user_id).await {
        Ok(maps) => responses::json(StatusCode::OK, &maps),
        Err(e) => responses::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// GET /dashboard - the user's "Default" map (or the global fallback),
/// with its geometry assembled for rendering
pub async fn render_default_map(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    let map_store = DynamoMapStore { client, table_name };
    let map = match load_map(&map_store, user_id, DEFAULT_MAP_NAME).await {
        Ok(map) => map,
        Err(e) => return maps_error_response(e),
    };

    let country_store = DynamoCountryStore { client, table_name };
    match geometry::assemble_from_ids(&country_store, &map.countries).await {
        Ok(document) => responses::json(
            StatusCode::OK,
            &serde_json::json!({
                "name": map.name,
                "country_list": map.countries,
                "feature_collection": serde_json::from_str::<serde_json::Value>(&document)?,
            }),
        ),
        Err(e) => geometry_error_response(e),
    }
}

/// POST /maps/preview - assemble geometry for a submitted country list
/// without persisting anything
pub async fn preview_map(
    client: &DynamoClient,
    table_name: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: PreviewRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to parse preview body: {}", e);
            return responses::error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            );
        }
    };

    let country_store = DynamoCountryStore { client, table_name };
    match geometry::assemble_from_ids(&country_store, &req.country_list).await {
        Ok(document) => responses::json(
            StatusCode::OK,
            &serde_json::json!({
                "country_list": req.country_list,
                "feature_collection": serde_json::from_str::<serde_json::Value>(&document)?,
            }),
        ),
        Err(e) => geometry_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryMapStore {
        rows: Mutex<Vec<SavedMap>>,
        offline: bool,
    }

    impl MemoryMapStore {
        fn check_online(&self) -> Result<(), StoreError> {
            if self.offline {
                Err(StoreError::Request("store offline".to_string()))
            } else {
                Ok(())
            }
        }

        fn count_matching(&self, user_id: &str, name: &str) -> usize {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.user_id == user_id && m.name == name)
                .count()
        }
    }

    impl MapStore for MemoryMapStore {
        async fn insert_new(&self, map: &SavedMap) -> Result<SaveOutcome, StoreError> {
            self.check_online()?;
            let mut rows = self.rows.lock().unwrap();
            if rows
                .iter()
                .any(|m| m.user_id == map.user_id && m.name == map.name)
            {
                return Ok(SaveOutcome::DuplicateName);
            }
            rows.push(map.clone());
            Ok(SaveOutcome::Created)
        }

        async fn find(&self, user_id: &str, name: &str) -> Result<Option<SavedMap>, StoreError> {
            self.check_online()?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.user_id == user_id && m.name == name)
                .cloned())
        }

        async fn first_map(&self) -> Result<Option<SavedMap>, StoreError> {
            self.check_online()?;
            Ok(self.rows.lock().unwrap().first().cloned())
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<SavedMap>, StoreError> {
            self.check_online()?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.user_id == user_id)
                .cloned()
                .collect())
        }
    }

    fn request(name: &str, countries: &str) -> SaveMapRequest {
        SaveMapRequest {
            map_name: Some(name.to_string()),
            country_list: Some(countries.to_string()),
        }
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_only_one_record_survives() {
        let store = MemoryMapStore::default();

        save_map(&store, "alice", &request("Europe", "tur,aus")).await.unwrap();
        let err = save_map(&store, "alice", &request("Europe", "jpn"))
            .await
            .unwrap_err();

        assert_eq!(err, MapsError::DuplicateName);
        assert_eq!(store.count_matching("alice", "Europe"), 1);
    }

    #[test]
    fn duplicate_name_response_reuses_the_error_text() {
        let response = maps_error_response(MapsError::DuplicateName).unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["message"], MapsError::DuplicateName.to_string().as_str());
    }

    #[tokio::test]
    async fn same_name_under_different_users_both_succeed() {
        let store = MemoryMapStore::default();

        save_map(&store, "alice", &request("Europe", "tur")).await.unwrap();
        save_map(&store, "bob", &request("Europe", "aus")).await.unwrap();

        assert_eq!(store.count_matching("alice", "Europe"), 1);
        assert_eq!(store.count_matching("bob", "Europe"), 1);
    }

    #[tokio::test]
    async fn missing_fields_abort_with_every_diagnostic() {
        let store = MemoryMapStore::default();

        let err = save_map(
            &store,
            "alice",
            &SaveMapRequest {
                map_name: None,
                country_list: Some("   ".to_string()),
            },
        )
        .await
        .unwrap_err();

        match err {
            MapsError::InvalidSubmission(messages) => {
                assert_eq!(messages.len(), 2);
                assert!(messages[0].contains("Map name"));
                assert!(messages[1].contains("Country list"));
            }
            other => panic!("expected InvalidSubmission, got {:?}", other),
        }
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn country_list_is_stored_as_submitted() {
        let store = MemoryMapStore::default();

        let map = save_map(&store, "alice", &request("Europe", "tur, aus ,jpn"))
            .await
            .unwrap();

        assert_eq!(map.countries, "tur, aus ,jpn");
    }

    #[tokio::test]
    async fn load_returns_the_exact_record_when_it_exists() {
        let store = MemoryMapStore::default();
        let saved = save_map(&store, "alice", &request("Default", "tur")).await.unwrap();
        save_map(&store, "bob", &request("Default", "aus")).await.unwrap();

        let loaded = load_map(&store, "alice", "Default").await.unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn load_falls_back_to_the_first_record_only_when_not_found() {
        let store = MemoryMapStore::default();
        let first = save_map(&store, "bob", &request("World", "tur,aus")).await.unwrap();

        let loaded = load_map(&store, "alice", "Default").await.unwrap();
        assert_eq!(loaded, first);
    }

    #[tokio::test]
    async fn load_with_an_empty_store_reports_no_maps() {
        let store = MemoryMapStore::default();

        let err = load_map(&store, "alice", "Default").await.unwrap_err();
        assert_eq!(err, MapsError::NoMapsExist);
    }

    #[tokio::test]
    async fn store_failure_propagates_instead_of_falling_back() {
        let store = MemoryMapStore {
            offline: true,
            ..Default::default()
        };

        let err = load_map(&store, "alice", "Default").await.unwrap_err();
        assert!(matches!(err, MapsError::Store(StoreError::Request(_))));
    }
}
