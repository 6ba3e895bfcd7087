use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;

use crate::responses;
use crate::types::{Country, CountrySummary, StoreError};

/// Read-only access to the pre-seeded country records.
#[allow(async_fn_in_trait)]
pub trait CountryStore {
    async fn get(&self, country_id: &str) -> Result<Option<Country>, StoreError>;

    /// (identifier, display name) projection for the selection UI,
    /// sorted by display name.
    async fn list_summaries(&self) -> Result<Vec<CountrySummary>, StoreError>;
}

pub struct DynamoCountryStore<'a> {
    pub client: &'a DynamoClient,
    pub table_name: &'a str,
}

impl CountryStore for DynamoCountryStore<'_> {
    async fn get(&self, country_id: &str) -> Result<Option<Country>, StoreError> {
        let pk = format!("COUNTRY#{}", country_id);

        let result = self
            .client
            .get_item()
            .table_name(self.table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("get_item failed for country {}: {:?}", country_id, e);
                StoreError::Request(format!("country lookup failed: {}", e))
            })?;

        Ok(result.item().and_then(country_from_item))
    }

    async fn list_summaries(&self) -> Result<Vec<CountrySummary>, StoreError> {
        let mut summaries = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(self.table_name)
                .filter_expression("begins_with(PK, :prefix)")
                .expression_attribute_values(":prefix", AttributeValue::S("COUNTRY#".to_string()))
                .projection_expression("PK, #a")
                .expression_attribute_names("#a", "admin");
            if let Some(key) = start_key.take() {
                request = request.set_exclusive_start_key(Some(key));
            }

            let result = request.send().await.map_err(|e| {
                tracing::error!("country scan failed: {:?}", e);
                StoreError::Request(format!("country listing failed: {}", e))
            })?;

            for item in result.items() {
                let country_id = item
                    .get("PK")
                    .and_then(|v| v.as_s().ok())
                    .and_then(|pk| pk.strip_prefix("COUNTRY#"))
                    .map(|s| s.to_string());
                let admin = string_attr(item, "admin");
                if let (Some(country_id), Some(admin)) = (country_id, admin) {
                    summaries.push(CountrySummary { country_id, admin });
                }
            }

            match result.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }

        summaries.sort_by(|a, b| a.admin.cmp(&b.admin));
        Ok(summaries)
    }
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

fn country_from_item(item: &HashMap<String, AttributeValue>) -> Option<Country> {
    let country_id = item
        .get("PK")
        .and_then(|v| v.as_s().ok())
        .and_then(|pk| pk.strip_prefix("COUNTRY#"))
        .map(|s| s.to_string())?;

    Some(Country {
        country_id,
        admin: string_attr(item, "admin")?,
        iso_a3: string_attr(item, "iso_a3")?,
        geometry: string_attr(item, "geometry")?,
    })
}

/// GET /countries - selectable countries for the map builder
pub async fn list_countries(
    client: &DynamoClient,
    table_name: &str,
) -> Result<Response<Body>, Error> {
    let store = DynamoCountryStore { client, table_name };

    match store.list_summaries().await {
        Ok(summaries) => responses::json(StatusCode::OK, &summaries),
        Err(e) => responses::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
