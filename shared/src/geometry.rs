use serde::Serialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::countries::CountryStore;
use crate::types::{Country, StoreError};

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("country list is empty")]
    EmptyCountryList,

    #[error("country not found: {0}")]
    CountryNotFound(String),

    #[error("country {0} has malformed geometry data")]
    MalformedGeometry(String),

    #[error("failed to serialize feature collection: {0}")]
    Serialize(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// Property names are fixed by the OpenLayers front-end consuming the
// document.
#[derive(Serialize)]
struct FeatureProperties<'a> {
    #[serde(rename = "ADMIN")]
    admin: &'a str,
    #[serde(rename = "ISO_A3")]
    iso_a3: &'a str,
}

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: FeatureProperties<'a>,
    geometry: Box<RawValue>,
}

#[derive(Serialize)]
struct FeatureCollection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<Feature<'a>>,
}

/// Split a comma-delimited country-identifier list into identifiers,
/// ignoring surrounding whitespace and empty segments.
pub fn parse_country_ids(raw: &str) -> Result<Vec<String>, GeometryError> {
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if ids.is_empty() {
        return Err(GeometryError::EmptyCountryList);
    }
    Ok(ids)
}

/// Look up every identifier in the country store, in input order. An
/// identifier that does not resolve is a hard error naming the offending
/// identifier, never a silently embedded null.
pub async fn resolve_countries<S: CountryStore>(
    store: &S,
    ids: &[String],
) -> Result<Vec<Country>, GeometryError> {
    let mut countries = Vec::with_capacity(ids.len());
    for id in ids {
        match store.get(id).await? {
            Some(country) => countries.push(country),
            None => return Err(GeometryError::CountryNotFound(id.clone())),
        }
    }
    Ok(countries)
}

/// Serialize resolved countries into a FeatureCollection document: one
/// feature per country, input order preserved, geometry payload embedded
/// verbatim.
pub fn assemble_feature_collection(countries: &[Country]) -> Result<String, GeometryError> {
    if countries.is_empty() {
        return Err(GeometryError::EmptyCountryList);
    }

    let mut features = Vec::with_capacity(countries.len());
    for country in countries {
        let geometry = RawValue::from_string(country.geometry.clone())
            .map_err(|_| GeometryError::MalformedGeometry(country.country_id.clone()))?;
        features.push(Feature {
            kind: "Feature",
            properties: FeatureProperties {
                admin: &country.admin,
                iso_a3: &country.iso_a3,
            },
            geometry,
        });
    }

    let collection = FeatureCollection {
        kind: "FeatureCollection",
        features,
    };
    serde_json::to_string(&collection).map_err(|e| GeometryError::Serialize(e.to_string()))
}

/// Full assembly pipeline: parse the submitted identifier list, resolve
/// each identifier, emit the document.
pub async fn assemble_from_ids<S: CountryStore>(
    store: &S,
    raw_list: &str,
) -> Result<String, GeometryError> {
    let ids = parse_country_ids(raw_list)?;
    let countries = resolve_countries(store, &ids).await?;
    assemble_feature_collection(&countries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CountrySummary;
    use std::collections::HashMap;

    struct FakeCountries(HashMap<String, Country>);

    impl FakeCountries {
        fn with(countries: &[Country]) -> Self {
            Self(
                countries
                    .iter()
                    .map(|c| (c.country_id.clone(), c.clone()))
                    .collect(),
            )
        }
    }

    impl CountryStore for FakeCountries {
        async fn get(&self, country_id: &str) -> Result<Option<Country>, StoreError> {
            Ok(self.0.get(country_id).cloned())
        }

        async fn list_summaries(&self) -> Result<Vec<CountrySummary>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn country(id: &str, admin: &str, iso: &str) -> Country {
        Country {
            country_id: id.to_string(),
            admin: admin.to_string(),
            iso_a3: iso.to_string(),
            geometry: format!(r#"{{"type":"Polygon","coordinates":[[[{}.0,0.0]]]}}"#, id.len()),
        }
    }

    fn features_of(document: &str) -> Vec<serde_json::Value> {
        let parsed: serde_json::Value = serde_json::from_str(document).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        parsed["features"].as_array().unwrap().clone()
    }

    #[test]
    fn single_country_emits_exactly_one_feature() {
        let turkey = country("tur", "Turkey", "TUR");
        let document = assemble_feature_collection(&[turkey.clone()]).unwrap();

        let features = features_of(&document);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["type"], "Feature");
        assert_eq!(features[0]["properties"]["ADMIN"], "Turkey");
        assert_eq!(features[0]["properties"]["ISO_A3"], "TUR");
        assert_eq!(
            features[0]["geometry"],
            serde_json::from_str::<serde_json::Value>(&turkey.geometry).unwrap()
        );
    }

    #[test]
    fn three_countries_emit_three_features_in_input_order() {
        let input = [
            country("tur", "Turkey", "TUR"),
            country("aus", "Australia", "AUS"),
            country("jpn", "Japan", "JPN"),
        ];
        let document = assemble_feature_collection(&input).unwrap();

        let admins: Vec<String> = features_of(&document)
            .iter()
            .map(|f| f["properties"]["ADMIN"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(admins, vec!["Turkey", "Australia", "Japan"]);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(
            parse_country_ids("").unwrap_err(),
            GeometryError::EmptyCountryList
        );
        assert_eq!(
            parse_country_ids(" , ,").unwrap_err(),
            GeometryError::EmptyCountryList
        );
        assert_eq!(
            assemble_feature_collection(&[]).unwrap_err(),
            GeometryError::EmptyCountryList
        );
    }

    #[test]
    fn identifier_parsing_trims_whitespace_and_empty_segments() {
        let ids = parse_country_ids(" tur, aus ,,jpn ").unwrap();
        assert_eq!(ids, vec!["tur", "aus", "jpn"]);
    }

    #[test]
    fn malformed_geometry_names_the_country() {
        let mut broken = country("tur", "Turkey", "TUR");
        broken.geometry = "{\"type\":\"Polygon\"".to_string();

        assert_eq!(
            assemble_feature_collection(&[broken]).unwrap_err(),
            GeometryError::MalformedGeometry("tur".to_string())
        );
    }

    #[tokio::test]
    async fn unresolved_identifier_fails_with_country_not_found() {
        let store = FakeCountries::with(&[country("tur", "Turkey", "TUR")]);

        let err = assemble_from_ids(&store, "tur,xyz").await.unwrap_err();
        assert_eq!(err, GeometryError::CountryNotFound("xyz".to_string()));
    }

    #[tokio::test]
    async fn full_pipeline_resolves_and_assembles_in_order() {
        let store = FakeCountries::with(&[
            country("tur", "Turkey", "TUR"),
            country("aus", "Australia", "AUS"),
        ]);

        let document = assemble_from_ids(&store, "aus,tur").await.unwrap();
        let admins: Vec<String> = features_of(&document)
            .iter()
            .map(|f| f["properties"]["ADMIN"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(admins, vec!["Australia", "Turkey"]);
    }
}
