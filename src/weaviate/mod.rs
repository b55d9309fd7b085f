//! Weaviate cluster integration
//!
//! Wraps the cluster's REST and GraphQL HTTP surfaces:
//! - readiness probe and schema inspection over REST
//! - keyword (BM25), semantic (nearText) and hybrid queries over GraphQL
//!
//! GraphQL selection sets are derived from the live collection schema:
//! every primitive-typed property is selected, object and cross-reference
//! properties are skipped.

mod graphql;

pub use graphql::SearchHit;

use crate::error::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Property data types that can appear in a GraphQL selection set
const PRIMITIVE_DATA_TYPES: &[&str] = &[
    "text", "string", "int", "number", "boolean", "date", "uuid", "text[]", "string[]", "int[]",
    "number[]", "boolean[]", "date[]", "uuid[]",
];

/// Weaviate HTTP client handle
pub struct WeaviateClient {
    client: Client,
    base_url: Url,
    api_key: String,
    retries: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaResponse {
    #[serde(default)]
    classes: Vec<CollectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct CollectionConfig {
    #[serde(rename = "class")]
    name: String,
    #[serde(default)]
    properties: Vec<PropertyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct PropertyConfig {
    name: String,
    #[serde(rename = "dataType", default)]
    data_type: Vec<String>,
}

impl WeaviateClient {
    /// Create a client for a cluster base URL and API key.
    ///
    /// URLs without a scheme (the cloud console hands those out) get `https://`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let normalized = if base_url.contains("://") {
            base_url.to_string()
        } else {
            format!("https://{base_url}")
        };
        let base_url = Url::parse(&normalized)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            retries: 2,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid Weaviate URL: {e}")))
    }

    /// Send with bounded retry on transport failure or 5xx.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            match build().send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_err = Some(Error::Weaviate(format!(
                        "cluster returned {}",
                        response.status()
                    )));
                }
                Ok(response) => return Ok(response),
                Err(e) => last_err = Some(Error::Http(e)),
            }

            if attempt < self.retries {
                tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Weaviate("request failed".to_string())))
    }

    /// Readiness probe (`/v1/.well-known/ready`).
    ///
    /// Ok(false) means the cluster answered but is not ready; transport
    /// failures after retry surface as errors.
    pub async fn is_ready(&self) -> Result<bool> {
        let url = self.endpoint("/v1/.well-known/ready")?;
        let response = self
            .send_with_retry(|| self.client.get(url.clone()).bearer_auth(&self.api_key))
            .await?;
        Ok(response.status().is_success())
    }

    /// List collection names, sorted and deduplicated.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let url = self.endpoint("/v1/schema")?;
        let response = self
            .send_with_retry(|| self.client.get(url.clone()).bearer_auth(&self.api_key))
            .await?;
        let schema: SchemaResponse = response
            .error_for_status()
            .map_err(|e| Error::Weaviate(e.to_string()))?
            .json()
            .await?;

        let mut names: Vec<String> = schema.classes.into_iter().map(|c| c.name).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Fetch a collection's schema config as raw JSON.
    pub async fn get_schema(&self, collection: &str) -> Result<Value> {
        graphql::validate_collection_name(collection)?;

        let url = self.endpoint(&format!("/v1/schema/{collection}"))?;
        let response = self
            .send_with_retry(|| self.client.get(url.clone()).bearer_auth(&self.api_key))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }

        let body = response
            .error_for_status()
            .map_err(|e| Error::Weaviate(e.to_string()))?
            .json()
            .await?;
        Ok(body)
    }

    /// Primitive-typed property names of a collection, for selection sets.
    async fn selection_properties(&self, collection: &str) -> Result<Vec<String>> {
        let schema = self.get_schema(collection).await?;
        let config: CollectionConfig = serde_json::from_value(schema)?;

        Ok(config
            .properties
            .into_iter()
            .filter(|p| {
                p.data_type
                    .first()
                    .is_some_and(|t| PRIMITIVE_DATA_TYPES.contains(&t.as_str()))
            })
            .map(|p| p.name)
            .collect())
    }

    async fn graphql(&self, query: &str) -> Result<Value> {
        debug!(query, "Sending GraphQL query");
        let url = self.endpoint("/v1/graphql")?;
        let body = json!({ "query": query });
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(url.clone())
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;
        let value = response
            .error_for_status()
            .map_err(|e| Error::Weaviate(e.to_string()))?
            .json()
            .await?;
        Ok(value)
    }

    /// BM25 keyword search.
    pub async fn keyword_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let props = self.selection_properties(collection).await?;
        let gql = graphql::keyword_query(collection, query, limit, &props);
        let body = self.graphql(&gql).await?;
        graphql::parse_hits(&body, collection)
    }

    /// Semantic (nearText) search. Requires a vectorized collection.
    pub async fn semantic_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let props = self.selection_properties(collection).await?;
        let gql = graphql::semantic_query(collection, query, limit, &props);
        let body = self.graphql(&gql).await?;
        graphql::parse_hits(&body, collection)
    }

    /// Hybrid (BM25 + vector) search.
    ///
    /// `alpha` blends the legs (0 = keyword only, 1 = vector only);
    /// `query_properties` restricts the keyword leg; `vector` supplies the
    /// vector leg directly (used for image queries).
    pub async fn hybrid_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        alpha: f64,
        query_properties: Option<&[String]>,
        vector: Option<&[f32]>,
    ) -> Result<Vec<SearchHit>> {
        let props = self.selection_properties(collection).await?;
        let gql = graphql::hybrid_query(
            collection,
            query,
            limit,
            alpha,
            query_properties,
            vector,
            &props,
        );
        let body = self.graphql(&gql).await?;
        graphql::parse_hits(&body, collection)
    }
}
