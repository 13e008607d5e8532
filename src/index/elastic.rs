// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Elasticsearch-compatible search index over HTTP.
//!
//! | Operation | Request                                   |
//! |-----------|-------------------------------------------|
//! | exists    | `HEAD /{index}`                           |
//! | create    | `PUT /{index}` with settings and mapping  |
//! | upsert    | `PUT /{index}/_doc/{id}?routing={root}`   |
//! | delete    | `DELETE /{index}/_doc/{id}?routing={root}`|
//!
//! A 400 carrying `resource_already_exists_exception` on create means another
//! consumer won the race, and a 404 on delete means the entry was never there.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use crate::config::PlanSyncConfig;
use crate::flatten::IndexNode;
use crate::join::JoinSchema;
use super::{CreateOutcome, DeleteOutcome, IndexError, SearchIndex};

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

pub struct ElasticIndex {
    client: Client,
    base_url: Url,
    index: String,
    join_field: String,
    shards: u32,
    replicas: u32,
    auth: Option<(String, Option<String>)>,
}

impl ElasticIndex {
    /// Build a client from the index section of the config.
    pub fn from_config(config: &PlanSyncConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .connect_timeout(config.index_connect_timeout())
            .timeout(config.index_request_timeout())
            .build()
            .map_err(|e| IndexError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let mut index = Self::with_client(client, &config.index_url, &config.index_name)?
            .with_join_field(&config.join_field)
            .with_layout(config.index_shards, config.index_replicas);
        if let Some(user) = &config.index_username {
            index.auth = Some((user.clone(), config.index_password.clone()));
        }
        Ok(index)
    }

    /// Client with default timeouts, join field and layout.
    pub fn new(base_url: &str, index: impl Into<String>) -> Result<Self, IndexError> {
        Self::with_client(Client::new(), base_url, index)
    }

    fn with_client(client: Client, base_url: &str, index: impl Into<String>) -> Result<Self, IndexError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| IndexError::Config(format!("Invalid index URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::Config(format!("Index URL '{}' cannot be a base", base_url)));
        }
        Ok(Self {
            client,
            base_url,
            index: index.into(),
            join_field: "plan_join".to_string(),
            shards: 1,
            replicas: 1,
            auth: None,
        })
    }

    pub fn with_join_field(mut self, join_field: impl Into<String>) -> Self {
        self.join_field = join_field.into();
        self
    }

    pub fn with_layout(mut self, shards: u32, replicas: u32) -> Self {
        self.shards = shards;
        self.replicas = replicas;
        self
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some((user.into(), password));
        self
    }

    /// `{base}/{index}/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.index).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, IndexError> {
        builder
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))
    }
}

impl fmt::Debug for ElasticIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticIndex")
            .field("base_url", &self.base_url.as_str())
            .field("index", &self.index)
            .field("join_field", &self.join_field)
            .field("has_auth", &self.auth.is_some())
            .finish()
    }
}

async fn rejected(response: Response) -> IndexError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    IndexError::Rejected { status, body }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    fn name(&self) -> &str {
        &self.index
    }

    async fn exists(&self) -> Result<bool, IndexError> {
        let response = self.send(self.request(Method::HEAD, self.url(&[]))).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(rejected(response).await),
        }
    }

    async fn create(&self, schema: &JoinSchema) -> Result<CreateOutcome, IndexError> {
        let body = schema.index_body(&self.join_field, self.shards, self.replicas);
        let response = self
            .send(self.request(Method::PUT, self.url(&[])).json(&body))
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && text.contains(ALREADY_EXISTS) {
            debug!(index = %self.index, "Index created concurrently");
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(IndexError::Rejected { status: status.as_u16(), body: text })
    }

    async fn upsert(&self, node: &IndexNode) -> Result<(), IndexError> {
        let source = node.to_source(&self.join_field);
        let request = self
            .request(Method::PUT, self.url(&["_doc", &node.id]))
            .query(&[("routing", node.routing_id.as_str())])
            .json(&source);

        let response = self.send(request).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejected(response).await)
        }
    }

    async fn delete(&self, id: &str, routing: Option<&str>) -> Result<DeleteOutcome, IndexError> {
        let mut request = self.request(Method::DELETE, self.url(&["_doc", id]));
        if let Some(routing) = routing {
            request = request.query(&[("routing", routing)]);
        }

        let response = self.send(request).await?;
        match response.status() {
            s if s.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            _ => Err(rejected(response).await),
        }
    }
}
