//! Posts property edits back to the server.
//!
//! An edit is flattened into `path -> value` pairs and each pair becomes its
//! own POST. All requests run concurrently and the batch resolves once every
//! one of them has settled; nothing in flight is cancelled.

use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::codec::flatten;
use crate::types::{EditRequest, EntityId, WriteConfirmation, WriteResponse};

pub const CSRF_HEADER: &str = "X-CSRFToken";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid write endpoint '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected '{property}' with {status}: {body}")]
    Status {
        property: String,
        status: u16,
        body: String,
    },
    #[error("undecodable response for '{property}': {source}")]
    Decode {
        property: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{failed} of {total} writes failed")]
    Batch {
        failed: usize,
        total: usize,
        batch: WriteBatch,
    },
}

/// What a batch with failed writes resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Always `Ok`; callers inspect each outcome.
    #[default]
    BestEffort,
    /// Waits for every write, then `Err(WriteError::Batch)` if any failed.
    AllOrError,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub endpoint: String,
    pub csrf_token: Option<String>,
    pub timeout: Duration,
    pub policy: WritePolicy,
}

impl WriterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            csrf_token: None,
            timeout: DEFAULT_TIMEOUT,
            policy: WritePolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct WriteOutcome {
    pub request: EditRequest,
    pub result: Result<WriteConfirmation, WriteError>,
}

impl WriteOutcome {
    /// Succeeded and the server persisted exactly what was asked for.
    pub fn is_exact(&self) -> bool {
        matches!(&self.result, Ok(c) if c.matches(&self.request))
    }
}

#[derive(Debug, Default)]
pub struct WriteBatch {
    pub outcomes: Vec<WriteOutcome>,
}

impl WriteBatch {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn confirmations(&self) -> impl Iterator<Item = &WriteConfirmation> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Successful writes whose persisted value differs from the request.
    pub fn coerced(&self) -> impl Iterator<Item = &WriteOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok() && !o.is_exact())
    }
}

pub struct WriteCoordinator {
    client: reqwest::Client,
    endpoint: Url,
    csrf_token: Option<String>,
    policy: WritePolicy,
}

impl WriteCoordinator {
    pub fn new(config: WriterConfig) -> Result<Self, WriteError> {
        let endpoint =
            Url::parse(&config.endpoint).map_err(|source| WriteError::InvalidEndpoint {
                url: config.endpoint.clone(),
                source,
            })?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            csrf_token: config.csrf_token,
            policy: config.policy,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// One request per flattened path of `edit`. A non-object edit has no
    /// properties and yields nothing.
    pub fn requests(entity: EntityId, edit: &Value) -> Vec<EditRequest> {
        match flatten(edit) {
            Value::Object(paths) => paths
                .into_iter()
                .map(|(property, value)| EditRequest {
                    cold_room: entity,
                    property,
                    value,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub async fn write(&self, entity: EntityId, edit: &Value) -> Result<WriteBatch, WriteError> {
        let requests = Self::requests(entity, edit);
        let outcomes = join_all(requests.into_iter().map(|request| async move {
            let result = self.write_property(&request).await;
            match &result {
                Ok(c) if c.matches(&request) => info!("write ok: {c}"),
                Ok(c) => warn!(requested = %request.value, "write coerced: {c}"),
                Err(e) => warn!(
                    cold_room = request.cold_room,
                    property = %request.property,
                    error = %e,
                    "write failed"
                ),
            }
            WriteOutcome { request, result }
        }))
        .await;

        let batch = WriteBatch { outcomes };
        let failed = batch.failed();
        if self.policy == WritePolicy::AllOrError && failed > 0 {
            return Err(WriteError::Batch {
                failed,
                total: batch.total(),
                batch,
            });
        }
        Ok(batch)
    }

    pub async fn write_property(
        &self,
        request: &EditRequest,
    ) -> Result<WriteConfirmation, WriteError> {
        let mut req = self.client.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.csrf_token {
            req = req.header(CSRF_HEADER, token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(WriteError::Status {
                property: request.property.clone(),
                status: status.as_u16(),
                body,
            });
        }
        let parsed: WriteResponse =
            serde_json::from_str(&body).map_err(|source| WriteError::Decode {
                property: request.property.clone(),
                source,
            })?;
        Ok(parsed.data)
    }
}
