//! JSON-over-HTTP backend adapter.
//!
//! `POST {base}/execute` with `{"query", "dialect"}` returns an
//! [`ExecutionOutcome`]; `GET {base}/schema` returns a [`DiscoveredSchema`].

use super::{DiscoveredSchema, ExecutionBackend, ExecutionOutcome, SchemaDiscovery};
use crate::dialect::Dialect;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    query: &'a str,
    dialect: Dialect,
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    dialect: Dialect,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, dialect: Dialect) -> Result<Self> {
        Self::with_timeout(base_url, dialect, Duration::from_secs(120))
    }

    pub fn with_timeout(base_url: impl Into<String>, dialect: Dialect, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dialect,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, query: &str) -> Result<ExecutionOutcome> {
        let url = self.endpoint("execute");
        debug!("POST {} ({} chars)", url, query.len());

        let response = self
            .client
            .post(&url)
            .json(&ExecuteRequest {
                query,
                dialect: self.dialect,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Backends report rejected queries either as 200 + success=false or as
        // an error status with an outcome body.
        match serde_json::from_str::<ExecutionOutcome>(&body) {
            Ok(mut outcome) => {
                if !status.is_success() && outcome.error.is_none() {
                    outcome.success = false;
                    outcome.error = Some(format!("HTTP {}", status));
                }
                if outcome.success && outcome.row_count == 0 {
                    outcome.row_count = outcome.data.len();
                }
                Ok(outcome)
            }
            Err(_) if !status.is_success() => {
                warn!("Backend returned {} with non-JSON body", status);
                Ok(ExecutionOutcome::failed(format!("HTTP {}: {}", status, body)))
            }
            Err(e) => Err(EngineError::Execution(format!(
                "Malformed execution response: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl SchemaDiscovery for HttpBackend {
    async fn discover(&self) -> Result<DiscoveredSchema> {
        let url = self.endpoint("schema");
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Schema(format!(
                "Schema discovery failed with {}: {}",
                status, body
            )));
        }

        let schema: DiscoveredSchema = response.json().await?;
        if !schema.success {
            return Err(EngineError::Schema(
                schema
                    .error
                    .unwrap_or_else(|| "Schema discovery reported failure".to_string()),
            ));
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let backend = HttpBackend::new("http://localhost:8080/api/", Dialect::Sql).unwrap();
        assert_eq!(backend.endpoint("execute"), "http://localhost:8080/api/execute");
        assert_eq!(backend.dialect(), Dialect::Sql);
    }

    #[test]
    fn test_execute_request_shape() {
        let body = serde_json::to_value(ExecuteRequest {
            query: "EVALUATE 'Sales'",
            dialect: Dialect::Dax,
        })
        .unwrap();
        assert_eq!(body["dialect"], "dax");
        assert_eq!(body["query"], "EVALUATE 'Sales'");
    }

    #[test]
    fn test_outcome_parses_backend_payload() {
        let outcome: ExecutionOutcome = serde_json::from_str(
            r#"{"success": false, "error": "Invalid column name 'Amt'."}"#,
        )
        .unwrap();
        assert!(!outcome.success);
        assert!(outcome.data.is_empty());

        let schema: DiscoveredSchema = serde_json::from_str(
            r#"{"tables": {"Sales": {"columns": [{"name": "Amount", "type": "decimal"}]}}}"#,
        )
        .unwrap();
        assert!(schema.success);
        assert_eq!(schema.tables["Sales"].columns[0].data_type, "decimal");
        assert!(schema.tables["Sales"].columns[0].nullable);
    }
}
