//! Target-system adapters.
//!
//! An [`Adapter`] is the only way plugins touch an SAP system. Adapters are
//! created per run and per system by an [`AdapterFactory`] looked up in the
//! [`AdapterRegistry`], which is populated at startup and read-only afterwards.

pub mod fake;
pub mod registry;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Record, SystemConfig};

pub use fake::{FakeAdapterFactory, FakeSapAdapter};
pub use registry::{AdapterRegistry, UnsupportedAdapterFactory};

/// Errors raised by adapters. Plugins turn these into failed job results.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown table {table}")]
    UnknownTable { table: String },

    #[error("malformed key for {table}: {reason}")]
    MalformedKey { table: String, reason: String },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("record {handle} not found in {entity}")]
    RecordNotFound { entity: String, handle: String },

    #[error("not connected to system {system}")]
    NotConnected { system: String },

    #[error("system unavailable: {0}")]
    Unavailable(String),

    #[error("call timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("adapter '{adapter}' is not supported in this build")]
    Unsupported { adapter: String },

    #[error("no adapter registered under '{name}'")]
    UnknownAdapter { name: String },
}

impl AdapterError {
    /// Failures that may clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Unavailable(_) | AdapterError::Timeout { .. })
    }

    /// Stable machine-readable code recorded in job evidence.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::UnknownTable { .. } => "unknown_table",
            AdapterError::MalformedKey { .. } => "malformed_key",
            AdapterError::MalformedRequest(_) => "malformed_request",
            AdapterError::RecordNotFound { .. } => "record_not_found",
            AdapterError::NotConnected { .. } => "not_connected",
            AdapterError::Unavailable(_) => "unavailable",
            AdapterError::Timeout { .. } => "timeout",
            AdapterError::Unsupported { .. } => "unsupported",
            AdapterError::UnknownAdapter { .. } => "unknown_adapter",
        }
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Opaque reference to a loaded record: the joined key values of its entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHandle(pub String);

impl std::fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableWrite {
    Inserted,
    Updated,
}

/// Result of a BAPI call. `return_type` follows the SAP `RETURN-TYPE`
/// convention: S(uccess), W(arning), I(nfo), E(rror), A(bort).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BapiResponse {
    pub return_type: String,
    pub message: String,
    #[serde(default)]
    pub data: Record,
}

impl BapiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            return_type: "S".to_string(),
            message: message.into(),
            data: Record::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            return_type: "E".to_string(),
            message: message.into(),
            data: Record::new(),
        }
    }

    pub fn with_data(mut self, field: &str, value: serde_json::Value) -> Self {
        self.data.insert(field.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.return_type.as_str(), "S" | "W" | "I")
    }
}

/// Response of an HTTP-style gateway request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of an adapter, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterState {
    pub system_id: String,
    pub client: String,
    pub connected: bool,
    pub call_count: u64,
    /// Row count per table.
    pub tables: std::collections::BTreeMap<String, usize>,
}

/// Capability-abstracted gateway to one target system.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn system_id(&self) -> &str;

    /// Idempotent readiness check; `Ok(false)` means the system refused.
    async fn connect(&self) -> AdapterResult<bool>;

    async fn disconnect(&self) -> AdapterResult<()>;

    /// Upsert one row keyed by the table's key schema.
    async fn set_table(&self, table: &str, key: &Record, values: &Record)
        -> AdapterResult<TableWrite>;

    /// Rows of `table`, optionally restricted to rows matching every `filter` field.
    async fn read_table(&self, table: &str, filter: Option<&Record>) -> AdapterResult<Vec<Record>>;

    /// Persist one migrated record.
    async fn load_record(&self, entity: &str, record: &Record) -> AdapterResult<RecordHandle>;

    async fn read_record(&self, entity: &str, handle: &RecordHandle) -> AdapterResult<Record>;

    async fn call_bapi(&self, name: &str, params: &Record) -> AdapterResult<BapiResponse>;

    async fn request(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> AdapterResult<ApiResponse>;
}

/// Builds adapters for one registry key.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, system: &SystemConfig) -> AdapterResult<std::sync::Arc<dyn Adapter>>;
}
