//! In-memory simulation of an SAP system.
//!
//! `FakeSapAdapter` keeps a keyed table store per instance, answers a small
//! set of canned BAPIs and gateway endpoints, and counts every call so tests
//! can assert on adapter traffic. Errors can be queued with
//! [`FakeSapAdapter::fail_next`] to exercise failure and retry paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::schema;
use super::{
    Adapter, AdapterError, AdapterFactory, AdapterResult, AdapterState, ApiResponse,
    BapiResponse, RecordHandle, TableWrite,
};
use crate::domain::{Record, SystemConfig};
use crate::metrics::METRICS;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Default)]
struct FakeState {
    connected: bool,
    refuse_connect: bool,
    tables: BTreeMap<String, BTreeMap<String, Record>>,
    auto_seq: u64,
    bapi_overrides: HashMap<String, BapiResponse>,
    injected: VecDeque<AdapterError>,
}

/// Simulation adapter for one system id.
#[derive(Debug)]
pub struct FakeSapAdapter {
    system_id: String,
    client: String,
    calls: AtomicU64,
    state: Mutex<FakeState>,
}

impl FakeSapAdapter {
    pub fn new(system_id: &str, client: &str) -> Self {
        Self {
            system_id: system_id.to_string(),
            client: client.to_string(),
            calls: AtomicU64::new(0),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Answer `name` with `response` instead of the canned reply.
    pub fn with_bapi_response(self, name: &str, response: BapiResponse) -> Self {
        self.lock()
            .bapi_overrides
            .insert(name.to_string(), response);
        self
    }

    /// Make the next call (of any kind) fail with `err`. Queued errors are
    /// consumed in order.
    pub fn fail_next(&self, err: AdapterError) {
        self.lock().injected.push_back(err);
    }

    /// Make `connect` report the system as unreachable.
    pub fn refuse_connections(&self) {
        self.lock().refuse_connect = true;
    }

    /// Calls made through the `Adapter` trait, including `connect`.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> AdapterState {
        let state = self.lock();
        AdapterState {
            system_id: self.system_id.clone(),
            client: self.client.clone(),
            connected: state.connected,
            call_count: self.call_count(),
            tables: state
                .tables
                .iter()
                .map(|(name, rows)| (name.clone(), rows.len()))
                .collect(),
        }
    }

    /// All rows of a table, in key order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and surface any queued failure.
    fn begin_call(&self) -> AdapterResult<MutexGuard<'_, FakeState>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        METRICS.inc_adapter_calls();
        let mut state = self.lock();
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        Ok(state)
    }

    fn begin_connected_call(&self) -> AdapterResult<MutexGuard<'_, FakeState>> {
        let state = self.begin_call()?;
        if !state.connected {
            return Err(AdapterError::NotConnected {
                system: self.system_id.clone(),
            });
        }
        Ok(state)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Escape the key separator so distinct key tuples never join to the same string.
fn escape_key_part(part: &str) -> String {
    part.replace('\\', "\\\\").replace('|', "\\|")
}

/// Build the storage key from `fields`, taking values from `record`.
fn key_from(table: &str, fields: &[&str], record: &Record) -> AdapterResult<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        match record.get(*field) {
            Some(v) if !is_blank(v) => parts.push(escape_key_part(&render(v))),
            _ => {
                return Err(AdapterError::MalformedKey {
                    table: table.to_string(),
                    reason: format!("missing key field {field}"),
                })
            }
        }
    }
    Ok(parts.join("|"))
}

fn canned_bapi(name: &str, params: &Record) -> BapiResponse {
    match name {
        "BAPI_COMPANYCODE_GETDETAIL" => {
            let bukrs = params
                .get("COMPANYCODE")
                .cloned()
                .unwrap_or_else(|| json!("1000"));
            BapiResponse::success("Success").with_data(
                "COMPANYCODE_DETAIL",
                json!({"BUKRS": bukrs, "BUTXT": "Demo Company", "WAERS": "EUR"}),
            )
        }
        "BAPI_COSTCENTER_GETLIST" => {
            BapiResponse::success("Success").with_data("COSTCENTER_LIST", json!([]))
        }
        "BAPI_MATERIAL_GETLIST" => {
            BapiResponse::success("Success").with_data("MATNRLIST", json!([]))
        }
        "BAPI_TRANSACTION_COMMIT" => BapiResponse::success("Transaction committed"),
        other => BapiResponse::success(format!("BAPI {other} executed")),
    }
}

fn gateway_response(endpoint: &str) -> ApiResponse {
    let body = match endpoint {
        "/sap/health" => Some(json!({"status": "healthy", "version": "S/4HANA 2023"})),
        "/sap/opu/odata/sap/API_BUSINESS_PARTNER"
        | "/sap/opu/odata/sap/API_MATERIAL_DOCUMENT_SRV"
        | "/sap/opu/odata/sap/API_PURCHASEORDER_PROCESS_SRV" => Some(json!({"d": {"results": []}})),
        other if other.starts_with("/sap") => Some(json!({
            "d": {"results": [], "__metadata": {"uri": other, "type": "SAP.Entity"}}
        })),
        _ => None,
    };
    match body {
        Some(body) => ApiResponse {
            status: 200,
            body: Some(body),
            error: None,
        },
        None => ApiResponse {
            status: 404,
            body: None,
            error: Some(format!("Endpoint not found: {endpoint}")),
        },
    }
}

#[async_trait]
impl Adapter for FakeSapAdapter {
    fn system_id(&self) -> &str {
        &self.system_id
    }

    async fn connect(&self) -> AdapterResult<bool> {
        let mut state = self.begin_call()?;
        if state.refuse_connect {
            return Ok(false);
        }
        if !state.connected {
            debug!(system = %self.system_id, client = %self.client, "fake system connected");
        }
        state.connected = true;
        Ok(true)
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        let mut state = self.begin_call()?;
        state.connected = false;
        Ok(())
    }

    async fn set_table(
        &self,
        table: &str,
        key: &Record,
        values: &Record,
    ) -> AdapterResult<TableWrite> {
        let mut state = self.begin_connected_call()?;
        let fields = schema::key_fields(table).ok_or_else(|| AdapterError::UnknownTable {
            table: table.to_string(),
        })?;
        if let Some(extra) = key.keys().find(|k| !fields.contains(&k.as_str())) {
            return Err(AdapterError::MalformedKey {
                table: table.to_string(),
                reason: format!("{extra} is not a key field"),
            });
        }
        let key_str = key_from(table, fields, key)?;

        let mut row = values.clone();
        row.extend(key.iter().map(|(k, v)| (k.clone(), v.clone())));

        let rows = state.tables.entry(table.to_string()).or_default();
        let write = if rows.insert(key_str, row).is_some() {
            TableWrite::Updated
        } else {
            TableWrite::Inserted
        };
        Ok(write)
    }

    async fn read_table(&self, table: &str, filter: Option<&Record>) -> AdapterResult<Vec<Record>> {
        let state = self.begin_connected_call()?;
        let rows = match state.tables.get(table) {
            Some(rows) => rows,
            None if schema::key_fields(table).is_some() => return Ok(Vec::new()),
            None => {
                return Err(AdapterError::UnknownTable {
                    table: table.to_string(),
                })
            }
        };
        Ok(rows
            .values()
            .filter(|row| {
                filter.map_or(true, |f| f.iter().all(|(k, v)| row.get(k) == Some(v)))
            })
            .cloned()
            .collect())
    }

    async fn load_record(&self, entity: &str, record: &Record) -> AdapterResult<RecordHandle> {
        let mut state = self.begin_connected_call()?;
        let key_str = match schema::key_fields(entity) {
            Some(fields) => key_from(entity, fields, record)?,
            None => {
                state.auto_seq += 1;
                format!("AUTO_{:06}", state.auto_seq)
            }
        };
        state
            .tables
            .entry(entity.to_string())
            .or_default()
            .insert(key_str.clone(), record.clone());
        Ok(RecordHandle(key_str))
    }

    async fn read_record(&self, entity: &str, handle: &RecordHandle) -> AdapterResult<Record> {
        let state = self.begin_connected_call()?;
        state
            .tables
            .get(entity)
            .and_then(|rows| rows.get(&handle.0))
            .cloned()
            .ok_or_else(|| AdapterError::RecordNotFound {
                entity: entity.to_string(),
                handle: handle.0.clone(),
            })
    }

    async fn call_bapi(&self, name: &str, params: &Record) -> AdapterResult<BapiResponse> {
        let state = self.begin_connected_call()?;
        if name.trim().is_empty() {
            return Err(AdapterError::MalformedRequest(
                "BAPI name must not be empty".to_string(),
            ));
        }
        if let Some(response) = state.bapi_overrides.get(name) {
            return Ok(response.clone());
        }
        Ok(canned_bapi(name, params))
    }

    async fn request(
        &self,
        method: &str,
        endpoint: &str,
        _body: Option<&Value>,
    ) -> AdapterResult<ApiResponse> {
        let _state = self.begin_connected_call()?;
        let method = method.to_ascii_uppercase();
        if !METHODS.contains(&method.as_str()) {
            return Err(AdapterError::MalformedRequest(format!(
                "unsupported method {method}"
            )));
        }
        if !endpoint.starts_with('/') {
            return Err(AdapterError::MalformedRequest(format!(
                "endpoint must be absolute: {endpoint}"
            )));
        }
        Ok(gateway_response(endpoint))
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

type SetupHook = Arc<dyn Fn(&FakeSapAdapter) + Send + Sync>;

/// Creates a fresh [`FakeSapAdapter`] per request and remembers every
/// instance it handed out.
#[derive(Default)]
pub struct FakeAdapterFactory {
    created: Mutex<Vec<Arc<FakeSapAdapter>>>,
    setup: Option<SetupHook>,
}

impl FakeAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on every adapter right after creation.
    pub fn with_setup(hook: impl Fn(&FakeSapAdapter) + Send + Sync + 'static) -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            setup: Some(Arc::new(hook)),
        }
    }

    pub fn created(&self) -> Vec<Arc<FakeSapAdapter>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of call counts over every adapter created so far.
    pub fn total_calls(&self) -> u64 {
        self.created().iter().map(|a| a.call_count()).sum()
    }
}

impl AdapterFactory for FakeAdapterFactory {
    fn create(&self, system: &SystemConfig) -> AdapterResult<Arc<dyn Adapter>> {
        let adapter = Arc::new(FakeSapAdapter::new(&system.id, &system.client));
        if let Some(hook) = &self.setup {
            hook(adapter.as_ref());
        }
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&adapter));
        Ok(adapter as Arc<dyn Adapter>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    async fn connected() -> FakeSapAdapter {
        let adapter = FakeSapAdapter::new("DEV", "100");
        assert!(adapter.connect().await.unwrap());
        adapter
    }

    #[tokio::test]
    async fn set_table_upserts() {
        let adapter = connected().await;
        let key = rec(&[("BUKRS", "1000")]);
        let first = adapter
            .set_table("T001", &key, &rec(&[("BUTXT", "ACME")]))
            .await
            .unwrap();
        let second = adapter
            .set_table("T001", &key, &rec(&[("BUTXT", "ACME AG")]))
            .await
            .unwrap();
        assert_eq!(first, TableWrite::Inserted);
        assert_eq!(second, TableWrite::Updated);

        let rows = adapter.rows("T001");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["BUTXT"], json!("ACME AG"));
        assert_eq!(rows[0]["BUKRS"], json!("1000"));
    }

    #[tokio::test]
    async fn composite_keys_with_separator_do_not_collide() {
        let adapter = connected().await;
        let first = rec(&[("BUKRS", "A|B"), ("KTOPL", "C")]);
        let second = rec(&[("BUKRS", "A"), ("KTOPL", "B|C")]);
        adapter.set_table("T001K", &first, &Record::new()).await.unwrap();
        let write = adapter
            .set_table("T001K", &second, &Record::new())
            .await
            .unwrap();

        assert_eq!(write, TableWrite::Inserted);
        assert_eq!(adapter.rows("T001K").len(), 2);
        assert_eq!(
            key_from("T001K", &["BUKRS", "KTOPL"], &first).unwrap(),
            "A\\|B|C"
        );
    }

    #[tokio::test]
    async fn malformed_keys_are_rejected() {
        let adapter = connected().await;
        let err = adapter
            .set_table("T001K", &rec(&[("BUKRS", "1000")]), &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::MalformedKey { .. }));

        let err = adapter
            .set_table("T001", &rec(&[("BUKRS", "1000"), ("LAND1", "DE")]), &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::MalformedKey { .. }));

        let err = adapter
            .set_table("ZUNKNOWN", &rec(&[("X", "1")]), &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnknownTable { .. }));
    }

    #[tokio::test]
    async fn calls_require_connection() {
        let adapter = FakeSapAdapter::new("DEV", "100");
        let err = adapter
            .call_bapi("BAPI_TRANSACTION_COMMIT", &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn load_then_read_record() {
        let adapter = connected().await;
        let record = rec(&[("PARTNER", "BP0000001"), ("NAME", "Partner 1")]);
        let handle = adapter.load_record("BUT000", &record).await.unwrap();
        assert_eq!(handle.0, "BP0000001");
        assert_eq!(adapter.read_record("BUT000", &handle).await.unwrap(), record);

        let missing = adapter
            .read_record("BUT000", &RecordHandle("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(missing, AdapterError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_entities_get_generated_handles() {
        let adapter = connected().await;
        let a = adapter
            .load_record("ZLEGACY", &rec(&[("ID", "1")]))
            .await
            .unwrap();
        let b = adapter
            .load_record("ZLEGACY", &rec(&[("ID", "2")]))
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(adapter.state().tables.get("ZLEGACY"), Some(&2));
    }

    #[tokio::test]
    async fn gateway_endpoints() {
        let adapter = connected().await;
        let health = adapter.request("GET", "/sap/health", None).await.unwrap();
        assert_eq!(health.status, 200);
        assert_eq!(health.body.unwrap()["status"], "healthy");

        let generic = adapter.request("get", "/sap/custom", None).await.unwrap();
        assert_eq!(generic.status, 200);

        let missing = adapter.request("GET", "/other", None).await.unwrap();
        assert_eq!(missing.status, 404);

        let bad = adapter.request("BREW", "/sap/health", None).await;
        assert!(matches!(bad, Err(AdapterError::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn canned_and_overridden_bapis() {
        let adapter = FakeSapAdapter::new("DEV", "100")
            .with_bapi_response("BAPI_FAIL", BapiResponse::error("nope"));
        adapter.connect().await.unwrap();

        let detail = adapter
            .call_bapi(
                "BAPI_COMPANYCODE_GETDETAIL",
                &rec(&[("COMPANYCODE", "2000")]),
            )
            .await
            .unwrap();
        assert!(detail.is_success());
        assert_eq!(detail.data["COMPANYCODE_DETAIL"]["BUKRS"], json!("2000"));

        let other = adapter.call_bapi("Z_CUSTOM", &Record::new()).await.unwrap();
        assert_eq!(other.message, "BAPI Z_CUSTOM executed");

        let failed = adapter.call_bapi("BAPI_FAIL", &Record::new()).await.unwrap();
        assert!(!failed.is_success());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let adapter = connected().await;
        adapter.fail_next(AdapterError::Timeout { millis: 250 });
        let err = adapter.request("GET", "/sap/health", None).await.unwrap_err();
        assert!(err.is_transient());
        assert!(adapter.request("GET", "/sap/health", None).await.is_ok());
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test]
    async fn factory_hands_out_fresh_adapters() {
        let factory = FakeAdapterFactory::new();
        let system = SystemConfig {
            id: "QAS".to_string(),
            client: "200".to_string(),
            description: None,
        };
        let a = factory.create(&system).unwrap();
        let _b = factory.create(&system).unwrap();
        a.connect().await.unwrap();

        assert_eq!(factory.created().len(), 2);
        assert_eq!(factory.total_calls(), 1);
        assert_eq!(a.system_id(), "QAS");
    }
}
