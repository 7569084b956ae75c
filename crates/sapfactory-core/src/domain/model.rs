//! Implementation model: the typed configuration a run is planned from.
//!
//! The model is immutable once loaded. Every section except `project` is
//! optional in the source document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::error::{FactoryError, Result};

/// A single row, record or parameter set. Ordered so artifacts are stable.
pub type Record = BTreeMap<String, serde_json::Value>;

/// Complete implementation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationModel {
    pub project: ProjectConfig,
    #[serde(default)]
    pub landscape: LandscapeConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub customizing: CustomizingConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub testing: TestingConfig,
}

impl ImplementationModel {
    /// Load a model from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(Self::from_json(&text)?),
            Some("yaml") | Some("yml") => Ok(Self::from_yaml(&text)?),
            _ => Err(FactoryError::ModelFormat {
                path: path.display().to_string(),
                message: "expected a .json, .yaml or .yml file".to_string(),
            }),
        }
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Look up a declared landscape system.
    pub fn system(&self, id: &str) -> Option<&SystemConfig> {
        self.landscape.systems.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Project, landscape, scope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub customer: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_template() -> String {
    "STANDARD".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandscapeConfig {
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

/// One SAP system of the landscape (DEV, QAS, PRD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub id: String,
    pub client: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default = "default_countries")]
    pub country: Vec<String>,
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,
    #[serde(default)]
    pub org: OrgConfig,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            country: default_countries(),
            modules: default_modules(),
            org: OrgConfig::default(),
        }
    }
}

fn default_countries() -> Vec<String> {
    vec!["DE".to_string()]
}

fn default_modules() -> Vec<String> {
    vec!["FI".to_string(), "MM".to_string()]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgConfig {
    #[serde(default)]
    pub company_codes: Vec<CompanyCode>,
    #[serde(default)]
    pub plants: Vec<Plant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyCode {
    pub code: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company_code: Option<String>,
}

fn default_target() -> String {
    "DEV".to_string()
}

// ---------------------------------------------------------------------------
// Customizing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomizingConfig {
    #[serde(default)]
    pub packages: Vec<CustomizingPackage>,
}

/// Ordered set of customizing steps applied to one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomizingPackage {
    pub id: String,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<CustomizingStep>,
}

/// What a customizing step does against the target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Upsert one row of a configuration table.
    SetTable,
    /// Invoke a BAPI; passes when the return type is S, W or I.
    CallBapi,
    /// Upsert each `params` entry into the parameter table `TPARA`.
    SetParameter,
    /// Trigger a report through the HTTP gateway; passes on status 200.
    ExecuteReport,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::SetTable => "set_table",
            StepAction::CallBapi => "call_bapi",
            StepAction::SetParameter => "set_parameter",
            StepAction::ExecuteReport => "execute_report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomizingStep {
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bapi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Record>,
}

impl CustomizingStep {
    /// A `set_table` step.
    pub fn set_table(table: &str, key: Record, values: Record) -> Self {
        Self {
            action: StepAction::SetTable,
            table: Some(table.to_string()),
            key: Some(key),
            values: Some(values),
            bapi: None,
            report: None,
            params: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub objects: Vec<MigrationObject>,
}

/// One data migration object (BUSINESS_PARTNER, MATERIAL, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationObject {
    pub id: String,
    /// Source label (`csv`, `database`, `legacy_sap`, `excel`).
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_target")]
    pub target: String,
    /// Target entity; derived from `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Source field -> target field.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    /// `required:FIELD` or `max_length:FIELD:N`, checked on mapped records.
    #[serde(default)]
    pub validation_rules: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Inline source records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Record>,
    /// Number of deterministic sample records to generate when `records` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<usize>,
}

fn default_source() -> String {
    "csv".to_string()
}

fn default_batch_size() -> usize {
    1000
}

// ---------------------------------------------------------------------------
// Testing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestingConfig {
    #[serde(default)]
    pub suites: Vec<TestSuite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub id: String,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    #[default]
    Api,
    Bapi,
    Process,
    Data,
    /// Connectivity check against the gateway health endpoint.
    Integration,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Api => "api",
            CaseType::Bapi => "bapi",
            CaseType::Process => "process",
            CaseType::Data => "data",
            CaseType::Integration => "integration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(rename = "type", default)]
    pub case_type: CaseType,
    #[serde(default)]
    pub description: Option<String>,

    // api
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_data: Option<Record>,

    // bapi
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bapi: Option<String>,
    #[serde(default, skip_serializing_if = "Record::is_empty")]
    pub params: Record,

    // process
    /// Named business process; supplies the steps when `steps` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ProcessStep>,

    // data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_key: Option<Record>,

    // integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl TestCase {
    /// An `api` case expecting `expected_status` from `GET endpoint`.
    pub fn api(id: &str, endpoint: &str, expected_status: u16) -> Self {
        Self {
            id: id.to_string(),
            case_type: CaseType::Api,
            description: None,
            endpoint: Some(endpoint.to_string()),
            method: default_method(),
            body: None,
            expected_status: Some(expected_status),
            expected_data: None,
            bapi: None,
            params: Record::new(),
            process: None,
            steps: Vec::new(),
            table: None,
            expected_count: None,
            expected_key: None,
            source: None,
            target: None,
        }
    }
}

/// One call inside a `process` case. A step with `bapi` set is an RPC call,
/// otherwise an HTTP request against `endpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bapi: Option<String>,
    #[serde(default, skip_serializing_if = "Record::is_empty")]
    pub params: Record,
}

fn default_method() -> String {
    "GET".to_string()
}
