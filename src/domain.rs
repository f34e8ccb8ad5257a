use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NmdcError;

/// A schema-unconstrained document as returned by the service.
pub type Record = Map<String, Value>;

pub const BIOSAMPLE_SET: &str = "biosample_set";
pub const STUDY_SET: &str = "study_set";

/// The `id` of a record, if present and a string.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(|value| value.as_str())
}

pub fn record_str<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record.get(field).and_then(|value| value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn biosample_set() -> Self {
        Self(BIOSAMPLE_SET.to_string())
    }

    pub fn study_set() -> Self {
        Self(STUDY_SET.to_string())
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionName {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return Err(NmdcError::Validation(format!(
                "invalid collection name: {value:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(NmdcError::Validation(format!("invalid entity id: {value:?}")));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Ordered field selection; an absent projection means "all fields".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Projection(Vec<String>);

impl Projection {
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collected: Vec<String> = Vec::new();
        for field in fields {
            let field: String = field.into();
            let field = field.trim();
            if !field.is_empty() && !collected.iter().any(|existing| existing == field) {
                collected.push(field.to_string());
            }
        }
        Self(collected)
    }

    pub fn ids_only() -> Self {
        Self(vec!["id".to_string()])
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|existing| existing == field)
    }

    /// Comma-joined form sent as the `projection` query parameter.
    pub fn to_param(&self) -> String {
        self.0.join(",")
    }
}

impl FromStr for Projection {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let projection = Self::from_fields(value.split(','));
        if projection.is_empty() {
            return Err(NmdcError::Validation(format!("empty projection: {value:?}")));
        }
        Ok(projection)
    }
}

/// MongoDB-style predicate object. Forwarded verbatim, never evaluated locally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, NmdcError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(NmdcError::Validation(format!(
                "filter must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Exclusive `$gt` / `$lt` bounds on one field.
    pub fn between(
        mut self,
        field: impl Into<String>,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> Self {
        let mut bounds = Map::new();
        bounds.insert("$gt".to_string(), lower.into());
        bounds.insert("$lt".to_string(), upper.into());
        self.0.insert(field.into(), Value::Object(bounds));
        self
    }

    pub fn any_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        let mut clause = Map::new();
        clause.insert("$in".to_string(), Value::Array(values));
        self.0.insert(field.into(), Value::Object(clause));
        self
    }

    pub fn exists(mut self, field: impl Into<String>, present: bool) -> Self {
        let mut clause = Map::new();
        clause.insert("$exists".to_string(), Value::Bool(present));
        self.0.insert(field.into(), Value::Object(clause));
        self
    }

    pub fn not_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut clause = Map::new();
        clause.insert("$ne".to_string(), value.into());
        self.0.insert(field.into(), Value::Object(clause));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// JSON-encoded form sent as the `filter` query parameter.
    pub fn to_param(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl FromStr for Filter {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed: Value = serde_json::from_str(value)
            .map_err(|err| NmdcError::Validation(format!("invalid filter JSON: {err}")))?;
        Self::from_value(parsed)
    }
}

/// Opaque continuation cursor issued by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageToken(String);

impl PageToken {
    /// Empty tokens signal exhaustion, the same as an absent one.
    pub fn from_response(value: Option<&str>) -> Option<Self> {
        match value {
            Some(token) if !token.is_empty() => Some(Self(token.to_string())),
            _ => None,
        }
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DoiProvider {
    Emsl,
    Jgi,
    Kbase,
    Osti,
    EssDive,
    Massive,
    Gsc,
    Zenodo,
    Edi,
    Figshare,
}

impl DoiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoiProvider::Emsl => "emsl",
            DoiProvider::Jgi => "jgi",
            DoiProvider::Kbase => "kbase",
            DoiProvider::Osti => "osti",
            DoiProvider::EssDive => "ess_dive",
            DoiProvider::Massive => "massive",
            DoiProvider::Gsc => "gsc",
            DoiProvider::Zenodo => "zenodo",
            DoiProvider::Edi => "edi",
            DoiProvider::Figshare => "figshare",
        }
    }
}

impl fmt::Display for DoiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DoiProvider {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "emsl" => Ok(DoiProvider::Emsl),
            "jgi" => Ok(DoiProvider::Jgi),
            "kbase" => Ok(DoiProvider::Kbase),
            "osti" => Ok(DoiProvider::Osti),
            "ess_dive" => Ok(DoiProvider::EssDive),
            "massive" => Ok(DoiProvider::Massive),
            "gsc" => Ok(DoiProvider::Gsc),
            "zenodo" => Ok(DoiProvider::Zenodo),
            "edi" => Ok(DoiProvider::Edi),
            "figshare" => Ok(DoiProvider::Figshare),
            _ => Err(NmdcError::Validation(format!("unknown DOI provider: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DoiCategory {
    AwardDoi,
    DatasetDoi,
    PublicationDoi,
    DataManagementPlanDoi,
}

impl DoiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoiCategory::AwardDoi => "award_doi",
            DoiCategory::DatasetDoi => "dataset_doi",
            DoiCategory::PublicationDoi => "publication_doi",
            DoiCategory::DataManagementPlanDoi => "data_management_plan_doi",
        }
    }
}

impl fmt::Display for DoiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DoiCategory {
    type Err = NmdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "award_doi" => Ok(DoiCategory::AwardDoi),
            "dataset_doi" => Ok(DoiCategory::DatasetDoi),
            "publication_doi" => Ok(DoiCategory::PublicationDoi),
            "data_management_plan_doi" => Ok(DoiCategory::DataManagementPlanDoi),
            _ => Err(NmdcError::Validation(format!("unknown DOI category: {value}"))),
        }
    }
}

fn doi_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:https?://(?:dx\.)?doi\.org/|doi:\s*)").expect("valid DOI prefix regex")
    })
}

/// Lowercased DOI with any `doi:` or resolver URL prefix removed.
pub fn normalize_doi(value: &str) -> String {
    doi_prefix_re()
        .replace(value, "")
        .trim()
        .to_ascii_lowercase()
}
