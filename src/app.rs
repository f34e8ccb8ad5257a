use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::{CollectionStats, NmdcClient};
use crate::batch::{BatchPlan, BatchedIdCollector, IdBatches};
use crate::config::ClientConfig;
use crate::domain::{
    CollectionName, DoiCategory, DoiProvider, EntityId, Filter, Projection, Record, record_id,
    record_str,
};
use crate::error::NmdcError;
use crate::paginate::{CollectionPaginator, PageQuery};
use crate::sampling::{IdSample, RandomSampler, RecordSample, SampleRequest};
use crate::xref::{CrossReferenceResolver, DoiQuery, DoiSearch, ReferenceOutcome};

const GEO_SEARCH_LIMIT: usize = 10;

pub const ECOSYSTEM_PROJECTION: [&str; 11] = [
    "id",
    "name",
    "collection_date",
    "ecosystem",
    "ecosystem_category",
    "ecosystem_type",
    "ecosystem_subtype",
    "env_broad_scale",
    "env_local_scale",
    "env_medium",
    "geo_loc_name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Bad input or an entity that does not exist.
    #[default]
    Request,
    Remote,
    Internal,
}

impl ErrorKind {
    pub fn of(err: &NmdcError) -> Self {
        if err.is_remote() {
            ErrorKind::Remote
        } else if err.is_not_found() || err.is_validation() {
            ErrorKind::Request
        } else {
            ErrorKind::Internal
        }
    }
}

/// Structured error payload: `{"error": "...", ...context}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub error: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
    #[serde(skip)]
    pub kind: ErrorKind,
}

impl ToolError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            context: Map::new(),
            kind: ErrorKind::Request,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl From<NmdcError> for ToolError {
    fn from(err: NmdcError) -> Self {
        Self::new(err.to_string()).kind(ErrorKind::of(&err))
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EcosystemQuery {
    pub ecosystem_type: Option<String>,
    pub ecosystem_category: Option<String>,
    pub ecosystem_subtype: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitiesResult {
    pub collection: String,
    pub requested_count: usize,
    pub fetched_count: usize,
    pub entities: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyForBiosample {
    pub biosample_id: String,
    pub biosample_name: Option<String>,
    pub study_id: Option<String>,
    pub study: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_study_ids: Option<Vec<String>>,
    pub note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct App<C: NmdcClient> {
    client: C,
    config: ClientConfig,
}

impl<C: NmdcClient> App<C> {
    pub fn new(client: C, config: ClientConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Biosamples with `min < elev < max`. The bounds are only sent to the
    /// service; returned records are not re-checked.
    pub fn samples_in_elevation_range(
        &self,
        min_elevation: i64,
        max_elevation: i64,
    ) -> ToolResult<Vec<Record>> {
        let filter = Filter::new().between("elev", min_elevation, max_elevation);
        self.search_biosamples(filter, GEO_SEARCH_LIMIT)
    }

    pub fn samples_within_lat_lon_bounding_box(
        &self,
        lower_lat: f64,
        upper_lat: f64,
        lower_lon: f64,
        upper_lon: f64,
    ) -> ToolResult<Vec<Record>> {
        let filter = Filter::new()
            .between("lat_lon.latitude", lower_lat, upper_lat)
            .between("lat_lon.longitude", lower_lon, upper_lon);
        self.search_biosamples(filter, GEO_SEARCH_LIMIT)
    }

    fn search_biosamples(&self, filter: Filter, max_records: usize) -> ToolResult<Vec<Record>> {
        let query = PageQuery::new(self.config.default_page_size)
            .filter(filter)
            .max_records(max_records);
        Ok(CollectionPaginator::new(&self.client)
            .paginate(&CollectionName::biosample_set(), &query)?)
    }

    pub fn samples_by_ecosystem(
        &self,
        query: &EcosystemQuery,
        max_records: usize,
    ) -> ToolResult<Vec<Record>> {
        let mut filter = Filter::new();
        for (field, value) in [
            ("ecosystem_type", &query.ecosystem_type),
            ("ecosystem_category", &query.ecosystem_category),
            ("ecosystem_subtype", &query.ecosystem_subtype),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                filter = filter.eq(field, value);
            }
        }
        if filter.is_empty() {
            return Err(ToolError::new(
                "At least one of ecosystem_type, ecosystem_category or ecosystem_subtype is required",
            ));
        }

        let page_query = PageQuery::new(self.config.default_page_size)
            .filter(filter)
            .projection(Projection::from_fields(ECOSYSTEM_PROJECTION))
            .max_records(max_records);
        let mut records = CollectionPaginator::new(&self.client)
            .paginate(&CollectionName::biosample_set(), &page_query)?;
        records.iter_mut().for_each(format_collection_date);
        Ok(records)
    }

    pub fn entity_by_id(&self, entity_id: &str) -> ToolResult<Record> {
        let id: EntityId = entity_id.parse()?;
        Ok(self.client.fetch_entity(&id)?)
    }

    pub fn entities_by_ids_with_projection(
        &self,
        entity_ids: &[String],
        collection: &str,
        projection: Option<Projection>,
    ) -> ToolResult<EntitiesResult> {
        let requested_count = entity_ids.len();
        let payload = |message: String| {
            ToolError::new(message)
                .with("collection", collection)
                .with("requested_count", requested_count)
                .with("fetched_count", 0)
        };

        if entity_ids.is_empty() {
            return Err(payload("entity_ids list cannot be empty".to_string()));
        }
        if requested_count > self.config.max_ids_per_request {
            return Err(payload(format!(
                "Too many entity IDs requested. Maximum is {} per request.",
                self.config.max_ids_per_request
            )));
        }
        let collection_name: CollectionName =
            collection.parse().map_err(|err: NmdcError| payload(err.to_string()))?;
        let ids = entity_ids
            .iter()
            .map(|id| id.parse::<EntityId>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| payload(err.to_string()))?;

        let entities = CollectionPaginator::new(&self.client)
            .fetch_entities_by_ids(
                &ids,
                &collection_name,
                projection,
                self.config.default_page_size,
            )
            .map_err(|err| {
                payload(format!("Failed to fetch entities from {collection}: {err}"))
                    .kind(ErrorKind::of(&err))
            })?;

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !entities.iter().any(|e| record_id(e) == Some(id.as_str())))
            .map(|id| id.as_str().to_string())
            .collect();
        let (missing_ids, note) = if missing.is_empty() {
            (None, None)
        } else {
            let note = format!("{} entities were not found", missing.len());
            (Some(missing), Some(note))
        };

        Ok(EntitiesResult {
            collection: collection.to_string(),
            requested_count,
            fetched_count: entities.len(),
            entities,
            missing_ids,
            note,
        })
    }

    pub fn collection_names(&self) -> ToolResult<Vec<String>> {
        Ok(self.client.collection_names()?)
    }

    pub fn collection_stats(&self) -> ToolResult<BTreeMap<String, CollectionStats>> {
        Ok(self.client.collection_stats()?)
    }

    fn total_count(&self, collection: &CollectionName) -> ToolResult<usize> {
        let stats = self.client.collection_stats()?;
        stats
            .get(collection.as_str())
            .map(|stats| stats.count as usize)
            .ok_or_else(|| {
                ToolError::from(NmdcError::NotFound(format!(
                    "Collection '{collection}' not found"
                )))
                .with("collection", collection.as_str())
            })
    }

    pub fn random_collection_ids(
        &self,
        collection: &str,
        sample_size: usize,
        seed: Option<u64>,
        filter: Option<Filter>,
    ) -> ToolResult<IdSample> {
        let collection: CollectionName = collection.parse()?;
        let total_count = self.total_count(&collection)?;
        let request = SampleRequest {
            collection,
            sample_size,
            seed,
            filter,
        };
        Ok(RandomSampler::new(&self.client, &self.config).sample_ids(&request, total_count)?)
    }

    pub fn random_records(
        &self,
        collection: &str,
        sample_size: usize,
        filter: Option<Filter>,
        projection: Option<Projection>,
        seed: Option<u64>,
    ) -> ToolResult<RecordSample> {
        let request = SampleRequest {
            collection: collection.parse()?,
            sample_size,
            seed,
            filter,
        };
        Ok(RandomSampler::new(&self.client, &self.config).sample_records(&request, projection)?)
    }

    pub fn collection_id_batches(
        &self,
        collection: &str,
        batch_size: usize,
        max_batches: Option<usize>,
    ) -> ToolResult<IdBatches> {
        let collection: CollectionName = collection.parse()?;
        let total_count = self.total_count(&collection)?;
        let plan = BatchPlan {
            collection,
            batch_size,
            max_batches,
        };
        Ok(BatchedIdCollector::new(&self.client, &self.config)
            .collect_id_batches(&plan, total_count)?)
    }

    pub fn study_for_biosample(&self, biosample_id: &str) -> ToolResult<StudyForBiosample> {
        let with_id = |err: NmdcError| ToolError::from(err).with("biosample_id", biosample_id);
        let id: EntityId = biosample_id.parse().map_err(with_id)?;
        let resolution = CrossReferenceResolver::new(&self.client, &self.config)
            .resolve_first_reference(
                &id,
                &CollectionName::biosample_set(),
                "associated_studies",
                &["name"],
            )
            .map_err(with_id)?;

        let biosample_name = record_str(&resolution.source, "name").map(str::to_string);
        let additional_study_ids = Some(resolution.additional_references)
            .filter(|ids| !ids.is_empty());
        let study_id = resolution.primary_reference;

        let (study, note, error) = match (resolution.referenced, &study_id) {
            (ReferenceOutcome::Resolved(study), Some(study_id)) => {
                let mut note = format!("Successfully found study {study_id} for biosample {id}");
                if let Some(extra) = &additional_study_ids {
                    note.push_str(&format!(
                        "; {} additional studies found but not fetched",
                        extra.len()
                    ));
                }
                (Some(study), note, None)
            }
            (ReferenceOutcome::Failed(err), Some(study_id)) => (
                None,
                format!("Biosample {id} references study {study_id}, which could not be retrieved"),
                Some(format!("Failed to retrieve study {study_id}: {err}")),
            ),
            _ => (
                None,
                format!("No associated studies found for biosample {id}"),
                None,
            ),
        };

        Ok(StudyForBiosample {
            biosample_id: id.as_str().to_string(),
            biosample_name,
            study_id,
            study,
            additional_study_ids,
            note,
            error,
        })
    }

    pub fn search_studies_by_doi(
        &self,
        doi_value: Option<&str>,
        doi_provider: Option<&str>,
        doi_category: Option<&str>,
        max_results: Option<usize>,
    ) -> ToolResult<DoiSearch> {
        let query = DoiQuery {
            doi_value: doi_value.map(str::to_string),
            provider: doi_provider.map(str::parse::<DoiProvider>).transpose()?,
            category: doi_category.map(str::parse::<DoiCategory>).transpose()?,
            max_results,
        };
        Ok(CrossReferenceResolver::new(&self.client, &self.config).search_studies_by_doi(&query)?)
    }
}

/// Rewrites `collection_date.has_raw_value` as `YYYY-MM-DD HH:MM:SS UTC`,
/// keeping the raw text when it is not RFC 3339.
pub fn format_collection_date(record: &mut Record) {
    let Some(raw) = record
        .get("collection_date")
        .and_then(|date| date.get("has_raw_value"))
        .and_then(|value| value.as_str())
        .map(str::to_string)
    else {
        return;
    };
    let formatted = DateTime::parse_from_rfc3339(&raw)
        .map(|date| {
            date.with_timezone(&Utc)
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
        })
        .unwrap_or(raw);
    record.insert("collection_date".to_string(), Value::String(formatted));
}
