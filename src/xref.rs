use serde::Serialize;
use serde_json::Value;

use crate::api::NmdcClient;
use crate::config::ClientConfig;
use crate::domain::{
    CollectionName, DoiCategory, DoiProvider, EntityId, Projection, Record, normalize_doi,
    record_id, record_str,
};
use crate::error::NmdcError;
use crate::paginate::{CollectionPaginator, PageQuery};

#[derive(Debug)]
pub enum ReferenceOutcome {
    NoReferences,
    Resolved(Record),
    /// The source resolved but the referenced entity lookup failed.
    Failed(NmdcError),
}

#[derive(Debug)]
pub struct ReferenceResolution {
    pub source: Record,
    pub primary_reference: Option<String>,
    pub referenced: ReferenceOutcome,
    /// Referenced IDs after the first; reported, never fetched.
    pub additional_references: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoiQuery {
    /// Case-insensitive substring of the DOI, prefixes such as `doi:` ignored.
    pub doi_value: Option<String>,
    pub provider: Option<DoiProvider>,
    pub category: Option<DoiCategory>,
    pub max_results: Option<usize>,
}

impl DoiQuery {
    pub fn is_empty(&self) -> bool {
        self.doi_value.as_deref().map(str::trim).unwrap_or("").is_empty()
            && self.provider.is_none()
            && self.category.is_none()
    }

    fn matches(&self, doi: &Value) -> bool {
        let field = |name: &str| doi.get(name).and_then(|v| v.as_str());

        if let Some(wanted) = self.doi_value.as_deref().map(normalize_doi) {
            if !wanted.is_empty() {
                match field("doi_value") {
                    Some(value) if normalize_doi(value).contains(&wanted) => {}
                    _ => return false,
                }
            }
        }
        if let Some(provider) = self.provider {
            if !field("doi_provider").is_some_and(|v| v.eq_ignore_ascii_case(provider.as_str())) {
                return false;
            }
        }
        if let Some(category) = self.category {
            if !field("doi_category").is_some_and(|v| v.eq_ignore_ascii_case(category.as_str())) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyDoiMatch {
    pub study_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_name: Option<String>,
    pub matching_dois: Vec<Value>,
    pub matching_doi_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoiSearch {
    pub studies: Vec<StudyDoiMatch>,
    pub studies_scanned: usize,
    pub result_cap: usize,
    pub capped: bool,
}

pub struct CrossReferenceResolver<'a, C: NmdcClient + ?Sized> {
    client: &'a C,
    paginator: CollectionPaginator<'a, C>,
    scan_page_size: usize,
    doi_result_cap: usize,
}

impl<'a, C: NmdcClient + ?Sized> CrossReferenceResolver<'a, C> {
    pub fn new(client: &'a C, config: &ClientConfig) -> Self {
        Self {
            client,
            paginator: CollectionPaginator::new(client),
            scan_page_size: config.scan_page_size,
            doi_result_cap: config.doi_result_cap,
        }
    }

    /// Fetches `entity_id` with a minimal projection and dereferences only the
    /// first ID listed in `relationship_field`.
    pub fn resolve_first_reference(
        &self,
        entity_id: &EntityId,
        collection: &CollectionName,
        relationship_field: &str,
        source_fields: &[&str],
    ) -> Result<ReferenceResolution, NmdcError> {
        let projection = Projection::from_fields(
            std::iter::once("id")
                .chain(source_fields.iter().copied())
                .chain(std::iter::once(relationship_field)),
        );
        let source = self
            .paginator
            .fetch_entity_with_projection(entity_id, collection, Some(projection))?
            .ok_or_else(|| {
                NmdcError::NotFound(format!("Entity '{entity_id}' not found in {collection}"))
            })?;

        let mut references = reference_ids(&source, relationship_field).into_iter();
        let Some(primary) = references.next() else {
            return Ok(ReferenceResolution {
                source,
                primary_reference: None,
                referenced: ReferenceOutcome::NoReferences,
                additional_references: Vec::new(),
            });
        };
        let additional_references: Vec<String> = references.collect();

        let referenced = match primary
            .parse::<EntityId>()
            .and_then(|id| self.client.fetch_entity(&id))
        {
            Ok(record) => ReferenceOutcome::Resolved(record),
            Err(err) => {
                tracing::warn!(source = %entity_id, reference = %primary, error = %err, "reference lookup failed");
                ReferenceOutcome::Failed(err)
            }
        };

        Ok(ReferenceResolution {
            source,
            primary_reference: Some(primary),
            referenced,
            additional_references,
        })
    }

    /// Reads every study and keeps those with at least one associated DOI
    /// satisfying all criteria of `query` at once.
    pub fn search_studies_by_doi(&self, query: &DoiQuery) -> Result<DoiSearch, NmdcError> {
        if query.is_empty() {
            return Err(NmdcError::Validation(
                "at least one of doi_value, doi_provider or doi_category is required".to_string(),
            ));
        }
        let result_cap = query.max_results.unwrap_or(self.doi_result_cap);
        if result_cap == 0 {
            return Err(NmdcError::Validation(
                "max_results must be at least 1".to_string(),
            ));
        }

        let page_query = PageQuery::new(self.scan_page_size)
            .projection(Projection::from_fields(["id", "name", "associated_dois"]));
        let studies = self
            .paginator
            .paginate(&CollectionName::study_set(), &page_query)?;

        let mut matches = Vec::new();
        let mut studies_scanned = 0;
        for study in &studies {
            if matches.len() >= result_cap {
                break;
            }
            studies_scanned += 1;
            let matching_dois: Vec<Value> = study
                .get("associated_dois")
                .and_then(|v| v.as_array())
                .map(|dois| dois.iter().filter(|doi| query.matches(doi)).cloned().collect())
                .unwrap_or_default();
            if matching_dois.is_empty() {
                continue;
            }
            matches.push(StudyDoiMatch {
                study_id: record_id(study).unwrap_or_default().to_string(),
                study_name: record_str(study, "name").map(str::to_string),
                matching_doi_count: matching_dois.len(),
                matching_dois,
            });
        }

        let capped = matches.len() >= result_cap && studies_scanned < studies.len();
        tracing::info!(
            scanned = studies_scanned,
            total = studies.len(),
            matched = matches.len(),
            "doi search finished"
        );
        Ok(DoiSearch {
            studies: matches,
            studies_scanned,
            result_cap,
            capped,
        })
    }
}

/// String IDs held by `field`, which may be an array or a single string.
pub fn reference_ids(record: &Record, field: &str) -> Vec<String> {
    match record.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(id)) if !id.trim().is_empty() => vec![id.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::api::mock::{MockClient, record};

    fn studies() -> Vec<Record> {
        vec![
            record(json!({
                "id": "nmdc:sty-11-aaa",
                "name": "Soil study",
                "associated_dois": [
                    {"doi_value": "doi:10.46936/10.25585/60000017", "doi_provider": "jgi", "doi_category": "award_doi"},
                    {"doi_value": "doi:10.1128/msystems.00045-18", "doi_category": "publication_doi"},
                    {"doi_value": "doi:10.46936/10.25585/60000999", "doi_provider": "jgi", "doi_category": "dataset_doi"}
                ]
            })),
            record(json!({
                "id": "nmdc:sty-11-bbb",
                "name": "River study",
                "associated_dois": [
                    {"doi_value": "doi:10.25345/C5CV4BV0R", "doi_provider": "massive", "doi_category": "dataset_doi"}
                ]
            })),
            record(json!({"id": "nmdc:sty-11-ccc", "name": "No DOIs"})),
        ]
    }

    fn biosamples() -> Vec<Record> {
        vec![
            record(json!({
                "id": "nmdc:bsm-11-one",
                "name": "Sample one",
                "associated_studies": ["nmdc:sty-11-aaa", "nmdc:sty-11-bbb"]
            })),
            record(json!({"id": "nmdc:bsm-11-none", "name": "Orphan", "associated_studies": []})),
            record(json!({"id": "nmdc:bsm-11-bad", "associated_studies": ["nmdc:sty-11-zzz"]})),
        ]
    }

    fn client() -> MockClient {
        MockClient::default()
            .with_collection("study_set", studies())
            .with_collection("biosample_set", biosamples())
    }

    fn resolve(client: &MockClient, id: &str) -> Result<ReferenceResolution, NmdcError> {
        CrossReferenceResolver::new(client, &ClientConfig::default()).resolve_first_reference(
            &id.parse().unwrap(),
            &CollectionName::biosample_set(),
            "associated_studies",
            &["name"],
        )
    }

    #[test]
    fn dereferences_only_the_first_reference() {
        let client = client();
        let resolution = resolve(&client, "nmdc:bsm-11-one").unwrap();
        assert_eq!(resolution.primary_reference.as_deref(), Some("nmdc:sty-11-aaa"));
        assert_eq!(resolution.additional_references, vec!["nmdc:sty-11-bbb"]);
        assert_matches!(&resolution.referenced, ReferenceOutcome::Resolved(study) if study["name"] == "Soil study");
        assert_eq!(client.entity_calls(), vec!["nmdc:sty-11-aaa"]);

        let (_, request) = &client.page_calls()[0];
        assert_eq!(
            request.projection.as_ref().unwrap().to_param(),
            "id,name,associated_studies"
        );
    }

    #[test]
    fn no_references_skips_second_lookup() {
        let client = client();
        let resolution = resolve(&client, "nmdc:bsm-11-none").unwrap();
        assert_matches!(resolution.referenced, ReferenceOutcome::NoReferences);
        assert!(client.entity_calls().is_empty());
    }

    #[test]
    fn failed_reference_is_reported_not_raised() {
        let client = client();
        let resolution = resolve(&client, "nmdc:bsm-11-bad").unwrap();
        assert_matches!(resolution.referenced, ReferenceOutcome::Failed(NmdcError::NotFound(_)));
    }

    #[test]
    fn missing_source_is_not_found() {
        let client = client();
        assert_matches!(
            resolve(&client, "nmdc:bsm-11-missing"),
            Err(NmdcError::NotFound(_))
        );
    }

    #[test]
    fn doi_search_by_provider() {
        let client = client();
        let resolver = CrossReferenceResolver::new(&client, &ClientConfig::default());
        let search = resolver
            .search_studies_by_doi(&DoiQuery {
                provider: Some(DoiProvider::Jgi),
                ..DoiQuery::default()
            })
            .unwrap();
        assert_eq!(search.studies.len(), 1);
        assert_eq!(search.studies[0].study_id, "nmdc:sty-11-aaa");
        assert_eq!(search.studies[0].matching_doi_count, 2);
        assert_eq!(search.studies_scanned, 3);
        assert!(!search.capped);
    }

    #[test]
    fn doi_criteria_apply_to_the_same_doi() {
        let client = client();
        let resolver = CrossReferenceResolver::new(&client, &ClientConfig::default());
        let search = resolver
            .search_studies_by_doi(&DoiQuery {
                provider: Some(DoiProvider::Jgi),
                category: Some(DoiCategory::PublicationDoi),
                ..DoiQuery::default()
            })
            .unwrap();
        assert!(search.studies.is_empty());

        let search = resolver
            .search_studies_by_doi(&DoiQuery {
                doi_value: Some("https://doi.org/10.25345/c5cv4".to_string()),
                ..DoiQuery::default()
            })
            .unwrap();
        assert_eq!(search.studies.len(), 1);
        assert_eq!(search.studies[0].study_id, "nmdc:sty-11-bbb");
    }

    #[test]
    fn doi_search_stops_at_cap() {
        let client = client();
        let resolver = CrossReferenceResolver::new(&client, &ClientConfig::default());
        let search = resolver
            .search_studies_by_doi(&DoiQuery {
                category: Some(DoiCategory::DatasetDoi),
                max_results: Some(1),
                ..DoiQuery::default()
            })
            .unwrap();
        assert_eq!(search.studies.len(), 1);
        assert_eq!(search.studies_scanned, 1);
        assert!(search.capped);
    }

    #[test]
    fn empty_doi_query_is_rejected_before_fetching() {
        let client = client();
        let resolver = CrossReferenceResolver::new(&client, &ClientConfig::default());
        assert_matches!(
            resolver.search_studies_by_doi(&DoiQuery::default()),
            Err(NmdcError::Validation(_))
        );
        assert!(client.page_calls().is_empty());
    }

    #[test]
    fn reference_ids_accepts_string_or_array() {
        let single = record(json!({"part_of": "nmdc:sty-1"}));
        assert_eq!(reference_ids(&single, "part_of"), vec!["nmdc:sty-1"]);
        let many = record(json!({"part_of": ["a", "", 3, "b"]}));
        assert_eq!(reference_ids(&many, "part_of"), vec!["a", "b"]);
        assert!(reference_ids(&many, "missing").is_empty());
    }
}
