use std::collections::HashSet;

use crate::api::{NmdcClient, PageRequest};
use crate::domain::{CollectionName, EntityId, Filter, PageToken, Projection, Record};
use crate::error::NmdcError;

/// A paginated read of one collection. Fixed for the whole loop; only the
/// page token advances between requests.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageQuery {
    pub max_page_size: usize,
    pub projection: Option<Projection>,
    pub filter: Option<Filter>,
    pub page_token: Option<PageToken>,
    pub extra_params: Vec<(String, String)>,
    /// `None` reads until the service stops issuing tokens.
    pub max_records: Option<usize>,
}

impl PageQuery {
    pub fn new(max_page_size: usize) -> Self {
        Self {
            max_page_size,
            ..Self::default()
        }
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    pub fn resume_from(mut self, token: PageToken) -> Self {
        self.page_token = Some(token);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Paginated {
    pub records: Vec<Record>,
    pub pages_fetched: usize,
    /// The record cap ended the loop before the service ran out of pages.
    pub capped: bool,
    /// Records dropped from the tail of the final page to honour the cap.
    pub discarded: usize,
}

pub struct CollectionPaginator<'a, C: NmdcClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: NmdcClient + ?Sized> CollectionPaginator<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub fn paginate(
        &self,
        collection: &CollectionName,
        query: &PageQuery,
    ) -> Result<Vec<Record>, NmdcError> {
        Ok(self.paginate_detailed(collection, query)?.records)
    }

    pub fn paginate_detailed(
        &self,
        collection: &CollectionName,
        query: &PageQuery,
    ) -> Result<Paginated, NmdcError> {
        if query.max_records == Some(0) {
            return Ok(Paginated {
                capped: true,
                ..Paginated::default()
            });
        }

        let mut request = PageRequest {
            max_page_size: query.max_page_size,
            projection: query.projection.clone(),
            page_token: query.page_token.clone(),
            filter: query.filter.clone(),
            extra_params: query.extra_params.clone(),
        };
        let mut followed: HashSet<PageToken> = request.page_token.iter().cloned().collect();
        let mut result = Paginated::default();

        loop {
            let page = self.client.fetch_page(collection, &request)?;
            result.pages_fetched += 1;
            let page_len = page.records.len();
            result.records.extend(page.records);
            tracing::debug!(
                collection = %collection,
                page = result.pages_fetched,
                fetched = page_len,
                total = result.records.len(),
                "fetched page"
            );

            if let Some(max) = query.max_records {
                if result.records.len() >= max {
                    result.discarded = result.records.len() - max;
                    result.records.truncate(max);
                    result.capped = true;
                    tracing::info!(collection = %collection, max_records = max, "reached record cap");
                    return Ok(result);
                }
            }

            match page.next_page_token {
                Some(token) => {
                    if !followed.insert(token.clone()) {
                        return Err(NmdcError::RepeatedPageToken(token.as_str().to_string()));
                    }
                    request.page_token = Some(token);
                }
                None => return Ok(result),
            }
        }
    }

    /// Single document by `id` through the collection endpoint, so a projection can apply.
    pub fn fetch_entity_with_projection(
        &self,
        id: &EntityId,
        collection: &CollectionName,
        projection: Option<Projection>,
    ) -> Result<Option<Record>, NmdcError> {
        let mut query = PageQuery::new(1)
            .filter(Filter::new().eq("id", id.as_str()))
            .max_records(1);
        query.projection = projection;
        Ok(self.paginate(collection, &query)?.into_iter().next())
    }

    pub fn fetch_entities_by_ids(
        &self,
        ids: &[EntityId],
        collection: &CollectionName,
        projection: Option<Projection>,
        max_page_size: usize,
    ) -> Result<Vec<Record>, NmdcError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(collection = %collection, requested = ids.len(), "fetching entities by id");
        let mut query = PageQuery::new(max_page_size)
            .filter(Filter::new().any_of("id", ids.iter().map(|id| id.as_str())))
            .max_records(ids.len());
        query.projection = projection;
        self.paginate(collection, &query)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::api::mock::{MockClient, record};
    use crate::api::{CollectionStats, Page};
    use crate::domain::record_id;

    fn biosamples() -> CollectionName {
        CollectionName::biosample_set()
    }

    #[test]
    fn reads_until_exhaustion() {
        let client = MockClient::default().with_ids("biosample_set", 23);
        let paginator = CollectionPaginator::new(&client);
        let result = paginator
            .paginate_detailed(&biosamples(), &PageQuery::new(10))
            .unwrap();
        assert_eq!(result.records.len(), 23);
        assert_eq!(result.pages_fetched, 3);
        assert!(!result.capped);

        let tokens: Vec<Option<String>> = client
            .page_calls()
            .iter()
            .map(|(_, req)| req.page_token.as_ref().map(|t| t.as_str().to_string()))
            .collect();
        assert_eq!(
            tokens,
            vec![None, Some("offset:10".to_string()), Some("offset:20".to_string())]
        );
    }

    #[test]
    fn truncates_only_the_tail() {
        let client = MockClient::default().with_ids("biosample_set", 50);
        let paginator = CollectionPaginator::new(&client);
        let result = paginator
            .paginate_detailed(&biosamples(), &PageQuery::new(10).max_records(25))
            .unwrap();
        assert_eq!(result.records.len(), 25);
        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.discarded, 5);
        assert!(result.capped);
        let ids: Vec<&str> = result.records.iter().filter_map(record_id).collect();
        assert_eq!(ids.first(), Some(&"nmdc:biosample_set-000000"));
        assert_eq!(ids.last(), Some(&"nmdc:biosample_set-000024"));
    }

    #[test]
    fn cap_larger_than_universe_returns_everything() {
        let client = MockClient::default().with_ids("biosample_set", 7);
        let paginator = CollectionPaginator::new(&client);
        let records = paginator
            .paginate(&biosamples(), &PageQuery::new(5).max_records(100))
            .unwrap();
        assert_eq!(records.len(), 7);
    }

    #[test]
    fn empty_collection_is_one_fetch() {
        let client = MockClient::default().with_collection("biosample_set", Vec::new());
        let paginator = CollectionPaginator::new(&client);
        let records = paginator.paginate(&biosamples(), &PageQuery::new(100)).unwrap();
        assert!(records.is_empty());
        assert_eq!(client.page_calls().len(), 1);
    }

    #[test]
    fn zero_cap_skips_the_network() {
        let client = MockClient::default().with_ids("biosample_set", 3);
        let paginator = CollectionPaginator::new(&client);
        let records = paginator
            .paginate(&biosamples(), &PageQuery::new(100).max_records(0))
            .unwrap();
        assert!(records.is_empty());
        assert!(client.page_calls().is_empty());
    }

    #[test]
    fn query_shape_is_stable_across_pages() {
        let client = MockClient::default().with_ids("biosample_set", 12);
        let paginator = CollectionPaginator::new(&client);
        let query = PageQuery::new(5)
            .projection(Projection::ids_only())
            .param("sort", "id");
        paginator.paginate(&biosamples(), &query).unwrap();
        for (collection, request) in client.page_calls() {
            assert_eq!(collection, "biosample_set");
            assert_eq!(request.max_page_size, 5);
            assert_eq!(request.projection, Some(Projection::ids_only()));
            assert_eq!(request.extra_params, vec![("sort".to_string(), "id".to_string())]);
        }
    }

    struct LoopingClient;

    impl NmdcClient for LoopingClient {
        fn fetch_page(
            &self,
            _collection: &CollectionName,
            _request: &PageRequest,
        ) -> Result<Page, NmdcError> {
            Ok(Page {
                records: vec![record(json!({"id": "x"}))],
                next_page_token: Some(PageToken::new("same")),
            })
        }

        fn fetch_entity(&self, id: &EntityId) -> Result<Record, NmdcError> {
            Err(NmdcError::NotFound(id.to_string()))
        }

        fn collection_names(&self) -> Result<Vec<String>, NmdcError> {
            Ok(Vec::new())
        }

        fn collection_stats(
            &self,
        ) -> Result<std::collections::BTreeMap<String, CollectionStats>, NmdcError> {
            Ok(Default::default())
        }
    }

    #[test]
    fn repeated_token_is_an_error() {
        let paginator = CollectionPaginator::new(&LoopingClient);
        let err = paginator
            .paginate(&biosamples(), &PageQuery::new(1))
            .unwrap_err();
        assert_matches!(err, NmdcError::RepeatedPageToken(token) if token == "same");
    }

    #[test]
    fn resume_token_is_never_resubmitted() {
        let paginator = CollectionPaginator::new(&LoopingClient);
        let err = paginator
            .paginate(
                &biosamples(),
                &PageQuery::new(1).resume_from(PageToken::new("same")),
            )
            .unwrap_err();
        assert_matches!(err, NmdcError::RepeatedPageToken(_));
    }

    #[test]
    fn remote_errors_propagate() {
        let client = MockClient::default();
        let paginator = CollectionPaginator::new(&client);
        let err = paginator
            .paginate(&biosamples(), &PageQuery::new(10))
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[test]
    fn entity_with_projection_uses_id_filter() {
        let client = MockClient::default().with_collection(
            "biosample_set",
            vec![
                record(json!({"id": "nmdc:bsm-1", "name": "one"})),
                record(json!({"id": "nmdc:bsm-2", "name": "two"})),
            ],
        );
        let paginator = CollectionPaginator::new(&client);
        let id: EntityId = "nmdc:bsm-2".parse().unwrap();
        let found = paginator
            .fetch_entity_with_projection(&id, &biosamples(), Some(Projection::ids_only()))
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], "two");

        let (_, request) = &client.page_calls()[0];
        assert_eq!(request.max_page_size, 1);
        assert_eq!(request.filter.as_ref().unwrap().to_param(), r#"{"id":"nmdc:bsm-2"}"#);

        let missing: EntityId = "nmdc:bsm-9".parse().unwrap();
        assert!(
            paginator
                .fetch_entity_with_projection(&missing, &biosamples(), None)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn entities_by_ids_caps_at_request_size() {
        let client = MockClient::default().with_ids("biosample_set", 10);
        let paginator = CollectionPaginator::new(&client);
        let ids: Vec<EntityId> = ["nmdc:biosample_set-000001", "nmdc:biosample_set-000004"]
            .iter()
            .map(|id| id.parse().unwrap())
            .collect();
        let records = paginator
            .fetch_entities_by_ids(&ids, &biosamples(), None, 100)
            .unwrap();
        assert_eq!(records.len(), 2);

        assert!(
            paginator
                .fetch_entities_by_ids(&[], &biosamples(), None, 100)
                .unwrap()
                .is_empty()
        );
        assert_eq!(client.page_calls().len(), 1);
    }
}
