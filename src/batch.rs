use serde::Serialize;

use crate::api::NmdcClient;
use crate::config::ClientConfig;
use crate::domain::{CollectionName, Projection, record_id};
use crate::error::NmdcError;
use crate::paginate::{CollectionPaginator, PageQuery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub collection: CollectionName,
    pub batch_size: usize,
    pub max_batches: Option<usize>,
}

impl BatchPlan {
    pub fn new(collection: CollectionName, batch_size: usize) -> Self {
        Self {
            collection,
            batch_size,
            max_batches: None,
        }
    }

    pub fn max_batches(mut self, max_batches: usize) -> Self {
        self.max_batches = Some(max_batches);
        self
    }

    pub fn total_batches(&self, total_count: usize) -> usize {
        total_count.div_ceil(self.batch_size.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdBatch {
    pub index: usize,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdBatches {
    pub collection: String,
    pub total_count: usize,
    pub batch_size: usize,
    pub total_batches: usize,
    pub batches_returned: usize,
    pub fetched_count: usize,
    pub batches: Vec<IdBatch>,
    pub safety_limited: bool,
    pub exhausted_early: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_note: Option<String>,
}

/// Splits a collection's IDs into fixed-size batches.
///
/// The API has no skip/offset parameter, so batch `n` is read by paginating
/// an `id`-only projection up to its cumulative end and slicing off the
/// prefix that earlier batches already returned. Every batch re-reads that
/// prefix; total transfer grows quadratically with the batch count.
pub struct BatchedIdCollector<'a, C: NmdcClient + ?Sized> {
    paginator: CollectionPaginator<'a, C>,
    large_collection_threshold: usize,
    max_batch_size: usize,
}

impl<'a, C: NmdcClient + ?Sized> BatchedIdCollector<'a, C> {
    pub fn new(client: &'a C, config: &ClientConfig) -> Self {
        Self {
            paginator: CollectionPaginator::new(client),
            large_collection_threshold: config.large_collection_threshold,
            max_batch_size: config.max_batch_size,
        }
    }

    pub fn collect_id_batches(
        &self,
        plan: &BatchPlan,
        total_count: usize,
    ) -> Result<IdBatches, NmdcError> {
        if plan.batch_size == 0 {
            return Err(NmdcError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if plan.batch_size > self.max_batch_size {
            return Err(NmdcError::Validation(format!(
                "batch_size {} exceeds the maximum of {}",
                plan.batch_size, self.max_batch_size
            )));
        }
        if plan.max_batches == Some(0) {
            return Err(NmdcError::Validation(
                "max_batches must be at least 1".to_string(),
            ));
        }

        let total_batches = plan.total_batches(total_count);
        let (batch_limit, safety_limited, truncated_note) = match plan.max_batches {
            Some(max) if max < total_batches => (
                max,
                false,
                Some(format!(
                    "Limited to {max} of {total_batches} batches by max_batches"
                )),
            ),
            Some(_) => (total_batches, false, None),
            None if total_count > self.large_collection_threshold => {
                tracing::warn!(
                    collection = %plan.collection,
                    total_count,
                    threshold = self.large_collection_threshold,
                    "large collection, returning a single batch"
                );
                (
                    total_batches.min(1),
                    true,
                    Some(format!(
                        "{} has {total_count} records, above the large-collection threshold of {}; \
                         only the first batch of {} IDs was fetched. Pass max_batches to fetch more.",
                        plan.collection, self.large_collection_threshold, plan.batch_size
                    )),
                )
            }
            None => (total_batches, false, None),
        };

        let mut batches = Vec::with_capacity(batch_limit);
        let mut exhausted_early = false;
        for index in 0..batch_limit {
            let offset = index * plan.batch_size;
            let size = plan.batch_size.min(total_count - offset);
            let cumulative = offset + size;

            let query = PageQuery::new(plan.batch_size)
                .projection(Projection::ids_only())
                .max_records(cumulative);
            let records = self.paginator.paginate(&plan.collection, &query)?;

            if records.len() <= offset {
                tracing::warn!(
                    collection = %plan.collection,
                    batch = index,
                    returned = records.len(),
                    expected = cumulative,
                    "collection exhausted before batch start"
                );
                exhausted_early = true;
                break;
            }

            let ids = records[offset..]
                .iter()
                .filter_map(|record| {
                    let id = record_id(record);
                    if id.is_none() {
                        tracing::warn!(collection = %plan.collection, "record without id");
                    }
                    id.map(str::to_string)
                })
                .collect::<Vec<_>>();
            tracing::debug!(collection = %plan.collection, batch = index, ids = ids.len(), "collected batch");
            batches.push(IdBatch { index, ids });

            if records.len() < cumulative {
                exhausted_early = true;
                break;
            }
        }

        let fetched_count = batches.iter().map(|batch| batch.ids.len()).sum();
        Ok(IdBatches {
            collection: plan.collection.as_str().to_string(),
            total_count,
            batch_size: plan.batch_size,
            total_batches,
            batches_returned: batches.len(),
            fetched_count,
            batches,
            safety_limited,
            exhausted_early,
            truncated_note,
        })
    }
}
