use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::api::NmdcClient;
use crate::config::ClientConfig;
use crate::domain::{CollectionName, Filter, Projection, Record, record_id};
use crate::error::NmdcError;
use crate::paginate::{CollectionPaginator, PageQuery};

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    pub collection: CollectionName,
    pub sample_size: usize,
    pub seed: Option<u64>,
    pub filter: Option<Filter>,
}

impl SampleRequest {
    pub fn new(collection: CollectionName, sample_size: usize) -> Self {
        Self {
            collection,
            sample_size,
            seed: None,
            filter: None,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMethod {
    /// Universe no larger than the request; every ID returned, no randomness.
    Exhaustive,
    /// Uniform draw over the complete ID universe.
    RandomSample,
    /// Uniform draw over the first N matching records only.
    OversampledPool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdSample {
    pub collection: String,
    pub sampled_ids: Vec<String>,
    /// IDs actually read from the service.
    pub actual_total: usize,
    /// Count reported by collection stats; may be stale or ignore the filter.
    pub reported_total: usize,
    pub method: SampleMethod,
    pub requested_size: usize,
    pub effective_size: usize,
    pub clamped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSample {
    pub collection: String,
    pub records: Vec<Record>,
    pub candidate_pool_size: usize,
    pub method: SampleMethod,
    pub requested_size: usize,
    pub effective_size: usize,
    pub clamped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Uniform sample of `amount` items without replacement, in draw order.
pub fn draw_without_replacement<T: Clone, R: Rng + ?Sized>(
    items: &[T],
    amount: usize,
    rng: &mut R,
) -> Vec<T> {
    let amount = amount.min(items.len());
    rand::seq::index::sample(rng, items.len(), amount)
        .into_iter()
        .map(|index| items[index].clone())
        .collect()
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

pub struct RandomSampler<'a, C: NmdcClient + ?Sized> {
    client: &'a C,
    paginator: CollectionPaginator<'a, C>,
    max_sample_size: usize,
    oversample_factor: usize,
    min_candidate_pool: usize,
    scan_page_size: usize,
}

impl<'a, C: NmdcClient + ?Sized> RandomSampler<'a, C> {
    pub fn new(client: &'a C, config: &ClientConfig) -> Self {
        Self {
            client,
            paginator: CollectionPaginator::new(client),
            max_sample_size: config.max_sample_size,
            oversample_factor: config.oversample_factor,
            min_candidate_pool: config.min_candidate_pool,
            scan_page_size: config.scan_page_size,
        }
    }

    fn clamp(&self, requested: usize) -> Result<(usize, Option<String>), NmdcError> {
        if requested == 0 {
            return Err(NmdcError::Validation(
                "sample_size must be at least 1".to_string(),
            ));
        }
        if requested > self.max_sample_size {
            tracing::info!(requested, max = self.max_sample_size, "clamping sample size");
            return Ok((
                self.max_sample_size,
                Some(format!(
                    "sample_size {requested} clamped to the maximum of {}",
                    self.max_sample_size
                )),
            ));
        }
        Ok((requested, None))
    }

    /// Samples from the full ID universe, fetched with one exhaustive `id`-only scan.
    /// Returns exactly `min(effective_size, actual_total)` IDs.
    pub fn sample_ids(
        &self,
        request: &SampleRequest,
        total_count: usize,
    ) -> Result<IdSample, NmdcError> {
        let (effective_size, note) = self.clamp(request.sample_size)?;

        let mut query = PageQuery::new(self.scan_page_size).projection(Projection::ids_only());
        query.filter = request.filter.clone();
        let universe = self
            .paginator
            .paginate(&request.collection, &query)?
            .iter()
            .filter_map(|record| record_id(record).map(str::to_string))
            .collect::<Vec<_>>();
        let actual_total = universe.len();

        let (sampled_ids, method) = if actual_total <= effective_size {
            (universe, SampleMethod::Exhaustive)
        } else {
            let mut rng = rng_for(request.seed);
            (
                draw_without_replacement(&universe, effective_size, &mut rng),
                SampleMethod::RandomSample,
            )
        };
        tracing::debug!(
            collection = %request.collection,
            actual_total,
            sampled = sampled_ids.len(),
            "sampled ids"
        );

        Ok(IdSample {
            collection: request.collection.as_str().to_string(),
            sampled_ids,
            actual_total,
            reported_total: total_count,
            method,
            requested_size: request.sample_size,
            effective_size,
            clamped: note.is_some(),
            seed: request.seed,
            note,
        })
    }

    /// Samples from a bounded candidate pool: the first
    /// `max(sample_size * oversample_factor, min_candidate_pool)` matches,
    /// never fewer than `sample_size`.
    pub fn sample_records(
        &self,
        request: &SampleRequest,
        projection: Option<Projection>,
    ) -> Result<RecordSample, NmdcError> {
        let (effective_size, note) = self.clamp(request.sample_size)?;

        let oversampled = effective_size
            .saturating_mul(self.oversample_factor)
            .max(self.min_candidate_pool);
        let available = match &request.filter {
            Some(filter) if !filter.is_empty() => None,
            _ => self
                .client
                .collection_stats()?
                .get(request.collection.as_str())
                .map(|stats| stats.count as usize),
        };
        let pool_target = match available {
            Some(available) => oversampled.min(available).max(effective_size),
            None => oversampled,
        };

        let mut query = PageQuery::new(pool_target.min(self.scan_page_size)).max_records(pool_target);
        query.filter = request.filter.clone();
        query.projection = projection;
        let pool = self.paginator.paginate(&request.collection, &query)?;

        let mut rng = rng_for(request.seed);
        let records = draw_without_replacement(&pool, effective_size, &mut rng);
        tracing::debug!(
            collection = %request.collection,
            pool = pool.len(),
            sampled = records.len(),
            "sampled records"
        );

        Ok(RecordSample {
            collection: request.collection.as_str().to_string(),
            records,
            candidate_pool_size: pool.len(),
            method: SampleMethod::OversampledPool,
            requested_size: request.sample_size,
            effective_size,
            clamped: note.is_some(),
            seed: request.seed,
            note,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert_matches::assert_matches;

    use super::*;
    use crate::api::mock::MockClient;

    fn request(sample_size: usize) -> SampleRequest {
        SampleRequest::new("biosample_set".parse().unwrap(), sample_size)
    }

    #[test]
    fn draw_has_no_duplicates() {
        let items: Vec<usize> = (0..100).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let drawn = draw_without_replacement(&items, 40, &mut rng);
        assert_eq!(drawn.len(), 40);
        assert_eq!(drawn.iter().collect::<HashSet<_>>().len(), 40);

        let all = draw_without_replacement(&items, 500, &mut rng);
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn small_universe_is_returned_whole() {
        let client = MockClient::default().with_ids("biosample_set", 8);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        let sample = sampler.sample_ids(&request(10), 8).unwrap();
        assert_eq!(sample.method, SampleMethod::Exhaustive);
        assert_eq!(sample.sampled_ids.len(), 8);
        assert_eq!(sample.sampled_ids[0], "nmdc:biosample_set-000000");
        assert_eq!(sample.actual_total, 8);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let client = MockClient::default().with_ids("biosample_set", 500);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        let first = sampler.sample_ids(&request(20).seed(42), 500).unwrap();
        let second = sampler.sample_ids(&request(20).seed(42), 500).unwrap();
        assert_eq!(first.method, SampleMethod::RandomSample);
        assert_eq!(first.sampled_ids, second.sampled_ids);
        assert_eq!(first.sampled_ids.len(), 20);
        assert_eq!(
            first.sampled_ids.iter().collect::<HashSet<_>>().len(),
            20
        );

        let other = sampler.sample_ids(&request(20).seed(43), 500).unwrap();
        assert_ne!(first.sampled_ids, other.sampled_ids);
    }

    #[test]
    fn stale_count_does_not_bypass_the_sample_size() {
        let client = MockClient::default().with_ids("biosample_set", 8);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        let sample = sampler.sample_ids(&request(5).seed(1), 3).unwrap();
        assert_eq!(sample.method, SampleMethod::RandomSample);
        assert_eq!(sample.sampled_ids.len(), 5);
        assert_eq!(sample.actual_total, 8);
        assert_eq!(sample.reported_total, 3);
    }

    #[test]
    fn small_filtered_universe_is_returned_whole() {
        let client = MockClient::default().with_ids("biosample_set", 50);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        let filter = Filter::new().any_of(
            "id",
            ["nmdc:biosample_set-000001", "nmdc:biosample_set-000002"],
        );
        let sample = sampler
            .sample_ids(&request(10).seed(4).filter(filter), 50)
            .unwrap();
        assert_eq!(sample.method, SampleMethod::Exhaustive);
        assert_eq!(
            sample.sampled_ids,
            vec!["nmdc:biosample_set-000001", "nmdc:biosample_set-000002"]
        );
        assert_eq!(sample.actual_total, 2);
    }

    #[test]
    fn sample_size_is_clamped() {
        let client = MockClient::default().with_ids("biosample_set", 50);
        let config = ClientConfig {
            max_sample_size: 5,
            ..ClientConfig::default()
        };
        let sampler = RandomSampler::new(&client, &config);
        let sample = sampler.sample_ids(&request(30).seed(1), 50).unwrap();
        assert!(sample.clamped);
        assert_eq!(sample.effective_size, 5);
        assert_eq!(sample.sampled_ids.len(), 5);
        assert!(sample.note.is_some());
    }

    #[test]
    fn zero_sample_size_is_rejected() {
        let client = MockClient::default().with_ids("biosample_set", 5);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        assert_matches!(
            sampler.sample_ids(&request(0), 5),
            Err(NmdcError::Validation(_))
        );
        assert!(client.page_calls().is_empty());
    }

    #[test]
    fn record_pool_is_oversampled() {
        let client = MockClient::default().with_ids("biosample_set", 1_000);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        let sample = sampler.sample_records(&request(50).seed(3), None).unwrap();
        assert_eq!(sample.candidate_pool_size, 150);
        assert_eq!(sample.records.len(), 50);
        assert_eq!(sample.method, SampleMethod::OversampledPool);
        for (_, request) in client.page_calls() {
            assert!(request.max_page_size >= 50);
        }
    }

    #[test]
    fn record_pool_respects_floor_and_availability() {
        let client = MockClient::default().with_ids("biosample_set", 60);
        let sampler = RandomSampler::new(&client, &ClientConfig::default());
        let sample = sampler.sample_records(&request(5).seed(9), None).unwrap();
        assert_eq!(sample.candidate_pool_size, 60);
        assert_eq!(sample.records.len(), 5);
    }

    #[test]
    fn record_pool_never_asks_for_less_than_the_sample() {
        let client = MockClient::default().with_ids("biosample_set", 10);
        let config = ClientConfig {
            min_candidate_pool: 1,
            oversample_factor: 1,
            ..ClientConfig::default()
        };
        let sampler = RandomSampler::new(&client, &config);
        let sample = sampler.sample_records(&request(40), None).unwrap();
        assert_eq!(sample.records.len(), 10);
        let (_, first) = &client.page_calls()[0];
        assert!(first.max_page_size >= 40);
    }
}
