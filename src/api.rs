use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::domain::{CollectionName, EntityId, Filter, PageToken, Projection, Record};
use crate::error::NmdcError;

/// Parameters of a single page request against `GET {base}/{collection}`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageRequest {
    pub max_page_size: usize,
    pub projection: Option<Projection>,
    pub page_token: Option<PageToken>,
    pub filter: Option<Filter>,
    pub extra_params: Vec<(String, String)>,
}

impl PageRequest {
    /// Query pairs in wire order. Passthrough params replace earlier keys of the same name.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("max_page_size".to_string(), self.max_page_size.to_string())];
        if let Some(projection) = self.projection.as_ref().filter(|p| !p.is_empty()) {
            pairs.push(("projection".to_string(), projection.to_param()));
        }
        if let Some(token) = &self.page_token {
            pairs.push(("page_token".to_string(), token.as_str().to_string()));
        }
        if let Some(filter) = self.filter.as_ref().filter(|f| !f.is_empty()) {
            pairs.push(("filter".to_string(), filter.to_param()));
        }
        for (key, value) in &self.extra_params {
            match pairs.iter_mut().find(|(existing, _)| existing == key) {
                Some(slot) => slot.1 = value.clone(),
                None => pairs.push((key.clone(), value.clone())),
            }
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_page_token: Option<PageToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub count: u64,
    pub size_bytes: u64,
    pub avg_obj_size: u64,
    pub storage_size: u64,
    pub total_size: u64,
}

pub trait NmdcClient: Send + Sync {
    fn fetch_page(
        &self,
        collection: &CollectionName,
        request: &PageRequest,
    ) -> Result<Page, NmdcError>;
    fn fetch_entity(&self, id: &EntityId) -> Result<Record, NmdcError>;
    fn collection_names(&self) -> Result<Vec<String>, NmdcError>;
    fn collection_stats(&self) -> Result<BTreeMap<String, CollectionStats>, NmdcError>;
}

#[derive(Clone)]
pub struct NmdcHttpClient {
    client: Client,
    base_url: String,
}

impl NmdcHttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, NmdcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("nmdc-fetcher/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NmdcError::RemoteHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| NmdcError::RemoteHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, NmdcError> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            NmdcError::ConfigParse(format!("invalid base_url {}: {err}", self.base_url))
        })?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                NmdcError::ConfigParse(format!("base_url cannot be a base: {}", self.base_url))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn send(
        &self,
        url: Url,
        query: &[(String, String)],
    ) -> Result<reqwest::blocking::Response, NmdcError> {
        tracing::debug!(%url, params = query.len(), "GET");
        self.client
            .get(url)
            .query(query)
            .send()
            .map_err(|err| NmdcError::RemoteHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, NmdcError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "NMDC request failed".to_string());
        Err(NmdcError::RemoteStatus { status, message })
    }

    fn read_json(response: reqwest::blocking::Response) -> Result<Value, NmdcError> {
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| NmdcError::RemoteDecode(err.to_string()))
    }
}

impl NmdcClient for NmdcHttpClient {
    fn fetch_page(
        &self,
        collection: &CollectionName,
        request: &PageRequest,
    ) -> Result<Page, NmdcError> {
        let url = self.endpoint(&[collection.as_str()])?;
        let body = Self::read_json(self.send(url, &request.query_pairs())?)?;
        decode_page(body)
    }

    fn fetch_entity(&self, id: &EntityId) -> Result<Record, NmdcError> {
        let url = self.endpoint(&["ids", id.as_str()])?;
        let response = self.send(url, &[])?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(NmdcError::NotFound(format!("Entity '{id}' not found")));
        }
        match Self::read_json(response)? {
            Value::Object(record) => Ok(record),
            other => Err(NmdcError::RemoteDecode(format!(
                "expected an object for entity {id}, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn collection_names(&self) -> Result<Vec<String>, NmdcError> {
        let url = self.endpoint(&["collection_names"])?;
        let body = Self::read_json(self.send(url, &[])?)?;
        decode_collection_names(body)
    }

    fn collection_stats(&self) -> Result<BTreeMap<String, CollectionStats>, NmdcError> {
        let url = self.endpoint(&["collection_stats"])?;
        let body = Self::read_json(self.send(url, &[])?)?;
        parse_collection_stats(&body)
    }
}

/// Decodes the `{resources: [...], next_page_token?: "..."}` envelope.
pub fn decode_page(body: Value) -> Result<Page, NmdcError> {
    let Value::Object(mut envelope) = body else {
        return Err(NmdcError::RemoteDecode(format!(
            "expected a page envelope object, got {}",
            json_kind(&body)
        )));
    };

    let records = match envelope.remove("resources") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(NmdcError::RemoteDecode(format!(
                    "expected resource objects, got {}",
                    json_kind(&other)
                ))),
            })
            .collect::<Result<Vec<_>, NmdcError>>()?,
        Some(other) => {
            return Err(NmdcError::RemoteDecode(format!(
                "expected `resources` to be an array, got {}",
                json_kind(&other)
            )));
        }
    };

    let next_page_token =
        PageToken::from_response(envelope.get("next_page_token").and_then(|v| v.as_str()));

    Ok(Page {
        records,
        next_page_token,
    })
}

pub fn decode_collection_names(body: Value) -> Result<Vec<String>, NmdcError> {
    let Value::Array(items) = body else {
        return Err(NmdcError::RemoteDecode(format!(
            "expected a list of collection names, got {}",
            json_kind(&body)
        )));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            other => Err(NmdcError::RemoteDecode(format!(
                "expected collection name strings, got {}",
                json_kind(&other)
            ))),
        })
        .collect()
}

/// Keys storage statistics by collection name, stripping the `nmdc.` namespace prefix.
pub fn parse_collection_stats(
    raw: &Value,
) -> Result<BTreeMap<String, CollectionStats>, NmdcError> {
    let entries = raw.as_array().ok_or_else(|| {
        NmdcError::RemoteDecode(format!(
            "expected a list of collection stats, got {}",
            json_kind(raw)
        ))
    })?;

    let mut stats = BTreeMap::new();
    for entry in entries {
        let ns = entry.get("ns").and_then(|v| v.as_str()).unwrap_or("");
        let Some(collection) = ns.strip_prefix("nmdc.") else {
            continue;
        };
        let storage = entry.get("storageStats");
        let field = |name: &str| -> u64 {
            storage
                .and_then(|s| s.get(name))
                .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
                .unwrap_or(0)
        };
        stats.insert(
            collection.to_string(),
            CollectionStats {
                count: field("count"),
                size_bytes: field("size"),
                avg_obj_size: field("avgObjSize"),
                storage_size: field("storageSize"),
                total_size: field("totalSize"),
            },
        );
    }
    tracing::debug!(collections = stats.len(), "decoded collection stats");
    Ok(stats)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
