use async_trait::async_trait;
use kaiqu_core::{AdmissionPolicy, RawListing};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::{AdapterError, FetchedPage, PayloadShape, SourceAdapter};

/// Where feed versions have kept the entity list, probed in order. The empty path
/// is the document itself.
const LIST_PATHS: &[&[&str]] = &[&["data", "list"], &["list"], &[]];

const JSON_REQUEST_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json, text/plain, */*"),
    ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
];

/// Ordered key spellings per logical field; the first non-empty one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonKeyMap {
    pub name: Vec<String>,
    pub url: Vec<String>,
    pub category: Vec<String>,
    pub time: Vec<String>,
    pub min_spend: Vec<String>,
    pub description: Vec<String>,
    pub features: Vec<String>,
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Default for JsonKeyMap {
    fn default() -> Self {
        Self {
            name: keys(&["serverName", "name", "title"]),
            url: keys(&["webUrl", "url", "link", "serverUrl"]),
            category: keys(&["serverType", "type"]),
            time: keys(&["startServerTime", "openTime", "startTime"]),
            min_spend: keys(&["serviceQq", "minSpend"]),
            description: keys(&["gameIntro", "intro", "description"]),
            features: keys(&["serverIp", "features"]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonAdapter {
    source_id: String,
    keys: JsonKeyMap,
    policy: AdmissionPolicy,
}

impl JsonAdapter {
    pub fn new(source_id: impl Into<String>, keys: JsonKeyMap) -> Self {
        Self {
            source_id: source_id.into(),
            keys,
            policy: AdmissionPolicy::feed(),
        }
    }

    fn extract_entity(&self, entity: &Map<String, JsonValue>) -> RawListing {
        RawListing {
            name: field_text(entity, &self.keys.name),
            url: field_text(entity, &self.keys.url),
            category: field_text(entity, &self.keys.category),
            time_text: time_text(entity, &self.keys.time),
            min_spend: field_text(entity, &self.keys.min_spend),
            description: field_text(entity, &self.keys.description),
            features: field_text(entity, &self.keys.features),
        }
    }
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn locate_entities(value: &JsonValue) -> Option<&Vec<JsonValue>> {
    LIST_PATHS
        .iter()
        .find_map(|path| json_at(value, path)?.as_array())
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        },
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn field_text(entity: &Map<String, JsonValue>, keys: &[String]) -> String {
    keys.iter()
        .find_map(|key| entity.get(key).and_then(scalar_text))
        .unwrap_or_default()
}

/// Numeric times are whole seconds; fractional parts are truncated.
fn time_scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .map(|ts| ts.to_string()),
        other => scalar_text(other),
    }
}

fn time_text(entity: &Map<String, JsonValue>, keys: &[String]) -> String {
    keys.iter()
        .find_map(|key| entity.get(key).and_then(time_scalar))
        .unwrap_or_default()
}

#[async_trait]
impl SourceAdapter for JsonAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn shape(&self) -> PayloadShape {
        PayloadShape::Json
    }

    fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    fn request_headers(&self) -> &'static [(&'static str, &'static str)] {
        JSON_REQUEST_HEADERS
    }

    fn extract(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError> {
        let value: JsonValue = serde_json::from_str(&page.body)?;
        let Some(entities) = locate_entities(&value) else {
            warn!(source_id = %self.source_id, "no entity list found in feed");
            return Ok(Vec::new());
        };

        Ok(entities
            .iter()
            .filter_map(|entity| match entity.as_object() {
                Some(obj) => Some(self.extract_entity(obj)),
                None => {
                    debug!(source_id = %self.source_id, "skipping non-object feed entity");
                    None
                }
            })
            .collect())
    }
}
