//! Result normalizer.
//!
//! A function can answer in three shapes. They are matched in a fixed order
//! and the first match wins:
//!
//! | Shape | Matches when | Produces |
//! |-------|--------------|----------|
//! | A | the return value is an object with `body`, or a numeric `status`/`statusCode` | its `body`, status and headers |
//! | B | the response builder was written to (`json`, `text`, `send`, `status`, `setHeader`) | the builder's accumulated state |
//! | C | always | the raw return value, status 200, no headers |
//!
//! A plain returned object that is not shape A therefore loses to builder
//! writes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const DEFAULT_STATUS: u16 = 200;

/// State of the response builder after a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderState {
    /// Whether any builder method was called.
    pub written: bool,
    pub status: Option<u16>,
    pub headers: Map<String, Value>,
    pub body: Option<Value>,
}

/// What the sandbox reports for a successful run, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    /// `None` when the entry point returned `undefined`.
    pub returned: Option<Value>,
    pub builder: BuilderState,
    /// Console output captured inside the sandbox.
    pub logs: Vec<String>,
}

/// Canonical result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub data: Value,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

/// Which shape matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Response,
    Builder,
    Raw,
}

type Matcher = fn(&RawOutput) -> Option<ExecutionOutcome>;

const MATCHERS: [(ResultShape, Matcher); 3] = [
    (ResultShape::Response, match_response_object),
    (ResultShape::Builder, match_builder),
    (ResultShape::Raw, match_raw),
];

/// Reduce a raw output to the canonical outcome.
pub fn normalize(raw: RawOutput) -> (ResultShape, ExecutionOutcome) {
    for (shape, matcher) in MATCHERS {
        if let Some(mut outcome) = matcher(&raw) {
            outcome.logs = raw.logs;
            return (shape, outcome);
        }
    }
    unreachable!("the raw matcher always matches")
}

fn match_response_object(raw: &RawOutput) -> Option<ExecutionOutcome> {
    let obj = raw.returned.as_ref()?.as_object()?;
    let status = obj
        .get("status")
        .or_else(|| obj.get("statusCode"))
        .and_then(Value::as_u64);

    if !obj.contains_key("body") && status.is_none() {
        return None;
    }

    Some(ExecutionOutcome {
        data: obj.get("body").cloned().unwrap_or(Value::Null),
        status: coerce_status(status),
        headers: obj
            .get("headers")
            .and_then(Value::as_object)
            .map(stringify_headers)
            .unwrap_or_default(),
        logs: Vec::new(),
    })
}

fn match_builder(raw: &RawOutput) -> Option<ExecutionOutcome> {
    if !raw.builder.written {
        return None;
    }
    Some(ExecutionOutcome {
        data: raw.builder.body.clone().unwrap_or(Value::Null),
        status: coerce_status(raw.builder.status.map(u64::from)),
        headers: stringify_headers(&raw.builder.headers),
        logs: Vec::new(),
    })
}

fn match_raw(raw: &RawOutput) -> Option<ExecutionOutcome> {
    Some(ExecutionOutcome {
        data: raw.returned.clone().unwrap_or(Value::Null),
        status: DEFAULT_STATUS,
        headers: BTreeMap::new(),
        logs: Vec::new(),
    })
}

fn coerce_status(status: Option<u64>) -> u16 {
    status
        .filter(|s| (100..=599).contains(s))
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(DEFAULT_STATUS)
}

fn stringify_headers(headers: &Map<String, Value>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.to_ascii_lowercase(), value)
        })
        .collect()
}
