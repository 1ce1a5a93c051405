//! Versioned wire schema for batch event extraction
//!
//! Requests number each article `[[1]]..[[n]]`; the response must carry the
//! schema tag and exactly one result per id. Anything else is malformed. The
//! only leniency is stripping a surrounding Markdown code fence.

use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

use lookout_core::Article;

/// Schema tag every response must echo
pub const SCHEMA_VERSION: &str = "lookout.extract.v1";

/// System prompt for event extraction
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a conflict-event analyst for Nigeria. You receive numbered news articles, each introduced by a marker such as [[1]].

For every article decide whether it reports a specific violent incident (armed attack, kidnapping, bombing, communal clash, banditry, insurgency, violent protest). If it does, describe the incident; otherwise return null for that article.

Respond with a single JSON object and nothing else:
{"schema": "lookout.extract.v1", "results": [{"id": 1, "event": {...} | null}, ...]}

Each event object has:
- "state": Nigerian state where it happened (without the word "State")
- "lga": local government area, or "" if not stated
- "settlement": village/town name, or null
- "event_type": one of armed_attack, kidnapping, bombing, communal_clash, banditry, insurgency, protest, other
- "actors": list of perpetrator or party names (may be empty)
- "fatalities": integer count of people killed (0 if none reported)
- "injuries": integer count of people injured (0 if none reported)
- "confidence": number between 0 and 1

Return exactly one result per article id.
"#;

/// Appended to the request after a malformed response
pub const STRICT_SCHEMA_HINT: &str = r#"
STRICT FORMAT REMINDER: your previous answer did not match the required schema.
Output ONLY raw JSON, no prose. The top-level object must be exactly:
{"schema": "lookout.extract.v1", "results": [ ... ]}
"results" must contain one entry per article id shown above, each {"id": <integer>, "event": <object or null>}.
Every event object must contain all of: "state" (string), "lga" (string), "settlement" (string or null), "event_type" (string), "actors" (array of strings), "fatalities" (integer), "injuries" (integer), "confidence" (number).
"#;

/// Why a response was rejected as malformed
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Response contains no JSON object")]
    NoJson,

    #[error("Response does not match schema: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected schema tag: {0}")]
    WrongSchema(String),

    #[error("No result for article {0}")]
    MissingId(usize),

    #[error("Duplicate result for article {0}")]
    DuplicateId(usize),

    #[error("Result for unknown article {0}")]
    UnknownId(usize),
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    schema: String,
    results: Vec<ResultItem>,
}

#[derive(Debug, Deserialize)]
struct ResultItem {
    id: usize,
    event: Option<RawEvent>,
}

/// One event exactly as the model reported it, before validation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEvent {
    pub state: String,
    pub lga: String,
    #[serde(default)]
    pub settlement: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub actors: Vec<String>,
    pub fatalities: i64,
    pub injuries: i64,
    pub confidence: f64,
}

/// Render the user message for one batch
pub fn build_request(articles: &[Article], strict: bool) -> String {
    let mut out = String::new();

    for (idx, article) in articles.iter().enumerate() {
        out.push_str(&format!(
            "[[{}]]\nSource: {}\nTitle: {}\n\n{}\n\n",
            idx + 1,
            article.source,
            article.title,
            article.content.trim()
        ));
    }

    if strict {
        out.push_str(STRICT_SCHEMA_HINT);
    }

    out
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") on the opening fence line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a response for a batch of `expected` articles.
///
/// Returns one entry per article, in request order.
pub fn parse_response(raw: &str, expected: usize) -> Result<Vec<Option<RawEvent>>, SchemaError> {
    let body = strip_code_fence(raw);
    if !body.starts_with('{') {
        return Err(SchemaError::NoJson);
    }

    let response: ExtractionResponse = serde_json::from_str(body)?;
    if response.schema != SCHEMA_VERSION {
        return Err(SchemaError::WrongSchema(response.schema));
    }

    let mut slots: Vec<Option<Option<RawEvent>>> = vec![None; expected];
    let mut seen = HashSet::new();

    for item in response.results {
        if item.id == 0 || item.id > expected {
            return Err(SchemaError::UnknownId(item.id));
        }
        if !seen.insert(item.id) {
            return Err(SchemaError::DuplicateId(item.id));
        }
        slots[item.id - 1] = Some(item.event);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| slot.ok_or(SchemaError::MissingId(idx + 1)))
        .collect()
}
