// Shared tool plumbing: output formats, the TOON/auto selection helper, and
// the barrier wait every tool entry point goes through.
//
// Each tool returns either a rendered string (text/tree/toon modes) or a
// structured JSON value. TOON is the compact columnar serialization used for
// large results; `auto` picks TOON once the result count crosses the tool's
// threshold, else JSON. A TOON encoding failure falls back to JSON silently.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::MillerError;
use crate::state::{INITIALIZATION_TIMEOUT, ServerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Toon,
    Auto,
    Tree,
    Code,
    Mermaid,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "json" => OutputFormat::Json,
            "toon" => OutputFormat::Toon,
            "auto" => OutputFormat::Auto,
            "tree" => OutputFormat::Tree,
            "code" => OutputFormat::Code,
            "mermaid" => OutputFormat::Mermaid,
            _ => OutputFormat::Text,
        }
    }
}

/// What a tool hands back to the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    pub fn json<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(ToolOutput::Json(serde_json::to_value(value)?))
    }

    /// Render for a plain-text consumer.
    pub fn rendered(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Pick text, TOON or JSON for a result, with `auto` switching to TOON at
/// the tool's threshold.
pub fn toonable_result<T: Serialize, U: Serialize>(
    json_data: &T,
    toon_data: &U,
    format: OutputFormat,
    auto_threshold: usize,
    result_count: usize,
    text: Option<String>,
    tool_name: &str,
) -> anyhow::Result<ToolOutput> {
    match format {
        OutputFormat::Text | OutputFormat::Tree | OutputFormat::Code | OutputFormat::Mermaid => {
            match text {
                Some(text) => Ok(ToolOutput::Text(text)),
                None => ToolOutput::json(json_data),
            }
        }
        OutputFormat::Toon => match encode_toon(toon_data) {
            Some(encoded) => Ok(ToolOutput::Text(encoded)),
            None => {
                warn!(tool = tool_name, "TOON encoding failed, falling back to JSON");
                ToolOutput::json(json_data)
            }
        },
        OutputFormat::Auto => {
            if result_count >= auto_threshold {
                if let Some(encoded) = encode_toon(toon_data) {
                    return Ok(ToolOutput::Text(encoded));
                }
            }
            ToolOutput::json(json_data)
        }
        OutputFormat::Json => ToolOutput::json(json_data),
    }
}

fn encode_toon<U: Serialize>(data: &U) -> Option<String> {
    let value = serde_json::to_value(data).ok()?;
    toon_format::encode_default(&value).ok()
}

/// Await the storage stage of the initialization barrier.
pub async fn wait_for_storage(state: &ServerState) -> Result<(), MillerError> {
    state.init.wait_storage(INITIALIZATION_TIMEOUT).await
}

/// Await both stages; for tools that touch vectors.
pub async fn wait_for_vectors(state: &ServerState) -> Result<(), MillerError> {
    state.init.wait_storage(INITIALIZATION_TIMEOUT).await?;
    state.init.wait_vectors(INITIALIZATION_TIMEOUT).await
}

// Serde default helpers shared by the tool parameter structs.

pub(crate) fn default_primary() -> String {
    "primary".to_string()
}

pub(crate) fn default_text() -> String {
    "text".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_parsing_defaults_to_text() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("toon"), OutputFormat::Toon);
        assert_eq!(OutputFormat::parse("tree"), OutputFormat::Tree);
        assert_eq!(OutputFormat::parse("anything"), OutputFormat::Text);
    }

    #[test]
    fn auto_uses_json_below_threshold() {
        let data = json!({"results": [1, 2, 3]});
        let out = toonable_result(&data, &data, OutputFormat::Auto, 20, 3, None, "test").unwrap();
        assert!(matches!(out, ToolOutput::Json(_)));
    }

    #[test]
    fn auto_uses_toon_at_threshold() {
        let rows = json!([
            {"name": "a", "line": 1},
            {"name": "b", "line": 2},
        ]);
        let out = toonable_result(&rows, &rows, OutputFormat::Auto, 2, 2, None, "test").unwrap();
        assert!(matches!(out, ToolOutput::Text(_)));
    }

    #[test]
    fn text_mode_prefers_formatter() {
        let data = json!({"x": 1});
        let out = toonable_result(
            &data,
            &data,
            OutputFormat::Text,
            20,
            1,
            Some("one result".into()),
            "test",
        )
        .unwrap();
        assert_eq!(out, ToolOutput::Text("one result".into()));
    }
}
