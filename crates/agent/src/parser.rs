//! Action parser
//!
//! Pulls at most one structured tool call out of free model text. The
//! scanner tracks brace depth and skips braces inside JSON strings; each
//! balanced top-level `{...}` span is a candidate. Candidates are tried in
//! order of appearance and the first one naming a tool with an object of
//! parameters wins. Text without a qualifying candidate is a direct answer.

use serde_json::{Map, Value};
use std::ops::Range;

use crate::types::{AgentThought, PlannedAction};

const TOOL_KEYS: &[&str] = &["tool", "name"];
const PARAM_KEYS: &[&str] = &["params", "parameters", "arguments"];

const ACTION_CONFIDENCE: f64 = 0.9;
const ANSWER_CONFIDENCE: f64 = 0.7;

/// Byte ranges of balanced top-level `{...}` spans.
///
/// Quote tracking only applies inside an open brace so that stray quotes in
/// prose cannot hide a later object.
pub fn candidate_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(start..i + 1);
                }
            }
            _ => {}
        }
    }

    spans
}

/// Candidate JSON object texts in order of appearance
pub fn extract_json_candidates(text: &str) -> Vec<&str> {
    candidate_spans(text)
        .into_iter()
        .map(|span| &text[span])
        .collect()
}

fn first_key<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

/// Interpret one candidate as an action, if it qualifies
fn action_from_candidate(candidate: &str) -> Option<(PlannedAction, Option<f64>)> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;

    let tool = first_key(object, TOOL_KEYS)?.as_str()?.trim();
    if tool.is_empty() {
        return None;
    }
    let params = first_key(object, PARAM_KEYS)?;
    if !params.is_object() {
        return None;
    }

    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("unspecified");

    let action = PlannedAction {
        tool: tool.to_string(),
        params: params.clone(),
        reason: reason.to_string(),
        done: object.get("done").and_then(Value::as_bool).unwrap_or(false),
    };
    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0));

    Some((action, confidence))
}

/// Turn raw model text into a thought; `thinking_time_ms` is left at zero
pub fn parse(text: &str) -> AgentThought {
    let content = text.trim();

    for span in candidate_spans(text) {
        if let Some((action, confidence)) = action_from_candidate(&text[span.clone()]) {
            return AgentThought {
                content: content.to_string(),
                reasoning: text[..span.start].trim().to_string(),
                confidence: confidence.unwrap_or(ACTION_CONFIDENCE),
                thinking_time_ms: 0,
                planned_action: Some(action),
            };
        }
    }

    AgentThought {
        content: content.to_string(),
        reasoning: content.to_string(),
        confidence: if content.is_empty() {
            0.0
        } else {
            ANSWER_CONFIDENCE
        },
        thinking_time_ms: 0,
        planned_action: None,
    }
}
