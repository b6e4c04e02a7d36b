//! Turning buffered model output into a quiz reply.
//!
//! The model is asked for JSON but often wraps it in a markdown fence or
//! adds prose around it. Parsing is best effort: anything that cannot be
//! read as JSON is handed back as raw text instead of failing the request.

use regex::Regex;
use std::sync::OnceLock;

use super::types::{QuizPayload, QuizReply, QUIZ_QUESTION_COUNT};

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fence pattern is valid")
    })
}

/// Body of the first fenced code block, trimmed.
pub fn fenced_block(content: &str) -> Option<&str> {
    fence_regex()
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Outermost `{ ... }` span, for JSON surrounded by prose.
fn brace_span(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

/// Locate and parse the JSON embedded in a model reply.
///
/// Candidates, in order: the first fenced block, the whole text, the
/// outermost brace span.
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let candidate = fenced_block(content).unwrap_or(content);
    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }

    brace_span(candidate).and_then(|span| serde_json::from_str(span).ok())
}

/// Build the reply for the quiz endpoint.
///
/// Never fails: unparseable output becomes [`QuizReply::Content`].
pub fn quiz_reply(content: String) -> QuizReply {
    match extract_json(&content) {
        Some(value) => {
            if QuizPayload::from_value(&value).is_none() {
                tracing::warn!(
                    expected_questions = QUIZ_QUESTION_COUNT,
                    "Model returned JSON that does not match the quiz schema"
                );
            }
            QuizReply::Quiz(value)
        }
        None => {
            tracing::warn!(
                content_len = content.len(),
                "Model output is not JSON, returning raw content"
            );
            QuizReply::Content(content)
        }
    }
}
