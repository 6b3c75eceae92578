use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::ledger::{self, Feedback, LedgerError};

/// Default generative-text endpoint; overridable per workspace or via env.
pub const DEFAULT_MODEL_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

pub const FALLBACK_SCORE: f64 = 75.0;
pub const FALLBACK_STRENGTHS: &str =
    "The submission was received and processed successfully.";
pub const FALLBACK_WEAKNESSES: &str = "The automatic evaluation response could not be parsed. \
     This submission has been queued for manual review by an instructor.";
pub const FALLBACK_RESOURCES: &str =
    "Please review the course materials or contact your instructor for detailed guidance.";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MODEL_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PORTALD_AI_ENDPOINT") {
            if !url.is_empty() {
                config.endpoint = url;
            }
        }
        if let Ok(key) = std::env::var("PORTALD_AI_API_KEY") {
            config.api_key = key;
        }
        if let Ok(timeout) = std::env::var("PORTALD_AI_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.timeout_seconds = seconds.clamp(5, 300);
            }
        }
        config
    }

    /// Workspace settings (section `setup.ai`) override the environment.
    pub fn apply_overrides(&mut self, section: &serde_json::Value) {
        if let Some(url) = section.get("endpoint").and_then(|v| v.as_str()) {
            if !url.trim().is_empty() {
                self.endpoint = url.trim().to_string();
            }
        }
        if let Some(key) = section.get("apiKey").and_then(|v| v.as_str()) {
            self.api_key = key.to_string();
        }
        if let Some(seconds) = section.get("timeoutSeconds").and_then(|v| v.as_u64()) {
            self.timeout_seconds = seconds.clamp(5, 300);
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        Self {
            code: e.code,
            message: e.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub score: f64,
    pub strengths: String,
    pub weaknesses: String,
    pub resources: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedEvaluation {
    #[serde(flatten)]
    pub result: EvaluationResult,
    pub score_name: String,
    pub partial_score_id: String,
    pub total_score: f64,
}

/// Full gateway pipeline: fetch the artifact, prompt the model, coerce the
/// reply into a structured result, commit it as a partial score. Fetch and
/// model failures are fatal; a malformed model reply degrades to the fixed
/// fallback so the submission still receives a score.
pub fn evaluate_and_commit(
    conn: &mut Connection,
    config: &GatewayConfig,
    student_id: &str,
    file_url: &str,
) -> Result<CommittedEvaluation, GatewayError> {
    let artifact = fetch_artifact_text(config, file_url)?;
    let reply = call_model(config, &build_prompt(&artifact))?;
    let result = parse_model_reply(&reply);
    if result.degraded {
        tracing::warn!(student_id, "model reply was not parseable; using fallback evaluation");
    }

    let score_name = format!("AI Auto-Evaluation - {}", ledger::today());
    let feedback = Feedback {
        strengths: result.strengths.clone(),
        weaknesses: result.weaknesses.clone(),
        resources: result.resources.clone(),
    };
    let added = ledger::add_partial_score(conn, student_id, &score_name, result.score, Some(&feedback))?;

    Ok(CommittedEvaluation {
        result,
        score_name,
        partial_score_id: added.partial_score_id,
        total_score: added.total_score,
    })
}

pub fn fetch_artifact_text(config: &GatewayConfig, url: &str) -> Result<String, GatewayError> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    let response = ureq::get(url).timeout(timeout).call();
    match response {
        Ok(res) => res
            .into_string()
            .map_err(|e| GatewayError::new("fetch_failed", format!("failed to read artifact: {}", e))),
        Err(ureq::Error::Status(code, _)) => Err(GatewayError::new(
            "fetch_failed",
            format!("artifact fetch returned status {}", code),
        )),
        Err(ureq::Error::Transport(e)) => Err(GatewayError::new(
            "fetch_failed",
            format!("artifact fetch transport error: {}", e),
        )),
    }
}

fn call_model(config: &GatewayConfig, prompt: &str) -> Result<String, GatewayError> {
    let body = json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": 0.4,
            "maxOutputTokens": 1024
        }
    });

    let url = if config.api_key.is_empty() {
        config.endpoint.clone()
    } else {
        format!("{}?key={}", config.endpoint, config.api_key)
    };

    let timeout = Duration::from_secs(config.timeout_seconds);
    let response = ureq::post(&url)
        .set("Content-Type", "application/json")
        .timeout(timeout)
        .send_string(&body.to_string());

    let res = match response {
        Ok(res) => res,
        Err(ureq::Error::Status(code, _)) => {
            return Err(GatewayError::new(
                "model_failed",
                format!("model service returned status {}", code),
            ));
        }
        Err(ureq::Error::Transport(e)) => {
            return Err(GatewayError::new(
                "model_failed",
                format!("model service transport error: {}", e),
            ));
        }
    };

    let raw = res
        .into_string()
        .map_err(|e| GatewayError::new("model_failed", format!("failed to read model response: {}", e)))?;
    let envelope: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| GatewayError::new("model_failed", format!("malformed model response: {}", e)))?;

    envelope
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|arr| arr.first())
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GatewayError::new("model_failed", "model response has no content block"))
}

fn build_prompt(artifact: &str) -> String {
    format!(
        "You are an instructor evaluating a student project submission for a course learning portal.\n\
         Review the submission content below and respond with a strict JSON object only, using exactly these keys:\n\
         \"score\": a number from 0 to 100,\n\
         \"strengths\": free text describing what the submission does well,\n\
         \"weaknesses\": free text describing what needs improvement,\n\
         \"resources\": free text suggesting materials for further study.\n\
         Do not include any commentary outside the JSON object.\n\n\
         Submission content:\n{}",
        artifact
    )
}

fn fallback_result() -> EvaluationResult {
    EvaluationResult {
        score: FALLBACK_SCORE,
        strengths: FALLBACK_STRENGTHS.to_string(),
        weaknesses: FALLBACK_WEAKNESSES.to_string(),
        resources: FALLBACK_RESOURCES.to_string(),
        degraded: true,
    }
}

/// Coerces the model's free-text reply into a structured result. This step
/// cannot fail: a reply with no parseable JSON object degrades to the fixed
/// fallback so the commit still happens.
pub fn parse_model_reply(reply: &str) -> EvaluationResult {
    let Some(block) = extract_json_block(reply) else {
        return fallback_result();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(block) else {
        return fallback_result();
    };
    let Some(obj) = parsed.as_object() else {
        return fallback_result();
    };

    let text_field = |key: &str, fallback: &str| -> String {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback.to_string())
    };

    EvaluationResult {
        score: coerce_score(obj.get("score")),
        strengths: text_field("strengths", FALLBACK_STRENGTHS),
        weaknesses: text_field("weaknesses", FALLBACK_WEAKNESSES),
        resources: text_field("resources", FALLBACK_RESOURCES),
        degraded: false,
    }
}

/// Accepts numbers or numeric strings; anything else defaults to the
/// fallback score. The result is clamped into [0, 100].
fn coerce_score(value: Option<&serde_json::Value>) -> f64 {
    let raw = match value {
        Some(v) if v.is_number() => v.as_f64().unwrap_or(FALLBACK_SCORE),
        Some(v) => v
            .as_str()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(FALLBACK_SCORE),
        None => FALLBACK_SCORE,
    };
    if raw.is_finite() {
        ledger::clamp_score(raw)
    } else {
        FALLBACK_SCORE
    }
}

/// First balanced `{...}` block in the text, tracking strings and escapes
/// so braces inside JSON string values do not end the block early.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_balanced_object() {
        let text = "Sure! Here is the evaluation:\n```json\n{\"score\": 88, \"strengths\": \"ok\"}\n```\ntrailing";
        let block = extract_json_block(text).expect("block");
        assert_eq!(block, "{\"score\": 88, \"strengths\": \"ok\"}");
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_block() {
        let text = "{\"strengths\": \"uses {braces} and \\\"quotes\\\" well\", \"score\": 90}";
        let block = extract_json_block(text).expect("block");
        assert_eq!(block, text);
    }

    #[test]
    fn nested_objects_are_kept_whole() {
        let text = "prefix {\"a\": {\"b\": 1}, \"score\": 70} suffix";
        assert_eq!(extract_json_block(text), Some("{\"a\": {\"b\": 1}, \"score\": 70}"));
    }

    #[test]
    fn reply_without_json_degrades_to_fallback() {
        let result = parse_model_reply("I am unable to evaluate this submission right now.");
        assert!(result.degraded);
        assert_eq!(result.score, FALLBACK_SCORE);
        assert_eq!(result.strengths, FALLBACK_STRENGTHS);
        assert_eq!(result.weaknesses, FALLBACK_WEAKNESSES);
        assert_eq!(result.resources, FALLBACK_RESOURCES);
    }

    #[test]
    fn unbalanced_json_degrades_to_fallback() {
        let result = parse_model_reply("{\"score\": 88, \"strengths\": \"never closed");
        assert!(result.degraded);
        assert_eq!(result.score, FALLBACK_SCORE);
    }

    #[test]
    fn well_formed_reply_parses_all_fields() {
        let reply = "Evaluation follows.\n{\"score\": 92.5, \"strengths\": \"Clean code.\", \
                     \"weaknesses\": \"No tests.\", \"resources\": \"Chapter 7.\"}";
        let result = parse_model_reply(reply);
        assert!(!result.degraded);
        assert_eq!(result.score, 92.5);
        assert_eq!(result.strengths, "Clean code.");
        assert_eq!(result.weaknesses, "No tests.");
        assert_eq!(result.resources, "Chapter 7.");
    }

    #[test]
    fn score_coercion_handles_strings_and_garbage() {
        let result = parse_model_reply("{\"score\": \"85\"}");
        assert_eq!(result.score, 85.0);

        let result = parse_model_reply("{\"score\": \"excellent\"}");
        assert_eq!(result.score, FALLBACK_SCORE);

        let result = parse_model_reply("{\"strengths\": \"fine\"}");
        assert_eq!(result.score, FALLBACK_SCORE);
    }

    #[test]
    fn parsed_scores_are_clamped_into_range() {
        assert_eq!(parse_model_reply("{\"score\": 140}").score, 100.0);
        assert_eq!(parse_model_reply("{\"score\": -5}").score, 0.0);
    }

    #[test]
    fn missing_text_fields_use_fallback_texts_without_degrading() {
        let result = parse_model_reply("{\"score\": 60}");
        assert!(!result.degraded);
        assert_eq!(result.score, 60.0);
        assert_eq!(result.strengths, FALLBACK_STRENGTHS);
    }

    #[test]
    fn config_overrides_replace_env_defaults() {
        let mut config = GatewayConfig::default();
        config.apply_overrides(&serde_json::json!({
            "endpoint": "http://127.0.0.1:9/model",
            "timeoutSeconds": 2
        }));
        assert_eq!(config.endpoint, "http://127.0.0.1:9/model");
        assert_eq!(config.timeout_seconds, 5); // clamped to the floor
        assert!(config.api_key.is_empty());
    }
}
