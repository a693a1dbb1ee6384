use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use whalewatch_models::agent_message::{AgentResponse, Stance};

use crate::error::AgentError;

/// Pull the first JSON object out of free text.
///
/// Models wrap their answer in prose or a fenced code block more often than
/// not, so each of these is tried in turn:
/// - the whole reply
/// - the body of a ```json (or bare ```) fence
/// - the first brace-balanced `{ ... }` span
pub fn extract_json(text: &str) -> Result<Value, AgentError> {
    let trimmed = text.trim();

    let candidates = [
        Some(trimmed),
        fenced_block(trimmed),
        balanced_object(trimmed),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
    }

    Err(AgentError::Parse(format!(
        "no JSON object in reply ({} chars)",
        text.len()
    )))
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip the info string (`json`, `JSON`, nothing) up to the end of the line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Map a model's stance word onto the closed set. Anything unrecognized is `None`.
///
/// Bare `YES`/`NO` are rejected: they name market outcomes, not trade directions.
pub fn parse_stance(raw: &str) -> Option<Stance> {
    let normalized = raw
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_ascii_uppercase()
        .replace([' ', '-'], "_");

    match normalized.as_str() {
        "BUY" | "LONG" | "BULLISH" => Some(Stance::Buy),
        "SELL" | "SHORT" | "BEARISH" => Some(Stance::Sell),
        "ABSTAIN" | "HOLD" | "PASS" | "NEUTRAL" | "NO_TRADE" | "SKIP" => Some(Stance::Abstain),
        _ => None,
    }
}

fn parse_confidence(value: &Value) -> Result<Decimal, AgentError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(AgentError::Parse(format!(
                "confidence must be a number, got {other}"
            )))
        }
    };

    let confidence = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| AgentError::Parse(format!("invalid confidence {text:?}: {e}")))?;

    if confidence < Decimal::ZERO || confidence > Decimal::ONE {
        return Err(AgentError::Parse(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }
    Ok(confidence)
}

/// Parse an agent's raw reply into a structured response.
///
/// Requires `stance` and `confidence`; `rationale` (or `reasoning`) is optional.
pub fn parse_agent_response(raw: &str) -> Result<AgentResponse, AgentError> {
    let json = extract_json(raw)?;

    let stance_text = json
        .get("stance")
        .or_else(|| json.get("vote"))
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Parse("missing stance".to_string()))?;
    let stance = parse_stance(stance_text)
        .ok_or_else(|| AgentError::Parse(format!("unrecognized stance {stance_text:?}")))?;

    let confidence = json
        .get("confidence")
        .ok_or_else(|| AgentError::Parse("missing confidence".to_string()))
        .and_then(parse_confidence)?;

    let rationale = json
        .get("rationale")
        .or_else(|| json.get("reasoning"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(AgentResponse {
        stance,
        confidence,
        rationale,
    })
}
