use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const CARD_TOKEN: &str = "[REDACTED-CARD]";
pub const SSN_TOKEN: &str = "[REDACTED-SSN]";
pub const EMAIL_TOKEN: &str = "[REDACTED-EMAIL]";
pub const PHONE_TOKEN: &str = "[REDACTED-PHONE]";

static CARD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap());

static SSN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

// Country-code prefix is optional so plain 3-3-4 numbers redact too.
static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?\d{1,3}[-.\s])?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}|\+?\d{10,15}").unwrap()
});

/// Replace card/SSN/email/phone-shaped substrings with fixed placeholder
/// tokens. Card runs before phone: a card number also matches the looser
/// phone shape.
pub fn redact_text(text: &str) -> String {
    let text = CARD_REGEX.replace_all(text, CARD_TOKEN);
    let text = SSN_REGEX.replace_all(&text, SSN_TOKEN);
    let text = EMAIL_REGEX.replace_all(&text, EMAIL_TOKEN);
    PHONE_REGEX.replace_all(&text, PHONE_TOKEN).into_owned()
}

/// Redact strings at any nesting depth of maps and lists. Non-string
/// leaves pass through untouched.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
