use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::patterns::{
    is_blocked_host, scan_suspicious, PatternId, DEFAULT_PROFANITY, EVENT_HANDLER_REGEX,
    IFRAME_REGEX, JS_URI_REGEX, SCRIPT_BLOCK_REGEX, SQL_BOOLEAN_REGEX, SQL_STATEMENT_REGEX,
};

pub const MAX_MESSAGE_LENGTH: usize = 2000;

pub const BLOCKED_URL_TOKEN: &str = "[BLOCKED URL]";
pub const INVALID_URL_TOKEN: &str = "[INVALID URL]";

/// Result of running a message through the sanitization pipeline.
/// When `rejected` is set, `cleaned` is unusable; callers must branch on
/// `rejected` first.
#[derive(Debug, Clone)]
pub struct SanitizationOutcome {
    pub cleaned: String,
    /// Non-blocking suspicious-pattern matches. Callers log these at
    /// Medium severity; they never fail the message.
    pub warnings: Vec<PatternId>,
    /// Non-blocking profanity flag, same handling as `warnings`.
    pub profanity: bool,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
}

impl SanitizationOutcome {
    fn accepted(cleaned: String, warnings: Vec<PatternId>, profanity: bool) -> Self {
        Self {
            cleaned,
            warnings,
            profanity,
            rejected: false,
            rejection_reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            cleaned: String::new(),
            warnings: Vec::new(),
            profanity: false,
            rejected: true,
            rejection_reason: Some(reason),
        }
    }
}

// URL candidates are scanned after slash encoding, so the regex is defined
// over the encoded alphabet.
static ENCODED_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z][a-z0-9+.\-]*):&#x2F;&#x2F;[^\s]*").unwrap());

/// Stateless message sanitization pipeline: length gate, markup stripping,
/// script removal, entity encoding, URL validation, pattern and profanity
/// scans. Pure - owns no storage, raises nothing; the only hard rejection
/// is the length gate.
#[derive(Clone)]
pub struct ContentSanitizer {
    profanity_words: Vec<String>,
}

impl ContentSanitizer {
    /// `extra_words` extends the built-in profanity list (configuration).
    pub fn new(extra_words: &[String]) -> Self {
        let mut profanity_words: Vec<String> =
            DEFAULT_PROFANITY.iter().map(|w| w.to_string()).collect();
        profanity_words.extend(extra_words.iter().map(|w| w.to_lowercase()));
        Self { profanity_words }
    }

    /// Run the full pipeline. Stages operate strictly on the previous
    /// stage's output.
    pub fn sanitize(&self, text: &str) -> SanitizationOutcome {
        // 1. Trivially accept empty input
        if text.trim().is_empty() {
            return SanitizationOutcome::accepted(String::new(), Vec::new(), false);
        }

        // 2. Hard length gate
        if text.chars().count() > MAX_MESSAGE_LENGTH {
            return SanitizationOutcome::rejected(format!(
                "Message too long (max {} characters)",
                MAX_MESSAGE_LENGTH
            ));
        }

        // 3. Strip all markup, keeping text content only
        let stripped = ammonia::Builder::empty().clean(text).to_string();

        // 4. Remove residual script-like constructs. Stage 3 should have
        //    handled these; parsers disagree often enough to scrub again.
        let descripted = strip_script_constructs(&stripped);

        // 5. Entity-encode reserved characters and forward slash
        let encoded = encode_reserved(&descripted);

        // 6. Validate URL substrings (over the encoded text)
        let url_checked = validate_urls(&encoded);

        // 7. Suspicious-pattern scan - non-blocking warnings
        let warnings = scan_suspicious(&url_checked);

        // 8. Profanity scan - non-blocking flag
        let profanity = self.contains_profanity(&url_checked);

        // 9. Trim
        SanitizationOutcome::accepted(url_checked.trim().to_string(), warnings, profanity)
    }

    fn contains_profanity(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.profanity_words.iter().any(|w| lower.contains(w.as_str()))
    }
}

fn strip_script_constructs(text: &str) -> String {
    let text = SCRIPT_BLOCK_REGEX.replace_all(text, "");
    let text = EVENT_HANDLER_REGEX.replace_all(&text, "");
    JS_URI_REGEX.replace_all(&text, "").into_owned()
}

fn encode_reserved(text: &str) -> String {
    // Ampersand first so later entities are not double-touched
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .replace('/', "&#x2F;")
}

fn decode_reserved(text: &str) -> String {
    text.replace("&#x2F;", "/")
        .replace("&#x27;", "'")
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

/// Replace disallowed URL substrings with fixed tokens. Non-http(s)
/// schemes and shortener hosts become `[BLOCKED URL]`; candidates without
/// a parsable host become `[INVALID URL]`; anything else survives.
fn validate_urls(text: &str) -> String {
    ENCODED_URL_REGEX
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let raw = decode_reserved(caps.get(0).map(|m| m.as_str()).unwrap_or_default());
            let scheme = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();

            if scheme != "http" && scheme != "https" {
                return BLOCKED_URL_TOKEN.to_string();
            }

            match host_of(&raw) {
                Some(host) if is_blocked_host(&host) => BLOCKED_URL_TOKEN.to_string(),
                Some(_) => caps.get(0).map(|m| m.as_str()).unwrap_or_default().to_string(),
                None => INVALID_URL_TOKEN.to_string(),
            }
        })
        .into_owned()
}

/// Extract the hostname of a decoded URL. Returns `None` when the host is
/// absent or contains characters no hostname may carry.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    // Strip optional userinfo and port
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.split(':').next().unwrap_or_default();

    if host.is_empty() || !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.') {
        return None;
    }
    Some(host.to_lowercase())
}

/// Strict boolean gate for structured fields (form inputs, query params).
/// Returns false on SQL-injection or XSS shapes at any nesting depth;
/// callers reject the whole request rather than attempt repair.
pub fn validate_user_input(value: &Value) -> bool {
    match value {
        Value::String(s) => validate_text(s),
        Value::Array(items) => items.iter().all(validate_user_input),
        Value::Object(map) => map
            .iter()
            .all(|(k, v)| validate_text(k) && validate_user_input(v)),
        _ => true,
    }
}

fn validate_text(text: &str) -> bool {
    !(SQL_STATEMENT_REGEX.is_match(text)
        || SQL_BOOLEAN_REGEX.is_match(text)
        || SCRIPT_BLOCK_REGEX.is_match(text)
        || EVENT_HANDLER_REGEX.is_match(text)
        || JS_URI_REGEX.is_match(text)
        || IFRAME_REGEX.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitizer() -> ContentSanitizer {
        ContentSanitizer::new(&[])
    }

    #[test]
    fn test_empty_input_is_accepted_empty() {
        let outcome = sanitizer().sanitize("   ");
        assert!(!outcome.rejected);
        assert_eq!(outcome.cleaned, "");
    }

    #[test]
    fn test_length_boundary() {
        let at_limit: String = "a".repeat(MAX_MESSAGE_LENGTH);
        let over_limit: String = "a".repeat(MAX_MESSAGE_LENGTH + 1);

        assert!(!sanitizer().sanitize(&at_limit).rejected);
        let rejected = sanitizer().sanitize(&over_limit);
        assert!(rejected.rejected);
        assert!(rejected.rejection_reason.unwrap().contains("too long"));
    }

    #[test]
    fn test_markup_is_stripped_to_text() {
        let outcome = sanitizer().sanitize("<b>room</b> with a <i>view</i>");
        assert_eq!(outcome.cleaned, "room with a view");
    }

    #[test]
    fn test_script_blocks_removed() {
        let outcome = sanitizer().sanitize("<script>alert(1)</script>safe text");
        assert!(!outcome.cleaned.contains("alert"));
        assert!(outcome.cleaned.contains("safe text"));
    }

    #[test]
    fn test_reserved_characters_encoded() {
        let outcome = sanitizer().sanitize("tom & jerry 'quoted'");
        assert!(outcome.cleaned.contains("&amp;"));
        assert!(outcome.cleaned.contains("&#x27;"));
    }

    #[test]
    fn test_idempotent_on_safe_input() {
        let input = "looking for a quiet double room near the old town";
        let once = sanitizer().sanitize(input);
        let twice = sanitizer().sanitize(&once.cleaned);
        assert_eq!(once.cleaned, twice.cleaned);
    }

    #[test]
    fn test_shortener_url_blocked() {
        let outcome = sanitizer().sanitize("visit http://bit.ly/x now");
        assert!(outcome.cleaned.contains(BLOCKED_URL_TOKEN));
        assert!(!outcome.cleaned.contains("bit.ly"));
        assert!(outcome.cleaned.starts_with("visit"));
        assert!(outcome.cleaned.ends_with("now"));
    }

    #[test]
    fn test_non_http_scheme_blocked() {
        let outcome = sanitizer().sanitize("grab it from ftp://files.example.com/pkg");
        assert!(outcome.cleaned.contains(BLOCKED_URL_TOKEN));
    }

    #[test]
    fn test_unparsable_url_invalid() {
        let outcome = sanitizer().sanitize("broken link http://%%%");
        assert!(outcome.cleaned.contains(INVALID_URL_TOKEN));
    }

    #[test]
    fn test_normal_url_survives_with_warning() {
        let outcome = sanitizer().sanitize("our site: https://example.com/page");
        assert!(!outcome.cleaned.contains(BLOCKED_URL_TOKEN));
        assert!(!outcome.cleaned.contains(INVALID_URL_TOKEN));
        assert!(outcome.warnings.contains(&PatternId::Url));
    }

    #[test]
    fn test_credit_card_and_ssn_warnings() {
        let outcome = sanitizer().sanitize("card 4111 1111 1111 1111 ssn 123-45-6789");
        assert!(outcome.warnings.contains(&PatternId::CreditCard));
        assert!(outcome.warnings.contains(&PatternId::Ssn));
        assert!(!outcome.rejected, "warnings never block");
    }

    #[test]
    fn test_multi_email_warning() {
        let outcome = sanitizer().sanitize("mail alice@example.com or bob@example.org");
        assert!(outcome.warnings.contains(&PatternId::MultiEmail));
    }

    #[test]
    fn test_profanity_flag_is_non_blocking() {
        let custom = ContentSanitizer::new(&["grommet".to_string()]);
        let outcome = custom.sanitize("what a grommet move");
        assert!(outcome.profanity);
        assert!(!outcome.rejected);

        let clean = custom.sanitize("what a great stay");
        assert!(!clean.profanity);
    }

    #[test]
    fn test_validate_user_input_rejects_sql() {
        assert!(!validate_user_input(&json!("1' OR '1'='1")));
        assert!(!validate_user_input(&json!("x; DROP TABLE bookings")));
        assert!(!validate_user_input(&json!("UNION SELECT password")));
    }

    #[test]
    fn test_validate_user_input_rejects_xss() {
        assert!(!validate_user_input(&json!("<script>alert(1)</script>")));
        assert!(!validate_user_input(&json!("<img onerror=steal()>")));
        assert!(!validate_user_input(&json!("javascript:void(0)")));
        assert!(!validate_user_input(&json!("<iframe src=x>")));
    }

    #[test]
    fn test_validate_user_input_recurses_and_accepts_normal_fields() {
        assert!(validate_user_input(&json!({
            "destination": "Lisbon",
            "guests": 2,
            "notes": ["late checkin", "sea view please"],
        })));
        assert!(!validate_user_input(&json!({
            "destination": { "city": "x' OR '1'='1" },
        })));
    }
}
