use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Suspicious content classes surfaced as non-blocking warnings.
/// Non-exclusive: one message can match several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    CreditCard,
    Ssn,
    MultiEmail,
    Url,
    FinancialScam,
    Phishing,
}

// Compile regexes once at startup
static CREDIT_CARD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap());

static SSN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

// Matches URLs both raw and after the sanitizer has entity-encoded slashes.
static URL_PRESENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?:(?:&#x2F;&#x2F;|//)[^\s<]+|\bwww\.[^\s<]+").unwrap()
});

static FINANCIAL_SCAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(wire transfer|western union|moneygram|send (?:me )?money|processing fee|advance fee|lottery winner|unclaimed inheritance|guaranteed returns?|double your money|make money fast|easy cash|investment opportunity)",
    )
    .unwrap()
});

static PHISHING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(verify your account|account (?:has been )?suspended|confirm your (?:password|identity|account|booking details)|urgent action required|click (?:here|below) immediately|unusual activity|your account will be (?:closed|locked)|update your payment)",
    )
    .unwrap()
});

fn has_multiple_emails(text: &str) -> bool {
    let distinct: HashSet<&str> = EMAIL_REGEX.find_iter(text).map(|m| m.as_str()).collect();
    distinct.len() >= 2
}

/// One detector: an id plus a matcher over the final sanitized text.
pub struct SuspiciousPattern {
    pub id: PatternId,
    pub matches: fn(&str) -> bool,
}

/// Declarative detector table. New patterns are additive; each matcher is
/// independently testable.
pub static SUSPICIOUS_PATTERNS: &[SuspiciousPattern] = &[
    SuspiciousPattern {
        id: PatternId::CreditCard,
        matches: |text| CREDIT_CARD_REGEX.is_match(text),
    },
    SuspiciousPattern {
        id: PatternId::Ssn,
        matches: |text| SSN_REGEX.is_match(text),
    },
    SuspiciousPattern {
        id: PatternId::MultiEmail,
        matches: has_multiple_emails,
    },
    SuspiciousPattern {
        id: PatternId::Url,
        matches: |text| URL_PRESENCE_REGEX.is_match(text),
    },
    SuspiciousPattern {
        id: PatternId::FinancialScam,
        matches: |text| FINANCIAL_SCAM_REGEX.is_match(text),
    },
    SuspiciousPattern {
        id: PatternId::Phishing,
        matches: |text| PHISHING_REGEX.is_match(text),
    },
];

/// Scan text against every detector, collecting all matching ids.
pub fn scan_suspicious(text: &str) -> Vec<PatternId> {
    SUSPICIOUS_PATTERNS
        .iter()
        .filter(|p| (p.matches)(text))
        .map(|p| p.id)
        .collect()
}

/// Known URL-shortener / redirector domains. Links through these hide
/// their destination, so they are replaced outright.
pub static SHORTENER_DOMAINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "bit.ly",
        "tinyurl.com",
        "t.me",
        "telegram.me",
        "goo.gl",
        "ow.ly",
        "rebrand.ly",
        "j.mp",
        "adf.ly",
        "is.gd",
        "buff.ly",
    ]
    .into_iter()
    .collect()
});

pub fn is_blocked_host(host: &str) -> bool {
    let host = host.to_lowercase();
    SHORTENER_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

// --- Script / markup shapes removed defensively and rejected in strict
// --- field validation

pub static SCRIPT_BLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<script\b[^>]*>").unwrap());

pub static EVENT_HANDLER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bon[a-z]+\s*="#).unwrap());

pub static JS_URI_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)javascript\s*:").unwrap());

pub static IFRAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<iframe\b").unwrap());

// --- SQL injection shapes for strict field validation

pub static SQL_STATEMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(select\s+[\w\*,\s]+\s+from|insert\s+into|update\s+\w+\s+set|delete\s+from|drop\s+(table|database)|create\s+(table|database)|alter\s+table|exec(ute)?\s+\w|union\s+(all\s+)?select)\b",
    )
    .unwrap()
});

pub static SQL_BOOLEAN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)('\s*or\s*'?\d+'?\s*=\s*'?\d+|"\s*or\s*"?\d+"?\s*=\s*"?\d+|\bor\s+\d+\s*=\s*\d+\b)"#).unwrap()
});

/// Default profanity word list; extended at startup from configuration.
/// Matching is case-insensitive substring.
pub static DEFAULT_PROFANITY: &[&str] = &[
    "damn", "hell", "crap", "ass", "bitch", "bastard", "piss", "fuck", "shit", "asshole", "dick",
    "whore", "slut", "cunt",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_card_digit_groups() {
        assert!((SUSPICIOUS_PATTERNS[0].matches)("4111 1111 1111 1111"));
        assert!((SUSPICIOUS_PATTERNS[0].matches)("4111111111111111"));
        assert!(!(SUSPICIOUS_PATTERNS[0].matches)("call me at 555-1234"));
    }

    #[test]
    fn test_ssn_shape() {
        assert!(scan_suspicious("my ssn is 123-45-6789").contains(&PatternId::Ssn));
        assert!(!scan_suspicious("ref 1234-56-789").contains(&PatternId::Ssn));
    }

    #[test]
    fn test_multi_email_requires_two_distinct() {
        assert!(has_multiple_emails("a@example.com and b@example.com"));
        assert!(!has_multiple_emails("a@example.com a@example.com"));
        assert!(!has_multiple_emails("just a@example.com"));
    }

    #[test]
    fn test_url_presence_matches_encoded_form() {
        assert!(scan_suspicious("see https://example.com/page").contains(&PatternId::Url));
        assert!(scan_suspicious("see https:&#x2F;&#x2F;example.com").contains(&PatternId::Url));
        assert!(!scan_suspicious("no links here").contains(&PatternId::Url));
    }

    #[test]
    fn test_scam_and_phishing_keywords() {
        let ids = scan_suspicious("URGENT ACTION REQUIRED: wire transfer the processing fee now");
        assert!(ids.contains(&PatternId::FinancialScam));
        assert!(ids.contains(&PatternId::Phishing));
    }

    #[test]
    fn test_blocked_hosts_include_subdomains() {
        assert!(is_blocked_host("bit.ly"));
        assert!(is_blocked_host("www.bit.ly"));
        assert!(!is_blocked_host("notbit.ly.example.com"));
        assert!(!is_blocked_host("example.com"));
    }

    #[test]
    fn test_sql_shapes() {
        assert!(SQL_STATEMENT_REGEX.is_match("SELECT * FROM users"));
        assert!(SQL_STATEMENT_REGEX.is_match("1; DROP TABLE bookings"));
        assert!(SQL_BOOLEAN_REGEX.is_match("' OR '1'='1"));
        assert!(SQL_BOOLEAN_REGEX.is_match("admin OR 1=1"));
        assert!(!SQL_STATEMENT_REGEX.is_match("please delete my old booking"));
    }
}
