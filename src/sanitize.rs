//! Policy sanitizer for scraped free text.
//!
//! Every match of an ordered pattern set is stripped and recorded as a
//! violation. Sanitizing never fails; it only decides which text survives.
//! Passes repeat until a pass finds nothing, so running the sanitizer over
//! its own output reports no violations.

use crate::models::ProductRecord;
use crate::text::{TITLE_LIMIT, truncate_at_word};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const MAX_PASSES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Script,
    Email,
    Url,
    Phone,
    SocialMedia,
    OffPlatform,
    Competitor,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Script => "script",
            ViolationKind::Email => "email",
            ViolationKind::Url => "url",
            ViolationKind::Phone => "phone",
            ViolationKind::SocialMedia => "social_media",
            ViolationKind::OffPlatform => "off_platform",
            ViolationKind::Competitor => "competitor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub matched: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Sanitized {
    pub cleaned: String,
    pub violations: Vec<Violation>,
}

impl Sanitized {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

// Order matters: markup and emails go before URLs so a mailbox domain is not
// reported as a bare link. Every pattern matches at least two characters.
static PATTERNS: Lazy<Vec<(ViolationKind, Regex)>> = Lazy::new(|| {
    let raw: &[(ViolationKind, &str)] = &[
        (ViolationKind::Script, r"(?is)<script\b[^>]*>.*?</script\s*>"),
        (ViolationKind::Script, r"(?is)<style\b[^>]*>.*?</style\s*>"),
        (ViolationKind::Script, r"(?is)</?(?:script|iframe|object|embed)\b[^>]*>"),
        (ViolationKind::Script, r"(?i)javascript\s*:"),
        (
            ViolationKind::Script,
            r#"(?i)\bon(?:click|load|error|mouseover|focus|submit)\s*=\s*(?:"[^"]*"|'[^']*'|\S+)"#,
        ),
        (
            ViolationKind::Email,
            r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b",
        ),
        (ViolationKind::Url, r#"(?i)\b(?:https?://|www\.)[^\s<>"']+"#),
        (
            ViolationKind::Url,
            r#"(?i)\b[a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.(?:com|net|org|io|co|us|uk|shop|store|biz|info|ly)\b(?:/[^\s<>"']*)?"#,
        ),
        (
            ViolationKind::Phone,
            r"(?:\+?1[\s.-]?)?(?:\(\d{3}\)\s?|\b\d{3}[.-])\d{3}[.-]\d{4}\b",
        ),
        (
            ViolationKind::SocialMedia,
            r"(?i)\b(?:follow|find|like|join|message|dm|add|contact)\s+(?:us|me)\s+on\s+(?:facebook|instagram|twitter|tiktok|whatsapp|telegram|snapchat|wechat|pinterest|youtube)\b",
        ),
        (
            ViolationKind::SocialMedia,
            r"(?i)\b(?:whatsapp|telegram|wechat|signal)\s+(?:me|us)\b",
        ),
        (ViolationKind::SocialMedia, r"\B@[A-Za-z0-9_]{2,}"),
        (
            ViolationKind::OffPlatform,
            r"(?i)\b(?:pay|payment)\s+(?:via|through|with|by)\s+(?:paypal|venmo|zelle|cash\s?app|wire\s+transfer|western\s+union|bank\s+transfer)\b",
        ),
        (
            ViolationKind::OffPlatform,
            r"(?i)\b(?:contact|email|call|text)\s+(?:us|me)\s+(?:directly|for\s+(?:a\s+)?(?:discount|deal|better\s+price))\b",
        ),
        (ViolationKind::OffPlatform, r"(?i)\boutside\s+(?:of\s+)?ebay\b"),
        (
            ViolationKind::OffPlatform,
            r"(?i)\b(?:buy|order|purchase)\s+(?:directly\s+)?(?:from\s+)?(?:our|my)\s+(?:website|site|web\s?store|online\s+store)\b",
        ),
        (
            ViolationKind::Competitor,
            r"(?i)\b(?:amazon(?:'s)?(?:\s+(?:choice|prime|exclusive))?|walmart|aliexpress|alibaba|etsy|temu|shein|best\s?buy|newegg)\b",
        ),
    ];
    raw.iter()
        .map(|(kind, pattern)| (*kind, Regex::new(pattern).expect("valid sanitizer pattern")))
        .collect()
});

pub fn sanitize(text: &str) -> Sanitized {
    let mut cleaned = normalize_whitespace(text);
    let mut violations = Vec::new();
    for _ in 0..MAX_PASSES {
        let mut found = false;
        for (kind, pattern) in PATTERNS.iter() {
            if !pattern.is_match(&cleaned) {
                continue;
            }
            found = true;
            violations.extend(pattern.find_iter(&cleaned).map(|m| Violation {
                kind: *kind,
                matched: m.as_str().to_string(),
            }));
            cleaned = pattern.replace_all(&cleaned, " ").into_owned();
        }
        cleaned = normalize_whitespace(&cleaned);
        if !found {
            break;
        }
    }
    Sanitized {
        cleaned,
        violations,
    }
}

/// Title variant: also drops angle brackets and enforces the title limit.
///
/// The rules run again once the brackets are gone, since removing them can
/// join fragments into a new match.
pub fn sanitize_title(title: &str) -> Sanitized {
    let mut out = sanitize(title);
    let stripped: String = out.cleaned.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    let rejoined = sanitize(&stripped);
    out.violations.extend(rejoined.violations);
    out.cleaned = truncate_at_word(&rejoined.cleaned.replace('\n', " "), TITLE_LIMIT);
    out
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SanitizedProduct {
    pub title: String,
    pub description: String,
    pub bullet_points: Vec<String>,
    pub specifications: BTreeMap<String, String>,
    pub violations: Vec<Violation>,
}

impl SanitizedProduct {
    pub fn violation_counts(&self) -> HashMap<ViolationKind, usize> {
        let mut counts = HashMap::new();
        for violation in &self.violations {
            *counts.entry(violation.kind).or_insert(0) += 1;
        }
        counts
    }
}

pub fn sanitize_product(record: &ProductRecord) -> SanitizedProduct {
    let mut violations = Vec::new();
    let mut take = |result: Sanitized| {
        violations.extend(result.violations);
        result.cleaned
    };

    let title = take(sanitize_title(&record.title));
    let description = take(sanitize(&record.description));
    let bullet_points = record
        .bullet_points
        .iter()
        .map(|bullet| take(sanitize(bullet)))
        .filter(|bullet| !bullet.is_empty())
        .collect();
    let specifications = record
        .specifications
        .iter()
        .map(|(key, value)| (take(sanitize(key)), take(sanitize(value))))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect();

    SanitizedProduct {
        title,
        description,
        bullet_points,
        specifications,
        violations,
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
