//! Course-name canonicalisation used as a grouping key.

use std::sync::LazyLock;

use regex::Regex;

static PARITY_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*(?:odd|even)\s*(?:group|cohort)?\s*\)|\(\s*(?:홀수|짝수)\s*반?\s*\)")
        .expect("valid parity group regex")
});

static SUB_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\s*\d+\s*/\s*\d+\s*(?:group|team|반|조)\s*\)?")
        .expect("valid sub-group regex")
});

static ROUND_DAY_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+\s*(?:st|nd|rd|th|일차|차|회차|day))\s*[-_]\s*\d+\b")
        .expect("valid round-day suffix regex")
});

static HYPHEN_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("valid hyphen regex"));

static WHITESPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Strips cohort parity markers, `N/M group` tags and numeric group suffixes
/// on round-day tokens, then collapses separators.
///
/// Returns `None` for missing or blank names. The result is a fixpoint of the
/// pass, so `normalize_course_name(normalize_course_name(x)) ==
/// normalize_course_name(x)` holds for every input.
pub fn normalize_course_name(name: Option<&str>) -> Option<String> {
    let mut current = name?.trim().to_string();
    loop {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    (!current.is_empty()).then_some(current)
}

fn normalize_pass(input: &str) -> String {
    let text = PARITY_GROUP_RE.replace_all(input, " ");
    let text = SUB_GROUP_RE.replace_all(&text, " ");
    let text = ROUND_DAY_SUFFIX_RE.replace_all(&text, "$1");
    let text = HYPHEN_RUN_RE.replace_all(&text, "-");
    let text = WHITESPACE_RUN_RE.replace_all(&text, " ");
    text.trim_matches(|c: char| c.is_whitespace() || c == '-')
        .to_string()
}
