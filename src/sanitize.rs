use regex::Regex;
use std::sync::OnceLock;

/// Replace disallowed path characters with "_" and collapse runs.
/// NUL bytes are stripped outright.
pub(crate) fn sanitize<S: AsRef<str>>(s: S) -> String {
    let s_nonull = s.as_ref().replace('\0', "");
    let replaced = VALID_CHARS_RE
        .get_or_init(|| Regex::new(r#"[^A-Za-z0-9\.\-]+"#).unwrap())
        .replace_all(&s_nonull, "_")
        .to_string();
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

static VALID_CHARS_RE: OnceLock<Regex> = OnceLock::new();
