//! Script identifier extraction and classification
//!
//! Apps Script identifiers are opaque tokens (25-70 chars of [A-Za-z0-9_-],
//! leading digit `1`) that READMEs mention in wildly inconsistent ways.
//! Extraction runs an ordered pattern list (most specific first) and accepts
//! the first candidate that survives the exclusion pass - pattern priority
//! wins over text position.

use once_cell::sync::Lazy;
use regex::Regex;

/// Deployment ids of standalone web apps start with this prefix
pub const WEBAPP_ID_PREFIX: &str = "AKfycb";

/// How a script identifier is consumed: pulled in as a library, or deployed
/// as a standalone web application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Library,
    WebApp,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Library => "library",
            ScriptType::WebApp => "web_app",
        }
    }
}

/// Outcome of classifying a README
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub script_type: ScriptType,
    pub script_id: String,
}

// === Identifier patterns, priority order ===

/// "Script ID:" / "Library key:" style labels
static LABELED_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:script|library|project)[ \t]*(?:id|key)[ \t]*[:：=][ \t]*[`"']?(1[A-Za-z0-9_-]{24,69})"#)
        .unwrap()
});

/// Japanese label variants (スクリプトID: ..., ライブラリキー: ...)
static LABELED_ID_JA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:スクリプト|ライブラリ|プロジェクト)[ \t]*(?:id|キー)[ \t]*[:：][ \t]*[`"']?(1[A-Za-z0-9_-]{24,69})"#)
        .unwrap()
});

/// Quoted or backticked ids
static QUOTED_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[`"'](1[A-Za-z0-9_-]{24,69})[`"']"#).unwrap());

/// A fenced code block whose only content is an id, directly below a
/// "project key" phrase. Common in READMEs that never label the id itself.
static PROJECT_KEY_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:project[ \t]*key|プロジェクト[ \t]*キー)[^\n]*\n+```[^\n]*\n[ \t]*(1[A-Za-z0-9_-]{24,69})[ \t]*\n```",
    )
    .unwrap()
});

/// script.google.com edit / exec URLs (any id shape, including deployment ids)
static SCRIPT_URL_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"script\.google\.com/(?:macros/(?:a/[^/\s]+/)?s/|macros/d/|d/)([A-Za-z0-9_-]{25,70})")
        .unwrap()
});

/// Lowest priority: any bare token with the id shape
static BARE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"1[A-Za-z0-9_-]{24,69}").unwrap());

static DEFAULT_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        LABELED_ID_RE.clone(),
        LABELED_ID_JA_RE.clone(),
        QUOTED_ID_RE.clone(),
        PROJECT_KEY_BLOCK_RE.clone(),
        SCRIPT_URL_ID_RE.clone(),
        BARE_ID_RE.clone(),
    ]
});

/// Default identifier patterns in priority order
pub fn default_id_patterns() -> &'static [Regex] {
    &DEFAULT_ID_PATTERNS
}

// === Exclusion pass ===
// Three shapes that naive matching keeps hitting in prose: commit-hash URLs,
// UUIDs and image filenames. A candidate overlapping any of them is rejected.

static COMMIT_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s)"'<>]+/commits?/[^\s)"'<>]+"#).unwrap()
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static IMAGE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://[^\s)"'<>]+\.(?:png|jpe?g|gif|svg|webp)"#).unwrap()
});

fn exclusion_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for re in [&*COMMIT_URL_RE, &*UUID_RE, &*IMAGE_URL_RE] {
        for m in re.find_iter(text) {
            spans.push((m.start(), m.end()));
        }
    }
    spans
}

fn overlaps(spans: &[(usize, usize)], start: usize, end: usize) -> bool {
    spans.iter().any(|&(s, e)| start < e && end > s)
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// A captured id must be a maximal token - reject captures glued to a longer
/// run of id characters (e.g. the tail of an overlong token).
fn has_token_boundaries(text: &str, start: usize, end: usize) -> bool {
    let before_ok = text[..start].chars().next_back().map_or(true, |c| !is_id_char(c));
    let after_ok = text[end..].chars().next().map_or(true, |c| !is_id_char(c));
    before_ok && after_ok
}

/// Extract a script identifier using the default pattern set
pub fn extract_script_id(text: &str) -> Option<String> {
    extract_script_id_with(text, default_id_patterns())
}

/// Extract a script identifier with a caller-supplied pattern list.
/// Patterns are evaluated in list order and the first candidate surviving
/// the exclusion pass wins - a labeled id beats a bare token even when the
/// bare token appears earlier in the document.
pub fn extract_script_id_with(text: &str, patterns: &[Regex]) -> Option<String> {
    let excluded = exclusion_spans(text);

    for re in patterns {
        for cap in re.captures_iter(text) {
            let m = match cap.get(1).or_else(|| cap.get(0)) {
                Some(m) => m,
                None => continue,
            };
            if !has_token_boundaries(text, m.start(), m.end()) {
                continue;
            }
            if overlaps(&excluded, m.start(), m.end()) {
                continue;
            }
            return Some(m.as_str().to_string());
        }
    }

    None
}

// === Web-app detection ===

/// Deployed web-app execution URL
static EXEC_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"script\.google\.com/macros/(?:a/[^/\s]+/)?s/([A-Za-z0-9_-]{10,})/exec").unwrap()
});

/// Apps Script source filenames mentioned in prose
static SOURCE_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[A-Za-z0-9_\-]+\.gs\b").unwrap());

static MANIFEST_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bappsscript\.json\b").unwrap());

static DEFAULT_SOURCE_FILE_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| vec![SOURCE_FILE_RE.clone(), MANIFEST_FILE_RE.clone()]);

/// Default companion source-file patterns (web-app evidence)
pub fn default_source_file_patterns() -> &'static [Regex] {
    &DEFAULT_SOURCE_FILE_PATTERNS
}

/// Markdown fence delimiters, line-anchored
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*```").unwrap());

/// Inline code spans (single backtick, single line)
static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());

/// Links whose target is ordinary project documentation
static DOC_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[[^\]\n]*\]\([^)\n]*(?:license|readme|changelog|contributing)[^)\n]*\)")
        .unwrap()
});

/// Spans where a filename mention is NOT evidence: fenced code examples,
/// inline shell commands and documentation link text.
fn evidence_exclusion_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();

    // Pair up fence delimiters; an unterminated fence runs to the end
    let mut open: Option<usize> = None;
    for m in FENCE_RE.find_iter(text) {
        match open.take() {
            None => open = Some(m.start()),
            Some(s) => spans.push((s, m.end())),
        }
    }
    if let Some(s) = open {
        spans.push((s, text.len()));
    }

    for re in [&*INLINE_CODE_RE, &*DOC_LINK_RE] {
        for m in re.find_iter(text) {
            spans.push((m.start(), m.end()));
        }
    }
    spans
}

/// Does the text mention companion Apps Script source files in prose?
pub fn has_source_file_evidence(text: &str) -> bool {
    has_source_file_evidence_with(text, default_source_file_patterns())
}

pub fn has_source_file_evidence_with(text: &str, patterns: &[Regex]) -> bool {
    let excluded = evidence_exclusion_spans(text);
    patterns
        .iter()
        .any(|re| re.find_iter(text).any(|m| !overlaps(&excluded, m.start(), m.end())))
}

/// First deployed-web-app id mentioned in an execution URL, if any
fn find_exec_id(text: &str) -> Option<String> {
    EXEC_URL_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Classify a README using the default pattern sets
pub fn classify(text: &str, owner: &str, repo: &str) -> Option<Classification> {
    classify_with(
        text,
        owner,
        repo,
        default_id_patterns(),
        default_source_file_patterns(),
    )
}

/// Classify a README as a library or web app and settle on its identifier.
///
/// Libraries are sometimes also exposed as demo web apps, so an execution
/// URL whose id has the library shape still classifies as a library. An
/// execution URL with a deployment-prefixed id only counts as a web app when
/// the text also shows companion source files; repositories with source-file
/// evidence but no identifier at all get a synthesized `{owner}/{repo}` id.
pub fn classify_with(
    text: &str,
    owner: &str,
    repo: &str,
    id_patterns: &[Regex],
    file_patterns: &[Regex],
) -> Option<Classification> {
    let extracted = extract_script_id_with(text, id_patterns);
    let evidence = has_source_file_evidence_with(text, file_patterns);

    if let Some(exec_id) = find_exec_id(text) {
        if exec_id.starts_with('1') {
            // demo deployment of a library script
            return Some(Classification {
                script_type: ScriptType::Library,
                script_id: extracted.unwrap_or(exec_id),
            });
        }
        if exec_id.starts_with(WEBAPP_ID_PREFIX) && evidence {
            return Some(Classification {
                script_type: ScriptType::WebApp,
                script_id: extracted.unwrap_or(exec_id),
            });
        }
        if let Some(id) = extracted {
            return Some(Classification {
                script_type: ScriptType::Library,
                script_id: id,
            });
        }
    } else if let Some(id) = extracted {
        return Some(Classification {
            script_type: ScriptType::Library,
            script_id: id,
        });
    }

    if evidence {
        return Some(Classification {
            script_type: ScriptType::WebApp,
            script_id: format!("{}/{}", owner, repo),
        });
    }

    None
}
