//! Query translation for the external engine RPC
//!
//! JSON over loopback HTTP. The request carries a compiled query string
//! plus an option bag; the response is mapped field-by-field onto the
//! core's grep result shape. Line fields arrive as base64 bytes.

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use serde_json::{json, Value};
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Options forwarded with a search RPC.
#[derive(Debug, Clone)]
pub struct EngineSearchOpts {
    pub case_sensitive: bool,
    /// Language narrows matches to its file extensions.
    pub extension_regex: Option<String>,
    /// Project narrows matches to a path prefix (mirror-relative).
    pub path_prefix: Option<String>,
    pub max_results: usize,
    pub context_lines: u32,
}

/// One match as reported by the engine, paths relative to the mirror
/// root. The grep layer rebases and enriches these.
#[derive(Debug, Clone)]
pub struct EngineMatch {
    pub file: String,
    pub line: u32,
    pub text: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// Liveness probe against the engine web server.
pub fn probe_health(port: u16) -> bool {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(2))
        .build();
    agent
        .get(&format!("http://127.0.0.1:{}/healthz", port))
        .call()
        .map(|resp| resp.status() == 200)
        .unwrap_or(false)
}

/// Compile the query string: pattern (wrapped as regex when it carries
/// metacharacters), case flag, extension and path-prefix constraints.
pub fn compile_query(pattern: &str, opts: &EngineSearchOpts) -> String {
    let mut query = String::new();

    if has_regex_metachars(pattern) {
        query.push_str("regex:");
        query.push_str(pattern);
    } else {
        query.push_str(pattern);
    }

    query.push_str(if opts.case_sensitive {
        " case:yes"
    } else {
        " case:no"
    });

    if let Some(ref ext) = opts.extension_regex {
        query.push_str(" f:");
        query.push_str(ext);
    }
    if let Some(ref prefix) = opts.path_prefix {
        query.push_str(" f:^");
        query.push_str(&regex_escape(prefix));
    }

    query
}

fn has_regex_metachars(pattern: &str) -> bool {
    pattern
        .chars()
        .any(|c| matches!(c, '.' | '*' | '+' | '?' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '\\'))
}

fn regex_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '.' | '*' | '+' | '?' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Run a search RPC against the engine web server. Blocking; callers run
/// this on a blocking task.
pub fn search(port: u16, pattern: &str, opts: &EngineSearchOpts) -> Result<Vec<EngineMatch>> {
    let body = json!({
        "Q": compile_query(pattern, opts),
        "Opts": {
            "MaxDocDisplayCount": opts.max_results,
            "NumContextLines": opts.context_lines,
            "TotalMaxMatchCount": opts.max_results,
        }
    });

    let agent = ureq::AgentBuilder::new().timeout(RPC_TIMEOUT).build();
    let response = agent
        .post(&format!("http://127.0.0.1:{}/api/search", port))
        .set("Content-Type", "application/json")
        .send_string(&body.to_string())
        .map_err(|e| anyhow!("engine RPC failed: {}", e))?;

    let payload: Value = response
        .into_json()
        .context("engine returned invalid JSON")?;
    map_response(&payload)
}

/// Map the engine response onto [`EngineMatch`]es. Serialized byte fields
/// (match and context lines) are base64.
pub fn map_response(payload: &Value) -> Result<Vec<EngineMatch>> {
    let files = payload
        .pointer("/Result/Files")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::new();
    for file in &files {
        let name = file
            .get("FileName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let line_matches = file
            .get("LineMatches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for m in &line_matches {
            let line = m.get("LineNumber").and_then(Value::as_u64).unwrap_or(0) as u32;
            let text = decode_bytes_field(m.get("Line"));
            let before = decode_bytes_list(m.get("Before"));
            let after = decode_bytes_list(m.get("After"));
            out.push(EngineMatch {
                file: name.clone(),
                line,
                text,
                before,
                after,
            });
        }
    }
    Ok(out)
}

/// Base64-decode a serialized byte field; plain strings pass through
/// unchanged when they do not decode as base64.
fn decode_bytes_field(value: Option<&Value>) -> String {
    let Some(raw) = value.and_then(Value::as_str) else {
        return String::new();
    };
    match base64::engine::general_purpose::STANDARD.decode(raw) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim_end_matches('\n').to_string(),
        Err(_) => raw.to_string(),
    }
}

fn decode_bytes_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(|v| decode_bytes_field(Some(v))).collect())
        .unwrap_or_default()
}
