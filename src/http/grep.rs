//! Streaming grep
//!
//! Candidate files come from the trigram posting lists (per alternation
//! branch, unioned); the scan itself runs on a dedicated blocking worker
//! with its own read-only connection. The request carries a hard budget:
//! on expiry the endpoint returns 200 with `timedOut: true` and whatever
//! was found. Client disconnect flips an abort flag the worker checks
//! between files.
//!
//! When the external engine is healthy the scan is delegated to it; any
//! engine failure falls back to the internal path transparently, and the
//! response names the engine that served it.

use super::{Params, SharedState};
use crate::engine::query::{EngineMatch, EngineSearchOpts};
use crate::error::ServiceError;
use crate::store::{files, postings, IndexStore, Language};
use crate::trigram;
use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_GREP_TIMEOUT_MS: i64 = 30_000;
const DEFAULT_GREP_MAX_RESULTS: usize = 100;
const GREP_MAX_RESULTS_CAP: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct GrepMatch {
    pub file: String,
    pub project: String,
    pub language: Language,
    pub line: u32,
    #[serde(rename = "match")]
    pub matched: String,
    pub context: Vec<String>,
}

#[derive(Debug, Default)]
struct ScanOutcome {
    matches: Vec<GrepMatch>,
    total_matches: usize,
    truncated: bool,
    timed_out: bool,
    files_searched: usize,
}

/// Sets the abort flag when the request future is dropped (client
/// disconnect); the worker checks it between files.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub async fn grep(
    State(state): State<SharedState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ServiceError> {
    let params = Params(raw);
    let snapshot = state.memory.snapshot();
    if let Some(loading) = super::handlers::loading_response(&snapshot) {
        return Ok(loading);
    }

    let pattern = params.required("pattern")?.to_string();
    let case_sensitive = params.boolean("caseSensitive", true)?;
    let project = params.project(&state)?;
    let language = params.language()?;
    let max_results = params.limit("maxResults", DEFAULT_GREP_MAX_RESULTS, GREP_MAX_RESULTS_CAP)?;
    let context_lines = params.integer("contextLines", 0)?.clamp(0, 20) as u32;
    let timeout_ms = params
        .integer("timeoutMs", DEFAULT_GREP_TIMEOUT_MS)?
        .clamp(100, 120_000) as u64;

    // Invalid regex is a 400 with the engine's message
    let regex = regex::RegexBuilder::new(&pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| ServiceError::BadRequest(format!("invalid regex: {}", e)))?;

    let started = Instant::now();

    if state.engine.is_enabled() && state.engine.is_healthy() {
        match engine_grep(
            &state,
            &pattern,
            case_sensitive,
            project.as_deref(),
            language,
            max_results,
            context_lines,
        )
        .await
        {
            Ok(results) => {
                let total = results.len();
                return Ok(Json(json!({
                    "results": results,
                    "totalMatches": total,
                    "truncated": total >= max_results,
                    "timedOut": false,
                    "filesSearched": Value::Null,
                    "searchEngine": "zoekt",
                    "durationMs": started.elapsed().as_millis() as u64,
                })));
            }
            Err(e) => {
                warn!("Engine grep failed, falling back to internal scan: {}", e);
            }
        }
    }

    let abort = Arc::new(AtomicBool::new(false));
    let _abort_guard = AbortOnDrop(abort.clone());

    let db_path = state.db_path.clone();
    let worker_abort = abort.clone();
    let deadline = started + Duration::from_millis(timeout_ms);
    let project_clone = project.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        scan_worker(
            db_path,
            regex,
            pattern,
            project_clone,
            language,
            max_results,
            context_lines,
            deadline,
            worker_abort,
        )
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("grep worker failed: {}", e)))?
    .map_err(ServiceError::from_anyhow)?;

    Ok(Json(json!({
        "results": outcome.matches,
        "totalMatches": outcome.total_matches,
        "truncated": outcome.truncated,
        "timedOut": outcome.timed_out,
        "filesSearched": outcome.files_searched,
        "searchEngine": "internal",
        "durationMs": started.elapsed().as_millis() as u64,
    })))
}

/// Delegate to the external engine and rebase its mirror-relative paths
/// back onto indexed paths.
async fn engine_grep(
    state: &SharedState,
    pattern: &str,
    case_sensitive: bool,
    project: Option<&str>,
    language: Option<Language>,
    max_results: usize,
    context_lines: u32,
) -> anyhow::Result<Vec<GrepMatch>> {
    // A project constraint translates to a mirror-relative path prefix
    let path_prefix = project.and_then(|project| {
        let snapshot = state.memory.snapshot();
        let lcp = crate::utils::paths::longest_common_prefix(
            snapshot
                .files
                .entries
                .values()
                .filter(|f| f.project == project)
                .map(|f| f.path.as_str()),
        );
        if lcp.is_empty() {
            None
        } else {
            let mirror_prefix = state.mirror.path_prefix();
            Some(crate::utils::paths::strip_path_prefix(&lcp, &mirror_prefix).to_string())
        }
    });

    let opts = EngineSearchOpts {
        case_sensitive,
        extension_regex: language.map(extension_regex),
        path_prefix,
        max_results,
        context_lines,
    };
    let port = state.engine.web_port();
    let pattern = pattern.to_string();
    let raw: Vec<EngineMatch> =
        tokio::task::spawn_blocking(move || crate::engine::query::search(port, &pattern, &opts))
            .await??;

    let prefix = state.mirror.path_prefix();
    let snapshot = state.memory.snapshot();
    let mut out = Vec::new();
    for m in raw {
        let absolute = format!("{}{}", prefix, m.file);
        let Some(file_id) = snapshot.files.by_path.get(&absolute) else {
            continue;
        };
        let Some(file) = snapshot.files.entries.get(file_id) else {
            continue;
        };
        if let Some(project) = project {
            if file.project != project {
                continue;
            }
        }
        if let Some(language) = language {
            if file.language != language {
                continue;
            }
        }
        let mut context = m.before;
        context.push(m.text.clone());
        context.extend(m.after);
        out.push(GrepMatch {
            file: file.path.clone(),
            project: file.project.clone(),
            language: file.language,
            line: m.line,
            matched: m.text,
            context,
        });
        if out.len() >= max_results {
            break;
        }
    }
    Ok(out)
}

fn extension_regex(language: Language) -> String {
    match language {
        Language::Angelscript => r"\.as$".to_string(),
        Language::Cpp => r"\.(h|hpp|hxx|cpp|cc|cxx|inl)$".to_string(),
        Language::Config => r"\.(ini|cfg)$".to_string(),
        Language::Content => r"\.(uasset|umap)$".to_string(),
    }
}

/// The internal scan. Runs on its own blocking worker with a private
/// read-only connection; grep reflects store state at worker start.
#[allow(clippy::too_many_arguments)]
fn scan_worker(
    db_path: std::path::PathBuf,
    regex: regex::Regex,
    pattern: String,
    project: Option<String>,
    language: Option<Language>,
    max_results: usize,
    context_lines: u32,
    deadline: Instant,
    abort: Arc<AtomicBool>,
) -> anyhow::Result<ScanOutcome> {
    let conn = IndexStore::open_read_only(&db_path)?;

    let candidates = select_candidates(&conn, &pattern, project.as_deref(), language)?;
    debug!("Grep scanning {} candidate files", candidates.len());

    let mut outcome = ScanOutcome::default();
    for file in &candidates {
        if abort.load(Ordering::Relaxed) {
            debug!("Grep aborted by client after {} files", outcome.files_searched);
            break;
        }
        if Instant::now() >= deadline {
            outcome.timed_out = true;
            break;
        }

        let Some(content) = files::read_file_content(&conn, file.id)? else {
            continue;
        };
        outcome.files_searched += 1;

        let lines: Vec<&str> = content.lines().collect();
        for (index, line_text) in lines.iter().enumerate() {
            if !regex.is_match(line_text) {
                continue;
            }
            outcome.total_matches += 1;
            if outcome.matches.len() >= max_results {
                outcome.truncated = true;
                continue;
            }

            let line_number = index as u32 + 1;
            let context = if context_lines > 0 {
                let start = index.saturating_sub(context_lines as usize);
                let end = (index + context_lines as usize + 1).min(lines.len());
                lines[start..end].iter().map(|l| l.to_string()).collect()
            } else {
                Vec::new()
            };
            outcome.matches.push(GrepMatch {
                file: file.path.clone(),
                project: file.project.clone(),
                language: file.language,
                line: line_number,
                matched: line_text.to_string(),
                context,
            });
        }
    }

    Ok(outcome)
}

/// Candidate selection: per-branch required trigrams, each branch
/// intersected against the posting lists, results unioned. A file
/// matching the pattern matches some branch and carries that branch's
/// trigrams, so the union is sound. Unindexable patterns scan everything.
fn select_candidates(
    conn: &rusqlite::Connection,
    pattern: &str,
    project: Option<&str>,
    language: Option<Language>,
) -> anyhow::Result<Vec<crate::store::FileRecord>> {
    let all = || files::read_all_files(conn, project, language);

    let Some(branches) = trigram::pattern_branch_trigrams(pattern, true) else {
        return all();
    };

    let mut ids: std::collections::BTreeSet<i64> = std::collections::BTreeSet::new();
    for branch in &branches {
        for id in postings::get_trigram_candidates(conn, branch, project, language)? {
            ids.insert(id);
        }
    }

    let everything = all()?;
    Ok(everything
        .into_iter()
        .filter(|f| ids.contains(&f.id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded(dir: &TempDir) -> std::path::PathBuf {
        let db_path = dir.path().join("test.db");
        let store = IndexStore::open(&db_path).unwrap();
        store
            .upsert_file(
                "/p/Timer.cpp",
                "Timer.cpp",
                "MyGame",
                Language::Cpp,
                "MyGame",
                1,
                Some("void SetTimer();\nFTimerHandle Handle;\nint x;\n"),
                &[],
                &[],
            )
            .unwrap();
        store
            .upsert_file(
                "/p/Actor.cpp",
                "Actor.cpp",
                "MyGame",
                Language::Cpp,
                "MyGame",
                1,
                Some("void DestroyActor();\nvoid Unrelated();\n"),
                &[],
                &[],
            )
            .unwrap();
        store
            .upsert_file(
                "/p/Other.as",
                "Other.as",
                "MyGame",
                Language::Angelscript,
                "MyGame",
                1,
                Some("class NothingHere {}\n"),
                &[],
                &[],
            )
            .unwrap();
        db_path
    }

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn alternation_scans_only_branch_candidates() {
        let dir = TempDir::new().unwrap();
        let db_path = seeded(&dir);
        let regex = regex::Regex::new("DestroyActor|FTimerHandle").unwrap();

        let outcome = scan_worker(
            db_path,
            regex,
            "DestroyActor|FTimerHandle".to_string(),
            None,
            None,
            100,
            0,
            far_future(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        // Candidate selection skipped the file with neither identifier
        assert_eq!(outcome.files_searched, 2);
        assert_eq!(outcome.total_matches, 2);
        assert!(!outcome.timed_out);
        assert!(!outcome.truncated);
    }

    #[test]
    fn context_lines_wrap_the_match() {
        let dir = TempDir::new().unwrap();
        let db_path = seeded(&dir);
        let regex = regex::Regex::new("FTimerHandle").unwrap();

        let outcome = scan_worker(
            db_path,
            regex,
            "FTimerHandle".to_string(),
            None,
            None,
            100,
            1,
            far_future(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!(m.line, 2);
        assert_eq!(m.context.len(), 3);
        assert_eq!(m.context[1], "FTimerHandle Handle;");
    }

    #[test]
    fn max_results_truncates_but_keeps_counting() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = IndexStore::open(&db_path).unwrap();
        let body = "needle\n".repeat(10);
        store
            .upsert_file("/p/N.cpp", "N.cpp", "P", Language::Cpp, "P", 1, Some(&body), &[], &[])
            .unwrap();
        drop(store);

        let outcome = scan_worker(
            db_path,
            regex::Regex::new("needle").unwrap(),
            "needle".to_string(),
            None,
            None,
            3,
            0,
            far_future(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert_eq!(outcome.matches.len(), 3);
        assert_eq!(outcome.total_matches, 10);
        assert!(outcome.truncated);
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let dir = TempDir::new().unwrap();
        let db_path = seeded(&dir);
        let outcome = scan_worker(
            db_path,
            regex::Regex::new("SetTimer").unwrap(),
            "SetTimer".to_string(),
            None,
            None,
            100,
            0,
            Instant::now() - Duration::from_millis(1),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.files_searched, 0);
    }

    #[test]
    fn abort_flag_stops_the_scan() {
        let dir = TempDir::new().unwrap();
        let db_path = seeded(&dir);
        let outcome = scan_worker(
            db_path,
            regex::Regex::new("SetTimer").unwrap(),
            "SetTimer".to_string(),
            None,
            None,
            100,
            0,
            far_future(),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        assert_eq!(outcome.files_searched, 0);
        assert!(!outcome.timed_out);
    }

    #[test]
    fn language_filter_limits_candidates() {
        let dir = TempDir::new().unwrap();
        let db_path = seeded(&dir);
        let outcome = scan_worker(
            db_path,
            regex::Regex::new("class").unwrap(),
            "class".to_string(),
            None,
            Some(Language::Angelscript),
            100,
            0,
            far_future(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert_eq!(outcome.files_searched, 1);
        assert_eq!(outcome.matches.len(), 1);
        assert!(outcome.matches[0].file.ends_with(".as"));
    }
}
