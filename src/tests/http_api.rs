// Endpoint tests over a live listener

use crate::tests::fixtures::{sample_batch, TestServer};
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_loaded_index() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["memoryIndex"]["loaded"], true);
    assert_eq!(body["searchEngine"], "internal");
}

#[tokio::test(flavor = "multi_thread")]
async fn status_lists_every_language() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/status").await;
    assert_eq!(status, 200);
    let statuses = body["statuses"].as_array().unwrap();
    assert_eq!(statuses.len(), 4);
    assert!(statuses.iter().all(|s| s["state"] == "unknown"));
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_and_summary_reflect_ingest() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (status, stats) = server.get("/stats").await;
    assert_eq!(status, 200);
    assert_eq!(stats["totalFiles"], 3);
    assert_eq!(stats["totalTypes"], 4);
    assert_eq!(stats["totalAssets"], 2);

    let (status, summary) = server.get("/summary").await;
    assert_eq!(status, 200);
    assert!(summary["lastBuild"].is_string());
    let projects = summary["projects"].as_array().unwrap();
    assert!(projects.iter().any(|p| p == "Engine"));
    assert!(projects.iter().any(|p| p == "MyGame"));
    assert_eq!(summary["watcher"]["stopRequested"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn find_type_requires_name() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/find-type").await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("name"));
}

// Context attachment around a declaration line.
#[tokio::test(flavor = "multi_thread")]
async fn find_type_context_window() {
    let server = TestServer::start().await;
    // One file with `class AActor` at line 42
    let mut lines: Vec<String> = (1..=80).map(|i| format!("// filler {}", i)).collect();
    lines[41] = "class AActor".to_string();
    server
        .ingest(json!({
            "files": [{
                "path": "C:/Game/Source/X.h",
                "relativePath": "Source/X.h",
                "project": "Engine",
                "language": "cpp",
                "content": lines.join("\n"),
                "mtime": 1,
                "types": [{ "name": "AActor", "kind": "class", "line": 42 }],
                "members": []
            }]
        }))
        .await;

    let (status, body) = server
        .get("/find-type?name=AActor&contextLines=5")
        .await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    let context = &results[0]["context"];
    assert_eq!(context["startLine"], 37);
    let count = context["lines"].as_array().unwrap().len();
    assert!((1..=11).contains(&count));

    // contextLines=0 attaches nothing
    let (_, body) = server.get("/find-type?name=AActor&contextLines=0").await;
    assert!(body["results"][0].get("context").is_none());
}

// includeSignatures reads the declaration line from stored content.
#[tokio::test(flavor = "multi_thread")]
async fn find_member_signatures() {
    let server = TestServer::start().await;
    let mut lines: Vec<String> = (1..=120).map(|i| format!("// filler {}", i)).collect();
    lines[99] = "void BeginPlay()".to_string();
    server
        .ingest(json!({
            "files": [{
                "path": "C:/Game/Source/A.cpp",
                "relativePath": "Source/A.cpp",
                "project": "Engine",
                "language": "cpp",
                "content": lines.join("\n"),
                "mtime": 1,
                "types": [],
                "members": [{
                    "ownerName": "AActor", "name": "BeginPlay",
                    "kind": "function", "line": 100
                }]
            }]
        }))
        .await;

    let (status, body) = server
        .get("/find-member?name=BeginPlay&includeSignatures=true")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["results"][0]["signature"], "void BeginPlay()");

    let (_, body) = server.get("/find-member?name=BeginPlay").await;
    assert!(body["results"][0].get("signature").is_none());
}

// Headers win over implementation files and carry their path along.
#[tokio::test(flavor = "multi_thread")]
async fn find_type_header_preference() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (status, body) = server.get("/find-type?name=AActor&language=cpp").await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["path"], "C:/Game/Source/Engine/Public/Actor.h");
    assert_eq!(
        results[0]["implementationPath"],
        "C:/Game/Source/Engine/Private/Actor.cpp"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn find_type_filters_by_project_and_rejects_unknown_kind() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (_, body) = server.get("/find-type?name=APawn&project=MyGame").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let (status, _) = server.get("/find-type?name=APawn&kind=flavor").await;
    assert_eq!(status, 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn find_children_direct_and_recursive() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (_, direct) = server.get("/find-children?name=AActor").await;
    let results = direct["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], "APawn");

    let (_, all) = server.get("/find-children?name=AActor&recursive=true").await;
    let names: Vec<&str> = all["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["APawn", "ACharacter"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn find_file_and_module_browsing() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (_, files) = server.get("/find-file?name=Actor.h").await;
    assert_eq!(files["results"][0]["file"], "C:/Game/Source/Engine/Public/Actor.h");

    let (_, browse) = server.get("/browse-module?module=Engine.Source.Engine").await;
    assert_eq!(browse["totalTypes"], 2);
    assert_eq!(browse["totalFiles"], 2);

    let (_, modules) = server.get("/list-modules?parent=Engine&depth=2").await;
    let listed = modules["modules"].as_array().unwrap();
    assert!(listed.iter().any(|m| m["path"] == "Engine.Source"));
}

#[tokio::test(flavor = "multi_thread")]
async fn asset_queries_default_to_fuzzy() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    // Default fuzzy: substring matches
    let (_, fuzzy) = server.get("/find-asset?name=rifle").await;
    assert_eq!(fuzzy["results"].as_array().unwrap().len(), 1);
    assert_eq!(fuzzy["results"][0]["name"], "Rifle_BP");

    // fuzzy=false requires the exact name
    let (_, exact) = server.get("/find-asset?name=rifle&fuzzy=false").await;
    assert!(exact["results"].as_array().unwrap().is_empty());

    let (_, browse) = server.get("/browse-assets?folder=/Game/Weapons&recursive=true").await;
    assert_eq!(browse["results"].as_array().unwrap().len(), 2);

    let (_, folders) = server.get("/list-asset-folders?parent=/Game").await;
    assert_eq!(folders["folders"][0]["folder"], "/Game/Weapons");

    let (_, stats) = server.get("/asset-stats").await;
    assert_eq!(stats["total"], 2);
}

// Each explain-type budget caps its own section independently.
#[tokio::test(flavor = "multi_thread")]
async fn explain_type_budgets() {
    let server = TestServer::start().await;
    let mut members = Vec::new();
    for i in 0..50 {
        members.push(json!({
            "ownerName": "UBigType", "name": format!("Func{:02}", i),
            "kind": "function", "line": 10 + i
        }));
        members.push(json!({
            "ownerName": "UBigType", "name": format!("Prop{:02}", i),
            "kind": "property", "line": 100 + i
        }));
    }
    server
        .ingest(json!({
            "files": [{
                "path": "C:/Game/Source/Big.h",
                "relativePath": "Source/Big.h",
                "project": "Engine",
                "language": "cpp",
                "content": "class UBigType {};\n",
                "mtime": 1,
                "types": [{ "name": "UBigType", "kind": "class", "line": 1 }],
                "members": members
            }]
        }))
        .await;

    let (status, body) = server
        .get("/explain-type?name=UBigType&maxFunctions=2&maxProperties=2")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["functions"].as_array().unwrap().len(), 2);
    assert_eq!(body["properties"].as_array().unwrap().len(), 2);
    assert_eq!(body["totals"]["functions"], 50);
    assert_eq!(body["totals"]["properties"], 50);

    let (_, body) = server
        .get("/explain-type?name=UBigType&maxFunctions=100&maxProperties=1")
        .await;
    assert!(body["functions"].as_array().unwrap().len() > 1);
    assert_eq!(body["properties"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn explain_type_missing_is_404() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;
    let (status, _) = server.get("/explain-type?name=ZZNotARealTypeZZ").await;
    assert_eq!(status, 404);
}

// Batch size limits, and one bad query never poisons its siblings.
#[tokio::test(flavor = "multi_thread")]
async fn batch_limits_and_isolation() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    // 11 inner queries is over the limit
    let eleven: Vec<_> = (0..11)
        .map(|_| json!({ "method": "find-type", "params": { "name": "AActor" } }))
        .collect();
    let (status, _) = server.post("/batch", json!({ "queries": eleven })).await;
    assert_eq!(status, 400);

    // Zero inner queries is invalid too
    let (status, _) = server.post("/batch", json!({ "queries": [] })).await;
    assert_eq!(status, 400);

    // Two valid + one invalid: three entries, the bad one carries error
    let (status, body) = server
        .post(
            "/batch",
            json!({ "queries": [
                { "method": "find-type", "params": { "name": "AActor" } },
                { "method": "definitely-not-a-method", "params": {} },
                { "method": "find-member", "params": { "name": "BeginPlay" } },
            ]}),
        )
        .await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].get("error").is_none());
    assert!(results[1]["error"].as_str().unwrap().contains("unknown batch method"));
    assert!(results[2].get("error").is_none());

    // Batch results are project-relative (indexed prefix stripped)
    let path = results[0]["result"]["results"][0]["path"].as_str().unwrap();
    assert!(!path.starts_with("C:/Game/"), "got absolute path: {}", path);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_forwards_context_options() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (_, body) = server
        .post(
            "/batch",
            json!({
                "contextLines": 2,
                "includeSignatures": true,
                "queries": [
                    { "method": "find-type", "params": { "name": "AActor" } },
                    { "method": "find-member", "params": { "name": "BeginPlay" } },
                ]
            }),
        )
        .await;
    let results = body["results"].as_array().unwrap();
    assert!(results[0]["result"]["results"][0]["context"].is_object());
    assert!(results[1]["result"]["results"][0]["signature"].is_string());
}

// Alternation grep scans only the trigram candidate set.
#[tokio::test(flavor = "multi_thread")]
async fn grep_alternation_uses_trigram_candidates() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;
    // Some files that match none of the branches
    for i in 0..6 {
        server
            .ingest(json!({
                "files": [{
                    "path": format!("C:/Game/Source/Filler{}.cpp", i),
                    "relativePath": format!("Source/Filler{}.cpp", i),
                    "project": "Engine",
                    "language": "cpp",
                    "content": format!("// nothing interesting {}\n", i),
                    "mtime": 1,
                    "types": [], "members": []
                }]
            }))
            .await;
    }

    let (status, body) = server
        .get("/grep?pattern=DestroyActor%7CDestroyPawn%7CSetTimer%7CFTimerHandle")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["timedOut"], false);
    assert_eq!(body["searchEngine"], "internal");
    let total_files = 9; // 3 sample + 6 filler
    let searched = body["filesSearched"].as_u64().unwrap();
    assert!(
        (searched as f64) < 0.5 * total_files as f64,
        "searched {} of {}",
        searched,
        total_files
    );
    assert!(body["totalMatches"].as_u64().unwrap() >= 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn grep_rejects_invalid_regex() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;
    let (status, body) = server.get("/grep?pattern=%5B").await; // "["
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("regex"));
}

#[tokio::test(flavor = "multi_thread")]
async fn grep_respects_case_sensitivity_parameter() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let (_, sensitive) = server.get("/grep?pattern=beginplay").await;
    assert_eq!(sensitive["totalMatches"], 0);

    let (_, insensitive) = server.get("/grep?pattern=beginplay&caseSensitive=false").await;
    assert!(insensitive["totalMatches"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_watcher_sets_summary_flag() {
    let server = TestServer::start().await;
    let (status, body) = server.post("/internal/stop-watcher", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);

    let (_, summary) = server.get("/summary").await;
    assert_eq!(summary["watcher"]["stopRequested"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_marks_languages_indexing() {
    let server = TestServer::start().await;
    let (status, body) = server.post("/refresh?language=cpp", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["scope"], "cpp");

    let (_, statuses) = server.get("/status").await;
    let cpp = statuses["statuses"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["language"] == "cpp")
        .unwrap()
        .clone();
    assert_eq!(cpp["state"], "indexing");
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_call_sink_accepts_and_aggregates() {
    let server = TestServer::start().await;
    for _ in 0..3 {
        let (status, body) = server
            .post(
                "/internal/mcp-tool-call",
                json!({
                    "tool": "find-type",
                    "argsDigest": "abc123",
                    "durationMs": 12,
                    "resultSize": 2048,
                    "sessionId": "session-1"
                }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["ok"], true);
    }

    // The writer task drains the queue asynchronously
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (_, stats) = server.get("/internal/mcp-tool-call/stats").await;
    let tools = stats["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["tool"], "find-type");
    assert_eq!(tools[0]["calls"], 3);
}
