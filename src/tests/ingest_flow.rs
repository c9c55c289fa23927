// Ingest protocol end to end

use crate::tests::fixtures::{sample_batch, TestServer};
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn ingest_reports_counts_and_duration() {
    let server = TestServer::start().await;
    let response = server.ingest(sample_batch()).await;
    assert_eq!(response["filesUpserted"], 3);
    assert_eq!(response["assetsUpserted"], 2);
    assert_eq!(response["deleted"], 0);
    assert!(response["durationMs"].is_number());
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_is_a_no_op() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;
    let (_, first) = server.get("/stats").await;

    server.ingest(sample_batch()).await;
    let (_, second) = server.get("/stats").await;

    assert_eq!(first["totalFiles"], second["totalFiles"]);
    assert_eq!(first["totalTypes"], second["totalTypes"]);
    assert_eq!(first["totalMembers"], second["totalMembers"]);
    assert_eq!(first["totalAssets"], second["totalAssets"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn content_unchanged_refreshes_decls_only() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    // Same content, different parser output: the new decl must land
    let mut batch = sample_batch();
    batch["files"][0]["types"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "name": "FNewStruct", "kind": "struct", "line": 6 }));
    server.ingest(batch).await;

    let (_, body) = server.get("/find-type?name=FNewStruct").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_then_query_sees_nothing() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    server
        .ingest(json!({
            "deletes": [{ "path": "C:/Game/Script/Pawn.as" }]
        }))
        .await;

    let (_, body) = server.get("/find-type?name=APawn").await;
    assert!(body["results"].as_array().unwrap().is_empty());
    // Children of AActor came only from the deleted file
    let (_, children) = server.get("/find-children?name=AActor").await;
    assert!(children["results"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn prefix_delete_tombstones_everything_under_a_root() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    let response = server
        .ingest(json!({
            "deletes": [{ "path": "C:/Game/Source/", "prefix": true }]
        }))
        .await;
    assert_eq!(response["deleted"], 2);

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["totalFiles"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn reingesting_after_delete_restores_queries() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;
    server
        .ingest(json!({ "deletes": [{ "path": "C:/Game/Script/Pawn.as" }] }))
        .await;
    server.ingest(sample_batch()).await;

    let (_, body) = server.get("/find-type?name=APawn").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_receives_ingested_sources() {
    let server = TestServer::start().await;
    server.ingest(sample_batch()).await;

    // The mirror root carries the rebased tree; content-class files are
    // absent by design
    let mirror_dir = server.state.mirror.mirror_dir().to_path_buf();
    let mut found = Vec::new();
    collect_files(&mirror_dir, &mut found);
    assert!(
        found.iter().any(|p| p.ends_with("Pawn.as")),
        "mirror missing Pawn.as: {:?}",
        found
    );
}

fn collect_files(dir: &std::path::Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path.to_string_lossy().into_owned());
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn language_progress_markers_flow_to_status() {
    let server = TestServer::start().await;
    server
        .ingest(json!({
            "status": [
                { "language": "angelscript", "state": "indexing", "current": 150, "total": 900 }
            ]
        }))
        .await;

    let (_, body) = server.get("/status").await;
    let record = body["statuses"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["language"] == "angelscript")
        .unwrap()
        .clone();
    assert_eq!(record["state"], "indexing");
    assert_eq!(record["progressCurrent"], 150);
    assert_eq!(record["progressTotal"], 900);
}

#[tokio::test(flavor = "multi_thread")]
async fn ordered_ingests_are_visible_in_order() {
    let server = TestServer::start().await;
    for revision in 0..5 {
        server
            .ingest(json!({
                "files": [{
                    "path": "C:/Game/Source/Rev.h",
                    "relativePath": "Source/Rev.h",
                    "project": "Engine",
                    "language": "cpp",
                    "content": format!("class URev{} {{}};\n", revision),
                    "mtime": revision,
                    "types": [{ "name": format!("URev{}", revision), "kind": "class", "line": 1 }],
                    "members": []
                }]
            }))
            .await;
    }

    // Only the final revision is visible
    let (_, last) = server.get("/find-type?name=URev4").await;
    assert_eq!(last["results"].as_array().unwrap().len(), 1);
    let (_, stale) = server.get("/find-type?name=URev0").await;
    assert!(stale["results"].as_array().unwrap().is_empty());
}
