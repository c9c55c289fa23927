// Store/index equivalence properties

use crate::memory::MemoryIndex;
use crate::store::{files, IndexStore, Language, MemberKind, MemberRecord, TypeDeclRecord, TypeKind};
use crate::trigram;
use rusqlite::Connection;
use tempfile::TempDir;

fn decl(name: &str, line: u32) -> TypeDeclRecord {
    TypeDeclRecord {
        id: 0,
        file_id: 0,
        name: name.to_string(),
        kind: TypeKind::Class,
        parent_name: None,
        line,
        specifiers: vec![],
    }
}

fn member(owner: &str, name: &str, line: u32) -> MemberRecord {
    MemberRecord {
        id: 0,
        file_id: 0,
        owner_name: owner.to_string(),
        name: name.to_string(),
        kind: MemberKind::Function,
        line,
        signature: None,
        specifiers: vec![],
    }
}

fn apply_corpus(store: &IndexStore) {
    store
        .upsert_file(
            "/w/Source/Actor.h",
            "Source/Actor.h",
            "Engine",
            Language::Cpp,
            "Engine.Source",
            10,
            Some("class AActor {\n  void DestroyActor();\n};\n"),
            &[decl("AActor", 1)],
            &[member("AActor", "DestroyActor", 2)],
        )
        .unwrap();
    store
        .upsert_file(
            "/w/Script/Timers.as",
            "Script/Timers.as",
            "MyGame",
            Language::Angelscript,
            "MyGame.Script",
            20,
            Some("class UTimerLib {\n  void SetTimer() {}\n  FTimerHandle Handle;\n}\n"),
            &[decl("UTimerLib", 1)],
            &[member("UTimerLib", "SetTimer", 2)],
        )
        .unwrap();
}

/// Stable fingerprint of everything derived state depends on. Reads
/// through a fresh read-only handle like any pool worker would.
fn store_fingerprint(db_path: &std::path::Path) -> Vec<String> {
    let conn: Connection = IndexStore::open_read_only(db_path).unwrap();
    let mut out = Vec::new();
    for sql in [
        "SELECT path || '|' || project || '|' || language || '|' || module || '|' || mtime
             || '|' || content_hash FROM files ORDER BY path",
        "SELECT name || '|' || kind || '|' || line || '|' || COALESCE(parent_name,'') FROM types
             ORDER BY name, kind, line",
        "SELECT owner_name || '|' || name || '|' || kind || '|' || line FROM members
             ORDER BY owner_name, name, line",
        "SELECT trigram || '|' || hex(file_ids) FROM trigram_postings ORDER BY trigram",
    ] {
        let mut stmt = conn.prepare(sql).unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap();
        for row in rows {
            out.push(row.unwrap());
        }
    }
    out
}

// Round-trip: replaying an accepted batch leaves rows and postings
// byte-identical.
#[test]
fn replaying_a_batch_is_a_store_no_op() {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("t.db")).unwrap();

    apply_corpus(&store);
    let before = store_fingerprint(store.db_path());
    apply_corpus(&store);
    let after = store_fingerprint(store.db_path());

    assert_eq!(before, after);
}

// Rebuild: incremental patching and a cold reload agree on the inverted
// indexes.
#[test]
fn incremental_index_equals_cold_rebuild() {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("t.db")).unwrap();
    apply_corpus(&store);

    let warm = MemoryIndex::new();
    {
        let conn = IndexStore::open_read_only(store.db_path()).unwrap();
        warm.load(&conn).unwrap();
    }

    // Mutate through the store and patch incrementally
    let upsert = store
        .upsert_file(
            "/w/Script/Timers.as",
            "Script/Timers.as",
            "MyGame",
            Language::Angelscript,
            "MyGame.Script",
            30,
            Some("class URenamedLib {\n  void SetTimerLoop() {}\n}\n"),
            &[decl("URenamedLib", 1)],
            &[member("URenamedLib", "SetTimerLoop", 2)],
        )
        .unwrap();
    warm.ingest_diff(&[], &[upsert], &[], &[], &[]).unwrap();

    let cold = MemoryIndex::new();
    {
        let conn = IndexStore::open_read_only(store.db_path()).unwrap();
        cold.load(&conn).unwrap();
    }

    let warm_snap = warm.snapshot();
    let cold_snap = cold.snapshot();

    let mut warm_types: Vec<String> = warm_snap.types.by_exact.keys().cloned().collect();
    let mut cold_types: Vec<String> = cold_snap.types.by_exact.keys().cloned().collect();
    warm_types.sort();
    cold_types.sort();
    assert_eq!(warm_types, cold_types);

    let mut warm_members: Vec<String> = warm_snap.members.by_name.keys().cloned().collect();
    let mut cold_members: Vec<String> = cold_snap.members.by_name.keys().cloned().collect();
    warm_members.sort();
    cold_members.sort();
    assert_eq!(warm_members, cold_members);

    assert_eq!(
        warm_snap.types.by_trigram.len(),
        cold_snap.types.by_trigram.len()
    );
    assert_eq!(
        warm_snap.types.substring.len(),
        cold_snap.types.substring.len()
    );
    assert_eq!(
        warm_snap.files.by_path.len(),
        cold_snap.files.by_path.len()
    );
}

// Trigram soundness: any file matching a pattern contains every required
// trigram.
#[test]
fn required_trigrams_are_sound() {
    let corpus = [
        "class AActor {\n  void DestroyActor();\n};\n",
        "void SetTimer(FTimerHandle& Handle);\n",
        "UCLASS()\nclass APawn : public AActor {};\n",
        "int unrelated = 42;\n",
    ];
    let patterns = [
        ("DestroyActor", false),
        ("FTimerHandle", false),
        ("Destroy(Actor|Pawn)", true),
        ("SetTimer|FTimerHandle", true),
        ("A.tor", true),
        ("Actor+", true),
        (r"APawn\b", true),
    ];

    for (pattern, is_regex) in patterns {
        let required = trigram::pattern_to_trigrams(pattern, is_regex);
        let regex = regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap();
        for content in corpus {
            if !regex.is_match(content) {
                continue;
            }
            let have = trigram::extract_trigrams(content);
            for trigram in &required {
                assert!(
                    have.contains(trigram),
                    "pattern {:?} matched content but trigram {:#x} missing",
                    pattern,
                    trigram
                );
            }
        }
    }
}

// Literal completeness: a pure literal reduces to exactly its own
// trigrams.
#[test]
fn literal_patterns_reduce_completely() {
    for literal in ["AActor", "FTimerHandle", "xyz", "GetWorldTimerManager"] {
        assert_eq!(
            trigram::pattern_to_trigrams(literal, false),
            trigram::extract_trigrams(literal),
            "literal {:?}",
            literal
        );
    }
}

// Ranking stability: identical queries return identical orderings.
#[test]
fn ranking_is_order_stable() {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("t.db")).unwrap();
    for i in 0..20 {
        store
            .upsert_file(
                &format!("/w/S/File{:02}.h", i),
                &format!("S/File{:02}.h", i),
                "Engine",
                Language::Cpp,
                "Engine.S",
                1,
                Some(&format!("class AActorVariant{:02} {{}};\n", i)),
                &[decl(&format!("AActorVariant{:02}", i), 1)],
                &[],
            )
            .unwrap();
    }
    let memory = MemoryIndex::new();
    {
        let conn = IndexStore::open_read_only(store.db_path()).unwrap();
        memory.load(&conn).unwrap();
    }
    let snapshot = memory.snapshot();

    let filter = crate::memory::lookup::TypeFilter::default();
    let first: Vec<String> = crate::memory::lookup::find_type(&snapshot, "AActorVariant", true, &filter, 50)
        .iter()
        .map(|h| h.entry.name.clone())
        .collect();
    for _ in 0..5 {
        let again: Vec<String> =
            crate::memory::lookup::find_type(&snapshot, "AActorVariant", true, &filter, 50)
                .iter()
                .map(|h| h.entry.name.clone())
                .collect();
        assert_eq!(first, again);
    }
}

// Idempotent delete at the store boundary.
#[test]
fn double_delete_equals_single_delete() {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("t.db")).unwrap();
    apply_corpus(&store);

    assert_eq!(store.delete_by_path("/w/Source/Actor.h").unwrap(), 1);
    let once = store_fingerprint(store.db_path());
    assert_eq!(store.delete_by_path("/w/Source/Actor.h").unwrap(), 0);
    let twice = store_fingerprint(store.db_path());
    assert_eq!(once, twice);
}

// Content fetch round-trips through compression.
#[test]
fn stored_content_round_trips_through_zstd() {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("t.db")).unwrap();
    let source = "class AActor {\n\tvoid Tick(float DeltaSeconds);\n};\n".repeat(100);
    let upsert = store
        .upsert_file("/w/A.h", "A.h", "P", Language::Cpp, "P", 1, Some(&source), &[], &[])
        .unwrap();

    let conn = IndexStore::open_read_only(store.db_path()).unwrap();
    let fetched = files::read_file_content(&conn, upsert.file.id)
        .unwrap()
        .unwrap();
    assert_eq!(fetched, source);
}
