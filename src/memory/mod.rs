// Memory index - derived in-memory inverted indexes
//!
//! Loaded once from the durable store at startup and patched on ingest.
//! Readers take a cheap atomic reference to the current snapshot; the
//! single ingest writer builds a new snapshot (copy-on-write per family)
//! and swaps the reference. Readers never block and never see partial
//! state. None of this is a source of truth: a full rebuild from the
//! store must always produce an equivalent index.

pub mod lookup;
pub mod scoring;

use crate::store::files::FileUpsert;
use crate::store::{
    assets as store_assets, files as store_files, AssetRecord, FileRecord, Language,
    MemberKind, MemberRecord, TypeDeclRecord, TypeKind,
};
use crate::trigram;
use anyhow::Result;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::info;

/// A type declaration with its file facts denormalized for scoring and
/// result emission. Entries are immutable once inserted; re-ingesting a
/// file replaces all of its entries.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub id: i64,
    pub file_id: i64,
    pub name: String,
    pub kind: TypeKind,
    pub parent_name: Option<String>,
    pub line: u32,
    pub specifiers: Vec<String>,
    pub path: String,
    pub relative_path: String,
    pub project: String,
    pub language: Language,
    pub module: String,
}

#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub id: i64,
    pub file_id: i64,
    pub owner_name: String,
    pub name: String,
    pub kind: MemberKind,
    pub line: u32,
    pub signature: Option<String>,
    pub specifiers: Vec<String>,
    pub path: String,
    pub project: String,
    pub language: Language,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleNode {
    pub children: BTreeMap<String, ModuleNode>,
    pub type_ids: Vec<i64>,
}

/// Inverted indexes over type declarations.
#[derive(Debug, Clone, Default)]
pub struct TypeIndex {
    pub entries: HashMap<i64, Arc<TypeEntry>>,
    pub by_exact: HashMap<String, Vec<i64>>,
    /// BTreeMap so fuzzy lookups can range-scan name prefixes.
    pub by_lower: BTreeMap<String, Vec<i64>>,
    pub by_trigram: HashMap<u32, HashSet<i64>>,
    /// 2-byte lowercase shingle -> ids of names containing it.
    pub substring: HashMap<[u8; 2], Vec<i64>>,
    /// Inheritance edge by parent NAME; the parent may not be indexed.
    pub parent_children: HashMap<String, HashSet<i64>>,
    pub module_root: ModuleNode,
    pub by_file: HashMap<i64, Vec<i64>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberIndex {
    pub entries: HashMap<i64, Arc<MemberEntry>>,
    pub by_name: HashMap<String, Vec<i64>>,
    pub by_lower: BTreeMap<String, Vec<i64>>,
    pub by_owner: HashMap<String, Vec<i64>>,
    pub by_file: HashMap<i64, Vec<i64>>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetIndex {
    pub entries: HashMap<i64, Arc<AssetRecord>>,
    /// Asset-name trie, keyed lowercase.
    pub by_lower: BTreeMap<String, Vec<i64>>,
    pub by_path: HashMap<String, i64>,
    pub folders: BTreeMap<String, Vec<i64>>,
}

#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    pub entries: HashMap<i64, Arc<FileRecord>>,
    pub by_name_lower: BTreeMap<String, Vec<i64>>,
    pub by_module: BTreeMap<String, Vec<i64>>,
    pub by_path: HashMap<String, i64>,
}

/// One immutable view of the whole index. Families are Arc'd so a patch
/// only deep-clones the families it touches.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub types: Arc<TypeIndex>,
    pub members: Arc<MemberIndex>,
    pub assets: Arc<AssetIndex>,
    pub files: Arc<FileIndex>,
    pub loaded: bool,
}

pub struct MemoryIndex {
    current: RwLock<Arc<Snapshot>>,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Cheap handle to the current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().unwrap().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().loaded
    }

    fn publish(&self, snapshot: Snapshot) {
        *self.current.write().unwrap() = Arc::new(snapshot);
    }

    /// Full rebuild from the durable store. Runs once at startup (and on
    /// demand for recovery); readers see the previous snapshot until the
    /// swap.
    pub fn load(&self, conn: &Connection) -> Result<()> {
        let started = std::time::Instant::now();

        let files = store_files::read_all_files(conn, None, None)?;
        let types = store_files::read_all_types(conn)?;
        let members = store_files::read_all_members(conn)?;
        let assets = store_assets::read_all_assets(conn)?;

        let mut file_index = FileIndex::default();
        for file in files {
            file_index.insert(Arc::new(file));
        }

        let mut type_index = TypeIndex::default();
        for decl in types {
            if let Some(file) = file_index.entries.get(&decl.file_id) {
                type_index.insert(Arc::new(type_entry(&decl, file)));
            }
        }

        let mut member_index = MemberIndex::default();
        for member in members {
            if let Some(file) = file_index.entries.get(&member.file_id) {
                member_index.insert(Arc::new(member_entry(&member, file)));
            }
        }

        let mut asset_index = AssetIndex::default();
        for asset in assets {
            asset_index.insert(Arc::new(asset));
        }

        info!(
            "Memory index loaded: {} files, {} types, {} members, {} assets in {:?}",
            file_index.entries.len(),
            type_index.entries.len(),
            member_index.entries.len(),
            asset_index.entries.len(),
            started.elapsed()
        );

        self.publish(Snapshot {
            types: Arc::new(type_index),
            members: Arc::new(member_index),
            assets: Arc::new(asset_index),
            files: Arc::new(file_index),
            loaded: true,
        });
        Ok(())
    }

    /// Apply one committed ingest batch: remove everything owned by the
    /// removed files, then insert the upserted records. The result must be
    /// equivalent to a fresh `load` from the same store contents.
    pub fn ingest_diff(
        &self,
        removed_file_ids: &[i64],
        upserts: &[FileUpsert],
        upserted_assets: &[AssetRecord],
        removed_asset_paths: &[String],
        removed_asset_prefixes: &[String],
    ) -> Result<()> {
        let previous = self.snapshot();

        let file_work = !removed_file_ids.is_empty() || !upserts.is_empty();
        let asset_work = !upserted_assets.is_empty()
            || !removed_asset_paths.is_empty()
            || !removed_asset_prefixes.is_empty();

        let (files, types, members) = if file_work {
            let mut files = (*previous.files).clone();
            let mut types = (*previous.types).clone();
            let mut members = (*previous.members).clone();

            let mut replaced: Vec<i64> = removed_file_ids.to_vec();
            replaced.extend(upserts.iter().map(|u| u.file.id));
            for file_id in replaced {
                types.remove_file(file_id);
                members.remove_file(file_id);
                files.remove(file_id);
            }

            for upsert in upserts {
                let file = Arc::new(upsert.file.clone());
                files.insert(file.clone());
                for decl in &upsert.types {
                    types.insert(Arc::new(type_entry(decl, &file)));
                }
                for member in &upsert.members {
                    members.insert(Arc::new(member_entry(member, &file)));
                }
            }
            (Arc::new(files), Arc::new(types), Arc::new(members))
        } else {
            (
                previous.files.clone(),
                previous.types.clone(),
                previous.members.clone(),
            )
        };

        let assets = if asset_work {
            let mut assets = (*previous.assets).clone();
            for path in removed_asset_paths {
                assets.remove_by_path(path);
            }
            for prefix in removed_asset_prefixes {
                assets.remove_by_prefix(prefix);
            }
            for asset in upserted_assets {
                assets.remove_by_path(&asset.path);
                assets.insert(Arc::new(asset.clone()));
            }
            Arc::new(assets)
        } else {
            previous.assets.clone()
        };

        self.publish(Snapshot {
            types,
            members,
            assets,
            files,
            loaded: previous.loaded,
        });
        Ok(())
    }
}

fn type_entry(decl: &TypeDeclRecord, file: &FileRecord) -> TypeEntry {
    TypeEntry {
        id: decl.id,
        file_id: decl.file_id,
        name: decl.name.clone(),
        kind: decl.kind,
        parent_name: decl.parent_name.clone(),
        line: decl.line,
        specifiers: decl.specifiers.clone(),
        path: file.path.clone(),
        relative_path: file.relative_path.clone(),
        project: file.project.clone(),
        language: file.language,
        module: file.module.clone(),
    }
}

fn member_entry(member: &MemberRecord, file: &FileRecord) -> MemberEntry {
    MemberEntry {
        id: member.id,
        file_id: member.file_id,
        owner_name: member.owner_name.clone(),
        name: member.name.clone(),
        kind: member.kind,
        line: member.line,
        signature: member.signature.clone(),
        specifiers: member.specifiers.clone(),
        path: file.path.clone(),
        project: file.project.clone(),
        language: file.language,
    }
}

/// 2-byte lowercase shingles of a name.
fn shingles(name_lower: &str) -> HashSet<[u8; 2]> {
    name_lower
        .as_bytes()
        .windows(2)
        .map(|w| [w[0], w[1]])
        .collect()
}

fn remove_id(list: &mut Vec<i64>, id: i64) {
    list.retain(|&candidate| candidate != id);
}

impl TypeIndex {
    fn insert(&mut self, entry: Arc<TypeEntry>) {
        let id = entry.id;
        let lower = entry.name.to_ascii_lowercase();

        self.by_exact.entry(entry.name.clone()).or_default().push(id);
        self.by_lower.entry(lower.clone()).or_default().push(id);
        for trigram in trigram::extract_trigrams(&lower) {
            self.by_trigram.entry(trigram).or_default().insert(id);
        }
        for shingle in shingles(&lower) {
            self.substring.entry(shingle).or_default().push(id);
        }
        if let Some(ref parent) = entry.parent_name {
            self.parent_children
                .entry(parent.clone())
                .or_default()
                .insert(id);
        }
        self.module_insert(&entry.module, id);
        self.by_file.entry(entry.file_id).or_default().push(id);
        self.entries.insert(id, entry);
    }

    fn remove_file(&mut self, file_id: i64) {
        let Some(ids) = self.by_file.remove(&file_id) else {
            return;
        };
        for id in ids {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            let lower = entry.name.to_ascii_lowercase();

            if let Some(list) = self.by_exact.get_mut(&entry.name) {
                remove_id(list, id);
                if list.is_empty() {
                    self.by_exact.remove(&entry.name);
                }
            }
            if let Some(list) = self.by_lower.get_mut(&lower) {
                remove_id(list, id);
                if list.is_empty() {
                    self.by_lower.remove(&lower);
                }
            }
            for trigram in trigram::extract_trigrams(&lower) {
                if let Some(set) = self.by_trigram.get_mut(&trigram) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_trigram.remove(&trigram);
                    }
                }
            }
            for shingle in shingles(&lower) {
                if let Some(list) = self.substring.get_mut(&shingle) {
                    remove_id(list, id);
                    if list.is_empty() {
                        self.substring.remove(&shingle);
                    }
                }
            }
            if let Some(ref parent) = entry.parent_name {
                if let Some(set) = self.parent_children.get_mut(parent) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.parent_children.remove(parent);
                    }
                }
            }
            self.module_remove(&entry.module, id);
        }
    }

    fn module_insert(&mut self, module: &str, id: i64) {
        let mut node = &mut self.module_root;
        for segment in module.split('.').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.type_ids.push(id);
    }

    fn module_remove(&mut self, module: &str, id: i64) {
        fn walk(node: &mut ModuleNode, segments: &[&str], id: i64) -> bool {
            match segments.split_first() {
                None => {
                    remove_id(&mut node.type_ids, id);
                }
                Some((head, rest)) => {
                    if let Some(child) = node.children.get_mut(*head) {
                        if walk(child, rest, id) {
                            node.children.remove(*head);
                        }
                    }
                }
            }
            node.type_ids.is_empty() && node.children.is_empty()
        }
        let segments: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
        walk(&mut self.module_root, &segments, id);
    }

    /// Walk to the trie node for a dotted module path.
    pub fn module_node(&self, module: &str) -> Option<&ModuleNode> {
        let mut node = &self.module_root;
        for segment in module.split('.').filter(|s| !s.is_empty()) {
            node = node.children.get(segment)?;
        }
        Some(node)
    }
}

impl MemberIndex {
    fn insert(&mut self, entry: Arc<MemberEntry>) {
        let id = entry.id;
        let lower = entry.name.to_ascii_lowercase();
        self.by_name.entry(entry.name.clone()).or_default().push(id);
        self.by_lower.entry(lower).or_default().push(id);
        self.by_owner
            .entry(entry.owner_name.clone())
            .or_default()
            .push(id);
        self.by_file.entry(entry.file_id).or_default().push(id);
        self.entries.insert(id, entry);
    }

    fn remove_file(&mut self, file_id: i64) {
        let Some(ids) = self.by_file.remove(&file_id) else {
            return;
        };
        for id in ids {
            let Some(entry) = self.entries.remove(&id) else {
                continue;
            };
            let lower = entry.name.to_ascii_lowercase();
            if let Some(list) = self.by_name.get_mut(&entry.name) {
                remove_id(list, id);
                if list.is_empty() {
                    self.by_name.remove(&entry.name);
                }
            }
            if let Some(list) = self.by_lower.get_mut(&lower) {
                remove_id(list, id);
                if list.is_empty() {
                    self.by_lower.remove(&lower);
                }
            }
            if let Some(list) = self.by_owner.get_mut(&entry.owner_name) {
                remove_id(list, id);
                if list.is_empty() {
                    self.by_owner.remove(&entry.owner_name);
                }
            }
        }
    }
}

impl AssetIndex {
    fn insert(&mut self, asset: Arc<AssetRecord>) {
        let id = asset.id;
        self.by_lower
            .entry(asset.name.to_ascii_lowercase())
            .or_default()
            .push(id);
        self.by_path.insert(asset.path.clone(), id);
        self.folders.entry(asset.folder.clone()).or_default().push(id);
        self.entries.insert(id, asset);
    }

    fn remove_by_path(&mut self, path: &str) {
        let Some(id) = self.by_path.remove(path) else {
            return;
        };
        let Some(asset) = self.entries.remove(&id) else {
            return;
        };
        let lower = asset.name.to_ascii_lowercase();
        if let Some(list) = self.by_lower.get_mut(&lower) {
            remove_id(list, id);
            if list.is_empty() {
                self.by_lower.remove(&lower);
            }
        }
        if let Some(list) = self.folders.get_mut(&asset.folder) {
            remove_id(list, id);
            if list.is_empty() {
                self.folders.remove(&asset.folder);
            }
        }
    }

    fn remove_by_prefix(&mut self, prefix: &str) {
        let doomed: Vec<String> = self
            .by_path
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        for path in doomed {
            self.remove_by_path(&path);
        }
    }
}

impl FileIndex {
    fn insert(&mut self, file: Arc<FileRecord>) {
        let id = file.id;
        let name = crate::utils::paths::file_name(&file.path).to_ascii_lowercase();
        self.by_name_lower.entry(name).or_default().push(id);
        self.by_module.entry(file.module.clone()).or_default().push(id);
        self.by_path.insert(file.path.clone(), id);
        self.entries.insert(id, file);
    }

    fn remove(&mut self, file_id: i64) {
        let Some(file) = self.entries.remove(&file_id) else {
            return;
        };
        let name = crate::utils::paths::file_name(&file.path).to_ascii_lowercase();
        if let Some(list) = self.by_name_lower.get_mut(&name) {
            remove_id(list, file_id);
            if list.is_empty() {
                self.by_name_lower.remove(&name);
            }
        }
        if let Some(list) = self.by_module.get_mut(&file.module) {
            remove_id(list, file_id);
            if list.is_empty() {
                self.by_module.remove(&file.module);
            }
        }
        self.by_path.remove(&file.path);
    }
}
