//! Query operations over a memory-index snapshot
//!
//! Everything here is a pure function of one [`Snapshot`]; handlers grab a
//! snapshot once per request and never observe partial ingest state.
//!
//! Fuzzy defaults differ by entity: type and member lookups default to
//! exact-name matching, asset lookups default to fuzzy (substring with
//! prefix preference). Both callers and tests depend on that split.

use super::scoring;
use super::{MemberEntry, Snapshot, TypeEntry};
use crate::store::{AssetRecord, Language, MemberKind, TypeKind};
use crate::trigram;
use crate::utils::paths;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TypeHit {
    pub entry: Arc<TypeEntry>,
    pub score: f32,
    pub implementation_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemberHit {
    pub entry: Arc<MemberEntry>,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    pub project: Option<String>,
    pub language: Option<Language>,
    pub kind: Option<TypeKind>,
}

impl TypeFilter {
    fn accepts(&self, entry: &TypeEntry) -> bool {
        if let Some(ref project) = self.project {
            if &entry.project != project {
                return false;
            }
        }
        if let Some(language) = self.language {
            if entry.language != language {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        true
    }
}

/// Ids of names in `map` within the half-open prefix range.
fn prefix_range<'a>(
    map: &'a BTreeMap<String, Vec<i64>>,
    prefix: &str,
) -> impl Iterator<Item = i64> + 'a {
    let start = prefix.to_string();
    let mut end = prefix.to_string();
    end.push(char::MAX);
    map.range((Bound::Included(start), Bound::Excluded(end)))
        .flat_map(|(_, ids)| ids.iter().copied())
}

/// Fuzzy candidates for a type query: lowercase-prefix matches unioned
/// with ids sharing at least the threshold fraction of query trigrams.
fn fuzzy_type_candidates(snapshot: &Snapshot, query_lower: &str) -> HashSet<i64> {
    let types = &snapshot.types;
    let mut candidates: HashSet<i64> = prefix_range(&types.by_lower, query_lower).collect();

    let query_trigrams = trigram::extract_trigrams(query_lower);
    if !query_trigrams.is_empty() {
        let threshold = scoring::trigram_threshold(query_lower.len());
        let required = ((query_trigrams.len() as f32) * threshold).ceil() as usize;

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for trigram in &query_trigrams {
            if let Some(ids) = types.by_trigram.get(trigram) {
                for &id in ids {
                    *counts.entry(id).or_default() += 1;
                }
            }
        }
        candidates.extend(
            counts
                .into_iter()
                .filter(|&(_, count)| count >= required.max(1))
                .map(|(id, _)| id),
        );
    } else {
        // Queries under three chars have no trigrams; shingle partitions
        // keep the candidate set bounded.
        if query_lower.len() == 2 {
            let bytes = query_lower.as_bytes();
            if let Some(ids) = types.substring.get(&[bytes[0], bytes[1]]) {
                candidates.extend(ids.iter().copied());
            }
        }
    }
    candidates
}

/// Deduplicate scored hits per (name, kind): the best-scored record wins;
/// when a dropped record is an implementation file and the kept one a
/// header, the implementation path rides along on the kept record.
fn dedup_type_hits(mut hits: Vec<TypeHit>) -> Vec<TypeHit> {
    // Header-first on equal score so an implementation can never displace
    // its header
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| {
                paths::is_header_path(&b.entry.path).cmp(&paths::is_header_path(&a.entry.path))
            })
            .then_with(|| a.entry.name.cmp(&b.entry.name))
            .then_with(|| a.entry.path.cmp(&b.entry.path))
    });

    let mut kept: Vec<TypeHit> = Vec::new();
    let mut index_of: HashMap<(String, TypeKind), usize> = HashMap::new();
    for hit in hits {
        let key = (hit.entry.name.clone(), hit.entry.kind);
        match index_of.get(&key) {
            None => {
                index_of.insert(key, kept.len());
                kept.push(hit);
            }
            Some(&at) => {
                let primary = &mut kept[at];
                if primary.implementation_path.is_none()
                    && paths::is_header_path(&primary.entry.path)
                    && paths::is_implementation_path(&hit.entry.path)
                {
                    primary.implementation_path = Some(hit.entry.path.clone());
                }
            }
        }
    }
    kept
}

/// Name lookup over type declarations. Defaults to exact (case-insensitive
/// fallback); `fuzzy` widens to prefix + trigram candidates with scored
/// ranking.
pub fn find_type(
    snapshot: &Snapshot,
    name: &str,
    fuzzy: bool,
    filter: &TypeFilter,
    limit: usize,
) -> Vec<TypeHit> {
    let query_lower = name.to_ascii_lowercase();
    let types = &snapshot.types;

    let candidate_ids: Vec<i64> = if fuzzy {
        let mut ids: Vec<i64> = fuzzy_type_candidates(snapshot, &query_lower)
            .into_iter()
            .collect();
        ids.sort_unstable();
        ids
    } else {
        match types.by_exact.get(name) {
            Some(ids) => ids.clone(),
            None => types.by_lower.get(&query_lower).cloned().unwrap_or_default(),
        }
    };

    let mut hits = Vec::new();
    for id in candidate_ids {
        let Some(entry) = types.entries.get(&id) else {
            continue;
        };
        if !filter.accepts(entry) {
            continue;
        }
        let name_score = if fuzzy {
            match scoring::name_match_score(&query_lower, &entry.name) {
                Some(score) => score,
                None => continue,
            }
        } else {
            1.0
        };
        let score = name_score
            + scoring::kind_weight(entry.kind)
            + scoring::specifier_boost(&entry.specifiers)
            + scoring::path_signal(&entry.path);
        hits.push(TypeHit {
            entry: entry.clone(),
            score,
            implementation_path: None,
        });
    }

    let mut deduped = dedup_type_hits(hits);
    deduped.truncate(limit);
    deduped
}

#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pub project: Option<String>,
    pub language: Option<Language>,
    pub containing_type: Option<String>,
    pub kind: Option<MemberKind>,
}

impl MemberFilter {
    fn accepts(&self, entry: &MemberEntry) -> bool {
        if let Some(ref project) = self.project {
            if &entry.project != project {
                return false;
            }
        }
        if let Some(language) = self.language {
            if entry.language != language {
                return false;
            }
        }
        if let Some(ref owner) = self.containing_type {
            if !entry.owner_name.eq_ignore_ascii_case(owner) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        true
    }
}

pub fn find_member(
    snapshot: &Snapshot,
    name: &str,
    fuzzy: bool,
    filter: &MemberFilter,
    limit: usize,
) -> Vec<MemberHit> {
    let query_lower = name.to_ascii_lowercase();
    let members = &snapshot.members;

    let candidate_ids: Vec<i64> = if fuzzy {
        let mut ids: HashSet<i64> = prefix_range(&members.by_lower, &query_lower).collect();
        if query_lower.len() >= 3 {
            for (key, key_ids) in members.by_lower.iter() {
                if key.contains(&query_lower) {
                    ids.extend(key_ids.iter().copied());
                }
            }
        }
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids
    } else if let Some(ref owner) = filter.containing_type {
        // Owner-scoped exact lookups walk the owner's members; the owner
        // list is small and the name may differ only by case
        members
            .by_owner
            .get(owner)
            .cloned()
            .unwrap_or_else(|| {
                members
                    .by_owner
                    .iter()
                    .filter(|(key, _)| key.eq_ignore_ascii_case(owner))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect()
            })
            .into_iter()
            .filter(|id| {
                members
                    .entries
                    .get(id)
                    .map(|e| e.name.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .collect()
    } else {
        match members.by_name.get(name) {
            Some(ids) => ids.clone(),
            None => members.by_lower.get(&query_lower).cloned().unwrap_or_default(),
        }
    };

    let mut hits = Vec::new();
    for id in candidate_ids {
        let Some(entry) = members.entries.get(&id) else {
            continue;
        };
        if !filter.accepts(entry) {
            continue;
        }
        let name_score = if fuzzy {
            match scoring::name_match_score(&query_lower, &entry.name) {
                Some(score) => score,
                None => continue,
            }
        } else {
            1.0
        };
        let score = name_score
            + scoring::specifier_boost(&entry.specifiers)
            + scoring::path_signal(&entry.path);
        hits.push(MemberHit {
            entry: entry.clone(),
            score,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.name.cmp(&b.entry.name))
            .then_with(|| a.entry.path.cmp(&b.entry.path))
            .then_with(|| a.entry.line.cmp(&b.entry.line))
    });
    hits.truncate(limit);
    hits
}

/// Members owned by a type, partitioned for explain-type budgets.
pub fn members_of(snapshot: &Snapshot, owner: &str) -> Vec<Arc<MemberEntry>> {
    let mut entries: Vec<Arc<MemberEntry>> = snapshot
        .members
        .by_owner
        .get(owner)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| snapshot.members.entries.get(id).cloned())
                .collect()
        })
        .unwrap_or_default();
    entries.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.name.cmp(&b.name)));
    entries
}

/// BFS over the by-name inheritance graph. A visited set is mandatory:
/// degenerate data (forward-declared bases resolving to each other) can
/// make this graph cyclic.
pub fn find_children(
    snapshot: &Snapshot,
    parent: &str,
    recursive: bool,
    filter: &TypeFilter,
    limit: usize,
) -> Vec<Arc<TypeEntry>> {
    let types = &snapshot.types;
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut out: Vec<Arc<TypeEntry>> = Vec::new();

    visited.insert(parent.to_string());
    queue.push_back(parent.to_string());

    while let Some(current) = queue.pop_front() {
        let Some(child_ids) = types.parent_children.get(&current) else {
            continue;
        };
        let mut children: Vec<Arc<TypeEntry>> = child_ids
            .iter()
            .filter_map(|id| types.entries.get(id).cloned())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));

        for child in children {
            if recursive && visited.insert(child.name.clone()) {
                queue.push_back(child.name.clone());
            }
            if filter.accepts(&child) && out.len() < limit {
                out.push(child);
            }
        }
        if out.len() >= limit && !recursive {
            break;
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct FileHit {
    pub id: i64,
    pub score: f32,
}

/// File-name lookup: exact, prefix, then substring over the name keys.
pub fn find_file(
    snapshot: &Snapshot,
    name: &str,
    project: Option<&str>,
    language: Option<Language>,
    limit: usize,
) -> Vec<FileHit> {
    let query_lower = name.to_ascii_lowercase();
    let files = &snapshot.files;

    let mut scored: HashMap<i64, f32> = HashMap::new();
    for (key, ids) in files.by_name_lower.iter() {
        let score = if *key == query_lower {
            1.0
        } else if key.starts_with(&query_lower) {
            0.9
        } else if let Some(pos) = key.find(&query_lower) {
            0.7 - pos as f32 / key.len() as f32
        } else {
            continue;
        };
        for id in ids {
            scored.entry(*id).or_insert(score);
        }
    }

    let mut hits: Vec<FileHit> = scored
        .into_iter()
        .filter(|(id, _)| {
            files
                .entries
                .get(id)
                .map(|f| {
                    project.map_or(true, |p| f.project == p)
                        && language.map_or(true, |l| f.language == l)
                })
                .unwrap_or(false)
        })
        .map(|(id, score)| FileHit { id, score })
        .collect();

    hits.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| {
            let pa = snapshot.files.entries.get(&a.id).map(|f| f.path.as_str());
            let pb = snapshot.files.entries.get(&b.id).map(|f| f.path.as_str());
            pa.cmp(&pb)
        })
    });
    hits.truncate(limit);
    hits
}

/// Module equality-or-descendant check used by browse-module.
fn in_module(candidate: &str, module: &str) -> bool {
    candidate == module
        || (candidate.len() > module.len()
            && candidate.starts_with(module)
            && candidate.as_bytes()[module.len()] == b'.')
}

pub struct ModuleBrowse {
    pub type_ids: Vec<i64>,
    pub file_ids: Vec<i64>,
}

pub fn browse_module(snapshot: &Snapshot, module: &str) -> ModuleBrowse {
    let mut type_ids = Vec::new();
    if let Some(node) = snapshot.types.module_node(module) {
        collect_subtree(node, &mut type_ids);
    }
    type_ids.sort_unstable();

    let mut file_ids = Vec::new();
    for (candidate, ids) in prefix_module_range(&snapshot.files.by_module, module) {
        if in_module(candidate, module) {
            file_ids.extend(ids.iter().copied());
        }
    }
    file_ids.sort_unstable();

    ModuleBrowse { type_ids, file_ids }
}

fn prefix_module_range<'a>(
    map: &'a BTreeMap<String, Vec<i64>>,
    module: &str,
) -> impl Iterator<Item = (&'a str, &'a Vec<i64>)> + 'a {
    let start = module.to_string();
    let mut end = module.to_string();
    end.push(char::MAX);
    map.range((Bound::Included(start), Bound::Excluded(end)))
        .map(|(k, v)| (k.as_str(), v))
}

fn collect_subtree(node: &super::ModuleNode, out: &mut Vec<i64>) {
    out.extend(node.type_ids.iter().copied());
    for child in node.children.values() {
        collect_subtree(child, out);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleListing {
    pub path: String,
    pub name: String,
    pub type_count: usize,
    pub depth: u32,
}

/// Children of a parent module path, walked to `depth` levels. Counts are
/// per subtree.
pub fn list_modules(snapshot: &Snapshot, parent: &str, depth: u32) -> Vec<ModuleListing> {
    let Some(node) = snapshot.types.module_node(parent) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    walk_modules(node, parent, 1, depth.max(1), &mut out);
    out
}

fn walk_modules(
    node: &super::ModuleNode,
    parent: &str,
    level: u32,
    max_depth: u32,
    out: &mut Vec<ModuleListing>,
) {
    for (name, child) in &node.children {
        let path = if parent.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", parent, name)
        };
        let mut subtree = Vec::new();
        collect_subtree(child, &mut subtree);
        out.push(ModuleListing {
            path: path.clone(),
            name: name.clone(),
            type_count: subtree.len(),
            depth: level,
        });
        if level < max_depth {
            walk_modules(child, &path, level + 1, max_depth, out);
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetHit {
    pub entry: Arc<AssetRecord>,
    pub score: f32,
}

/// Asset name lookup. Fuzzy (the asset default) is substring matching
/// with prefix preference; non-fuzzy is case-insensitive exact.
pub fn find_asset(
    snapshot: &Snapshot,
    name: &str,
    fuzzy: bool,
    project: Option<&str>,
    limit: usize,
) -> Vec<AssetHit> {
    let query_lower = name.to_ascii_lowercase();
    let assets = &snapshot.assets;

    let mut scored: HashMap<i64, f32> = HashMap::new();
    if fuzzy {
        for (key, ids) in assets.by_lower.iter() {
            let score = if *key == query_lower {
                1.0
            } else if key.starts_with(&query_lower) {
                0.9
            } else if let Some(pos) = key.find(&query_lower) {
                0.7 - pos as f32 / key.len() as f32
            } else {
                continue;
            };
            for id in ids {
                scored.entry(*id).or_insert(score);
            }
        }
    } else if let Some(ids) = assets.by_lower.get(&query_lower) {
        for id in ids {
            scored.insert(*id, 1.0);
        }
    }

    let mut hits: Vec<AssetHit> = scored
        .into_iter()
        .filter_map(|(id, score)| {
            let entry = assets.entries.get(&id)?;
            if let Some(project) = project {
                if entry.project != project {
                    return None;
                }
            }
            Some(AssetHit {
                entry: entry.clone(),
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.path.cmp(&b.entry.path))
    });
    hits.truncate(limit);
    hits
}

/// Assets in a folder; descendants included when `recursive`.
pub fn browse_assets(
    snapshot: &Snapshot,
    folder: &str,
    project: Option<&str>,
    recursive: bool,
    limit: usize,
) -> Vec<Arc<AssetRecord>> {
    let assets = &snapshot.assets;
    let folder = folder.trim_end_matches('/');

    let mut out: Vec<Arc<AssetRecord>> = Vec::new();
    for (key, ids) in assets.folders.iter() {
        let matches = if recursive {
            key == folder || key.starts_with(&format!("{}/", folder))
        } else {
            key == folder
        };
        if !matches {
            continue;
        }
        for id in ids {
            if let Some(entry) = assets.entries.get(id) {
                if project.map_or(true, |p| entry.project == p) {
                    out.push(entry.clone());
                }
            }
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out.truncate(limit);
    out
}

/// Direct child folders of a parent prefix, with asset counts per
/// subtree.
pub fn list_asset_folders(snapshot: &Snapshot, parent: &str) -> Vec<(String, usize)> {
    let parent = parent.trim_end_matches('/');
    let prefix = if parent.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", parent)
    };

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for (folder, ids) in snapshot.assets.folders.iter() {
        let remainder = if folder == parent {
            None
        } else {
            folder.strip_prefix(&prefix)
        };
        if let Some(remainder) = remainder {
            let child = remainder.split('/').next().unwrap_or(remainder);
            *counts.entry(format!("{}{}", prefix, child)).or_default() += ids.len();
        }
    }
    counts.into_iter().collect()
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStats {
    pub total: usize,
    pub by_class: Vec<(String, usize)>,
    pub by_project: Vec<(String, usize)>,
}

pub fn asset_stats(snapshot: &Snapshot) -> AssetStats {
    let mut by_class: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_project: BTreeMap<String, usize> = BTreeMap::new();
    for entry in snapshot.assets.entries.values() {
        *by_class.entry(entry.class.clone()).or_default() += 1;
        *by_project.entry(entry.project.clone()).or_default() += 1;
    }
    AssetStats {
        total: snapshot.assets.entries.len(),
        by_class: by_class.into_iter().collect(),
        by_project: by_project.into_iter().collect(),
    }
}
