// Trigram posting lists
//
// One row per trigram; the posting list is a blob of sorted little-endian
// u32 file ids. Intersection always starts from the shortest list and
// gallops through the longer ones.

use super::IndexStore;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

pub(super) fn encode_posting(ids: &[u32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        blob.extend_from_slice(&id.to_le_bytes());
    }
    blob
}

pub(super) fn decode_posting(blob: &[u8]) -> Result<Vec<u32>> {
    if blob.len() % 4 != 0 {
        return Err(anyhow!("posting blob length {} not a multiple of 4", blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub(super) fn file_id_to_u32(id: i64) -> Result<u32> {
    u32::try_from(id).map_err(|_| anyhow!("file id {} exceeds posting range", id))
}

/// Galloping (exponential) search for `target` in `list[lo..]`; returns the
/// first index with `list[i] >= target`.
fn gallop(list: &[u32], mut lo: usize, target: u32) -> usize {
    let mut step = 1;
    let mut hi = lo;
    while hi < list.len() && list[hi] < target {
        lo = hi + 1;
        hi += step;
        step *= 2;
    }
    let hi = hi.min(list.len());
    lo + list[lo..hi].partition_point(|&v| v < target)
}

/// N-way sorted intersection, shortest list first.
pub fn intersect_postings(mut lists: Vec<Vec<u32>>) -> Vec<u32> {
    if lists.is_empty() {
        return Vec::new();
    }
    lists.sort_by_key(|l| l.len());
    if lists[0].is_empty() {
        return Vec::new();
    }

    let (seed, rest) = lists.split_first().unwrap();
    let mut cursors = vec![0usize; rest.len()];
    let mut out = Vec::new();

    'candidates: for &candidate in seed {
        for (list, cursor) in rest.iter().zip(cursors.iter_mut()) {
            let at = gallop(list, *cursor, candidate);
            *cursor = at;
            if at >= list.len() {
                break 'candidates;
            }
            if list[at] != candidate {
                continue 'candidates;
            }
        }
        out.push(candidate);
    }
    out
}

impl IndexStore {
    /// Apply a minimal posting diff for one file: remove its id from
    /// dropped trigrams, insert it into gained ones. Runs inside the
    /// caller's ingest transaction.
    pub(super) fn update_postings_for_file(
        &self,
        file_id: i64,
        old_trigrams: &HashSet<u32>,
        new_trigrams: &HashSet<u32>,
    ) -> Result<()> {
        let id = file_id_to_u32(file_id)?;

        for &trigram in old_trigrams.difference(new_trigrams) {
            self.remove_from_posting(trigram, id)?;
        }
        for &trigram in new_trigrams.difference(old_trigrams) {
            self.add_to_posting(trigram, id)?;
        }
        Ok(())
    }

    fn add_to_posting(&self, trigram: u32, file_id: u32) -> Result<()> {
        let existing: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT file_ids FROM trigram_postings WHERE trigram = ?1",
                [trigram],
                |row| row.get(0),
            )
            .optional()?;

        let blob = match existing {
            Some(blob) => {
                let mut ids = decode_posting(&blob)?;
                match ids.binary_search(&file_id) {
                    Ok(_) => return Ok(()),
                    Err(pos) => ids.insert(pos, file_id),
                }
                encode_posting(&ids)
            }
            None => encode_posting(&[file_id]),
        };

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO trigram_postings (trigram, file_ids) VALUES (?1, ?2)",
                params![trigram, blob],
            )
            .map_err(|e| self.classify_write_error(e))?;
        Ok(())
    }

    fn remove_from_posting(&self, trigram: u32, file_id: u32) -> Result<()> {
        let existing: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT file_ids FROM trigram_postings WHERE trigram = ?1",
                [trigram],
                |row| row.get(0),
            )
            .optional()?;

        let Some(blob) = existing else {
            return Ok(());
        };
        let mut ids = decode_posting(&blob)?;
        let Ok(pos) = ids.binary_search(&file_id) else {
            return Ok(());
        };
        ids.remove(pos);

        if ids.is_empty() {
            self.conn()
                .execute("DELETE FROM trigram_postings WHERE trigram = ?1", [trigram])
                .map_err(|e| self.classify_write_error(e))?;
        } else {
            self.conn()
                .execute(
                    "UPDATE trigram_postings SET file_ids = ?2 WHERE trigram = ?1",
                    params![trigram, encode_posting(&ids)],
                )
                .map_err(|e| self.classify_write_error(e))?;
        }
        Ok(())
    }

    /// Candidate files containing every trigram in `trigrams`, optionally
    /// narrowed by project/language. Empty input yields no candidates;
    /// callers decide whether that means full scan.
    pub fn get_trigram_candidates(
        &self,
        trigrams: &HashSet<u32>,
        project: Option<&str>,
        language: Option<super::Language>,
    ) -> Result<Vec<i64>> {
        get_trigram_candidates(self.conn(), trigrams, project, language)
    }
}

/// Connection-level variant used by pool workers and grep workers.
pub fn get_trigram_candidates(
    conn: &Connection,
    trigrams: &HashSet<u32>,
    project: Option<&str>,
    language: Option<super::Language>,
) -> Result<Vec<i64>> {
    if trigrams.is_empty() {
        return Ok(Vec::new());
    }

    let mut lists = Vec::with_capacity(trigrams.len());
    let mut stmt = conn.prepare("SELECT file_ids FROM trigram_postings WHERE trigram = ?1")?;
    for &trigram in trigrams {
        let blob: Option<Vec<u8>> = stmt
            .query_row([trigram], |row| row.get(0))
            .optional()?;
        match blob {
            // A trigram no stored file contains: intersection is empty
            None => return Ok(Vec::new()),
            Some(blob) => lists.push(decode_posting(&blob)?),
        }
    }

    let candidates = intersect_postings(lists);
    if candidates.is_empty() || (project.is_none() && language.is_none()) {
        return Ok(candidates.into_iter().map(i64::from).collect());
    }

    filter_file_ids(conn, &candidates, project, language)
}

/// Keep only ids whose file row matches the predicates. Candidate sets
/// are already small, so a per-id primary-key probe is cheap.
fn filter_file_ids(
    conn: &Connection,
    ids: &[u32],
    project: Option<&str>,
    language: Option<super::Language>,
) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare("SELECT project, language FROM files WHERE id = ?1")?;
    for &id in ids {
        let row = stmt
            .query_row([i64::from(id)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        let Some((file_project, file_language)) = row else {
            continue;
        };
        let project_ok = project.map_or(true, |want| file_project == want);
        let language_ok = language.map_or(true, |want| file_language == want.as_str());
        if project_ok && language_ok {
            out.push(i64::from(id));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_encoding_round_trips() {
        let ids = vec![1u32, 7, 42, 90_000];
        assert_eq!(decode_posting(&encode_posting(&ids)).unwrap(), ids);
        assert!(decode_posting(&[1, 2, 3]).is_err());
    }

    #[test]
    fn intersection_picks_common_ids() {
        let lists = vec![
            vec![1, 3, 5, 7, 9, 11],
            vec![2, 3, 7, 8, 11, 200],
            vec![3, 7, 11],
        ];
        assert_eq!(intersect_postings(lists), vec![3, 7, 11]);
    }

    #[test]
    fn intersection_with_disjoint_list_is_empty() {
        let lists = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert!(intersect_postings(lists).is_empty());
    }

    #[test]
    fn intersection_of_single_list_is_identity() {
        assert_eq!(intersect_postings(vec![vec![1, 5, 9]]), vec![1, 5, 9]);
        assert!(intersect_postings(vec![]).is_empty());
    }

    #[test]
    fn gallop_finds_insertion_points() {
        let list = [10u32, 20, 30, 40, 50];
        assert_eq!(gallop(&list, 0, 5), 0);
        assert_eq!(gallop(&list, 0, 30), 2);
        assert_eq!(gallop(&list, 2, 45), 4);
        assert_eq!(gallop(&list, 0, 99), 5);
    }
}
