//! Source-context attachment
//!
//! Handlers that receive `contextLines=N` return the surrounding lines of
//! a declaration from the stored (compressed) content; `includeSignatures`
//! reads only the declaration line itself. Content reads are cold-path
//! and go through the query pool, cached per request so several hits in
//! one file decompress it once.

use crate::pool::QueryPool;
use crate::store::files::read_file_content;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    pub start_line: u32,
    pub lines: Vec<String>,
}

/// Per-request cache of decompressed file content.
#[derive(Default)]
pub struct ContentCache {
    files: HashMap<i64, Option<Vec<String>>>,
}

impl ContentCache {
    pub async fn lines(&mut self, pool: &QueryPool, file_id: i64) -> Result<Option<&[String]>> {
        if !self.files.contains_key(&file_id) {
            let content = pool
                .run(move |conn| read_file_content(conn, file_id))
                .await?;
            let lines =
                content.map(|text| text.lines().map(str::to_string).collect::<Vec<String>>());
            self.files.insert(file_id, lines);
        }
        Ok(self.files.get(&file_id).and_then(|v| v.as_deref()))
    }

    /// `[line - n, line + n]` window around a 1-based line.
    pub async fn window(
        &mut self,
        pool: &QueryPool,
        file_id: i64,
        line: u32,
        context_lines: u32,
    ) -> Result<Option<SourceContext>> {
        if context_lines == 0 {
            return Ok(None);
        }
        let Some(lines) = self.lines(pool, file_id).await? else {
            return Ok(None);
        };
        if lines.is_empty() || line == 0 {
            return Ok(None);
        }

        let start = line.saturating_sub(context_lines).max(1);
        let end = (line + context_lines).min(lines.len() as u32);
        if start > end {
            return Ok(None);
        }
        Ok(Some(SourceContext {
            start_line: start,
            lines: lines[(start as usize - 1)..(end as usize)].to_vec(),
        }))
    }

    /// The single declaration line, trimmed, for signature attachment.
    pub async fn declaration_line(
        &mut self,
        pool: &QueryPool,
        file_id: i64,
        line: u32,
    ) -> Result<Option<String>> {
        let Some(lines) = self.lines(pool, file_id).await? else {
            return Ok(None);
        };
        if line == 0 || line as usize > lines.len() {
            return Ok(None);
        }
        Ok(Some(lines[line as usize - 1].trim().to_string()))
    }
}
