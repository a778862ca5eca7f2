//! Fragment insertion into shared files at anchor lines.
//!
//! Two strategies:
//!
//! - **Append**: every line containing the anchor gets the fragment inserted
//!   after it. Running twice inserts twice.
//! - **Merge**: the fragment is wrapped in begin/end marker lines keyed by a
//!   block id. Re-merging the same id replaces the block in place, so
//!   regenerating an entity never duplicates its registrations.
//!
//! Anchor lines themselves are never moved or consumed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, ScaffoldError};

const BEGIN_MARKER: &str = "// @scaffold:begin ";
const END_MARKER: &str = "// @scaffold:end ";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    #[default]
    Merge,
    Append,
}

/// Insert `fragment` after every line of `content` that contains `anchor`.
///
/// Returns the new content and the number of insertions. Lines are split on
/// `\n` and re-joined with `\n`, so all other bytes (including a trailing
/// newline) are preserved.
pub fn append_after_anchor(content: &str, fragment: &str, anchor: &str) -> (String, usize) {
    let mut out: Vec<&str> = Vec::new();
    let mut count = 0;
    for line in content.split('\n') {
        out.push(line);
        if line.contains(anchor) {
            out.push(fragment);
            count += 1;
        }
    }
    (out.join("\n"), count)
}

/// Apply [`append_after_anchor`] to a file in place.
///
/// The file is left untouched when no line contains the anchor.
pub fn patch_file(path: &Path, fragment: &str, anchor: &str) -> Result<usize> {
    let content = std::fs::read_to_string(path).map_err(|e| ScaffoldError::io(path, e))?;
    let (patched, count) = append_after_anchor(&content, fragment, anchor);
    if count > 0 {
        std::fs::write(path, patched).map_err(|e| ScaffoldError::io(path, e))?;
    }
    debug!(path = %path.display(), insertions = count, "Patched file");
    Ok(count)
}

/// Merge `fragment` as block `block_id` below the single `anchor` line.
///
/// Block ids have the form `<slot>/<entity>`. A new block goes after the
/// last existing block of the same slot, or directly after the anchor when
/// the slot is empty.
pub fn merge_block(content: &str, anchor: &str, block_id: &str, fragment: &str) -> Result<String> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();

    let anchors: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains(anchor) && !is_marker(l))
        .map(|(i, _)| i)
        .collect();
    if anchors.len() != 1 {
        return Err(ScaffoldError::Anchor {
            path: PathBuf::new(),
            anchor: anchor.to_string(),
            found: anchors.len(),
        });
    }
    let anchor_idx = anchors[0];
    let indent: String = lines[anchor_idx]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();

    let begin = format!("{}{}", BEGIN_MARKER, block_id);
    let end = format!("{}{}", END_MARKER, block_id);

    let mut block = Vec::new();
    block.push(format!("{}{}", indent, begin));
    for line in fragment.trim_end_matches('\n').split('\n') {
        if line.is_empty() {
            block.push(String::new());
        } else {
            block.push(format!("{}{}", indent, line));
        }
    }
    block.push(format!("{}{}", indent, end));

    if let Some(start) = lines.iter().position(|l| l.trim() == begin) {
        let stop = lines[start..]
            .iter()
            .position(|l| l.trim() == end)
            .map(|offset| start + offset)
            .ok_or_else(|| {
                ScaffoldError::Internal(format!("block '{}' has no end marker", block_id))
            })?;
        lines.splice(start..=stop, block);
        return Ok(lines.join("\n"));
    }

    let slot = block_slot(block_id);
    let insert_at = lines
        .iter()
        .rposition(|l| {
            l.trim()
                .strip_prefix(END_MARKER)
                .is_some_and(|id| block_slot(id) == slot)
        })
        .map_or(anchor_idx + 1, |i| i + 1);

    lines.splice(insert_at..insert_at, block);
    Ok(lines.join("\n"))
}

/// Remove block `block_id` if present. Returns the content unchanged
/// otherwise.
pub fn remove_block(content: &str, block_id: &str) -> String {
    let begin = format!("{}{}", BEGIN_MARKER, block_id);
    let end = format!("{}{}", END_MARKER, block_id);
    let lines: Vec<&str> = content.split('\n').collect();
    let Some(start) = lines.iter().position(|l| l.trim() == begin) else {
        return content.to_string();
    };
    let Some(stop) = lines[start..].iter().position(|l| l.trim() == end) else {
        return content.to_string();
    };
    let mut kept = lines[..start].to_vec();
    kept.extend_from_slice(&lines[start + stop + 1..]);
    kept.join("\n")
}

/// Apply one fragment to in-memory content with the configured strategy.
pub fn apply(
    mode: PatchMode,
    path: &Path,
    content: &str,
    anchor: &str,
    block_id: &str,
    fragment: &str,
) -> Result<String> {
    match mode {
        PatchMode::Merge => merge_block(content, anchor, block_id, fragment).map_err(|e| match e {
            ScaffoldError::Anchor { anchor, found, .. } => ScaffoldError::Anchor {
                path: path.to_path_buf(),
                anchor,
                found,
            },
            other => other,
        }),
        PatchMode::Append => Ok(append_after_anchor(content, fragment, anchor).0),
    }
}

fn is_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with(BEGIN_MARKER) || trimmed.starts_with(END_MARKER)
}

fn block_slot(block_id: &str) -> &str {
    block_id.split_once('/').map_or(block_id, |(slot, _)| slot)
}
