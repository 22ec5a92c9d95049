//! Line-level diff used when showing file-edit tool calls.
//!
//! Longest-common-subsequence alignment over lines, after trimming the common
//! prefix and suffix. When removing and adding are equally good the removal is
//! emitted first, giving the usual "deletions before insertions" layout.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::TranscriptMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    pub kind: DiffKind,
    pub line: String,
    /// 1-based; old-text numbering for removals, new-text numbering for additions.
    pub line_number: usize,
}

/// Largest LCS table (in cells) built for one diff; bigger changes are shown
/// as the whole changed block removed, then added.
const MAX_LCS_CELLS: usize = 4_000_000;

pub fn diff(old_text: &str, new_text: &str) -> Vec<DiffLine> {
    let old: Vec<&str> = old_text.split('\n').collect();
    let new: Vec<&str> = new_text.split('\n').collect();

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let removed = |i: usize| DiffLine {
        kind: DiffKind::Removed,
        line: a[i].to_string(),
        line_number: prefix + i + 1,
    };
    let added = |j: usize| DiffLine {
        kind: DiffKind::Added,
        line: b[j].to_string(),
        line_number: prefix + j + 1,
    };

    let cells = (a.len() + 1).saturating_mul(b.len() + 1);
    if cells > MAX_LCS_CELLS {
        log::debug!("Diff of {}x{} lines too large to align", a.len(), b.len());
        return (0..a.len()).map(removed).chain((0..b.len()).map(added)).collect();
    }

    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let width = b.len() + 1;
    let mut lcs = vec![0u32; (a.len() + 1) * width];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            out.push(removed(i));
            i += 1;
        } else {
            out.push(added(j));
            j += 1;
        }
    }
    out.extend((i..a.len()).map(removed));
    out.extend((j..b.len()).map(added));
    out
}

/// Bounded memo of computed diffs keyed by the exact text pair.
///
/// Evicts the oldest insertion once `capacity` is reached.
#[derive(Debug)]
pub struct DiffCache {
    capacity: usize,
    entries: HashMap<(String, String), Arc<Vec<DiffLine>>>,
    order: VecDeque<(String, String)>,
}

impl DiffCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get_or_compute(&mut self, old_text: &str, new_text: &str) -> Arc<Vec<DiffLine>> {
        let key = (old_text.to_string(), new_text.to_string());
        if let Some(hit) = self.entries.get(&key) {
            return Arc::clone(hit);
        }

        let computed = Arc::new(diff(old_text, new_text));
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, Arc::clone(&computed));
        computed
    }

    /// Change the bound, evicting the oldest entries that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static SHARED_CACHE: Lazy<Mutex<DiffCache>> = Lazy::new(|| Mutex::new(DiffCache::new(100)));

pub fn configure_shared_cache(capacity: usize) {
    SHARED_CACHE.lock().set_capacity(capacity);
}

/// Diff through the process-wide cache.
pub fn cached_diff(old_text: &str, new_text: &str) -> Arc<Vec<DiffLine>> {
    SHARED_CACHE.lock().get_or_compute(old_text, new_text)
}

/// Diff lines for a file-editing tool entry, or `None` for other tools.
pub fn edit_diff(message: &TranscriptMessage) -> Option<Vec<DiffLine>> {
    let input = message.tool_input.as_ref()?;
    let text = |value: &Value, key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    match message.tool_name.as_deref()? {
        "Edit" => Some(
            cached_diff(&text(input, "old_string"), &text(input, "new_string")).to_vec(),
        ),
        "Write" => Some(cached_diff("", &text(input, "content")).to_vec()),
        "MultiEdit" => {
            let edits = input.get("edits")?.as_array()?;
            Some(
                edits
                    .iter()
                    .flat_map(|edit| {
                        cached_diff(&text(edit, "old_string"), &text(edit, "new_string")).to_vec()
                    })
                    .collect(),
            )
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};

    /// Rebuild the new text from the old text and a diff.
    fn apply(old_text: &str, lines: &[DiffLine]) -> String {
        let removed: HashSet<usize> = lines
            .iter()
            .filter(|l| l.kind == DiffKind::Removed)
            .map(|l| l.line_number)
            .collect();
        let added: BTreeMap<usize, &str> = lines
            .iter()
            .filter(|l| l.kind == DiffKind::Added)
            .map(|l| (l.line_number, l.line.as_str()))
            .collect();
        let mut kept = old_text
            .split('\n')
            .enumerate()
            .filter(|(i, _)| !removed.contains(&(i + 1)))
            .map(|(_, line)| line);

        let total = old_text.split('\n').count() - removed.len() + added.len();
        let mut out = Vec::with_capacity(total);
        for number in 1..=total {
            match added.get(&number) {
                Some(line) => out.push(*line),
                None => out.push(kept.next().unwrap()),
            }
        }
        out.join("\n")
    }

    #[test]
    fn test_identical_texts_have_empty_diff() {
        assert!(diff("a\nb\nc", "a\nb\nc").is_empty());
        assert!(diff("", "").is_empty());
    }

    #[test]
    fn test_single_insertion_in_large_text_is_one_line() {
        let old: Vec<String> = (0..2000).map(|i| format!("line {}", i)).collect();
        let mut new = old.clone();
        new.insert(1000, "inserted".to_string());

        let lines = diff(&old.join("\n"), &new.join("\n"));
        assert_eq!(
            lines,
            vec![DiffLine {
                kind: DiffKind::Added,
                line: "inserted".to_string(),
                line_number: 1001,
            }]
        );
    }

    #[test]
    fn test_removal_precedes_addition_on_ties() {
        let lines = diff("a\nold\nc", "a\nnew\nc");
        assert_eq!(
            lines,
            vec![
                DiffLine {
                    kind: DiffKind::Removed,
                    line: "old".to_string(),
                    line_number: 2
                },
                DiffLine {
                    kind: DiffKind::Added,
                    line: "new".to_string(),
                    line_number: 2
                },
            ]
        );
    }

    #[test]
    fn test_applying_diff_reconstructs_new_text() {
        let cases = [
            ("a\nb\nc\nd", "a\nc\nd\ne"),
            ("x\ny", "y\nx"),
            ("", "one\ntwo"),
            ("fn main() {\n    println!(\"hi\");\n}", "fn main() {\n    let x = 1;\n    println!(\"{}\", x);\n}"),
            ("same\nsame\nsame", "same\nother\nsame\nsame"),
        ];
        for (old, new) in cases {
            assert_eq!(apply(old, &diff(old, new)), new, "old={:?} new={:?}", old, new);
        }
    }

    #[test]
    fn test_oversized_rewrite_falls_back_to_block_diff() {
        let old: Vec<String> = (0..2100).map(|i| format!("old {}", i)).collect();
        let new: Vec<String> = (0..2100).map(|i| format!("new {}", i)).collect();
        let mut new_text = new.join("\n");
        new_text.push_str("\nshared tail");
        let mut old_text = old.join("\n");
        old_text.push_str("\nshared tail");

        let lines = diff(&old_text, &new_text);

        assert_eq!(lines.len(), 4200);
        assert!(lines[..2100].iter().all(|l| l.kind == DiffKind::Removed));
        assert!(lines[2100..].iter().all(|l| l.kind == DiffKind::Added));
        assert_eq!(lines[2100].line, "new 0");
        assert_eq!(lines[2100].line_number, 1);
        assert_eq!(lines[2099].line_number, 2100);
    }

    #[test]
    fn test_cache_returns_shared_result_and_evicts_oldest() {
        let mut cache = DiffCache::new(2);
        let first = cache.get_or_compute("a", "b");
        let again = cache.get_or_compute("a", "b");
        assert!(Arc::ptr_eq(&first, &again));

        cache.get_or_compute("c", "d");
        cache.get_or_compute("e", "f");
        assert_eq!(cache.len(), 2);

        let recomputed = cache.get_or_compute("a", "b");
        assert!(!Arc::ptr_eq(&first, &recomputed));
        assert_eq!(*first, *recomputed);

        cache.set_capacity(1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_edit_diff_reads_tool_inputs() {
        let edit = TranscriptMessage::tool_use(
            "t1",
            "Edit",
            json!({"file_path": "/a.rs", "old_string": "let x = 1;", "new_string": "let x = 2;"}),
        );
        let lines = edit_diff(&edit).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, DiffKind::Removed);

        let read = TranscriptMessage::tool_use("t2", "Read", json!({"file_path": "/a.rs"}));
        assert!(edit_diff(&read).is_none());
    }
}
