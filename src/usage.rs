//! Import scan: how often each package is imported across the source tree.
//!
//! Counts `import x` and `from x import …` statements per normalized
//! top-level module name. The agent's own environment directories are
//! excluded so a previous run cannot inflate the scores.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::manifest;

const ENV_DIRS: [&str; 3] = ["temp_venv", "final_venv", "bootstrap_venv"];

static FROM_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+([A-Za-z0-9_\.]+)\s+import\b").expect("valid regex"));

static PLAIN_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid regex"));

/// Tally import statements under `root`, keyed by normalized package name.
pub(crate) fn scan(root: &Path) -> HashMap<String, u32> {
    let mut files = Vec::new();
    collect_py_files(root, &mut files);

    let mut counts = HashMap::new();
    for file in files {
        let Ok(text) = fs::read_to_string(&file) else {
            continue;
        };
        for line in text.lines() {
            tally_line(line, &mut counts);
        }
    }
    counts
}

fn collect_py_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if name.starts_with('.') || ENV_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_py_files(&path, out);
        } else if name.ends_with(".py") {
            out.push(path);
        }
    }
}

fn tally_line(line: &str, counts: &mut HashMap<String, u32>) {
    if let Some(cap) = FROM_IMPORT.captures(line) {
        bump(counts, &cap[1]);
    } else if let Some(cap) = PLAIN_IMPORT.captures(line) {
        for part in cap[1].split(',') {
            if let Some(module) = part.split_whitespace().next() {
                bump(counts, module);
            }
        }
    }
}

fn bump(counts: &mut HashMap<String, u32>, module: &str) {
    let Some(top) = module.split('.').next() else {
        return;
    };
    if top.is_empty() || !top.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return;
    }
    *counts.entry(manifest::normalize_name(top)).or_insert(0) += 1;
}
