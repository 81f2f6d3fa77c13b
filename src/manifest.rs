//! Requirements-file store: parsing, classification, rewriting, freezing.
//!
//! A manifest is newline-delimited. Blank lines and `#` comments are ignored.
//! Each remaining line is exactly one of an exact pin (`name==version`, with
//! optional extras and environment markers), an editable reference (`-e …`),
//! or some other constraint, which counts as unpinned.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::AgentResult;
use crate::Context as _;

static NAME_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-\.]+").expect("valid regex"));

static EXACT_PIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-\[\]\.]+==[^;]+$").expect("valid regex"));

/// Fold a package name to its canonical identity: lower-case, `_` to `-`.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// The normalized package name at the head of a requirement line, if any.
/// An editable prefix is skipped so `-e` lines name the package they carry,
/// and an extras suffix (`name[extra]`) stops the match: identity is the
/// bare name, as the registry and the import scan know it.
pub fn extract_name(line: &str) -> Option<String> {
    let line = line.trim();
    let line = line.strip_prefix("-e").map(str::trim_start).unwrap_or(line);
    NAME_HEAD.find(line).map(|head| normalize_name(head.as_str()))
}

/// The three shapes a requirement line can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Pinned,
    Editable,
    Unpinned,
}

pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim();
    if line.starts_with("-e") {
        return LineKind::Editable;
    }
    // The pin shape is judged with any environment marker stripped.
    let head = line.split(';').next().unwrap_or_default().trim();
    if EXACT_PIN.is_match(head) {
        LineKind::Pinned
    } else {
        LineKind::Unpinned
    }
}

/// An exact pin pulled out of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// Normalized bare name, any extras suffix stripped.
    pub name: String,
    /// The raw version text to the right of `==`.
    pub version: String,
}

/// A requirements manifest held as trimmed, comment-free lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    lines: Vec<String>,
}

impl Requirements {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect();
        Requirements { lines }
    }

    pub fn load(path: &Path) -> AgentResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// True when no line is an unpinned constraint. Editable references are
    /// preserved verbatim and do not count against pinning.
    pub fn is_fully_pinned(&self) -> bool {
        self.lines
            .iter()
            .all(|line| classify_line(line) != LineKind::Unpinned)
    }

    /// Every exact pin as a `(name, version)` pair.
    pub fn pins(&self) -> Vec<Pin> {
        self.lines
            .iter()
            .filter(|line| classify_line(line) == LineKind::Pinned)
            .filter_map(|line| {
                let head = line.split(';').next().unwrap_or_default().trim();
                let (raw_name, version) = head.split_once("==")?;
                let name = extract_name(raw_name)?;
                Some(Pin {
                    name,
                    version: version.trim().to_owned(),
                })
            })
            .collect()
    }

    /// Move the pin whose extracted name matches `name` to `version`,
    /// keeping the line's own spelling of the head (extras included) and
    /// dropping any environment marker. Editable lines and lines naming
    /// other packages are left untouched.
    pub fn set_pin(&mut self, name: &str, version: &str) {
        let wanted = normalize_name(name);
        for line in &mut self.lines {
            if classify_line(line) != LineKind::Pinned {
                continue;
            }
            if extract_name(line).as_deref() != Some(wanted.as_str()) {
                continue;
            }
            let head = line.split(';').next().unwrap_or_default().trim();
            let spelled = match head.split_once("==") {
                Some((spelled, _)) => spelled.trim().to_owned(),
                None => wanted.clone(),
            };
            *line = format!("{spelled}=={version}");
        }
    }

    pub fn contents(&self) -> String {
        if self.lines.is_empty() {
            String::new()
        } else {
            let mut text = self.lines.join("\n");
            text.push('\n');
            text
        }
    }

    pub fn save_as(&self, path: &Path) -> AgentResult<()> {
        write_atomic(path, &self.contents())
    }
}

/// Reduce `pip freeze` output to exact pins plus editable references,
/// dropping everything else the environment reported.
pub fn prune_freeze(freeze_output: &str) -> String {
    freeze_output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| line.starts_with("-e") || line.contains("=="))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whole-file rewrite through a sibling temp file so readers never observe a
/// half-written manifest.
pub fn write_atomic(path: &Path, contents: &str) -> AgentResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Merge newly discovered dependencies from an "ideal state" file (the output
/// of a resolver such as pip-compile) into the manifest.
///
/// Ideal-state lines are cleaned down to `name==version` (editables are kept
/// verbatim) before they are written. When the manifest is missing or empty
/// it is created from the cleaned ideal state wholesale; otherwise only
/// packages the manifest does not already name are appended, sorted.
pub fn reconcile(manifest_path: &Path, ideal_path: &Path) -> AgentResult<()> {
    let ideal = Requirements::load(ideal_path)
        .with_context(|| format!("ideal-state file {} not found", ideal_path.display()))?;

    let existing = match fs::read_to_string(manifest_path) {
        Ok(text) if !text.trim().is_empty() => Requirements::parse(&text),
        _ => {
            log::info!(
                "manifest {} is missing or empty; creating it from the ideal state",
                manifest_path.display()
            );
            let mut cleaned: Vec<String> =
                ideal.lines().iter().map(|line| clean_ideal_line(line)).collect();
            cleaned.sort();
            write_atomic(manifest_path, &(cleaned.join("\n") + "\n"))?;
            log::info!("created a clean manifest with {} packages", cleaned.len());
            return Ok(());
        }
    };

    let known: BTreeSet<String> = existing
        .lines()
        .iter()
        .filter_map(|line| extract_name(line))
        .collect();
    let mut added: Vec<String> = ideal
        .lines()
        .iter()
        .filter(|line| {
            extract_name(line).is_some_and(|name| !known.contains(&name))
        })
        .map(|line| clean_ideal_line(line))
        .collect();

    if added.is_empty() {
        log::info!("manifest is in sync with the ideal state; no new dependencies found");
        return Ok(());
    }
    added.sort();
    log::info!(
        "adding {} new dependencies to {}",
        added.len(),
        manifest_path.display()
    );
    let mut lines = existing.lines().to_vec();
    lines.append(&mut added);
    write_atomic(manifest_path, &(lines.join("\n") + "\n"))
}

fn clean_ideal_line(line: &str) -> String {
    let line = line.trim();
    if line.starts_with("-e") {
        return line.to_owned();
    }
    line.split(';').next().unwrap_or_default().trim().to_owned()
}
