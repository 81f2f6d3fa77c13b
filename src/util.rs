//! Terminal status output for the agent: gutter-style progress lines,
//! aligned summary tables, and collapsible log groups.

use std::env;
use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::AgentResult;

/// Stderr with color resolved through the process-wide detection.
fn stderr() -> StandardStream {
    let choice = if concolor_control::get(concolor_control::Stream::Stderr).color() {
        ColorChoice::Always
    } else {
        ColorChoice::Never
    };
    StandardStream::stderr(choice)
}

fn bold(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color)).set_bold(true);
    spec
}

/// Progress line with a right-aligned green gutter word, in the
/// `Attempting requests==2.32.0` grammar the agent speaks throughout a run.
pub fn status(action: &str, message: &str) -> AgentResult<()> {
    let mut out = stderr();
    out.set_color(&bold(Color::Green))?;
    write!(out, "{action:>12}")?;
    out.reset()?;
    writeln!(out, " {message}")?;
    Ok(())
}

/// `warning: …` line for recoverable trouble (failed probes, reverts).
pub fn warn(message: &str) -> AgentResult<()> {
    labeled("warning", Color::Yellow, message)
}

/// `note: …` line for convergence and fallback notices.
pub fn note(message: &str) -> AgentResult<()> {
    labeled("note", Color::Cyan, message)
}

fn labeled(label: &str, color: Color, message: &str) -> AgentResult<()> {
    let mut out = stderr();
    out.set_color(&bold(color))?;
    write!(out, "{label}")?;
    out.set_color(ColorSpec::new().set_bold(true))?;
    write!(out, ":")?;
    out.reset()?;
    writeln!(out, " {message}")?;
    Ok(())
}

/// Three-column summary table: bold header row, the last column painted in
/// `accent`, every column sized to its widest cell.
pub fn table(rows: &[[String; 3]], accent: Color) -> AgentResult<()> {
    let mut width = [0usize; 3];
    for row in rows {
        for (column, cell) in row.iter().enumerate() {
            width[column] = width[column].max(cell.len());
        }
    }

    let mut out = stderr();
    for (index, row) in rows.iter().enumerate() {
        for (column, cell) in row.iter().enumerate() {
            if index == 0 {
                out.set_color(ColorSpec::new().set_bold(true))?;
            } else if column == 2 {
                out.set_color(ColorSpec::new().set_fg(Some(accent)))?;
            }
            write!(out, "{cell:<pad$}", pad = width[column] + 2)?;
            out.reset()?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// A phase of the run worth folding away in CI logs.
///
/// Under GitHub Actions this opens a collapsible `::group::` block; elsewhere
/// it prints a status line. The group closes when the value is dropped.
pub struct Group {
    on_actions: bool,
}

impl Group {
    pub fn open(title: &str) -> Self {
        let on_actions = env::var_os("GITHUB_ACTIONS").is_some();
        if on_actions {
            println!("\n::group::{title}");
        } else {
            let _ = status("Starting", title);
        }
        Group { on_actions }
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        if self.on_actions {
            println!("::endgroup::");
        }
    }
}
