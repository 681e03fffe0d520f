//! V4A diff parsing and application.
//!
//! A V4A diff is a list of chunks. Each chunk may start with an `@@ anchor`
//! line naming a line to seek to, followed by context (` `), removal (`-`)
//! and addition (`+`) lines. Chunks apply in file order.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLine {
    Context(String),
    Addition(String),
    Removal(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchChunk {
    pub anchor: Option<String>,
    pub lines: Vec<PatchLine>,
    pub is_end_of_file: bool,
}

impl PatchChunk {
    /// Lines the chunk expects to find in the file.
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                PatchLine::Context(text) | PatchLine::Removal(text) => Some(text.as_str()),
                PatchLine::Addition(_) => None,
            })
            .collect()
    }

    /// Replacement for `matched`, the file lines the old lines matched.
    /// Context lines keep the file's own text.
    fn rebuild(&self, matched: &[String]) -> Vec<String> {
        let mut matched = matched.iter();
        let mut out = Vec::new();
        for line in &self.lines {
            match line {
                PatchLine::Context(text) => {
                    out.push(matched.next().cloned().unwrap_or_else(|| text.clone()));
                }
                PatchLine::Removal(_) => {
                    matched.next();
                }
                PatchLine::Addition(text) => out.push(text.clone()),
            }
        }
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("invalid diff line {line}: {message}")]
    InvalidLine { line: usize, message: String },

    #[error("failed to locate anchor '{anchor}' in '{path}'")]
    AnchorNotFound { path: String, anchor: String },

    #[error("failed to locate expected lines in '{path}':\n{snippet}")]
    ContextNotFound { path: String, snippet: String },
}

const END_OF_FILE: &str = "*** End of File";

/// Parse the body of an update diff into chunks.
pub fn parse_chunks(diff: &str) -> Result<Vec<PatchChunk>, PatchError> {
    let mut chunks = Vec::new();
    let mut current = PatchChunk::default();

    for (index, raw) in diff.lines().enumerate() {
        if let Some(anchor) = raw.strip_prefix("@@") {
            if !current.lines.is_empty() || current.anchor.is_some() {
                chunks.push(std::mem::take(&mut current));
            }
            let anchor = anchor.trim();
            current.anchor = (!anchor.is_empty()).then(|| anchor.to_string());
            continue;
        }
        if raw.trim_end() == END_OF_FILE {
            current.is_end_of_file = true;
            continue;
        }

        let line = match raw.chars().next() {
            Some('+') => PatchLine::Addition(raw[1..].to_string()),
            Some('-') => PatchLine::Removal(raw[1..].to_string()),
            Some(' ') => PatchLine::Context(raw[1..].to_string()),
            None => PatchLine::Context(String::new()),
            Some(_) => {
                return Err(PatchError::InvalidLine {
                    line: index + 1,
                    message: format!("expected ' ', '+', '-' or '@@', got '{raw}'"),
                });
            }
        };
        current.lines.push(line);
    }

    if !current.lines.is_empty() || current.anchor.is_some() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// Content of a file created from a diff: every line must be an addition.
pub fn parse_create(diff: &str) -> Result<String, PatchError> {
    let mut lines = Vec::new();
    for (index, raw) in diff.lines().enumerate() {
        match raw.strip_prefix('+') {
            Some(text) => lines.push(text),
            None if raw.trim_end() == END_OF_FILE => {}
            None => {
                return Err(PatchError::InvalidLine {
                    line: index + 1,
                    message: "create diffs may only contain '+' lines".into(),
                });
            }
        }
    }
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    Ok(content)
}

/// Apply an update diff to `original`, returning the new content.
pub fn apply_diff(path: &str, original: &str, diff: &str) -> Result<String, PatchError> {
    let chunks = parse_chunks(diff)?;
    let had_trailing_newline = original.ends_with('\n');
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

    let mut replacements: Vec<(usize, usize, Vec<String>)> = Vec::new();
    let mut cursor = 0;

    for chunk in &chunks {
        if let Some(anchor) = &chunk.anchor {
            let found = seek(&lines, &[anchor.as_str()], cursor, false).ok_or_else(|| {
                PatchError::AnchorNotFound {
                    path: path.to_string(),
                    anchor: anchor.clone(),
                }
            })?;
            cursor = found + 1;
        }

        let old_lines = chunk.old_lines();
        if old_lines.is_empty() {
            let at = if chunk.is_end_of_file { lines.len() } else { cursor };
            replacements.push((at, 0, chunk.rebuild(&[])));
            continue;
        }

        let start = seek(&lines, &old_lines, cursor, chunk.is_end_of_file).ok_or_else(|| {
            PatchError::ContextNotFound {
                path: path.to_string(),
                snippet: old_lines.join("\n"),
            }
        })?;
        let matched = &lines[start..start + old_lines.len()];
        replacements.push((start, old_lines.len(), chunk.rebuild(matched)));
        cursor = start + old_lines.len();
    }

    for (start, len, new_lines) in replacements.into_iter().rev() {
        lines.splice(start..start + len, new_lines);
    }

    let mut content = lines.join("\n");
    if had_trailing_newline || chunks.iter().any(|c| c.is_end_of_file) {
        content.push('\n');
    }
    Ok(content)
}

/// Find `pattern` in `lines` at or after `from`. Exact matches win over
/// matches that ignore trailing whitespace.
fn seek(lines: &[String], pattern: &[&str], from: usize, at_end: bool) -> Option<usize> {
    if pattern.len() > lines.len() {
        return None;
    }
    let last = lines.len() - pattern.len();
    if at_end {
        return (last >= from && matches_at(lines, pattern, last, str::to_string))
            .then_some(last);
    }

    let exact = |s: &str| s.to_string();
    let loose = |s: &str| s.trim_end().to_string();
    (from..=last)
        .find(|&i| matches_at(lines, pattern, i, exact))
        .or_else(|| (from..=last).find(|&i| matches_at(lines, pattern, i, loose)))
}

fn matches_at<F>(lines: &[String], pattern: &[&str], at: usize, normalize: F) -> bool
where
    F: Fn(&str) -> String,
{
    pattern
        .iter()
        .enumerate()
        .all(|(offset, expected)| normalize(&lines[at + offset]) == normalize(expected))
}
