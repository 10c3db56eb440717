//! File operations against a resolved workspace path.
//!
//! The fast paths for `find` and `grep` shell out to `fd`/`rg` when those
//! binaries exist on PATH; the in-process fallbacks (walkdir + globset /
//! regex) produce the same result shape and the same lexical ordering, so
//! callers cannot tell which path ran.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine;
use globset::GlobBuilder;
use log::debug;
use regex::RegexBuilder;
use tokio::fs;
use tokio::process::Command;
use walkdir::WalkDir;

use super::diff::unified_diff;
use crate::error::{ExecError, ExecResult};
use crate::exec::GrepOptions;
use burrow_protocol::{
    EditResult, FindResult, GrepResult, LsResult, ReadKind, ReadResult, WriteResult,
};

pub(crate) const DEFAULT_READ_LIMIT: usize = 2000;
pub(crate) const DEFAULT_LS_LIMIT: usize = 1000;
pub(crate) const DEFAULT_FIND_LIMIT: usize = 1000;
pub(crate) const DEFAULT_GREP_LIMIT: usize = 200;

/// Read a file, windowed by a 1-indexed line offset and a line limit.
/// Image files are returned base64-encoded.
pub(crate) async fn read_file(
    path: &Path,
    offset: Option<usize>,
    limit: Option<usize>,
) -> ExecResult<ReadResult> {
    let is_image = mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE);
    if is_image {
        let bytes = fs::read(path).await?;
        return Ok(ReadResult {
            kind: ReadKind::Image,
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
            total_lines: None,
            has_more: None,
        });
    }

    let bytes = fs::read(path).await?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();

    let start = offset.unwrap_or(1).max(1) - 1;
    let limit = limit.unwrap_or(DEFAULT_READ_LIMIT).max(1);
    let end = (start + limit).min(total);
    let window = if start >= total { &[][..] } else { &lines[start..end] };

    Ok(ReadResult {
        kind: ReadKind::Text,
        content: window.join("\n"),
        total_lines: Some(total),
        has_more: Some(end < total),
    })
}

/// Write a file, creating parent directories. The diff against the previous
/// content is included when the file already existed.
pub(crate) async fn write_file(path: &Path, content: &str) -> ExecResult<WriteResult> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let previous = match fs::read(path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => None,
    };

    fs::write(path, content).await?;
    debug!("wrote {} bytes to {}", content.len(), path.display());

    let diff = previous
        .map(|old| unified_diff(&old, content))
        .filter(|d| !d.is_empty());
    Ok(WriteResult { ok: true, diff })
}

/// Replace `old_text` with `new_text`; `old_text` must occur exactly once.
pub(crate) async fn edit_file(
    path: &Path,
    old_text: &str,
    new_text: &str,
) -> ExecResult<EditResult> {
    let bytes = fs::read(path).await?;
    let content = String::from_utf8_lossy(&bytes).into_owned();

    let found = content.matches(old_text).count();
    if found != 1 {
        return Err(ExecError::AmbiguousOrMissingMatch { found });
    }

    let updated = content.replacen(old_text, new_text, 1);
    fs::write(path, &updated).await?;

    let diff = unified_diff(&content, &updated);
    Ok(EditResult {
        ok: true,
        diff: Some(diff),
    })
}

/// List a directory: lexically sorted entries, directories suffixed `/`,
/// truncated at `limit` with a trailing marker line.
pub(crate) async fn list_directory(path: &Path, limit: Option<usize>) -> ExecResult<LsResult> {
    let limit = limit.unwrap_or(DEFAULT_LS_LIMIT).max(1);

    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(path).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();

    let remaining = entries.len().saturating_sub(limit);
    entries.truncate(limit);
    if remaining > 0 {
        entries.push(format!("... ({remaining} more entries)"));
    }

    Ok(LsResult {
        output: entries.join("\n"),
    })
}

/// Find files under `root` whose relative path matches `pattern`.
pub(crate) async fn find_files(
    root: &Path,
    pattern: &str,
    limit: Option<usize>,
    use_fd: bool,
) -> ExecResult<FindResult> {
    let limit = limit.unwrap_or(DEFAULT_FIND_LIMIT).max(1);

    let matcher = GlobBuilder::new(pattern)
        .build()
        .map_err(|e| ExecError::InvalidPattern(e.to_string()))?
        .compile_matcher();

    // Enumeration is the only part the external binary accelerates; the
    // match, sort, and truncation below are shared so both paths agree.
    let names = if use_fd {
        match list_files_fd(root).await {
            Ok(names) => names,
            Err(e) => {
                debug!("fd enumeration failed, falling back to walk: {e}");
                list_files_walk(root)
            }
        }
    } else {
        list_files_walk(root)
    };

    let mut files: Vec<String> = names
        .into_iter()
        .filter(|name| matcher.is_match(Path::new(name)))
        .collect();
    files.sort();

    let truncated = files.len() > limit;
    files.truncate(limit);

    Ok(FindResult {
        files,
        truncated,
        limit,
    })
}

async fn list_files_fd(root: &Path) -> std::io::Result<Vec<String>> {
    let output = Command::new("fd")
        .args(["--type", "f", "--hidden", "--no-ignore", "--color", "never"])
        .current_dir(root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim_start_matches("./").to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

fn list_files_walk(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| relative_display(root, entry.path()))
        .collect()
}

/// Search file contents under `base` (a directory or single file).
/// Matches are reported as `path:line: text` relative to `base`.
pub(crate) async fn search_content(
    base: &Path,
    query: &GrepOptions,
    use_rg: bool,
) -> ExecResult<GrepResult> {
    let limit = query.limit.unwrap_or(DEFAULT_GREP_LIMIT).max(1);

    let mut matches = if use_rg {
        match grep_collect_rg(base, query).await {
            Ok(matches) => matches,
            Err(ExecError::Io(e)) => {
                debug!("rg search failed, falling back to scan: {e}");
                grep_collect_native(base, query)?
            }
            Err(e) => return Err(e),
        }
    } else {
        grep_collect_native(base, query)?
    };

    matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
    matches.truncate(limit);

    if matches.is_empty() {
        return Ok(GrepResult::no_matches());
    }

    let context = query.context.unwrap_or(0);
    let content = if context == 0 {
        matches
            .iter()
            .map(|m| format!("{}:{}: {}", m.path, m.line, m.text))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        format_with_context(base, &matches, context).await
    };

    Ok(GrepResult { content })
}

struct GrepMatch {
    path: String,
    line: usize,
    text: String,
}

async fn grep_collect_rg(base: &Path, query: &GrepOptions) -> ExecResult<Vec<GrepMatch>> {
    let (cwd, target) = if base.is_dir() {
        (base.to_path_buf(), PathBuf::from("."))
    } else {
        let parent = base
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = base
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        (parent, file)
    };

    let mut cmd = Command::new("rg");
    cmd.current_dir(cwd)
        .arg("--line-number")
        .arg("--with-filename")
        .arg("--no-heading")
        .arg("--color")
        .arg("never")
        .arg("--sort")
        .arg("path");
    if query.ignore_case {
        cmd.arg("-i");
    }
    if query.literal {
        cmd.arg("-F");
    }
    if let Some(glob) = &query.glob {
        cmd.arg("-g").arg(glob);
    }
    cmd.arg(&query.pattern).arg(target);

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout
                .lines()
                .filter_map(|line| {
                    let mut parts = line.splitn(3, ':');
                    let path = parts.next()?.trim_start_matches("./").to_string();
                    let line_no: usize = parts.next()?.parse().ok()?;
                    let text = parts.next()?.to_string();
                    Some(GrepMatch {
                        path,
                        line: line_no,
                        text,
                    })
                })
                .collect())
        }
        Some(1) => Ok(Vec::new()),
        Some(2) => Err(ExecError::InvalidPattern(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        _ => Err(ExecError::Io(std::io::Error::other(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))),
    }
}

fn grep_collect_native(base: &Path, query: &GrepOptions) -> ExecResult<Vec<GrepMatch>> {
    let pattern = if query.literal {
        regex::escape(&query.pattern)
    } else {
        query.pattern.clone()
    };
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(query.ignore_case)
        .build()
        .map_err(|e| ExecError::InvalidPattern(e.to_string()))?;

    let matcher = match &query.glob {
        Some(glob) => Some(
            GlobBuilder::new(glob)
                .build()
                .map_err(|e| ExecError::InvalidPattern(e.to_string()))?
                .compile_matcher(),
        ),
        None => None,
    };

    let mut files: Vec<PathBuf> = if base.is_file() {
        vec![base.to_path_buf()]
    } else {
        WalkDir::new(base)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.path().to_path_buf())
            .collect()
    };
    files.sort();

    let mut matches = Vec::new();
    for file in files {
        let relative = if base.is_file() {
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.to_string_lossy().into_owned())
        } else {
            relative_display(base, &file)
        };
        if let Some(matcher) = &matcher {
            if !matcher.is_match(Path::new(&relative)) {
                continue;
            }
        }

        let Ok(bytes) = std::fs::read(&file) else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        for (index, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(GrepMatch {
                    path: relative.clone(),
                    line: index + 1,
                    text: line.to_string(),
                });
            }
        }
    }

    Ok(matches)
}

/// Render matches with `context` surrounding lines per match, merging
/// overlapping windows and separating disjoint groups with `--`.
async fn format_with_context(base: &Path, matches: &[GrepMatch], context: usize) -> String {
    let mut by_file: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for m in matches {
        by_file.entry(&m.path).or_default().push(m.line);
    }

    let mut blocks = Vec::new();
    for (path, line_numbers) in by_file {
        let full = if base.is_file() {
            base.to_path_buf()
        } else {
            base.join(path)
        };
        let Ok(bytes) = fs::read(&full).await else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let lines: Vec<&str> = content.lines().collect();

        // Merge overlapping windows into contiguous ranges.
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for &line in &line_numbers {
            let start = line.saturating_sub(context + 1) + 1;
            let end = (line + context).min(lines.len());
            match ranges.last_mut() {
                Some((_, last_end)) if start <= *last_end + 1 => {
                    *last_end = (*last_end).max(end);
                }
                _ => ranges.push((start, end)),
            }
        }

        for (start, end) in ranges {
            let mut block = String::new();
            for line_no in start..=end {
                if let Some(text) = lines.get(line_no - 1) {
                    block.push_str(&format!("{path}:{line_no}: {text}\n"));
                }
            }
            blocks.push(block.trim_end().to_string());
        }
    }

    blocks.join("\n--\n")
}

fn relative_display(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
