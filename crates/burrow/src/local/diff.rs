//! Minimal unified-style diff of the changed region.
//!
//! Edits replace exactly one contiguous region, so the diff is a single
//! hunk: the common prefix and suffix are stripped and a couple of context
//! lines are kept around what changed.

/// Lines of context kept on each side of the changed region.
const CONTEXT: usize = 2;

/// Render a unified-style diff hunk covering only the changed region.
/// Returns an empty string when the inputs are identical.
pub(crate) fn unified_diff(old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut start = 0;
    while start < old_lines.len()
        && start < new_lines.len()
        && old_lines[start] == new_lines[start]
    {
        start += 1;
    }

    let mut old_end = old_lines.len();
    let mut new_end = new_lines.len();
    while old_end > start && new_end > start && old_lines[old_end - 1] == new_lines[new_end - 1] {
        old_end -= 1;
        new_end -= 1;
    }

    let ctx_start = start.saturating_sub(CONTEXT);
    let old_ctx_end = (old_end + CONTEXT).min(old_lines.len());
    let new_ctx_end = (new_end + CONTEXT).min(new_lines.len());

    let old_count = old_ctx_end - ctx_start;
    let new_count = new_ctx_end - ctx_start;
    let old_start = if old_count == 0 { ctx_start } else { ctx_start + 1 };
    let new_start = if new_count == 0 { ctx_start } else { ctx_start + 1 };

    let mut out = format!("@@ -{old_start},{old_count} +{new_start},{new_count} @@\n");
    for line in &old_lines[ctx_start..start] {
        out.push(' ');
        out.push_str(line);
        out.push('\n');
    }
    for line in &old_lines[start..old_end] {
        out.push('-');
        out.push_str(line);
        out.push('\n');
    }
    for line in &new_lines[start..new_end] {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    for line in &old_lines[old_end..old_ctx_end] {
        out.push(' ');
        out.push_str(line);
        out.push('\n');
    }
    out
}
