// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Framed source excerpts for fatal diagnostics.
//!
//! Errors abort the compilation; the caller renders the offending
//! source region as a banner with a caret under the bad column.

/// Render a framed excerpt of `source` around byte `offset`.
pub fn render(source: &str, offset: usize, title: &str, message: &str) -> String {
    let offset = offset.min(source.len());

    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = source[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(source.len());

    let line_no = source[..line_start].matches('\n').count() + 1;
    let column = source[line_start..offset].chars().count();

    let header = format!("------------ {title} ------------");
    let footer = "-".repeat(header.chars().count());

    let mut out = String::new();
    out.push_str(&header);
    out.push('\n');
    out.push_str(message);
    out.push('\n');
    out.push_str(&format!("at line {line_no}:\n"));
    out.push_str(&format!("  {}\n", &source[line_start..line_end]));
    out.push_str(&format!("  {}^\n", " ".repeat(column)));
    out.push_str(&footer);

    out
}
