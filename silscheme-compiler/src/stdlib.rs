// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Stdlib short-name resolution for `import` preprocessing.
//!
//! `(import utils)` resolves `utils` against the stdlib base
//! directory; the module loader fetches the file later.

use std::env;

/// Overrides the stdlib base directory (default `stdlib`).
pub const STDLIB_ENV: &str = "SILSCHEME_STDLIB";

pub fn get_stdlib_path(name: &str) -> String {
    let base = env::var(STDLIB_ENV).unwrap_or_else(|_| "stdlib".to_string());

    format!("{}/{name}.scm", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the env mutation cannot race a parallel sibling.
    #[test]
    fn resolves_against_default_and_env_base() {
        env::remove_var(STDLIB_ENV);
        assert_eq!(get_stdlib_path("utils"), "stdlib/utils.scm");

        env::set_var(STDLIB_ENV, "/opt/silscheme/lib/");
        assert_eq!(get_stdlib_path("list"), "/opt/silscheme/lib/list.scm");
        env::remove_var(STDLIB_ENV);
    }
}
