// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Minimal interactive REPL: compile each form and print its IL.
//!
//! Forms can span lines; the prompt continues until parentheses
//! balance. Nothing is executed here.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::CliError;
use silscheme_compiler as compiler;

pub fn cmd_repl() -> Result<(), CliError> {
    println!(
        r"silscheme REPL

  Each form compiles into IL for a module of its own.
  Type :help for help. Ctrl-D to exit."
    );

    let mut rl =
        DefaultEditor::new().map_err(|e| CliError::InvalidInput(format!("repl init: {e}")))?;

    // History path: $HOME/.silscheme_history (fallback: ./.silscheme_history)
    let hist_path = std::env::var("HOME")
        .map(|h| format!("{h}/.silscheme_history"))
        .unwrap_or_else(|_| ".silscheme_history".to_string());
    let _ = rl.load_history(&hist_path);

    let mut acc = String::new();
    let mut need_more = false;
    let mut counter = 0usize;

    loop {
        let prompt = if need_more { ".. " } else { "> " };
        let line = match rl.readline(prompt) {
            Ok(s) => s,
            Err(ReadlineError::Interrupted) => {
                acc.clear();
                need_more = false;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline: {e}");
                break;
            }
        };

        if !need_more {
            match line.trim() {
                "" => continue,
                ":quit" | ":q" => break,
                ":help" => {
                    print_help();
                    continue;
                }
                _ => {}
            }
        }

        acc.push_str(&line);
        acc.push('\n');

        if paren_depth(&acc) > 0 {
            need_more = true;
            continue;
        }
        need_more = false;

        let form = std::mem::take(&mut acc);
        let _ = rl.add_history_entry(form.trim());

        counter += 1;
        let module = format!("repl{counter}");

        match compiler::compile_module(&module, &form) {
            Ok(program) => println!("{}", program.text()),
            Err(e) => {
                crate::report_compile_error(&form, &e);
                eprintln!("error: {e}");
            }
        }
    }

    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn print_help() {
    println!(
        r"  :help          show this help
  :quit, :q      exit the REPL

  Anything else is compiled as silscheme source; the emitted
  IL is printed. Multi-line forms continue until parentheses
  balance."
    );
}

// Depth of unclosed parens, ignoring comments and string literals.
fn paren_depth(src: &str) -> i64 {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut in_comment = false;
    let mut escaped = false;

    for c in src.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '"' => in_string = true,
            ';' => in_comment = true,
            _ => {}
        }
    }

    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paren_depth_tracks_nesting() {
        assert_eq!(paren_depth("(f (g 1)"), 1);
        assert_eq!(paren_depth("(f (g 1))"), 0);
        assert_eq!(paren_depth("(f \"(((\")"), 0);
        assert_eq!(paren_depth("(f ; comment (\n)"), 0);
    }
}
