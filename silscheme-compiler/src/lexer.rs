// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Tokenizer for silscheme source text.
//!
//! Tokens keep their raw lexeme (string literals retain the quotes)
//! and the byte offset of their first character for diagnostics.

use crate::{Error, MAX_TOKENS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub offset: usize,
}

impl Token {
    pub fn new(text: impl Into<String>, offset: usize) -> Self {
        Self {
            text: text.into(),
            offset,
        }
    }
}

pub fn lex(src: &str) -> Result<Vec<Token>, Error> {
    let mut out = Vec::new();
    let mut it = src.char_indices().peekable();

    while let Some(&(i, ch)) = it.peek() {
        match ch {
            '(' | ')' | '\'' | '`' | ',' => {
                out.push(Token::new(ch.to_string(), i));
                it.next();
            }
            ';' => {
                // Line comment; skip until end of line.
                it.next();

                while let Some(&(_, c2)) = it.peek() {
                    if c2 == '\n' {
                        break;
                    }

                    it.next();
                }
            }
            '"' => {
                let mut s = String::from('"');
                it.next();

                let mut closed = false;
                while let Some(&(_, c2)) = it.peek() {
                    match c2 {
                        '"' => {
                            s.push('"');
                            it.next();

                            closed = true;
                            break;
                        }
                        '\\' => {
                            // Keep escapes verbatim; the lexeme is raw text.
                            s.push('\\');
                            it.next();

                            if let Some(&(_, e)) = it.peek() {
                                s.push(e);
                                it.next();
                            }
                        }
                        c => {
                            s.push(c);
                            it.next();
                        }
                    }
                }

                if !closed {
                    return Err(Error::UnterminatedString(i));
                }

                out.push(Token::new(s, i));
            }
            c if c.is_whitespace() => {
                it.next();
            }
            _ => {
                // Maximal run of atom characters.
                let mut s = String::new();
                while let Some(&(_, c2)) = it.peek() {
                    if c2.is_whitespace() || matches!(c2, '(' | ')' | ';' | '"') {
                        break;
                    }

                    s.push(c2);
                    it.next();
                }

                out.push(Token::new(s, i));
            }
        }
    }

    if out.len() > MAX_TOKENS {
        return Err(Error::Limit("too many tokens"));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<String> {
        lex(src).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn splits_parens_and_sigils() {
        assert_eq!(
            texts("(car '(1 2))"),
            vec!["(", "car", "'", "(", "1", "2", ")", ")"]
        );
        assert_eq!(texts("`(a ,b)"), vec!["`", "(", "a", ",", "b", ")"]);
    }

    #[test]
    fn records_byte_offsets() {
        let toks = lex("(+ 1 20)").unwrap();
        let offsets: Vec<usize> = toks.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![0, 1, 3, 5, 7]);
    }

    #[test]
    fn ignores_line_comments() {
        let a = texts("(f 1)\n; a comment\n(g 2)");
        let b = texts("(f 1)(g 2)");
        assert_eq!(a, b);
    }

    #[test]
    fn string_lexeme_keeps_quotes() {
        let toks = lex("(display \"hi there\")").unwrap();
        assert_eq!(toks[2].text, "\"hi there\"");
    }

    #[test]
    fn string_escapes_stay_verbatim() {
        let toks = lex(r#"(display "a\"b")"#).unwrap();
        assert_eq!(toks[2].text, r#""a\"b""#);
    }

    #[test]
    fn unterminated_string_errors_with_offset() {
        let err = lex("(display \"oops)").expect_err("lex must fail");
        assert!(matches!(err, Error::UnterminatedString(9)));
    }
}
