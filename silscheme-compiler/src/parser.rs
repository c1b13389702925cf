// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! Recursive-descent parser with a quotation-context stack.
//!
//! The grammar:
//!
//! ```text
//! Term       := Lambda | Quote | Unquote | Quasiquote | SList | Symbol
//! Lambda     := '(' 'lambda' ArgList Body ')'
//! ArgList    := '(' Symbol* ')'
//! Body       := Term+
//! Quote      := "'" Term
//! Unquote    := ","  Term
//! Quasiquote := "`"  Term
//! SList      := '(' Term* ')'
//! ```
//!
//! A symbol's meaning depends on the enclosing quotation state, so the
//! parser threads a state stack; constructed handles are returned
//! upward from each production rather than going through a node stack.
//! After parsing, a preprocessing pass resolves `import` and `native`
//! forms and a marking pass records tail-position applications.

use crate::ast::{Ast, Handle, Node, TOP_NODE_HANDLE};
use crate::lexer::Token;
use crate::types::{self, Type};
use crate::{stdlib, Error, MAX_PARSE_DEPTH};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QuoteState {
    Parameter,
    Quote,
    Quasiquote,
    Unquote,
}

struct Parser<'a> {
    tokens: &'a [Token],
    ast: Ast,
    state_stack: Vec<QuoteState>,
    depth: usize,
}

/// Parse a token stream into a preprocessed AST.
///
/// `source` is kept on the AST verbatim for diagnostics; every
/// recorded offset points into it.
pub fn parse(tokens: &[Token], module_name: &str, source: &str) -> Result<Ast, Error> {
    let mut parser = Parser {
        tokens,
        ast: Ast::new(module_name),
        state_stack: Vec::new(),
        depth: 0,
    };

    parser.parse_term(0, TOP_NODE_HANDLE)?;

    let mut ast = parser.ast;
    ast.source = source.to_string();

    preprocess(&mut ast)?;
    mark_tail_calls(&mut ast);

    Ok(ast)
}

impl<'a> Parser<'a> {
    fn token(&self, index: usize) -> Result<&'a Token, Error> {
        self.tokens.get(index).ok_or(Error::Eof)
    }

    fn state(&self) -> Option<QuoteState> {
        self.state_stack.last().copied()
    }

    // Returns the index after the term and the term's handle-or-string.
    fn parse_term(&mut self, index: usize, parent: &str) -> Result<(usize, String), Error> {
        if self.depth > MAX_PARSE_DEPTH {
            return Err(Error::Limit("parse depth exceeded"));
        }

        self.depth += 1;
        let res = self.parse_term_inner(index, parent);
        self.depth -= 1;

        res
    }

    fn parse_term_inner(&mut self, index: usize, parent: &str) -> Result<(usize, String), Error> {
        let tok = self.token(index)?;
        let quoting = matches!(
            self.state(),
            Some(QuoteState::Quote) | Some(QuoteState::Quasiquote)
        );

        let starts_lambda = tok.text == "("
            && self
                .tokens
                .get(index + 1)
                .is_some_and(|t| t.text == "lambda");

        match tok.text.as_str() {
            _ if !quoting && starts_lambda => {
                trace!(index, "term -> lambda");
                self.parse_lambda(index, parent)
            }
            "'" => {
                trace!(index, "term -> quote");
                self.parse_quote(index, parent)
            }
            "," => {
                trace!(index, "term -> unquote");
                self.parse_sigil(index, parent, QuoteState::Unquote)
            }
            "`" => {
                trace!(index, "term -> quasiquote");
                self.parse_sigil(index, parent, QuoteState::Quasiquote)
            }
            "(" => {
                trace!(index, "term -> slist");
                self.parse_slist(index, parent)
            }
            text if is_symbol(text) => self.parse_symbol(index, parent),
            text => Err(Error::UndefinedToken {
                token: text.to_string(),
                offset: tok.offset,
            }),
        }
    }

    fn parse_lambda(&mut self, index: usize, parent: &str) -> Result<(usize, String), Error> {
        let open = self.token(index)?.offset;

        let handle = self.ast.make_lambda(parent);
        self.ast.set_source_index(&handle, open);

        // Skip '(' and 'lambda'.
        let next = self.parse_arg_list(index + 2, &handle)?;
        let next = self.parse_body(next, &handle)?;

        match self.tokens.get(next) {
            Some(t) if t.text == ")" => Ok((next + 1, handle)),
            _ => Err(Error::MissingRParen {
                context: "lambda",
                offset: open,
            }),
        }
    }

    fn parse_arg_list(&mut self, index: usize, lambda: &str) -> Result<usize, Error> {
        let open = self.token(index)?;
        if open.text != "(" {
            return Err(Error::MissingLParen {
                offset: open.offset,
            });
        }
        let open_offset = open.offset;

        self.state_stack.push(QuoteState::Parameter);
        let result = self.parse_arg_list_seq(index + 1, lambda);
        self.state_stack.pop();
        let next = result?;

        match self.tokens.get(next) {
            Some(t) if t.text == ")" => Ok(next + 1),
            _ => Err(Error::MissingRParen {
                context: "the parameter list",
                offset: open_offset,
            }),
        }
    }

    fn parse_arg_list_seq(&mut self, index: usize, lambda: &str) -> Result<usize, Error> {
        let mut index = index;

        while let Some(tok) = self.tokens.get(index) {
            if !is_symbol(&tok.text) {
                break;
            }

            let offset = tok.offset;
            let (next, parameter) = self.parse_symbol(index, lambda)?;

            let Some(Node::Lambda(lam)) = self.ast.get_mut(lambda) else {
                return Err(Error::Internal("parameter outside a lambda"));
            };
            if !lam.add_parameter(parameter.clone()) {
                return Err(Error::DuplicateParameter {
                    name: parameter,
                    offset,
                });
            }

            index = next;
        }

        Ok(index)
    }

    fn parse_body(&mut self, index: usize, lambda: &str) -> Result<usize, Error> {
        // Body := Term+
        let (mut index, first) = self.parse_term(index, lambda)?;
        self.add_body(lambda, first)?;

        while let Some(tok) = self.tokens.get(index) {
            if !starts_term(&tok.text) {
                break;
            }

            let (next, body) = self.parse_term(index, lambda)?;
            self.add_body(lambda, body)?;
            index = next;
        }

        Ok(index)
    }

    fn add_body(&mut self, lambda: &str, hos: String) -> Result<(), Error> {
        let Some(Node::Lambda(lam)) = self.ast.get_mut(lambda) else {
            return Err(Error::Internal("body outside a lambda"));
        };
        lam.add_body(hos);

        Ok(())
    }

    // The ' sigil wraps even a bare atom in an explicit Quote node.
    fn parse_quote(&mut self, index: usize, parent: &str) -> Result<(usize, String), Error> {
        let handle = self.ast.make_quote(parent);
        let offset = self.token(index + 1)?.offset;
        self.ast.set_source_index(&handle, offset);

        self.state_stack.push(QuoteState::Quote);
        let result = self.parse_term(index + 1, &handle);
        self.state_stack.pop();

        let (next, child) = result?;
        self.ast.add_child(&handle, child);

        Ok((next, handle))
    }

    // ` and , bind to the next term; the node (if any) is allocated by
    // parse_slist once it sees the state on top of the stack.
    fn parse_sigil(
        &mut self,
        index: usize,
        parent: &str,
        state: QuoteState,
    ) -> Result<(usize, String), Error> {
        self.state_stack.push(state);
        let result = self.parse_term(index + 1, parent);
        self.state_stack.pop();

        result
    }

    fn parse_slist(&mut self, index: usize, parent: &str) -> Result<(usize, String), Error> {
        let open_offset = self.token(index)?.offset;

        // (quote ...) behaves exactly like the ' sigil.
        let explicit_quote = self
            .tokens
            .get(index + 1)
            .is_some_and(|t| t.text == "quote");
        if explicit_quote {
            self.state_stack.push(QuoteState::Quote);
        }

        let handle = match self.state() {
            Some(QuoteState::Quote) => self.ast.make_quote(parent),
            Some(QuoteState::Quasiquote) => self.ast.make_quasiquote(parent),
            Some(QuoteState::Unquote) => self.ast.make_unquote(parent),
            _ => self.ast.make_application(parent),
        };
        self.ast.set_source_index(&handle, open_offset);

        let mut index = index + 1;
        loop {
            let Some(tok) = self.tokens.get(index) else {
                if explicit_quote {
                    self.state_stack.pop();
                }

                return Err(Error::MissingRParen {
                    context: "the list",
                    offset: open_offset,
                });
            };

            if tok.text == ")" {
                break;
            }

            let result = self.parse_term(index, &handle);
            let (next, child) = match result {
                Ok(ok) => ok,
                Err(e) => {
                    if explicit_quote {
                        self.state_stack.pop();
                    }

                    return Err(e);
                }
            };

            self.ast.add_child(&handle, child);
            index = next;
        }

        if explicit_quote {
            self.state_stack.pop();
        }

        Ok((index + 1, handle))
    }

    fn parse_symbol(&mut self, index: usize, parent: &str) -> Result<(usize, String), Error> {
        let tok = self.token(index)?;
        let text = tok.text.clone();
        let offset = tok.offset;

        if !is_symbol(&text) {
            return Err(Error::IllegalSymbol {
                token: text,
                offset,
            });
        }

        let ty = types::type_of(&text);
        let hos = match self.state() {
            Some(QuoteState::Quote) | Some(QuoteState::Quasiquote) => match ty {
                Type::Number | Type::Symbol => text,
                Type::String => self.make_string_node(parent, &text, offset),
                Type::Variable | Type::Keyword | Type::Port
                    if text != "quasiquote" && text != "quote" && text != "unquote" =>
                {
                    // Quoted names become symbol literals.
                    format!("'{text}")
                }
                _ => text,
            },
            Some(QuoteState::Unquote) => match ty {
                // Unquoting strips the symbol marker.
                Type::Symbol => text.replace('\'', ""),
                Type::Number => text,
                Type::String => self.make_string_node(parent, &text, offset),
                Type::Variable | Type::Keyword | Type::Boolean | Type::Port => text,
                _ => {
                    return Err(Error::IllegalSymbol {
                        token: text,
                        offset,
                    })
                }
            },
            _ => match ty {
                Type::Number | Type::Symbol => text,
                Type::String => self.make_string_node(parent, &text, offset),
                Type::Variable | Type::Keyword | Type::Boolean | Type::Port => text,
                _ => {
                    return Err(Error::IllegalSymbol {
                        token: text,
                        offset,
                    })
                }
            },
        };

        Ok((index + 1, hos))
    }

    fn make_string_node(&mut self, parent: &str, content: &str, offset: usize) -> Handle {
        let handle = self.ast.make_string(parent, content);
        self.ast.set_source_index(&handle, offset);

        handle
    }
}

fn is_symbol(text: &str) -> bool {
    if text == "(" || text == ")" {
        return false;
    }

    !text.starts_with(['\'', '`', ','])
}

fn starts_term(text: &str) -> bool {
    text == "(" || text == "'" || text == "," || text == "`" || is_symbol(text)
}

// Resolve `import` forms and register `native` names.
//
// `(import alias)` resolves the alias as a stdlib short name and gains
// a String child holding the canonical path; `(import alias "path")`
// is taken as-is. Either way the alias-to-path mapping lands on the
// AST for the module loader.
fn preprocess(ast: &mut Ast) -> Result<(), Error> {
    // Snapshot: resolving an import allocates String nodes mid-pass.
    let handles: Vec<Handle> = ast.handles().cloned().collect();

    for handle in handles {
        let Some(Node::Application(app)) = ast.get(&handle) else {
            continue;
        };
        let mut children = app.children.clone();
        let Some(first) = children.first() else {
            continue;
        };

        match first.as_str() {
            "import" => {
                if children.len() == 2 {
                    let path = stdlib::get_stdlib_path(&children[1]);
                    let string_handle = ast.make_string(&handle, &format!("\"{path}\""));
                    ast.add_child(&handle, string_handle.clone());
                    children.push(string_handle);
                }

                if children.len() != 3 {
                    return Err(Error::ImportArity {
                        offset: ast.source_index(&handle),
                    });
                }

                let alias = children[1].clone();
                let Some(Node::String(path_node)) = ast.get(&children[2]) else {
                    return Err(Error::ImportPath {
                        offset: ast.source_index(&handle),
                    });
                };

                let path = path_node
                    .content
                    .strip_prefix('"')
                    .and_then(|c| c.strip_suffix('"'))
                    .unwrap_or(&path_node.content)
                    .to_string();
                ast.module_alias_paths.insert(alias, path);
            }
            "native" => {
                if children.len() < 2 {
                    return Err(Error::NativeArity {
                        offset: ast.source_index(&handle),
                    });
                }

                ast.add_native(&children[1]);
            }
            _ => {}
        }
    }

    Ok(())
}

// Mark applications in tail position of lambda bodies.
//
// The top-level lambda is not a tail context: its results feed `halt`.
// Tail position propagates through `if` branches and `cond` clause
// bodies; only operators the emitter can tail-dispatch (a variable or
// a lambda handle) are marked.
fn mark_tail_calls(ast: &mut Ast) {
    let lambdas: Vec<Handle> = ast.lambda_handles.iter().skip(1).cloned().collect();

    for handle in lambdas {
        let Some(Node::Lambda(lam)) = ast.get(&handle) else {
            continue;
        };

        if let Some(last) = lam.bodies.last().cloned() {
            mark_tail_position(ast, &last);
        }
    }
}

fn mark_tail_position(ast: &mut Ast, hos: &str) {
    if types::type_of(hos) != Type::Handle {
        return;
    }

    let Some(Node::Application(app)) = ast.get(hos) else {
        return;
    };
    let children = app.children.clone();
    let Some(first) = children.first() else {
        return;
    };

    match first.as_str() {
        "if" => {
            if let Some(branch) = children.get(2).cloned() {
                mark_tail_position(ast, &branch);
            }

            if let Some(branch) = children.get(3).cloned() {
                mark_tail_position(ast, &branch);
            }
        }
        "cond" => {
            for clause in children[1..].iter() {
                let Some(Node::Application(c)) = ast.get(clause) else {
                    continue;
                };

                if let Some(body) = c.children.get(1).cloned() {
                    mark_tail_position(ast, &body);
                }
            }
        }
        _ if types::SPECIAL_FORMS.contains(&first.as_str()) => {}
        _ => {
            let ty = types::type_of(first);
            let tail_dispatchable = ty == Type::Variable
                || (ty == Type::Handle && matches!(ast.get(first), Some(Node::Lambda(_))));

            if tail_dispatchable {
                ast.tailcalls.insert(hos.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::wrap_source;

    fn parse_module(src: &str) -> Ast {
        let wrapped = wrap_source(src);
        let toks = lex(&wrapped).unwrap();
        parse(&toks, "m", &wrapped).unwrap()
    }

    #[test]
    fn wraps_program_in_a_top_lambda() {
        let ast = parse_module("(define x 1)");
        let top = ast.top_lambda_handle().unwrap().clone();

        let Some(Node::Lambda(lam)) = ast.get(&top) else {
            panic!("top lambda expected");
        };
        assert!(lam.parameters.is_empty());
        assert_eq!(lam.bodies.len(), 1);
    }

    #[test]
    fn quoted_names_become_symbol_literals() {
        let ast = parse_module("(display '(car x 1 #t))");

        let quote = ast
            .handles()
            .find(|h| matches!(ast.get(h), Some(Node::Quote(_))))
            .unwrap();
        let Some(Node::Quote(q)) = ast.get(quote) else {
            unreachable!();
        };
        let Some(Node::Quote(inner)) = ast.get(&q.children[0]) else {
            panic!("inner quote list expected, got {:?}", q.children);
        };

        assert_eq!(inner.children, vec!["'car", "'x", "1", "#t"]);
    }

    #[test]
    fn explicit_quote_form_matches_sigil_semantics() {
        let ast = parse_module("(display (quote (a b)))");

        let quotes: Vec<_> = ast
            .handles()
            .filter(|h| matches!(ast.get(h), Some(Node::Quote(_))))
            .cloned()
            .collect();
        // (quote (a b)) and the inner (a b) both become Quote nodes.
        assert_eq!(quotes.len(), 2);

        let Some(Node::Quote(outer)) = ast.get(&quotes[0]) else {
            unreachable!();
        };
        assert_eq!(outer.children[0], "quote");
    }

    #[test]
    fn unquote_restores_variables_inside_quasiquote() {
        let ast = parse_module("(display `(a ,x))");

        let qq = ast
            .handles()
            .find(|h| matches!(ast.get(h), Some(Node::Quasiquote(_))))
            .unwrap()
            .clone();
        let Some(Node::Quasiquote(q)) = ast.get(&qq) else {
            unreachable!();
        };

        assert_eq!(q.children[0], "'a");
        // ,x is a bare symbol so no Unquote node is allocated; the
        // variable passes through unprefixed.
        assert_eq!(q.children[1], "x");
    }

    #[test]
    fn unquoted_list_allocates_an_unquote_node() {
        let ast = parse_module("(display `(a ,(f 1)))");

        assert!(ast
            .handles()
            .any(|h| matches!(ast.get(h), Some(Node::Unquote(_)))));
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        let wrapped = wrap_source("(lambda (x x) 1)");
        let toks = lex(&wrapped).unwrap();
        let err = parse(&toks, "m", &wrapped).expect_err("parse must fail");

        assert!(err.to_string().contains("duplicate parameter 'x'"));
    }

    #[test]
    fn missing_rparen_errors_with_offset() {
        let toks = lex("(f 1").unwrap();
        let err = parse(&toks, "m", "(f 1").expect_err("parse must fail");

        assert!(matches!(err, Error::MissingRParen { offset: 0, .. }));
    }

    #[test]
    fn undefined_token_is_a_parse_error() {
        let wrapped = wrap_source("(f #garbage)");
        let toks = lex(&wrapped).unwrap();
        let err = parse(&toks, "m", &wrapped).expect_err("parse must fail");

        assert!(err.to_string().contains("illegal symbol '#garbage'"));
    }

    #[test]
    fn import_short_name_gains_a_path_child() {
        let ast = parse_module("(import utils)");

        // The resolved path is recorded without its quotes; the exact
        // base directory depends on the environment.
        let path = ast.module_alias_paths.get("utils").expect("alias mapped");
        assert!(path.ends_with("utils.scm"), "path: {path}");
        assert!(!path.starts_with('"'));

        // The import application gained its String child.
        let import = ast
            .handles()
            .find(|h| {
                matches!(ast.get(h), Some(Node::Application(a)) if a.children.first().map(String::as_str) == Some("import"))
            })
            .cloned()
            .unwrap();
        let Some(Node::Application(app)) = ast.get(&import) else {
            unreachable!();
        };
        assert_eq!(app.children.len(), 3);
        assert!(matches!(ast.get(&app.children[2]), Some(Node::String(_))));
    }

    #[test]
    fn import_with_path_records_the_alias() {
        let ast = parse_module("(import net \"lib/net.scm\")");

        assert_eq!(
            ast.module_alias_paths.get("net").map(String::as_str),
            Some("lib/net.scm")
        );
    }

    #[test]
    fn import_with_too_many_arguments_fails() {
        let wrapped = wrap_source("(import a \"b\" \"c\")");
        let toks = lex(&wrapped).unwrap();
        let err = parse(&toks, "m", &wrapped).expect_err("parse must fail");

        assert!(err.to_string().contains("'import' expects"));
    }

    #[test]
    fn native_registers_the_name() {
        let ast = parse_module("(native http-get)");

        assert!(ast.is_native_call("http-get"));
        assert!(!ast.is_native_call("display"));
    }

    #[test]
    fn tail_position_is_marked_in_inner_lambdas_only() {
        let ast = parse_module("(define f (lambda (g) (g 1))) (f car)");

        // (g 1) sits in tail position of the inner lambda.
        let marked: Vec<_> = ast.tailcalls.iter().cloned().collect();
        assert_eq!(marked.len(), 1);

        let Some(Node::Application(app)) = ast.get(&marked[0]) else {
            panic!("marked handle must be an application");
        };
        assert_eq!(app.children[0], "g");
    }

    #[test]
    fn tail_marking_descends_into_if_branches() {
        let ast = parse_module("(define f (lambda (n) (if (= n 0) (f 1) (f 2))))");

        assert_eq!(ast.tailcalls.len(), 2);
    }

    #[test]
    fn every_child_handle_resolves() {
        let ast = parse_module("(define sq (lambda (x) (* x x))) (display `(a ,(sq 2)) )");

        for handle in ast.handles() {
            let node = ast.get(handle).unwrap();
            for child in node.children() {
                if types::type_of(child) == Type::Handle {
                    assert!(ast.get(child).is_some(), "dangling child {child}");
                }
            }
        }
    }
}
