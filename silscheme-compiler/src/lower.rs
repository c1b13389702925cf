// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

//! AST to IL lowering.
//!
//! A stateless tree walk over the preprocessed AST plus a unique-name
//! counter and the output buffer. Every emitted line is either a label
//! (`@...`), an `;;` comment, or one VM instruction; handles are used
//! directly as jump labels.

use crate::ast::{Ast, Node};
use crate::metrics::CompilerMetrics;
use crate::types::{self, Type};
use crate::Error;
use tracing::trace;

pub fn lower(ast: Ast) -> Result<(Vec<String>, CompilerMetrics), Error> {
    let mut lw = Lowerer {
        ast,
        code: Vec::new(),
        metrics: CompilerMetrics::default(),
        unique_counter: 0,
    };

    lw.begin_compile()?;

    Ok((lw.code, lw.metrics))
}

struct Lowerer {
    ast: Ast,
    code: Vec<String>,
    metrics: CompilerMetrics,
    unique_counter: usize,
}

impl Lowerer {
    // Single emission sink: trims, drops empties, counts.
    fn emit(&mut self, inst: &str) {
        let inst = inst.trim();
        if inst.is_empty() {
            return;
        }

        self.metrics.count_line(inst);
        self.code.push(inst.to_string());
    }

    fn emit_comment(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        self.emit(&format!(";; {text}"));
    }

    fn make_unique_string(&mut self) -> String {
        let unique = format!(
            "{}.UniqueStrID{}",
            self.ast.module_name, self.unique_counter
        );
        self.unique_counter += 1;
        self.metrics.inc_unique_name();

        unique
    }

    fn begin_compile(&mut self) -> Result<(), Error> {
        self.emit_comment("silscheme compiler output");

        let top = self
            .ast
            .top_lambda_handle()
            .cloned()
            .ok_or(Error::Internal("program has no top lambda"))?;
        self.emit(&format!("call @{top}"));
        self.emit("halt");

        for handle in self.ast.lambda_handles.clone() {
            self.compile_lambda(&handle)?;
        }

        Ok(())
    }

    fn compile_lambda(&mut self, handle: &str) -> Result<(), Error> {
        let Some(Node::Lambda(lam)) = self.ast.get(handle) else {
            return Err(Error::Internal("lambda handle does not resolve"));
        };
        let parameters = lam.parameters.clone();
        let bodies = lam.bodies.clone();
        trace!(handle, params = parameters.len(), "lambda");

        self.emit(&format!("@{handle}"));
        self.metrics.inc_lambda();

        for (j, parameter) in parameters.iter().enumerate() {
            self.emit(&format!("store {parameter}"));

            // The '.' marker must leave exactly one trailing parameter.
            if parameter.ends_with('.') && j + 2 != parameters.len() {
                return Err(Error::VariadicTail {
                    offset: self.ast.source_index(handle),
                });
            }
        }

        for body in &bodies {
            self.compile_hos(body)?;
        }

        self.emit("return");

        Ok(())
    }

    fn compile_hos(&mut self, hos: &str) -> Result<(), Error> {
        match types::type_of(hos) {
            Type::Handle => match self.ast.get(hos) {
                Some(Node::Lambda(_)) => {
                    self.emit(&format!("loadclosure @{hos}"));
                    Ok(())
                }
                Some(Node::Quote(_)) | Some(Node::String(_)) => {
                    self.emit(&format!("push {hos}"));
                    Ok(())
                }
                Some(Node::Quasiquote(_)) => self.compile_quasiquote(hos),
                Some(Node::Application(_)) | Some(Node::Unquote(_)) => {
                    self.compile_application(hos)
                }
                None => Err(Error::Internal("operand handle does not resolve")),
            },
            _ if self.ast.is_native_call(hos) => {
                self.emit(&format!("push {hos}"));
                Ok(())
            }
            Type::Variable => {
                self.emit(&format!("load {hos}"));
                Ok(())
            }
            Type::Undefined => Err(Error::UndefinedOperand {
                operand: hos.to_string(),
                offset: None,
            }),
            // Number, boolean, symbol, keyword and port literals.
            _ => {
                self.emit(&format!("push {hos}"));
                Ok(())
            }
        }
    }

    fn children_of(&self, handle: &str) -> Result<Vec<String>, Error> {
        match self.ast.get(handle) {
            Some(Node::Application(n)) | Some(Node::Unquote(n)) => Ok(n.children.clone()),
            _ => Err(Error::Internal("application handle does not resolve")),
        }
    }

    fn compile_application(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        let Some(first) = children.first().cloned() else {
            return Ok(());
        };

        match first.as_str() {
            "import" | "native" => return Ok(()),
            "call/cc" => return self.compile_call_cc(handle),
            "define" => return self.compile_define(handle),
            "set!" => return self.compile_set(handle),
            "cond" => return self.compile_cond(handle),
            "if" => return self.compile_if(handle),
            "and" => return self.compile_and(handle),
            "or" => return self.compile_or(handle),
            "fork" => return self.compile_fork(handle),
            "apply" => return self.compile_apply(handle),
            _ => {}
        }

        let first_type = types::type_of(&first);
        if first_type == Type::Handle
            && matches!(self.ast.get(&first), Some(Node::Application(_)))
        {
            return self.compile_complex_application(handle);
        }

        if !matches!(first_type, Type::Handle | Type::Variable | Type::Keyword) {
            return Err(Error::NotCallable {
                operator: first,
                offset: self.ast.source_index(handle),
            });
        }

        // Delimit the argument frame so variadic collection works.
        let unique = self.make_unique_string();
        self.emit(&format!("pushend {unique}"));

        // Operands in reverse so the VM pops them in source order.
        for operand in children[1..].iter().rev() {
            self.compile_hos(operand)?;
        }

        self.emit(&format!("pushend {unique}"));

        self.dispatch_call(handle, &first, children.len())
    }

    // The call tail shared by plain applications and `apply`.
    fn dispatch_call(
        &mut self,
        app_handle: &str,
        first: &str,
        arity: usize,
    ) -> Result<(), Error> {
        let first_type = types::type_of(first);

        if first_type == Type::Keyword {
            if let Some(op) = types::primitive_instruction(first) {
                self.emit(op);
                return Ok(());
            }

            if first == "list" && arity == 1 {
                return Err(Error::EmptyList {
                    offset: self.ast.source_index(app_handle),
                });
            }

            self.emit(first);
            return Ok(());
        }

        let is_lambda = first_type == Type::Handle
            && matches!(self.ast.get(first), Some(Node::Lambda(_)));

        if self.ast.tailcalls.contains(app_handle) {
            if is_lambda || first_type == Type::Variable {
                self.emit(&format!("tailcall {first}"));
                return Ok(());
            }
        } else if is_lambda {
            self.emit(&format!("call @{first}"));
            return Ok(());
        } else if first_type == Type::Variable {
            self.emit(&format!("call {first}"));
            return Ok(());
        }

        Err(Error::NotCallable {
            operator: first.to_string(),
            offset: self.ast.source_index(app_handle),
        })
    }

    // Eta-conversion: the operator slot holds a computed value, so
    // (A 1 2 ..) becomes ((lambda (F x y ..) (F x y ..)) A 1 2 ..)
    // with the synthetic lambda emitted inline.
    fn compile_complex_application(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;

        let unique = self.make_unique_string();
        let entry_label = format!("@COMPLEX_APP_{unique}");
        self.emit(&format!("goto {entry_label}"));

        let tmp_label = format!("@TMP_LAMBDA_{unique}");
        self.emit(&tmp_label);

        let parameters: Vec<String> = (0..children.len())
            .map(|i| format!("TEMP_LAMBDA_PARAM{i}_{unique}"))
            .collect();

        for parameter in &parameters {
            self.emit(&format!("store {parameter}"));
        }

        for parameter in parameters[1..].iter().rev() {
            self.emit(&format!("load {parameter}"));
        }

        // Parameter 0 holds the computed operator.
        self.emit(&format!("tailcall {}", parameters[0]));
        self.emit("return");

        self.emit(&entry_label);

        for operand in children.iter().rev() {
            self.compile_hos(operand)?;
        }

        self.emit(&format!("call {tmp_label}"));

        Ok(())
    }

    fn compile_define(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("define", 3, &children, handle)?;

        let target = &children[1];
        let target_type = types::type_of(target);
        if target_type != Type::Variable {
            return Err(Error::TargetNotVariable {
                form: "define",
                target: target.clone(),
                actual: target_type.name(),
                offset: self.ast.source_index(handle),
            });
        }

        let value = children[2].clone();
        match types::type_of(&value) {
            Type::Handle => match self.ast.get(&value) {
                Some(Node::Lambda(_)) => self.emit(&format!("push @{value}")),
                Some(Node::Quote(_)) | Some(Node::String(_)) => {
                    self.emit(&format!("push {value}"))
                }
                Some(Node::Quasiquote(_)) => self.compile_quasiquote(&value)?,
                Some(Node::Application(_)) | Some(Node::Unquote(_)) => {
                    self.compile_application(&value)?
                }
                None => {
                    return Err(Error::BadDefineValue {
                        value,
                        offset: self.ast.source_index(handle),
                    })
                }
            },
            ty if matches!(
                ty,
                Type::Number | Type::Boolean | Type::Keyword | Type::Port
            ) || self.ast.is_native_call(&value) =>
            {
                self.emit(&format!("push {value}"));
            }
            Type::Variable => self.emit(&format!("load {value}")),
            _ => {
                return Err(Error::BadDefineValue {
                    value,
                    offset: self.ast.source_index(handle),
                })
            }
        }

        self.emit(&format!("store {}", children[1]));

        Ok(())
    }

    fn compile_set(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("set!", 3, &children, handle)?;

        self.compile_hos(&children[2])?;

        let target = &children[1];
        let target_type = types::type_of(target);
        if target_type != Type::Variable {
            return Err(Error::TargetNotVariable {
                form: "set!",
                target: target.clone(),
                actual: target_type.name(),
                offset: self.ast.source_index(handle),
            });
        }

        self.emit(&format!("set {target}"));

        Ok(())
    }

    // Predicates are pushed unless they are applications to evaluate.
    fn compile_predicate(&mut self, predicate: &str) -> Result<(), Error> {
        if types::type_of(predicate) == Type::Handle {
            if matches!(self.ast.get(predicate), Some(Node::Application(_))) {
                self.compile_application(predicate)
            } else {
                self.emit(&format!("push {predicate}"));
                Ok(())
            }
        } else {
            self.compile_hos(predicate)
        }
    }

    fn compile_if(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("if", 4, &children, handle)?;

        self.compile_predicate(&children[1])?;

        let unique = self.make_unique_string();
        let true_label = format!("@IF_TRUE_{unique}");
        let end_label = format!("@IF_END_{unique}");

        self.emit(&format!("iftrue {true_label}"));

        self.compile_hos(&children[3])?;
        self.emit(&format!("goto {end_label}"));

        self.emit(&true_label);
        self.compile_hos(&children[2])?;

        self.emit(&end_label);

        Ok(())
    }

    fn compile_cond(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        let unique = self.make_unique_string();
        let end_label = format!("@COND_END_{unique}");

        for (i, clause_handle) in children.iter().enumerate().skip(1) {
            let clause = match self.ast.get(clause_handle) {
                Some(Node::Application(c)) => c.children.clone(),
                _ => {
                    return Err(Error::MalformedCondClause {
                        offset: self.ast.source_index(handle),
                    })
                }
            };
            if clause.len() < 2 {
                return Err(Error::MalformedCondClause {
                    offset: self.ast.source_index(clause_handle),
                });
            }

            self.emit(&format!("@COND_BRANCH_{unique}_{i}"));

            let predicate = &clause[0];
            let is_else = predicate == "else";
            let is_last = i == children.len() - 1;

            if !is_else {
                self.compile_predicate(predicate)?;

                if is_last {
                    self.emit(&format!("iffalse {end_label}"));
                } else {
                    self.emit(&format!("iffalse @COND_BRANCH_{unique}_{}", i + 1));
                }
            }

            self.compile_hos(&clause[1])?;

            if is_else || is_last {
                self.emit(&end_label);
                // Clauses behind else are ignored.
                break;
            }

            self.emit(&format!("goto {end_label}"));
        }

        Ok(())
    }

    fn compile_and(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("and", 3, &children, handle)?;

        let unique = self.make_unique_string();
        let end_label = format!("@AND_END_{unique}");
        let false_label = format!("@AND_FALSE_{unique}");

        for operand in &children[1..] {
            self.compile_hos(operand)?;
            self.emit(&format!("iffalse {false_label}"));
        }

        self.emit("push #t");
        self.emit(&format!("goto {end_label}"));

        self.emit(&false_label);
        self.emit("push #f");

        self.emit(&end_label);

        Ok(())
    }

    fn compile_or(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("or", 3, &children, handle)?;

        let unique = self.make_unique_string();
        let end_label = format!("@OR_END_{unique}");
        let true_label = format!("@OR_TRUE_{unique}");

        for operand in &children[1..] {
            self.compile_hos(operand)?;
            self.emit(&format!("iftrue {true_label}"));
        }

        self.emit("push #f");
        self.emit(&format!("goto {end_label}"));

        self.emit(&true_label);
        self.emit("push #t");

        self.emit(&end_label);

        Ok(())
    }

    // A compile-time marker only; the VM schedules the task.
    fn compile_fork(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("fork", 2, &children, handle)?;

        self.emit(&format!("fork {}", children[1]));

        Ok(())
    }

    fn compile_apply(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("apply", 3, &children, handle)?;

        let first = children[1].clone();
        if first == "apply" {
            return Err(Error::ApplySelf {
                offset: self.ast.source_index(handle),
            });
        }

        // The list value lands between markers; pushlist expands it.
        let unique = self.make_unique_string();
        self.emit(&format!("pushend {unique}"));
        self.compile_hos(&children[2])?;
        self.emit(&format!("pushend {unique}"));
        self.emit("pushlist");

        let first_type = types::type_of(&first);
        let computed = first_type == Type::Handle
            && matches!(self.ast.get(&first), Some(Node::Application(_)));
        if computed || types::SPECIAL_FORMS.contains(&first.as_str()) {
            return Err(Error::NotCallable {
                operator: first,
                offset: self.ast.source_index(handle),
            });
        }

        if matches!(first_type, Type::Handle | Type::Variable | Type::Keyword) {
            self.dispatch_call(handle, &first, children.len())
        } else {
            Err(Error::NotCallable {
                operator: first,
                offset: self.ast.source_index(handle),
            })
        }
    }

    fn compile_call_cc(&mut self, handle: &str) -> Result<(), Error> {
        let children = self.children_of(handle)?;
        self.check_arity("call/cc", 2, &children, handle)?;

        let thunk = children[1].clone();
        let cont_label = format!("CC_{}_{}", thunk, self.make_unique_string());

        self.emit(&format!("capturecc {cont_label}"));
        // The captured continuation is the thunk's argument.
        self.emit(&format!("load {cont_label}"));

        match types::type_of(&thunk) {
            Type::Handle => match self.ast.get(&thunk) {
                Some(Node::Lambda(_)) => {
                    self.emit(&format!("call @{thunk}"));
                    Ok(())
                }
                _ => Err(Error::BadContinuationThunk {
                    offset: self.ast.source_index(handle),
                }),
            },
            Type::Variable => {
                self.emit(&format!("call {thunk}"));
                Ok(())
            }
            _ => Err(Error::BadContinuationThunk {
                offset: self.ast.source_index(handle),
            }),
        }
    }

    fn compile_quasiquote(&mut self, handle: &str) -> Result<(), Error> {
        let children = match self.ast.get(handle) {
            Some(Node::Quasiquote(n)) => n.children.clone(),
            _ => return Err(Error::Internal("quasiquote handle does not resolve")),
        };

        for child in &children {
            self.compile_hos(child)?;
        }

        self.emit(&format!("push {}", children.len()));
        self.emit("concat");

        Ok(())
    }

    fn check_arity(
        &self,
        form: &'static str,
        expected: usize,
        children: &[String],
        handle: &str,
    ) -> Result<(), Error> {
        if children.len() != expected {
            return Err(Error::WrongArgumentCount {
                form,
                expected,
                given: children.len(),
                offset: self.ast.source_index(handle),
            });
        }

        Ok(())
    }
}
