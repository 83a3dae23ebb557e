//! Lowers a template tree into a flat instruction program

mod artifact;

pub use artifact::{Artifact, Instruction};

use std::time::SystemTime;

use crate::error::CompileError;
use crate::parser::ast::{Node, Spanned};

/// Compile a parsed template
///
/// The root must be a `Node::Template`. The tree is consumed; only the
/// artifact outlives compilation.
pub fn compile(
    ast: Spanned<Node>,
    name: &str,
    source_mtime: SystemTime,
) -> Result<Artifact, CompileError> {
    let children = match ast.node {
        Node::Template(children) => children,
        other => {
            return Err(CompileError {
                template: name.to_string(),
                node: other.kind(),
                reason: "root node must be a template".to_string(),
            })
        }
    };

    let mut compiler = Compiler {
        name,
        program: Vec::new(),
        parent: None,
        depth: 0,
    };
    compiler.body(children)?;

    Ok(Artifact {
        name: name.to_string(),
        program: compiler.program,
        parent: compiler.parent,
        source_mtime,
    })
}

struct Compiler<'a> {
    name: &'a str,
    program: Vec<Instruction>,
    parent: Option<String>,
    /// Nesting depth below the template root
    depth: usize,
}

impl Compiler<'_> {
    fn emit(&mut self, instruction: Instruction) -> usize {
        self.program.push(instruction);
        self.program.len() - 1
    }

    fn here(&self) -> usize {
        self.program.len()
    }

    /// Point the jump at `at` to `target`
    fn patch(&mut self, at: usize, target: usize) {
        match self.program.get_mut(at) {
            Some(Instruction::Jump(t))
            | Some(Instruction::JumpUnless { target: t, .. })
            | Some(Instruction::IterStart { otherwise: t, .. }) => *t = target,
            _ => {}
        }
    }

    fn error(&self, node: &'static str, reason: &str) -> CompileError {
        CompileError {
            template: self.name.to_string(),
            node,
            reason: reason.to_string(),
        }
    }

    fn body(&mut self, nodes: Vec<Spanned<Node>>) -> Result<(), CompileError> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn nested(&mut self, nodes: Vec<Spanned<Node>>) -> Result<(), CompileError> {
        self.depth += 1;
        let result = self.body(nodes);
        self.depth -= 1;
        result
    }

    fn node(&mut self, node: Spanned<Node>) -> Result<(), CompileError> {
        match node.node {
            Node::Template(_) => {
                return Err(self.error("template", "nested template root"));
            }
            Node::Text(text) => {
                self.emit(Instruction::Text(text));
            }
            Node::Print { expr, filters, raw } => {
                self.emit(Instruction::Print { expr, filters, raw });
            }
            Node::If {
                cond,
                then,
                elifs,
                otherwise,
            } => {
                let mut exits = Vec::new();
                let mut pending = self.emit(Instruction::JumpUnless { cond, target: 0 });
                self.nested(then)?;

                for (cond, body) in elifs {
                    exits.push(self.emit(Instruction::Jump(0)));
                    let branch = self.here();
                    self.patch(pending, branch);
                    pending = self.emit(Instruction::JumpUnless { cond, target: 0 });
                    self.nested(body)?;
                }

                if let Some(body) = otherwise {
                    exits.push(self.emit(Instruction::Jump(0)));
                    let branch = self.here();
                    self.patch(pending, branch);
                    self.nested(body)?;
                } else {
                    exits.push(pending);
                }

                let end = self.here();
                for exit in exits {
                    self.patch(exit, end);
                }
            }
            Node::For {
                key,
                item,
                collection,
                body,
                otherwise,
            } => {
                let start = self.emit(Instruction::IterStart {
                    key: key.map(|k| k.0),
                    item: item.0,
                    collection,
                    otherwise: 0,
                });
                self.nested(body)?;
                self.emit(Instruction::IterNext { body: start + 1 });

                match otherwise {
                    Some(body) => {
                        let skip = self.emit(Instruction::Jump(0));
                        let branch = self.here();
                        self.patch(start, branch);
                        self.nested(body)?;
                        let end = self.here();
                        self.patch(skip, end);
                    }
                    None => {
                        let end = self.here();
                        self.patch(start, end);
                    }
                }
            }
            Node::Block { name, body } => {
                self.emit(Instruction::BlockStart(name.0.clone()));
                self.nested(body)?;
                self.emit(Instruction::BlockEnd(name.0));
            }
            Node::Extends { parent } => {
                if self.depth > 0 {
                    return Err(self.error("extends", "`extends` below the top level"));
                }
                if self.parent.is_some() {
                    return Err(self.error("extends", "more than one parent template"));
                }
                self.parent = Some(parent.clone());
                self.emit(Instruction::Extends(parent));
            }
            Node::Include { name, vars, only } => {
                self.emit(Instruction::Include { name, vars, only });
            }
            Node::Set { name, value } => {
                self.emit(Instruction::Set {
                    name: name.0,
                    value,
                });
            }
            Node::Component { name, props } => {
                self.emit(Instruction::Component { name, props });
            }
            Node::Hook { name, data } => {
                self.emit(Instruction::Hook { name, data });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, Expr};
    use pretty_assertions::assert_eq;

    fn program(source: &str) -> Vec<Instruction> {
        let ast = parse(source).expect("should parse");
        compile(ast, "test", SystemTime::UNIX_EPOCH)
            .expect("should compile")
            .program
    }

    #[test]
    fn test_if_chain_layout() {
        assert_eq!(
            program("{% if a %}A{% elseif b %}B{% else %}C{% endif %}"),
            vec![
                Instruction::JumpUnless {
                    cond: Expr::var("a"),
                    target: 3,
                },
                Instruction::Text("A".to_string()),
                Instruction::Jump(7),
                Instruction::JumpUnless {
                    cond: Expr::var("b"),
                    target: 6,
                },
                Instruction::Text("B".to_string()),
                Instruction::Jump(7),
                Instruction::Text("C".to_string()),
            ]
        );
    }

    #[test]
    fn test_if_without_else_jumps_past_end() {
        assert_eq!(
            program("{% if a %}A{% endif %}!"),
            vec![
                Instruction::JumpUnless {
                    cond: Expr::var("a"),
                    target: 2,
                },
                Instruction::Text("A".to_string()),
                Instruction::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_for_else_layout() {
        assert_eq!(
            program("{% for x in xs %}{{ x }}{% else %}none{% endfor %}"),
            vec![
                Instruction::IterStart {
                    key: None,
                    item: "x".to_string(),
                    collection: Expr::var("xs"),
                    otherwise: 4,
                },
                Instruction::Print {
                    expr: Expr::var("x"),
                    filters: vec![],
                    raw: false,
                },
                Instruction::IterNext { body: 1 },
                Instruction::Jump(5),
                Instruction::Text("none".to_string()),
            ]
        );
    }

    #[test]
    fn test_extends_recorded_as_parent() {
        let ast = parse("{% extends \"base\" %}{% block body %}hi{% endblock %}")
            .expect("should parse");
        let artifact = compile(ast, "child", SystemTime::UNIX_EPOCH).expect("should compile");
        assert_eq!(artifact.parent.as_deref(), Some("base"));
        assert_eq!(artifact.blocks().collect::<Vec<_>>(), vec!["body"]);
    }

    #[test]
    fn test_rejects_non_template_root() {
        let ast = Spanned::new(Node::Text("x".to_string()), 0..1);
        let err = compile(ast, "bad", SystemTime::UNIX_EPOCH).unwrap_err();
        assert_eq!(err.node, "text");
    }

    #[test]
    fn test_rejects_nested_extends() {
        let nested = Spanned::new(
            Node::Block {
                name: crate::parser::Identifier::new("b"),
                body: vec![Spanned::new(
                    Node::Extends {
                        parent: "base".to_string(),
                    },
                    0..1,
                )],
            },
            0..1,
        );
        let ast = Spanned::new(Node::Template(vec![nested]), 0..1);
        let err = compile(ast, "bad", SystemTime::UNIX_EPOCH).unwrap_err();
        assert_eq!(err.node, "extends");
    }

    #[test]
    fn test_disassembly() {
        let ast = parse("{% block a %}x{% endblock %}").expect("should parse");
        let artifact = compile(ast, "page", SystemTime::UNIX_EPOCH).expect("should compile");
        insta::assert_snapshot!(artifact.to_string().trim_end(), @r###"
        ; page
        0000 BLOCK_START a
        0001 TEXT "x"
        0002 BLOCK_END a
        "###);
    }
}
