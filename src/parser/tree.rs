//! Builds the template tree from scanned segments
//!
//! Tags that open a body (`if`, `for`, `block`) push a frame on a stack;
//! nodes are appended to the innermost open frame and closing tags pop it.

use std::collections::HashSet;

use crate::error::SyntaxError;
use crate::parser::ast::*;
use crate::parser::grammar::{parse_expression, parse_tag, Tag};
use crate::parser::lexer::{scan, SegmentKind};

type Body = Vec<Spanned<Node>>;

#[derive(Debug)]
enum FrameKind {
    If {
        cond: Expr,
        then: Body,
        elifs: Vec<(Expr, Body)>,
        otherwise: Option<Body>,
    },
    For {
        key: Option<Identifier>,
        item: Identifier,
        collection: Expr,
        body: Body,
        otherwise: Option<Body>,
    },
    Block {
        name: Identifier,
        body: Body,
    },
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Span of the opening tag
    span: Span,
}

impl Frame {
    fn tag(&self) -> &'static str {
        match self.kind {
            FrameKind::If { .. } => "if",
            FrameKind::For { .. } => "for",
            FrameKind::Block { .. } => "block",
        }
    }

    fn closing_tag(&self) -> &'static str {
        match self.kind {
            FrameKind::If { .. } => "endif",
            FrameKind::For { .. } => "endfor",
            FrameKind::Block { .. } => "endblock",
        }
    }

    fn children(&mut self) -> &mut Body {
        match &mut self.kind {
            FrameKind::If {
                then,
                elifs,
                otherwise,
                ..
            } => match (otherwise, elifs.last_mut()) {
                (Some(body), _) => body,
                (None, Some((_, body))) => body,
                (None, None) => then,
            },
            FrameKind::For {
                body, otherwise, ..
            } => otherwise.as_mut().unwrap_or(body),
            FrameKind::Block { body, .. } => body,
        }
    }

    /// Finish the frame as a node spanning up to `end`
    fn into_node(self, end: usize) -> Spanned<Node> {
        let node = match self.kind {
            FrameKind::If {
                cond,
                then,
                elifs,
                otherwise,
            } => Node::If {
                cond,
                then,
                elifs,
                otherwise,
            },
            FrameKind::For {
                key,
                item,
                collection,
                body,
                otherwise,
            } => Node::For {
                key,
                item,
                collection,
                body,
                otherwise,
            },
            FrameKind::Block { name, body } => Node::Block { name, body },
        };
        Spanned::new(node, self.span.start..end)
    }
}

#[derive(Default)]
struct TreeBuilder {
    root: Body,
    stack: Vec<Frame>,
    has_extends: bool,
    block_names: HashSet<String>,
}

impl TreeBuilder {
    fn push(&mut self, node: Spanned<Node>) {
        match self.stack.last_mut() {
            Some(frame) => frame.children().push(node),
            None => self.root.push(node),
        }
    }

    fn open(&mut self, kind: FrameKind, span: Span) {
        self.stack.push(Frame { kind, span });
    }

    /// Pop the innermost frame, which must have been opened by `opener`,
    /// and attach it to its parent
    fn close(&mut self, closer: &str, opener: &str, span: &Span) -> Result<(), SyntaxError> {
        match self.stack.pop() {
            Some(frame) if frame.tag() == opener => {
                let node = frame.into_node(span.end);
                self.push(node);
                Ok(())
            }
            Some(frame) => Err(SyntaxError::new(
                span.clone(),
                format!("`{}` does not match the open `{}`", closer, frame.tag()),
            )
            .expecting([format!("`{}`", frame.closing_tag())])),
            None => Err(SyntaxError::new(
                span.clone(),
                format!("`{}` without an open `{}`", closer, opener),
            )),
        }
    }

    fn tag(&mut self, tag: Tag, span: Span) -> Result<(), SyntaxError> {
        match tag {
            Tag::If(cond) => self.open(
                FrameKind::If {
                    cond,
                    then: Vec::new(),
                    elifs: Vec::new(),
                    otherwise: None,
                },
                span,
            ),
            Tag::ElseIf(cond) => match self.stack.last_mut().map(|f| &mut f.kind) {
                Some(FrameKind::If {
                    elifs, otherwise, ..
                }) => {
                    if otherwise.is_some() {
                        return Err(SyntaxError::new(span, "`elseif` after `else`"));
                    }
                    elifs.push((cond, Vec::new()));
                }
                _ => return Err(SyntaxError::new(span, "`elseif` outside of `if`")),
            },
            Tag::Else => match self.stack.last_mut().map(|f| &mut f.kind) {
                Some(FrameKind::If { otherwise, .. }) | Some(FrameKind::For { otherwise, .. }) => {
                    if otherwise.is_some() {
                        return Err(SyntaxError::new(span, "duplicate `else`"));
                    }
                    *otherwise = Some(Vec::new());
                }
                _ => return Err(SyntaxError::new(span, "`else` outside of `if` or `for`")),
            },
            Tag::EndIf => self.close("endif", "if", &span)?,
            Tag::For {
                key,
                item,
                collection,
            } => self.open(
                FrameKind::For {
                    key,
                    item,
                    collection,
                    body: Vec::new(),
                    otherwise: None,
                },
                span,
            ),
            Tag::EndFor => self.close("endfor", "for", &span)?,
            Tag::Block(name) => {
                if !self.block_names.insert(name.0.clone()) {
                    return Err(SyntaxError::new(
                        span,
                        format!("block `{}` is defined twice", name),
                    ));
                }
                self.open(
                    FrameKind::Block {
                        name,
                        body: Vec::new(),
                    },
                    span,
                );
            }
            Tag::EndBlock(closing) => {
                if let (Some(closing), Some(FrameKind::Block { name, .. })) =
                    (&closing, self.stack.last().map(|f| &f.kind))
                {
                    if closing != name {
                        return Err(SyntaxError::new(
                            span,
                            format!("`endblock {}` closes block `{}`", closing, name),
                        )
                        .expecting([format!("`endblock {}`", name)]));
                    }
                }
                self.close("endblock", "block", &span)?;
            }
            Tag::Extends(parent) => {
                if !self.stack.is_empty() {
                    return Err(SyntaxError::new(
                        span,
                        "`extends` must be at the top level of a template",
                    ));
                }
                if self.has_extends {
                    return Err(SyntaxError::new(span, "a template can only extend one parent"));
                }
                self.has_extends = true;
                self.push(Spanned::new(Node::Extends { parent }, span));
            }
            Tag::Include { name, vars, only } => {
                self.push(Spanned::new(Node::Include { name, vars, only }, span))
            }
            Tag::Set { name, value } => self.push(Spanned::new(Node::Set { name, value }, span)),
            Tag::Component { name, props } => {
                self.push(Spanned::new(Node::Component { name, props }, span))
            }
            Tag::Hook { name, data } => self.push(Spanned::new(Node::Hook { name, data }, span)),
        }
        Ok(())
    }

    fn finish(mut self, len: usize) -> Result<Spanned<Node>, SyntaxError> {
        if let Some(frame) = self.stack.pop() {
            return Err(SyntaxError::new(
                frame.span.clone(),
                format!("unterminated `{}`", frame.tag()),
            )
            .expecting([format!("`{}`", frame.closing_tag())]));
        }
        Ok(Spanned::new(Node::Template(self.root), 0..len))
    }
}

/// Split the outermost filter chain off a print expression
fn peel_filters(mut expr: Expr) -> (Expr, Vec<FilterCall>) {
    let mut filters = Vec::new();
    while let Expr::Filter { input, filter } = expr {
        filters.push(filter);
        expr = *input;
    }
    filters.reverse();
    (expr, filters)
}

/// Parse template source into a `Node::Template` tree
pub fn parse(source: &str) -> Result<Spanned<Node>, SyntaxError> {
    let mut builder = TreeBuilder::default();

    for segment in scan(source)? {
        let content = &source[segment.content.clone()];
        match segment.kind {
            SegmentKind::Text => {
                builder.push(Spanned::new(Node::Text(content.to_string()), segment.span));
            }
            SegmentKind::Print => {
                let expr = parse_expression(content, segment.content.start)?;
                let (expr, filters) = peel_filters(expr);
                let raw = filters.iter().any(|f| f.name.as_str() == "raw");
                builder.push(Spanned::new(Node::Print { expr, filters, raw }, segment.span));
            }
            SegmentKind::Tag => {
                let tag = parse_tag(content, segment.content.start)?;
                builder.tag(tag, segment.span)?;
            }
        }
    }

    builder.finish(source.len())
}
