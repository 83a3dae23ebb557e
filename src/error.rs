//! Error types for parsing, compiling and rendering templates

use std::path::PathBuf;

use ariadne::{Color, Label, Report, ReportKind, Source};
use chumsky::error::{Rich, RichPattern, RichReason};
use thiserror::Error;

use crate::parser::ast::Span;
use crate::parser::lexer::Token;

/// Malformed template markup
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (at byte {})", span.start)]
pub struct SyntaxError {
    pub span: Span,
    pub message: String,
    pub expected: Vec<String>,
}

impl SyntaxError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    pub fn expecting<I, S>(mut self, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected.extend(expected.into_iter().map(Into::into));
        self
    }

    /// Line and column (both 1-based) of the error start
    pub fn position(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.span.start.min(source.len())];
        let line = upto.matches('\n').count() + 1;
        let column = upto.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, column)
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let expected_str = if self.expected.is_empty() {
            String::new()
        } else {
            format!("\nExpected: {}", self.expected.join(", "))
        };

        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, filename, self.span.start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.clone()))
                    .with_message(format!("{}{}", self.message, expected_str))
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);

        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => format!("{}: {}", filename, self),
        }
    }
}

impl<'a> From<Rich<'a, Token>> for SyntaxError {
    fn from(err: Rich<'a, Token>) -> Self {
        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => match found {
                Some(tok) => format!("unexpected {}", format_token(tok)),
                None => "unexpected end of expression".to_string(),
            },
            RichReason::Custom(msg) => msg.to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                RichPattern::Token(tok) => Some(format_token(tok)),
                RichPattern::Label(label) => Some(label.to_string()),
                RichPattern::EndOfInput => Some("end of expression".to_string()),
                RichPattern::Identifier(s) => Some(format!("`{}`", s)),
                RichPattern::Any => Some("any token".to_string()),
                RichPattern::SomethingElse => None,
            })
            .collect();

        SyntaxError {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Human-readable token description for error messages
fn format_token(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => format!("identifier `{}`", s),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Int(n) => format!("number {}", n),
        Token::Float(n) => format!("number {}", n),
        Token::True => "`true`".to_string(),
        Token::False => "`false`".to_string(),
        Token::Null => "`null`".to_string(),
        Token::And => "`and`".to_string(),
        Token::Or => "`or`".to_string(),
        Token::Not => "`not`".to_string(),
        Token::In => "`in`".to_string(),
        Token::Eq => "`==`".to_string(),
        Token::NotEq => "`!=`".to_string(),
        Token::LessEq => "`<=`".to_string(),
        Token::GreaterEq => "`>=`".to_string(),
        Token::Less => "`<`".to_string(),
        Token::Greater => "`>`".to_string(),
        Token::Assign => "`=`".to_string(),
        Token::Plus => "`+`".to_string(),
        Token::Minus => "`-`".to_string(),
        Token::Star => "`*`".to_string(),
        Token::Slash => "`/`".to_string(),
        Token::Percent => "`%`".to_string(),
        Token::Tilde => "`~`".to_string(),
        Token::Pipe => "`|`".to_string(),
        Token::Dot => "`.`".to_string(),
        Token::Comma => "`,`".to_string(),
        Token::Colon => "`:`".to_string(),
        Token::ParenOpen => "`(`".to_string(),
        Token::ParenClose => "`)`".to_string(),
        Token::BracketOpen => "`[`".to_string(),
        Token::BracketClose => "`]`".to_string(),
        Token::BraceOpen => "`{`".to_string(),
        Token::BraceClose => "`}`".to_string(),
    }
}

/// A parsed tree with a shape the compiler cannot lower
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot compile `{node}` in template `{template}`: {reason}")]
pub struct CompileError {
    pub template: String,
    pub node: &'static str,
    pub reason: String,
}

/// Failures while executing a compiled template
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("unknown filter `{name}`")]
    UnknownFilter { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("block `{found}` closed while `{expected}` is open")]
    BlockMismatch { expected: String, found: String },

    #[error("block `{name}` was never closed")]
    UnclosedBlock { name: String },

    #[error("template inheritance too deep: {}", chain.join(" -> "))]
    InheritanceDepth { chain: Vec<String> },

    #[error("include of `{name}` exceeds the nesting limit of {limit}")]
    IncludeDepth { name: String, limit: usize },

    #[error("invalid argument to `{callee}`: {message}")]
    InvalidArgument { callee: String, message: String },

    #[error("{0}")]
    InvalidOperation(String),
}

impl RuntimeError {
    pub fn invalid_argument(callee: &str, message: impl Into<String>) -> Self {
        RuntimeError::InvalidArgument {
            callee: callee.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the engine
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template `{name}` not found (searched: {})", format_paths(searched))]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("syntax error in `{template}`: {error}")]
    Syntax {
        template: String,
        text: String,
        #[source]
        error: SyntaxError,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("error rendering `{template}`: {error}")]
    Runtime {
        template: String,
        #[source]
        error: RuntimeError,
    },

    #[error("failed to read `{}`: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl TemplateError {
    pub fn runtime(template: impl Into<String>, error: RuntimeError) -> Self {
        TemplateError::Runtime {
            template: template.into(),
            error,
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, TemplateError::Runtime { .. })
    }

    /// Render the error for a terminal, with source context for syntax errors
    pub fn format_report(&self) -> String {
        match self {
            TemplateError::Syntax {
                template,
                text,
                error,
            } => error.format(text, template),
            other => other.to_string(),
        }
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no search paths".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
