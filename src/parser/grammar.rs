//! Expression and tag grammar using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::error::SyntaxError;
use crate::parser::ast::*;
use crate::parser::lexer::{lex, Token};
use crate::value::Value;

/// Tag names accepted inside `{% … %}`
pub const KNOWN_TAGS: &[&str] = &[
    "if",
    "elseif",
    "elif",
    "else",
    "endif",
    "for",
    "endfor",
    "block",
    "endblock",
    "extends",
    "include",
    "set",
    "component",
    "hook",
];

/// A parsed statement tag
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    If(Expr),
    ElseIf(Expr),
    Else,
    EndIf,
    For {
        key: Option<Identifier>,
        item: Identifier,
        collection: Expr,
    },
    EndFor,
    Block(Identifier),
    EndBlock(Option<Identifier>),
    Extends(String),
    Include {
        name: String,
        vars: Option<Expr>,
        only: bool,
    },
    Set {
        name: Identifier,
        value: Expr,
    },
    Component {
        name: String,
        props: Option<Expr>,
    },
    Hook {
        name: String,
        data: Option<Expr>,
    },
}

impl Tag {
    pub fn name(&self) -> &'static str {
        match self {
            Tag::If(_) => "if",
            Tag::ElseIf(_) => "elseif",
            Tag::Else => "else",
            Tag::EndIf => "endif",
            Tag::For { .. } => "for",
            Tag::EndFor => "endfor",
            Tag::Block(_) => "block",
            Tag::EndBlock(_) => "endblock",
            Tag::Extends(_) => "extends",
            Tag::Include { .. } => "include",
            Tag::Set { .. } => "set",
            Tag::Component { .. } => "component",
            Tag::Hook { .. } => "hook",
        }
    }
}

/// Parse the inside of a `{{ … }}` segment
///
/// `offset` is the position of `content` in the template source.
pub fn parse_expression(content: &str, offset: usize) -> Result<Expr, SyntaxError> {
    let tokens = lex(content, offset)?;
    let eoi = offset + content.len();
    if tokens.is_empty() {
        return Err(SyntaxError::new(offset..eoi, "empty expression").expecting(["expression"]));
    }

    let token_stream = Stream::from_iter(tokens.into_iter().map(|(tok, span)| (tok, span.into())))
        .map((eoi..eoi).into(), |(t, s): (_, _)| (t, s));

    expression()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| first_error(errs, offset..eoi))
}

/// Parse the inside of a `{% … %}` segment
pub fn parse_tag(content: &str, offset: usize) -> Result<Tag, SyntaxError> {
    let tokens = lex(content, offset)?;
    let eoi = offset + content.len();

    match tokens.first() {
        None => {
            return Err(SyntaxError::new(offset..eoi, "empty tag").expecting(["tag name"]));
        }
        Some((Token::Ident(name), span)) if !KNOWN_TAGS.contains(&name.as_str()) => {
            return Err(SyntaxError::new(span.clone(), format!("unknown tag `{}`", name))
                .expecting(KNOWN_TAGS.iter().map(|t| format!("`{}`", t))));
        }
        Some((Token::Ident(_), _)) => {}
        Some((_, span)) => {
            return Err(SyntaxError::new(span.clone(), "expected a tag name").expecting(["tag name"]));
        }
    }

    let token_stream = Stream::from_iter(tokens.into_iter().map(|(tok, span)| (tok, span.into())))
        .map((eoi..eoi).into(), |(t, s): (_, _)| (t, s));

    tag()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| first_error(errs, offset..eoi))
}

fn first_error(errs: Vec<Rich<'_, Token>>, span: Span) -> SyntaxError {
    errs.into_iter()
        .next()
        .map(SyntaxError::from)
        .unwrap_or_else(|| SyntaxError::new(span, "invalid syntax"))
}

/// Match an identifier token with a fixed spelling
fn keyword<'a, I>(name: &'static str) -> impl Parser<'a, I, (), extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    select! {
        Token::Ident(s) if s == name => (),
    }
}

/// Negate an expression, folding numeric literals
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
        Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
        other => Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(other),
        },
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn expression<'a, I>() -> impl Parser<'a, I, Expr, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let ident = select! {
            Token::Ident(s) => s,
        };

        let literal = select! {
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Null => Value::Null,
            Token::Int(n) => Value::Int(n),
            Token::Float(f) => Value::Float(f),
            Token::String(s) => Value::String(s),
        }
        .map(Expr::Literal);

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let call = ident
            .clone()
            .then(args.clone())
            .map(|(name, args)| Expr::Call {
                name: Identifier::new(name),
                args,
            });

        // `.name`, `.0` and `[expr]`
        let segment = choice((
            just(Token::Dot)
                .ignore_then(choice((
                    ident.clone(),
                    select! { Token::Int(n) => n.to_string() },
                )))
                .map(PathSegment::Attr),
            expr.clone()
                .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
                .map(PathSegment::Index),
        ));

        let variable = ident
            .clone()
            .then(segment.repeated().collect::<Vec<_>>())
            .map(|(name, path)| Expr::Variable {
                name: Identifier::new(name),
                path,
            });

        let array = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Expr::Array);

        let key = select! {
            Token::Ident(s) => s,
            Token::String(s) => s,
        };
        let object = key
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BraceOpen), just(Token::BraceClose))
            .map(Expr::Object);

        let primary = choice((
            literal.clone(),
            call,
            variable.clone(),
            array,
            object,
            expr.clone()
                .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
        ))
        .boxed();

        // Colon-style filter arguments are simple atoms: `| default: "n/a"`
        let colon_arg = just(Token::Minus)
            .or_not()
            .then(choice((literal, variable)))
            .map(|(minus, atom)| match minus {
                Some(_) => negate(atom),
                None => atom,
            });

        let filter_args = choice((
            args,
            just(Token::Colon).ignore_then(
                colon_arg
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            ),
        ))
        .or_not()
        .map(Option::unwrap_or_default);

        let filter = just(Token::Pipe)
            .ignore_then(ident)
            .then(filter_args)
            .map(|(name, args)| FilterCall {
                name: Identifier::new(name),
                args,
            });

        let filtered = primary.foldl(filter.repeated(), |input, filter| Expr::Filter {
            input: Box::new(input),
            filter,
        });

        let unary = just(Token::Minus)
            .repeated()
            .foldr(filtered, |_, operand| negate(operand))
            .boxed();

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinaryOp::Mul),
                just(Token::Slash).to(BinaryOp::Div),
                just(Token::Percent).to(BinaryOp::Rem),
            ))
            .then(unary)
            .repeated(),
            |left, (op, right)| binary(left, op, right),
        );

        let sum = product.clone().foldl(
            choice((
                just(Token::Plus).to(BinaryOp::Add),
                just(Token::Minus).to(BinaryOp::Sub),
            ))
            .then(product)
            .repeated(),
            |left, (op, right)| binary(left, op, right),
        );

        let concat = sum.clone().foldl(
            just(Token::Tilde).to(BinaryOp::Concat).then(sum).repeated(),
            |left, (op, right)| binary(left, op, right),
        );

        let comparison = concat
            .clone()
            .foldl(
                choice((
                    just(Token::Eq).to(BinaryOp::Eq),
                    just(Token::NotEq).to(BinaryOp::NotEq),
                    just(Token::LessEq).to(BinaryOp::LessEq),
                    just(Token::GreaterEq).to(BinaryOp::GreaterEq),
                    just(Token::Less).to(BinaryOp::Less),
                    just(Token::Greater).to(BinaryOp::Greater),
                    just(Token::In).to(BinaryOp::In),
                    just(Token::Not).then(just(Token::In)).to(BinaryOp::NotIn),
                ))
                .then(concat)
                .repeated(),
                |left, (op, right)| binary(left, op, right),
            )
            .boxed();

        let negation = just(Token::Not)
            .repeated()
            .foldr(comparison, |_, operand| Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });

        let conjunction = negation.clone().foldl(
            just(Token::And).ignore_then(negation).repeated(),
            |left, right| binary(left, BinaryOp::And, right),
        );

        conjunction.clone().foldl(
            just(Token::Or).ignore_then(conjunction).repeated(),
            |left, right| binary(left, BinaryOp::Or, right),
        )
    })
}

fn tag<'a, I>() -> impl Parser<'a, I, Tag, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let expr = expression();

    let ident = select! {
        Token::Ident(s) => Identifier::new(s),
    };

    let string = select! {
        Token::String(s) => s,
    };

    // Block names may be quoted, matching how `block("name")` refers to them.
    let block_name = ident.clone().or(string.clone().map(Identifier::new));

    let with_map = keyword("with").ignore_then(expr.clone()).or_not();

    let for_tag = keyword("for")
        .ignore_then(
            ident
                .clone()
                .then(just(Token::Comma).ignore_then(ident.clone()).or_not()),
        )
        .then_ignore(just(Token::In))
        .then(expr.clone())
        .map(|((first, second), collection)| match second {
            Some(item) => Tag::For {
                key: Some(first),
                item,
                collection,
            },
            None => Tag::For {
                key: None,
                item: first,
                collection,
            },
        });

    let include = keyword("include")
        .ignore_then(string.clone())
        .then(with_map.clone())
        .then(keyword("only").or_not())
        .map(|((name, vars), only)| Tag::Include {
            name,
            vars,
            only: only.is_some(),
        });

    let set = keyword("set")
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Assign))
        .then(expr.clone())
        .map(|(name, value)| Tag::Set { name, value });

    choice((
        keyword("if").ignore_then(expr.clone()).map(Tag::If),
        choice((keyword("elseif"), keyword("elif")))
            .ignore_then(expr.clone())
            .map(Tag::ElseIf),
        keyword("else").to(Tag::Else),
        keyword("endif").to(Tag::EndIf),
        for_tag,
        keyword("endfor").to(Tag::EndFor),
        keyword("block")
            .ignore_then(block_name.clone())
            .map(Tag::Block),
        keyword("endblock")
            .ignore_then(block_name.or_not())
            .map(Tag::EndBlock),
        keyword("extends").ignore_then(string.clone()).map(Tag::Extends),
        include,
        set,
        keyword("component")
            .ignore_then(string.clone())
            .then(with_map.clone())
            .map(|(name, props)| Tag::Component { name, props }),
        keyword("hook")
            .ignore_then(string)
            .then(with_map)
            .map(|(name, data)| Tag::Hook { name, data }),
    ))
}
