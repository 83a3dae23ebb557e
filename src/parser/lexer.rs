//! Lexer for template markup
//!
//! Lexing happens in two layers. [`scan`] splits the raw source into literal
//! text, print segments (`{{ … }}`) and tag segments (`{% … %}`), dropping
//! comments (`{# … #}`) and applying whitespace-control markers. The inside of
//! each print or tag segment is then tokenized with logos by [`lex`].

use logos::Logos;

use crate::error::SyntaxError;
use crate::parser::ast::Span;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Keywords
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("in")]
    In,

    // Comparison operators (longer first)
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Assign,

    // Arithmetic and concatenation
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("~")]
    Tilde,

    // Filter pipe
    #[token("|")]
    Pipe,

    // Delimiters
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),
}

/// Strip the quotes of a string literal and resolve backslash escapes
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Tokenize the inside of a print or tag segment
///
/// `offset` is the position of `input` within the template source, so the
/// returned spans point into the whole template.
pub fn lex(input: &str, offset: usize) -> Result<Vec<(Token, Span)>, SyntaxError> {
    let mut tokens = Vec::new();
    for (tok, span) in Token::lexer(input).spanned() {
        let absolute = span.start + offset..span.end + offset;
        match tok {
            Ok(tok) => tokens.push((tok, absolute)),
            Err(()) => {
                // Widen the error to whole characters so reports never split one.
                let width = input[span.start..].chars().next().map_or(0, char::len_utf8);
                let end = span.end.max(span.start + width);
                let found = input.get(span.start..end).unwrap_or_default();
                return Err(SyntaxError::new(
                    span.start + offset..end + offset,
                    format!("unexpected character sequence `{found}`"),
                ));
            }
        }
    }
    Ok(tokens)
}

/// Kind of a raw source segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Print,
    Tag,
}

/// A slice of the template source
///
/// For text segments `content` is the literal text. For print and tag
/// segments it is the text between the delimiters; `span` always covers the
/// whole segment including delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub content: Span,
    pub span: Span,
}

/// Split template source into text, print and tag segments
pub fn scan(source: &str) -> Result<Vec<Segment>, SyntaxError> {
    let mut segments = Vec::new();
    let mut pos = 0;
    let mut search = 0;
    let mut trim_next = false;

    while let Some(found) = source[search..].find('{') {
        let open = search + found;
        let (kind, close) = match source[open + 1..].chars().next() {
            Some('{') => (Some(SegmentKind::Print), "}}"),
            Some('%') => (Some(SegmentKind::Tag), "%}"),
            Some('#') => (None, "#}"),
            _ => {
                search = open + 1;
                continue;
            }
        };

        let mut inner_start = open + 2;
        let trim_before = source[inner_start..].starts_with('-');
        if trim_before {
            inner_start += 1;
        }

        let close_at = match kind {
            Some(_) => find_close(source, inner_start, close),
            None => source[inner_start..].find(close).map(|i| inner_start + i),
        }
        .ok_or_else(|| {
            SyntaxError::new(
                open..source.len(),
                format!("unterminated `{}`", &source[open..open + 2]),
            )
            .expecting([format!("`{}`", close)])
        })?;

        let mut inner_end = close_at;
        let trim_after = inner_end > inner_start && source[..inner_end].ends_with('-');
        if trim_after {
            inner_end -= 1;
        }

        let mut text = pos..open;
        if trim_next {
            text.start = trim_start(source, text.clone());
        }
        if trim_before {
            text.end = trim_end(source, text.clone());
        }
        if !text.is_empty() {
            segments.push(Segment {
                kind: SegmentKind::Text,
                content: text.clone(),
                span: text,
            });
        }

        if let Some(kind) = kind {
            segments.push(Segment {
                kind,
                content: inner_start..inner_end,
                span: open..close_at + 2,
            });
        }

        trim_next = trim_after;
        pos = close_at + 2;
        search = pos;
    }

    let mut text = pos..source.len();
    if trim_next {
        text.start = trim_start(source, text.clone());
    }
    if !text.is_empty() {
        segments.push(Segment {
            kind: SegmentKind::Text,
            content: text.clone(),
            span: text,
        });
    }

    Ok(segments)
}

/// Find the closing delimiter, skipping over quoted strings
fn find_close(source: &str, from: usize, close: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if bytes[i..].starts_with(close.as_bytes()) {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn trim_start(source: &str, span: Span) -> usize {
    let text = &source[span.clone()];
    span.start + (text.len() - text.trim_start().len())
}

fn trim_end(source: &str, span: Span) -> usize {
    let text = &source[span.clone()];
    span.start + text.trim_end().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        lex(input, 0)
            .expect("should lex")
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    fn kinds(source: &str) -> Vec<(SegmentKind, &str)> {
        scan(source)
            .expect("should scan")
            .into_iter()
            .map(|s| (s.kind, &source[s.content]))
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            tokens("for item in items"),
            vec![
                Token::Ident("for".to_string()),
                Token::Ident("item".to_string()),
                Token::In,
                Token::Ident("items".to_string()),
            ]
        );
        assert_eq!(
            tokens("index and android"),
            vec![
                Token::Ident("index".to_string()),
                Token::And,
                Token::Ident("android".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 3.14 -1"),
            vec![Token::Int(42), Token::Float(3.14), Token::Minus, Token::Int(1)]
        );
    }

    #[test]
    fn test_strings_both_quotes() {
        assert_eq!(
            tokens(r#""a \"b\"" 'it\'s'"#),
            vec![
                Token::String(r#"a "b""#.to_string()),
                Token::String("it's".to_string()),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("== != <= >= < > = | ~"),
            vec![
                Token::Eq,
                Token::NotEq,
                Token::LessEq,
                Token::GreaterEq,
                Token::Less,
                Token::Greater,
                Token::Assign,
                Token::Pipe,
                Token::Tilde,
            ]
        );
    }

    #[test]
    fn test_spans_are_offset() {
        let lexed = lex("name", 10).expect("should lex");
        assert_eq!(lexed[0].1, 10..14);
    }

    #[test]
    fn test_invalid_character() {
        let err = lex("a $ b", 3).unwrap_err();
        assert_eq!(err.span, 5..6);
    }

    #[test]
    fn test_scan_segments() {
        assert_eq!(
            kinds("Hi {{ name }}!{% if x %}y{% endif %}"),
            vec![
                (SegmentKind::Text, "Hi "),
                (SegmentKind::Print, " name "),
                (SegmentKind::Text, "!"),
                (SegmentKind::Tag, " if x "),
                (SegmentKind::Text, "y"),
                (SegmentKind::Tag, " endif "),
            ]
        );
    }

    #[test]
    fn test_scan_drops_comments_and_keeps_lone_braces() {
        assert_eq!(
            kinds("a {# note #}b { c }"),
            vec![(SegmentKind::Text, "a "), (SegmentKind::Text, "b { c }")]
        );
    }

    #[test]
    fn test_scan_skips_delimiters_in_strings() {
        assert_eq!(
            kinds(r#"{{ "}}" }}"#),
            vec![(SegmentKind::Print, r#" "}}" "#)]
        );
    }

    #[test]
    fn test_whitespace_control() {
        assert_eq!(
            kinds("a  \n{%- if x -%}\n  b"),
            vec![
                (SegmentKind::Text, "a"),
                (SegmentKind::Tag, " if x "),
                (SegmentKind::Text, "b"),
            ]
        );
    }

    #[test]
    fn test_unterminated_print() {
        let err = scan("hello {{ name").unwrap_err();
        assert_eq!(err.span.start, 6);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_non_ascii_inside_delimiters() {
        assert_eq!(
            kinds("{{ \"café\" }} é {% if x %}"),
            vec![
                (SegmentKind::Print, " \"café\" "),
                (SegmentKind::Text, " é "),
                (SegmentKind::Tag, " if x "),
            ]
        );
        assert!(scan("{{ café }}").is_ok());
        assert!(lex(" café ", 2).is_err());
    }
}
