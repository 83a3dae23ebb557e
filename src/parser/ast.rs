//! Abstract syntax tree for template markup

use crate::value::Value;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// AST node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Valid identifier (alphanumeric + underscore, starts with letter/_)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of the template tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Root of a parsed template
    Template(Vec<Spanned<Node>>),
    /// Literal text copied to the output
    Text(String),
    /// `{{ expr | filter }}`
    Print {
        expr: Expr,
        filters: Vec<FilterCall>,
        /// A `raw` filter appears in the top-level chain
        raw: bool,
    },
    If {
        cond: Expr,
        then: Vec<Spanned<Node>>,
        elifs: Vec<(Expr, Vec<Spanned<Node>>)>,
        otherwise: Option<Vec<Spanned<Node>>>,
    },
    For {
        key: Option<Identifier>,
        item: Identifier,
        collection: Expr,
        body: Vec<Spanned<Node>>,
        /// Runs when the collection is empty or not iterable
        otherwise: Option<Vec<Spanned<Node>>>,
    },
    Block {
        name: Identifier,
        body: Vec<Spanned<Node>>,
    },
    Extends {
        parent: String,
    },
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

impl Node {
    /// Tag-style name of the node kind
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Template(_) => "template",
            Node::Text(_) => "text",
            Node::Print { .. } => "print",
            Node::If { .. } => "if",
            Node::For { .. } => "for",
            Node::Block { .. } => "block",
            Node::Extends { .. } => "extends",
            Node::Include { .. } => "include",
            Node::Set { .. } => "set",
            Node::Component { .. } => "component",
            Node::Hook { .. } => "hook",
        }
    }
}

/// A filter application: `| name` or `| name(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: Identifier,
    pub args: Vec<Expr>,
}

/// One step of a variable path
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// `.name`
    Attr(String),
    /// `[expr]`
    Index(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    In,
    NotIn,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Expression inside print statements and tags
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Variable reference with optional attribute/index path
    Variable {
        name: Identifier,
        path: Vec<PathSegment>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Filter {
        input: Box<Expr>,
        filter: FilterCall,
    },
    Call {
        name: Identifier,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable {
            name: Identifier::new(name),
            path: Vec::new(),
        }
    }
}
