//! Compiled template form

use std::fmt;
use std::time::SystemTime;

use crate::parser::ast::{Expr, FilterCall};

/// One step of a compiled program
///
/// Jump targets are indexes into [`Artifact::program`].
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Write literal text
    Text(String),
    /// Evaluate, filter and write an expression
    Print {
        expr: Expr,
        filters: Vec<FilterCall>,
        raw: bool,
    },
    Set {
        name: String,
        value: Expr,
    },
    /// Continue at `target` when `cond` is falsy
    JumpUnless {
        cond: Expr,
        target: usize,
    },
    Jump(usize),
    /// Start a loop; continue at `otherwise` when there is nothing to iterate
    IterStart {
        key: Option<String>,
        item: String,
        collection: Expr,
        otherwise: usize,
    },
    /// Advance the innermost loop; continue at `body` while items remain
    IterNext {
        body: usize,
    },
    BlockStart(String),
    BlockEnd(String),
    Extends(String),
    Include {
        name: String,
        vars: Option<Expr>,
        only: bool,
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

/// Executable form of a template
///
/// Immutable once built; shared between renders behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub program: Vec<Instruction>,
    /// Parent named by a top-level `extends`
    pub parent: Option<String>,
    /// Modification time of the source this was compiled from
    pub source_mtime: SystemTime,
}

impl Artifact {
    /// Names of the blocks this template defines, in order
    pub fn blocks(&self) -> impl Iterator<Item = &str> {
        self.program.iter().filter_map(|i| match i {
            Instruction::BlockStart(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Text(text) => write!(f, "TEXT {:?}", text),
            Instruction::Print { expr, filters, raw } => {
                write!(f, "PRINT {:?}", expr)?;
                for filter in filters {
                    write!(f, " | {}", filter.name)?;
                }
                if *raw {
                    write!(f, " (raw)")?;
                }
                Ok(())
            }
            Instruction::Set { name, value } => write!(f, "SET {} = {:?}", name, value),
            Instruction::JumpUnless { cond, target } => {
                write!(f, "JUMP_UNLESS {:?} -> {}", cond, target)
            }
            Instruction::Jump(target) => write!(f, "JUMP -> {}", target),
            Instruction::IterStart {
                key,
                item,
                collection,
                otherwise,
            } => {
                write!(f, "ITER_START ")?;
                if let Some(key) = key {
                    write!(f, "{}, ", key)?;
                }
                write!(f, "{} in {:?} else -> {}", item, collection, otherwise)
            }
            Instruction::IterNext { body } => write!(f, "ITER_NEXT -> {}", body),
            Instruction::BlockStart(name) => write!(f, "BLOCK_START {}", name),
            Instruction::BlockEnd(name) => write!(f, "BLOCK_END {}", name),
            Instruction::Extends(parent) => write!(f, "EXTENDS {:?}", parent),
            Instruction::Include { name, vars, only } => {
                write!(f, "INCLUDE {:?}", name)?;
                if let Some(vars) = vars {
                    write!(f, " with {:?}", vars)?;
                }
                if *only {
                    write!(f, " only")?;
                }
                Ok(())
            }
            Instruction::Component { name, props } => {
                write!(f, "COMPONENT {:?}", name)?;
                if let Some(props) = props {
                    write!(f, " with {:?}", props)?;
                }
                Ok(())
            }
            Instruction::Hook { name, data } => {
                write!(f, "HOOK {:?}", name)?;
                if let Some(data) = data {
                    write!(f, " with {:?}", data)?;
                }
                Ok(())
            }
        }
    }
}

/// Disassembly listing, one instruction per line
impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "; {}", self.name)?;
        if let Some(parent) = &self.parent {
            write!(f, " extends {:?}", parent)?;
        }
        writeln!(f)?;
        for (idx, instruction) in self.program.iter().enumerate() {
            writeln!(f, "{:04} {}", idx, instruction)?;
        }
        Ok(())
    }
}
