//! Sequence-flow guards.
//!
//! A guard is a pure boolean predicate over the token's view of the process.
//! The kernel never interprets guards beyond calling [`Guard::evaluate`]; the
//! only built-in form is a single flag comparison, everything else is an
//! opaque [`GuardPredicate`] supplied by the embedding application.

use crate::token::Token;
use crate::types::{Value, Variables};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Externally supplied guard predicate over the process variables and the
/// token being routed.
pub trait GuardPredicate: Send + Sync {
    fn evaluate(&self, variables: &Variables, token: &Token) -> bool;
}

impl<F> GuardPredicate for F
where
    F: Fn(&Variables, &Token) -> bool + Send + Sync,
{
    fn evaluate(&self, variables: &Variables, token: &Token) -> bool {
        self(variables, token)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
}

impl fmt::Display for FlagOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            FlagOp::Eq => "==",
            FlagOp::Neq => "!=",
            FlagOp::Lt => "<",
            FlagOp::Gt => ">",
        };
        f.write_str(op)
    }
}

/// `flag <op> value` against a process variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCondition {
    pub flag: String,
    pub op: FlagOp,
    pub value: Value,
}

impl FlagCondition {
    pub fn new(flag: impl Into<String>, op: FlagOp, value: impl Into<Value>) -> Self {
        Self {
            flag: flag.into(),
            op,
            value: value.into(),
        }
    }

    /// A missing variable, or one of a different type, never satisfies.
    pub fn holds(&self, variables: &Variables) -> bool {
        let Some(actual) = variables.get(&self.flag) else {
            return false;
        };
        let Some(ordering) = actual.compare(&self.value) else {
            return false;
        };
        match self.op {
            FlagOp::Eq => ordering == Ordering::Equal,
            FlagOp::Neq => ordering != Ordering::Equal,
            FlagOp::Lt => ordering == Ordering::Less,
            FlagOp::Gt => ordering == Ordering::Greater,
        }
    }
}

#[derive(Clone)]
pub enum Guard {
    Flag(FlagCondition),
    Predicate(Arc<dyn GuardPredicate>),
}

impl Guard {
    pub fn flag(flag: impl Into<String>, op: FlagOp, value: impl Into<Value>) -> Self {
        Guard::Flag(FlagCondition::new(flag, op, value))
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Variables, &Token) -> bool + Send + Sync + 'static,
    {
        Guard::Predicate(Arc::new(predicate))
    }

    pub fn evaluate(&self, variables: &Variables, token: &Token) -> bool {
        match self {
            Guard::Flag(cond) => cond.holds(variables),
            Guard::Predicate(p) => p.evaluate(variables, token),
        }
    }

    /// Stable text used when hashing a definition.
    pub(crate) fn canonical(&self) -> String {
        match self {
            Guard::Flag(c) => format!("{} {} {}", c.flag, c.op, c.value),
            Guard::Predicate(_) => "<predicate>".to_string(),
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Flag(c) => f.debug_tuple("Flag").field(c).finish(),
            Guard::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
