//! # Rules Module
//!
//! Declarative rule definitions and their compilation into evaluation plans.
//!
//! ## Definition Model
//!
//! A rule-set applies to the cells of the block types listed in its `scope`.
//! Each rule pairs a condition tree (`when`) with an ordered action list
//! (`then`) that mutates the centre cell. Definitions are plain `serde` data,
//! so hosts load them from JSON (or any other serde format) without the core
//! owning a file format:
//!
//! ```json
//! {
//!   "name": "gravity",
//!   "scope": ["sand", "void"],
//!   "rules": [
//!     { "when": { "all": [ { "is": { "block": "sand" } },
//!                          { "is": { "at": "down", "block": "void" } } ] },
//!       "then": [ { "copy": { "from": "down" } } ] },
//!     { "when": { "all": [ { "is": { "block": "void" } },
//!                          { "is": { "at": "up", "block": "sand" } } ] },
//!       "then": [ { "copy": { "from": "up" } } ] }
//!   ]
//! }
//! ```
//!
//! ## Submodules
//!
//! * `neighborhood` - named offsets and neighborhoods
//! * `compiler` - lowering, validation, footprint computation
//! * `program` - the instruction set and the interpreter shared by the CPU evaluators
//! * `kernel` - halo window layout and WGSL generation for the GPU
//! * `samples` - ready-made rule-sets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub mod compiler;
pub mod kernel;
pub mod neighborhood;
pub mod program;
pub mod samples;

/// How rules of one rule-set combine when several match the same cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// The first matching rule in declared order applies; later rules are not tested.
    #[default]
    FirstMatch,
    /// Every matching rule applies, in declared order.
    AllMatches,
}

/// A block-type-scoped collection of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDef {
    /// Unique name. Loading a rule-set with an existing name replaces it.
    pub name: String,
    /// Block types whose cells this rule-set evaluates.
    pub scope: Vec<String>,
    /// Combination policy for matching rules.
    #[serde(default)]
    pub policy: MatchPolicy,
    /// Names for the auxiliary state slots, e.g. `{"age": 0}`.
    #[serde(default)]
    pub fields: BTreeMap<String, u8>,
    /// Rules in priority order.
    pub rules: Vec<RuleDef>,
}

impl RuleSetDef {
    /// Parses a single rule-set from JSON.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parses either a single rule-set or an array of rule-sets from JSON.
    pub fn many_from_json(text: &str) -> Result<Vec<Self>, ConfigError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<RuleSetDef>),
            One(RuleSetDef),
        }

        Ok(match serde_json::from_str(text)? {
            OneOrMany::Many(defs) => defs,
            OneOrMany::One(def) => vec![def],
        })
    }
}

/// A single rule: condition tree and ordered actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    /// Optional name, used in logs.
    #[serde(default)]
    pub name: Option<String>,
    /// Condition evaluated against the previous generation.
    pub when: ConditionDef,
    /// Mutations applied to the centre cell, in order.
    pub then: Vec<ActionDef>,
}

/// A relative position, either named (`"down"`) or explicit (`[0, -1, 0]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OffsetDef {
    /// A named single-cell offset.
    Named(String),
    /// An explicit `[x, y, z]` offset.
    Vector([i32; 3]),
}

impl Default for OffsetDef {
    fn default() -> Self {
        OffsetDef::Vector([0, 0, 0])
    }
}

/// A set of relative positions for counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AroundDef {
    /// A named neighborhood such as `"moore2d"`.
    Named(String),
    /// Explicit offsets.
    Offsets(Vec<[i32; 3]>),
}

/// Boolean condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionDef {
    /// Always true.
    Always,
    /// True when every child is true.
    All(Vec<ConditionDef>),
    /// True when any child is true.
    Any(Vec<ConditionDef>),
    /// Negation.
    Not(Box<ConditionDef>),
    /// Equality of two expressions.
    Eq(ExprDef, ExprDef),
    /// Inequality of two expressions.
    Ne(ExprDef, ExprDef),
    /// Left expression strictly less than right.
    Lt(ExprDef, ExprDef),
    /// Left expression strictly greater than right.
    Gt(ExprDef, ExprDef),
    /// The cell at `at` has block type `block`.
    Is {
        /// Position to test, the centre by default.
        #[serde(default)]
        at: OffsetDef,
        /// Block name.
        block: String,
    },
}

/// Integer expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprDef {
    /// A constant.
    Literal(i32),
    /// The id of a named block type.
    Block(String),
    /// A field of the cell at `at`.
    Field {
        /// Position to read, the centre by default.
        #[serde(default)]
        at: OffsetDef,
        /// `block` or a declared state field name.
        name: String,
    },
    /// Number of positions in `around` where `when` holds, evaluated relative to each position.
    Count {
        /// Positions to test.
        around: AroundDef,
        /// Condition evaluated at each position.
        when: Box<ConditionDef>,
    },
    /// Sign of `a - b`: -1, 0 or 1.
    Compare(Box<ExprDef>, Box<ExprDef>),
    /// Wrapping sum.
    Add(Box<ExprDef>, Box<ExprDef>),
    /// Wrapping difference.
    Sub(Box<ExprDef>, Box<ExprDef>),
    /// Wrapping product.
    Mul(Box<ExprDef>, Box<ExprDef>),
    /// Truncating quotient, 0 when dividing by zero.
    Div(Box<ExprDef>, Box<ExprDef>),
    /// Truncating remainder, 0 when dividing by zero.
    Rem(Box<ExprDef>, Box<ExprDef>),
}

/// Mutation of the centre cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDef {
    /// Writes an expression into a field.
    Set {
        /// `block` or a declared state field name.
        field: String,
        /// Value to write, truncated to the field width.
        value: ExprDef,
    },
    /// Changes the block type, keeping state slots.
    Become(String),
    /// Copies every field of the cell at `from`.
    Copy {
        /// Source position.
        from: OffsetDef,
    },
    /// Resets the cell to void.
    Clear,
}

impl ConditionDef {
    /// `is { at, block }` shorthand.
    pub fn is(at: OffsetDef, block: &str) -> Self {
        ConditionDef::Is {
            at,
            block: block.to_owned(),
        }
    }

    /// `all[..]` shorthand.
    pub fn all(children: impl IntoIterator<Item = ConditionDef>) -> Self {
        ConditionDef::All(children.into_iter().collect())
    }
}

impl OffsetDef {
    /// A named offset.
    pub fn named(name: &str) -> Self {
        OffsetDef::Named(name.to_owned())
    }
}
