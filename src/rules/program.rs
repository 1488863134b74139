//! # Program Module
//!
//! The instruction set compiled rules are flattened into, and the interpreter
//! that runs it.
//!
//! ## Architecture
//!
//! Every guard and every action value is a postfix instruction stream for a
//! small stack machine over `i32`. Booleans are `0`/`1`. Loads never name a
//! coordinate: they address a *footprint slot*, and the caller supplies the
//! cells of the footprint through [`CellSource`]. The sequential evaluator
//! backs slots with cells fetched from the store, the lane device backs them
//! with a packed halo window, and the WGSL kernel is generated from these same
//! streams, so all three backends share one definition of every operator.
//!
//! ## Arithmetic
//!
//! Integer arithmetic wraps on overflow. Division and remainder truncate
//! toward zero and yield `0` for a zero divisor. `i32::MIN / -1` wraps to
//! `i32::MIN` and `i32::MIN % -1` is `0`, the same results WGSL defines.

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::rules::MatchPolicy;
use crate::voxels::block::{Cell, Field};

/// A single stack machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Pushes a constant.
    Const(i32),
    /// Pushes a field of the cell in a footprint slot.
    Load {
        /// Footprint slot, `0` is the centre cell.
        slot: u16,
        /// Field to read.
        field: Field,
    },
    /// Pops `b`, `a`; pushes `a + b`.
    Add,
    /// Pops `b`, `a`; pushes `a - b`.
    Sub,
    /// Pops `b`, `a`; pushes `a * b`.
    Mul,
    /// Pops `b`, `a`; pushes `a / b`.
    Div,
    /// Pops `b`, `a`; pushes `a % b`.
    Rem,
    /// Pops `b`, `a`; pushes the sign of `a - b`.
    Compare,
    /// Pops `b`, `a`; pushes `a == b`.
    Eq,
    /// Pops `b`, `a`; pushes `a != b`.
    Ne,
    /// Pops `b`, `a`; pushes `a < b`.
    Lt,
    /// Pops `b`, `a`; pushes `a > b`.
    Gt,
    /// Pops `a`; pushes `a == 0`.
    Not,
    /// Pops `b`, `a`; pushes `a != 0 && b != 0`.
    And,
    /// Pops `b`, `a`; pushes `a != 0 || b != 0`.
    Or,
}

impl Op {
    /// Applies a binary operator. Returns `None` for `Const`, `Load` and `Not`.
    pub fn apply_binary(self, a: i32, b: i32) -> Option<i32> {
        Some(match self {
            Op::Add => a.wrapping_add(b),
            Op::Sub => a.wrapping_sub(b),
            Op::Mul => a.wrapping_mul(b),
            Op::Div if b == 0 => 0,
            Op::Div => a.wrapping_div(b),
            Op::Rem if b == 0 => 0,
            Op::Rem => a.wrapping_rem(b),
            Op::Compare => match a.cmp(&b) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            },
            Op::Eq => i32::from(a == b),
            Op::Ne => i32::from(a != b),
            Op::Lt => i32::from(a < b),
            Op::Gt => i32::from(a > b),
            Op::And => i32::from(a != 0 && b != 0),
            Op::Or => i32::from(a != 0 || b != 0),
            Op::Const(_) | Op::Load { .. } | Op::Not => return None,
        })
    }
}

/// A mutation of the centre cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Writes the value of an instruction stream into a field.
    Set {
        /// Target field.
        field: Field,
        /// Value stream.
        value: Vec<Op>,
    },
    /// Replaces the whole cell with the cell in a footprint slot.
    Copy {
        /// Source slot.
        slot: u16,
    },
    /// Replaces the cell with `Cell::VOID`.
    Clear,
}

/// A flattened rule: guard stream plus actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledRule {
    /// Name from the definition, if any.
    pub name: Option<String>,
    /// Stream leaving `0` (no match) or non-zero (match).
    pub guard: Vec<Op>,
    /// Actions applied in order when the guard matches.
    pub actions: Vec<Action>,
}

/// Supplies the cells of a footprint to the interpreter.
pub trait CellSource {
    /// The cell in footprint slot `slot`, or `None` if the source has no such slot.
    fn cell(&self, slot: u16) -> Option<Cell>;
}

impl CellSource for [Cell] {
    fn cell(&self, slot: u16) -> Option<Cell> {
        self.get(slot as usize).copied()
    }
}

impl CellSource for Vec<Cell> {
    fn cell(&self, slot: u16) -> Option<Cell> {
        self.as_slice().cell(slot)
    }
}

/// Result of evaluating one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellOutcome {
    /// The cell's state before evaluation.
    pub current: Cell,
    /// The cell's state for the next generation.
    pub next: Cell,
    /// `true` if at least one rule matched.
    pub matched: bool,
    /// Number of guards evaluated.
    pub rules_tested: u16,
}

impl CellOutcome {
    /// `true` if the next state differs from the current one.
    pub fn changed(&self) -> bool {
        self.next != self.current
    }

    /// Result flags as written by the compute kernels: bit 0 matched, bit 1 changed.
    pub fn flags(&self) -> u32 {
        u32::from(self.matched) | u32::from(self.changed()) << 1
    }
}

/// Result flag: a rule matched.
pub const FLAG_MATCHED: u32 = 1;
/// Result flag: the next state differs from the current one.
pub const FLAG_CHANGED: u32 = 2;

/// The interpretable form of a compiled rule-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Program {
    /// Rule-set name, for error reporting.
    pub name: String,
    /// How matching rules combine.
    pub policy: MatchPolicy,
    /// Rules in declared order.
    pub rules: Vec<CompiledRule>,
    /// Number of footprint slots loads may address.
    pub slots: u16,
}

impl Program {
    /// Evaluates the rules against one cell's footprint.
    ///
    /// # Arguments
    /// * `source` - Cells of the footprint, slot `0` being the evaluated cell
    ///
    /// # Returns
    /// The outcome, or an `EvalError` if an instruction stream is malformed or
    /// addresses a slot outside the footprint.
    pub fn evaluate<S: CellSource + ?Sized>(&self, source: &S) -> Result<CellOutcome, EvalError> {
        let mut stack = Vec::with_capacity(16);
        let current = self.load(source, 0)?;
        let mut next = current;
        let mut matched = false;
        let mut rules_tested = 0u16;

        for rule in &self.rules {
            if matched && self.policy == MatchPolicy::FirstMatch {
                break;
            }
            rules_tested += 1;
            if self.run(&rule.guard, source, &mut stack)? == 0 {
                continue;
            }
            matched = true;
            for action in &rule.actions {
                match action {
                    Action::Set { field, value } => {
                        let value = self.run(value, source, &mut stack)?;
                        next.set_field(*field, value);
                    }
                    Action::Copy { slot } => next = self.load(source, *slot)?,
                    Action::Clear => next = Cell::VOID,
                }
            }
        }

        Ok(CellOutcome {
            current,
            next,
            matched,
            rules_tested,
        })
    }

    fn load<S: CellSource + ?Sized>(&self, source: &S, slot: u16) -> Result<Cell, EvalError> {
        if slot >= self.slots {
            return Err(self.out_of_footprint(slot));
        }
        source.cell(slot).ok_or_else(|| self.out_of_footprint(slot))
    }

    fn out_of_footprint(&self, slot: u16) -> EvalError {
        EvalError::SlotOutOfFootprint {
            rule_set: self.name.clone(),
            slot,
        }
    }

    /// Runs one instruction stream to a single value.
    fn run<S: CellSource + ?Sized>(
        &self,
        code: &[Op],
        source: &S,
        stack: &mut Vec<i32>,
    ) -> Result<i32, EvalError> {
        stack.clear();
        for op in code {
            match *op {
                Op::Const(value) => stack.push(value),
                Op::Load { slot, field } => stack.push(self.load(source, slot)?.field(field)),
                Op::Not => {
                    let a = stack.pop().ok_or_else(|| self.underflow())?;
                    stack.push(i32::from(a == 0));
                }
                binary => {
                    let b = stack.pop().ok_or_else(|| self.underflow())?;
                    let a = stack.pop().ok_or_else(|| self.underflow())?;
                    let value = binary.apply_binary(a, b).ok_or_else(|| self.underflow())?;
                    stack.push(value);
                }
            }
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(value), true) => Ok(value),
            _ => Err(EvalError::UnbalancedProgram(self.name.clone())),
        }
    }

    fn underflow(&self) -> EvalError {
        EvalError::StackUnderflow(self.name.clone())
    }
}
