//! # Error Types
//!
//! Every fallible operation in the crate reports one of the enums below.
//! They are layered the same way the simulation is:
//!
//! * `CompileError` - a rule-set was rejected at load time and never reaches evaluation
//! * `RegistryError` - a custom block type could not be registered
//! * `StoreError` - the voxel accessor refused a write
//! * `EvalError` - an evaluator could not finish its pass over the dirty set
//! * `DispatchError` - a compute device failed or timed out; recovered inside the tick
//! * `TickError` - hard tick failures surfaced to the host
//! * `ConfigError` - configuration or rule-set JSON could not be loaded

use std::io;

use cgmath::Point3;
use thiserror::Error;

/// Errors raised while lowering a rule-set definition into a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A neighbor offset (after nesting) lies beyond the configured radius.
    #[error("rule-set '{rule_set}' reads offset {offset:?}, beyond footprint radius {limit}")]
    UnboundedFootprint {
        /// Name of the offending rule-set.
        rule_set: String,
        /// Absolute offset relative to the evaluated cell.
        offset: [i32; 3],
        /// Largest allowed component magnitude.
        limit: i32,
    },
    /// The rule-set declares no rules.
    #[error("rule-set '{0}' has no rules")]
    EmptyRuleSet(String),
    /// The rule-set applies to no block type.
    #[error("rule-set '{0}' has an empty scope")]
    EmptyScope(String),
    /// The rule-set has no name.
    #[error("rule-set name must not be empty")]
    MissingName,
    /// A block name is not present in the registry.
    #[error("unknown block type '{0}'")]
    UnknownBlock(String),
    /// A field name is neither `block` nor declared in the rule-set's `fields`.
    #[error("unknown field '{0}'")]
    UnknownField(String),
    /// A neighborhood name is not one of the named neighborhoods.
    #[error("unknown neighborhood '{0}'")]
    UnknownNeighborhood(String),
    /// A named offset resolves to more (or fewer) than one cell.
    #[error("'{0}' does not name a single offset")]
    NotASingleOffset(String),
    /// A declared field maps to a state slot the cell does not have.
    #[error("field '{field}' uses state slot {slot}, cells have {available}")]
    InvalidStateSlot {
        /// Declared field name.
        field: String,
        /// Requested slot.
        slot: u8,
        /// Number of state slots per cell.
        available: usize,
    },
    /// A rule has no actions.
    #[error("rule {index} of rule-set '{rule_set}' has no actions")]
    EmptyActions {
        /// Name of the rule-set.
        rule_set: String,
        /// Declared position of the rule.
        index: usize,
    },
}

/// Errors raised while registering custom block types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Every block id has been handed out.
    #[error("no block ids left to register '{0}'")]
    IdsExhausted(String),
}

/// Errors reported by a [`crate::voxels::world::VoxelAccess`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The coordinate is outside the world bounds.
    #[error("cell {0:?} is outside the world bounds")]
    OutOfBounds(Point3<i32>),
    /// The chunk holding the coordinate is not loaded.
    #[error("chunk {0:?} is unavailable")]
    RegionUnavailable(Point3<i32>),
}

/// Errors raised while evaluating compiled rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// An instruction stream popped more values than it pushed.
    #[error("instruction stream of rule-set '{0}' underflowed its stack")]
    StackUnderflow(String),
    /// An instruction stream left other than exactly one value behind.
    #[error("instruction stream of rule-set '{0}' is unbalanced")]
    UnbalancedProgram(String),
    /// A load addressed a footprint slot the plan does not declare.
    #[error("slot {slot} is outside the footprint of rule-set '{rule_set}'")]
    SlotOutOfFootprint {
        /// Name of the rule-set.
        rule_set: String,
        /// Offending slot.
        slot: u16,
    },
    /// Two results were produced for the same coordinate.
    #[error("cell {0:?} was written twice in one tick")]
    DuplicateWrite(Point3<i32>),
}

/// Failures of a compute device dispatch. Recovered by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No compatible adapter or device could be opened.
    #[error("no compute device available: {0}")]
    Unavailable(String),
    /// The device did not finish within the configured timeout.
    #[error("dispatch timed out after {0} ms")]
    Timeout(u128),
    /// The device reported a validation or execution error.
    #[error("device error: {0}")]
    Device(String),
    /// A lane worker failed or disconnected.
    #[error("lane failure: {0}")]
    Lane(String),
    /// The result buffer did not have the expected shape.
    #[error("result buffer holds {actual} words, expected {expected}")]
    MalformedResult {
        /// Expected number of `u32` words.
        expected: usize,
        /// Received number of `u32` words.
        actual: usize,
    },
}

/// Hard tick failures. The world stays at the previous generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TickError {
    /// Neither the parallel nor the sequential evaluator produced a result.
    #[error("no working evaluator: {sequential}")]
    NoWorkingEvaluator {
        /// Dispatch failure that triggered the fallback, if any.
        parallel: Option<DispatchError>,
        /// Failure of the sequential evaluator.
        sequential: EvalError,
    },
    /// The write buffer could not be committed as a whole.
    #[error("commit aborted: {0}")]
    CommitAborted(StoreError),
}

/// Errors loading configuration or rule-set definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a file failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The JSON was malformed or did not match the schema.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value parsed but is not acceptable.
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
