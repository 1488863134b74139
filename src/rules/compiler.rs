//! # Rule Compiler Module
//!
//! Turns a [`RuleSetDef`] into a [`CompiledPlan`].
//!
//! ## Pipeline
//!
//! 1. **Resolve**: block names, field names and neighborhood names are looked
//!    up; unknown names fail the whole rule-set.
//! 2. **Lower**: conditions and expressions become an intermediate tree whose
//!    loads carry *absolute* offsets. `count` conditions are shifted by each
//!    neighbor offset here, so a `count` nested inside a `count` reads cells two
//!    steps away. Every offset is checked against the radius limit.
//! 3. **Footprint**: the distinct offsets read by any rule are sorted into a
//!    canonical slot table, with the centre always in slot `0`.
//! 4. **Flatten**: each guard and action value is emitted as a postfix stream
//!    (see [`crate::rules::program`]), rules kept in declared order.
//! 5. **Render**: the kernel form (halo window deltas and WGSL source) is
//!    generated from the flattened streams.
//!
//! Compilation is a pure function of the definition, the registry and the
//! radius limit, and every collection that feeds the output is ordered, so
//! compiling the same input twice gives equal plans and equal fingerprints.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use cgmath::Vector3;

use crate::error::CompileError;
use crate::rules::kernel::KernelProgram;
use crate::rules::neighborhood::{named_neighborhood, named_offset};
use crate::rules::program::{Action, CompiledRule, Op, Program};
use crate::rules::{ActionDef, AroundDef, ConditionDef, ExprDef, MatchPolicy, OffsetDef, RuleSetDef};
use crate::voxels::block::block_registry::BlockRegistry;
use crate::voxels::block::{BlockId, Field, STATE_SLOTS};
use crate::voxels::Offset;

/// Largest footprint radius any configuration may allow.
pub const MAX_FOOTPRINT_RADIUS: i32 = 8;

/// The canonical set of offsets a rule-set reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Footprint {
    offsets: Vec<Offset>,
    radius: i32,
}

impl Footprint {
    /// Builds a footprint from any set of offsets; the centre is always included in slot `0`.
    pub fn new(offsets: impl IntoIterator<Item = Offset>) -> Self {
        let mut sorted: BTreeSet<(i32, i32, i32)> =
            offsets.into_iter().map(|o| (o.x, o.y, o.z)).collect();
        sorted.remove(&(0, 0, 0));
        let offsets: Vec<Offset> = std::iter::once(Vector3::new(0, 0, 0))
            .chain(sorted.into_iter().map(|(x, y, z)| Vector3::new(x, y, z)))
            .collect();
        let radius = offsets
            .iter()
            .map(|o| o.x.unsigned_abs().max(o.y.unsigned_abs()).max(o.z.unsigned_abs()))
            .max()
            .map_or(0, |radius| i32::try_from(radius).unwrap_or(i32::MAX));
        Footprint { offsets, radius }
    }

    /// Offsets in slot order.
    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    /// Largest Chebyshev distance of any offset.
    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Slot of an offset, if it is part of the footprint.
    pub fn slot_of(&self, offset: Offset) -> Option<u16> {
        self.offsets
            .iter()
            .position(|candidate| *candidate == offset)
            .map(|slot| slot as u16)
    }

    /// Returns `true` if the offset is part of the footprint.
    pub fn contains(&self, offset: Offset) -> bool {
        self.slot_of(offset).is_some()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Always `false`: the centre is part of every footprint.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// The compiled, read-only form of a rule-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledPlan {
    name: String,
    scope: Vec<BlockId>,
    footprint: Footprint,
    program: Program,
    kernel: KernelProgram,
    fingerprint: u64,
}

impl CompiledPlan {
    /// Rule-set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block types this plan evaluates, sorted.
    pub fn scope(&self) -> &[BlockId] {
        &self.scope
    }

    /// Returns `true` if cells of `block` are evaluated by this plan.
    pub fn applies_to(&self, block: BlockId) -> bool {
        self.scope.binary_search(&block).is_ok()
    }

    /// The offsets this plan reads.
    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    /// The interpretable form.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The batched kernel form.
    pub fn kernel(&self) -> &KernelProgram {
        &self.kernel
    }

    /// Match policy of the rule-set.
    pub fn policy(&self) -> MatchPolicy {
        self.program.policy
    }

    /// Stable hash of the whole plan, used to key compiled device pipelines.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Assembles a plan from already-lowered parts.
    pub(crate) fn from_parts(
        name: String,
        scope: Vec<BlockId>,
        footprint: Footprint,
        program: Program,
    ) -> Self {
        let kernel = KernelProgram::build(&program, &footprint);
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        scope.hash(&mut hasher);
        footprint.hash(&mut hasher);
        program.hash(&mut hasher);
        kernel.hash(&mut hasher);
        let fingerprint = hasher.finish();
        CompiledPlan {
            name,
            scope,
            footprint,
            program,
            kernel,
            fingerprint,
        }
    }
}

/// Compiles rule-set definitions against a block registry.
pub struct Compiler<'a> {
    registry: &'a BlockRegistry,
    max_radius: i32,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler.
    ///
    /// # Arguments
    /// * `registry` - Block name table
    /// * `max_radius` - Largest allowed offset component, clamped to `0..=MAX_FOOTPRINT_RADIUS`
    pub fn new(registry: &'a BlockRegistry, max_radius: i32) -> Self {
        Compiler {
            registry,
            max_radius: max_radius.clamp(0, MAX_FOOTPRINT_RADIUS),
        }
    }

    /// Compiles one rule-set.
    ///
    /// # Returns
    /// The compiled plan, or the first `CompileError` encountered. Nothing is
    /// partially compiled.
    pub fn compile(&self, def: &RuleSetDef) -> Result<CompiledPlan, CompileError> {
        if def.name.is_empty() {
            return Err(CompileError::MissingName);
        }
        if def.rules.is_empty() {
            return Err(CompileError::EmptyRuleSet(def.name.clone()));
        }
        if def.scope.is_empty() {
            return Err(CompileError::EmptyScope(def.name.clone()));
        }

        let mut scope = def
            .scope
            .iter()
            .map(|name| self.block(name))
            .collect::<Result<Vec<_>, _>>()?;
        scope.sort_unstable();
        scope.dedup();

        for (field, &slot) in &def.fields {
            if slot as usize >= STATE_SLOTS {
                return Err(CompileError::InvalidStateSlot {
                    field: field.clone(),
                    slot,
                    available: STATE_SLOTS,
                });
            }
        }

        let mut lowering = Lowering {
            compiler: self,
            rule_set: &def.name,
            fields: &def.fields,
            offsets: BTreeSet::new(),
        };

        let mut lowered = Vec::with_capacity(def.rules.len());
        for (index, rule) in def.rules.iter().enumerate() {
            if rule.then.is_empty() {
                return Err(CompileError::EmptyActions {
                    rule_set: def.name.clone(),
                    index,
                });
            }
            let guard = lowering.condition(&rule.when, Vector3::new(0, 0, 0))?;
            let actions = rule
                .then
                .iter()
                .map(|action| lowering.action(action))
                .collect::<Result<Vec<_>, _>>()?;
            lowered.push((rule.name.clone(), guard, actions));
        }

        let footprint = Footprint::new(
            lowering
                .offsets
                .iter()
                .map(|&(x, y, z)| Vector3::new(x, y, z)),
        );

        let rules = lowered
            .into_iter()
            .map(|(name, guard, actions)| {
                let mut code = Vec::new();
                emit_condition(&guard, &footprint, &mut code);
                CompiledRule {
                    name,
                    guard: code,
                    actions: actions
                        .into_iter()
                        .map(|action| emit_action(action, &footprint))
                        .collect(),
                }
            })
            .collect();

        let program = Program {
            name: def.name.clone(),
            policy: def.policy,
            rules,
            slots: footprint.len() as u16,
        };

        let plan = CompiledPlan::from_parts(def.name.clone(), scope, footprint, program);
        log::info!(
            "Compiled rule-set '{}': {} rules, {} footprint slots, radius {}",
            plan.name(),
            def.rules.len(),
            plan.footprint().len(),
            plan.footprint().radius()
        );
        Ok(plan)
    }

    fn block(&self, name: &str) -> Result<BlockId, CompileError> {
        self.registry
            .id(name)
            .ok_or_else(|| CompileError::UnknownBlock(name.to_owned()))
    }
}

/// Intermediate condition tree with absolute offsets.
#[derive(Debug)]
enum Cond {
    Const(bool),
    All(Vec<Cond>),
    Any(Vec<Cond>),
    Not(Box<Cond>),
    Cmp(Op, Expr, Expr),
}

/// Intermediate expression tree with absolute offsets.
#[derive(Debug)]
enum Expr {
    Const(i32),
    Load(Offset, Field),
    Count(Vec<Cond>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

/// Intermediate action with an absolute offset.
#[derive(Debug)]
enum LoweredAction {
    Set(Field, Expr),
    Copy(Offset),
    Clear,
}

/// Name resolution and offset collection for one rule-set.
struct Lowering<'c, 'a> {
    compiler: &'c Compiler<'a>,
    rule_set: &'c str,
    fields: &'c BTreeMap<String, u8>,
    offsets: BTreeSet<(i32, i32, i32)>,
}

impl Lowering<'_, '_> {
    /// Records an absolute offset, rejecting it if it exceeds the radius limit.
    fn visit(&mut self, offset: Offset) -> Result<Offset, CompileError> {
        let limit = self.compiler.max_radius.unsigned_abs();
        if offset.x.unsigned_abs() > limit
            || offset.y.unsigned_abs() > limit
            || offset.z.unsigned_abs() > limit
        {
            return Err(self.unbounded(offset));
        }
        self.offsets.insert((offset.x, offset.y, offset.z));
        Ok(offset)
    }

    /// Adds a nested offset to its base.
    ///
    /// A sum outside `i32` is reported with its components saturated, which
    /// always lies beyond the radius limit.
    fn shift(&self, base: Offset, offset: Offset) -> Result<Offset, CompileError> {
        match (
            base.x.checked_add(offset.x),
            base.y.checked_add(offset.y),
            base.z.checked_add(offset.z),
        ) {
            (Some(x), Some(y), Some(z)) => Ok(Vector3::new(x, y, z)),
            _ => Err(self.unbounded(Vector3::new(
                base.x.saturating_add(offset.x),
                base.y.saturating_add(offset.y),
                base.z.saturating_add(offset.z),
            ))),
        }
    }

    fn unbounded(&self, offset: Offset) -> CompileError {
        CompileError::UnboundedFootprint {
            rule_set: self.rule_set.to_owned(),
            offset: [offset.x, offset.y, offset.z],
            limit: self.compiler.max_radius,
        }
    }

    fn offset(&self, def: &OffsetDef) -> Result<Offset, CompileError> {
        match def {
            OffsetDef::Vector([x, y, z]) => Ok(Vector3::new(*x, *y, *z)),
            OffsetDef::Named(name) => named_offset(name).ok_or_else(|| {
                if named_neighborhood(name).is_some() {
                    CompileError::NotASingleOffset(name.clone())
                } else {
                    CompileError::UnknownNeighborhood(name.clone())
                }
            }),
        }
    }

    fn around(&self, def: &AroundDef) -> Result<Vec<Offset>, CompileError> {
        match def {
            AroundDef::Named(name) => named_neighborhood(name)
                .ok_or_else(|| CompileError::UnknownNeighborhood(name.clone())),
            AroundDef::Offsets(offsets) => Ok(offsets
                .iter()
                .map(|[x, y, z]| Vector3::new(*x, *y, *z))
                .collect()),
        }
    }

    fn field(&self, name: &str) -> Result<Field, CompileError> {
        if name == "block" {
            return Ok(Field::Block);
        }
        self.fields
            .get(name)
            .map(|&slot| Field::State(slot))
            .ok_or_else(|| CompileError::UnknownField(name.to_owned()))
    }

    fn condition(&mut self, def: &ConditionDef, base: Offset) -> Result<Cond, CompileError> {
        Ok(match def {
            ConditionDef::Always => Cond::Const(true),
            ConditionDef::All(children) => Cond::All(
                children
                    .iter()
                    .map(|child| self.condition(child, base))
                    .collect::<Result<_, _>>()?,
            ),
            ConditionDef::Any(children) => Cond::Any(
                children
                    .iter()
                    .map(|child| self.condition(child, base))
                    .collect::<Result<_, _>>()?,
            ),
            ConditionDef::Not(child) => Cond::Not(Box::new(self.condition(child, base)?)),
            ConditionDef::Eq(a, b) => self.comparison(Op::Eq, a, b, base)?,
            ConditionDef::Ne(a, b) => self.comparison(Op::Ne, a, b, base)?,
            ConditionDef::Lt(a, b) => self.comparison(Op::Lt, a, b, base)?,
            ConditionDef::Gt(a, b) => self.comparison(Op::Gt, a, b, base)?,
            ConditionDef::Is { at, block } => {
                let at = self.visit(self.shift(base, self.offset(at)?)?)?;
                let block = self.compiler.block(block)?;
                Cond::Cmp(
                    Op::Eq,
                    Expr::Load(at, Field::Block),
                    Expr::Const(i32::from(block)),
                )
            }
        })
    }

    fn comparison(
        &mut self,
        op: Op,
        a: &ExprDef,
        b: &ExprDef,
        base: Offset,
    ) -> Result<Cond, CompileError> {
        Ok(Cond::Cmp(op, self.expr(a, base)?, self.expr(b, base)?))
    }

    fn expr(&mut self, def: &ExprDef, base: Offset) -> Result<Expr, CompileError> {
        Ok(match def {
            ExprDef::Literal(value) => Expr::Const(*value),
            ExprDef::Block(name) => Expr::Const(i32::from(self.compiler.block(name)?)),
            ExprDef::Field { at, name } => {
                let field = self.field(name)?;
                let at = self.visit(self.shift(base, self.offset(at)?)?)?;
                Expr::Load(at, field)
            }
            ExprDef::Count { around, when } => {
                let offsets = self.around(around)?;
                Expr::Count(
                    offsets
                        .into_iter()
                        .map(|offset| {
                            let base = self.shift(base, offset)?;
                            self.condition(when, base)
                        })
                        .collect::<Result<_, _>>()?,
                )
            }
            ExprDef::Compare(a, b) => self.binary(Op::Compare, a, b, base)?,
            ExprDef::Add(a, b) => self.binary(Op::Add, a, b, base)?,
            ExprDef::Sub(a, b) => self.binary(Op::Sub, a, b, base)?,
            ExprDef::Mul(a, b) => self.binary(Op::Mul, a, b, base)?,
            ExprDef::Div(a, b) => self.binary(Op::Div, a, b, base)?,
            ExprDef::Rem(a, b) => self.binary(Op::Rem, a, b, base)?,
        })
    }

    fn binary(
        &mut self,
        op: Op,
        a: &ExprDef,
        b: &ExprDef,
        base: Offset,
    ) -> Result<Expr, CompileError> {
        Ok(Expr::Binary(
            op,
            Box::new(self.expr(a, base)?),
            Box::new(self.expr(b, base)?),
        ))
    }

    fn action(&mut self, def: &ActionDef) -> Result<LoweredAction, CompileError> {
        let centre = Vector3::new(0, 0, 0);
        Ok(match def {
            ActionDef::Set { field, value } => {
                LoweredAction::Set(self.field(field)?, self.expr(value, centre)?)
            }
            ActionDef::Become(block) => LoweredAction::Set(
                Field::Block,
                Expr::Const(i32::from(self.compiler.block(block)?)),
            ),
            ActionDef::Copy { from } => {
                let from = self.offset(from)?;
                LoweredAction::Copy(self.visit(from)?)
            }
            ActionDef::Clear => LoweredAction::Clear,
        })
    }
}

fn slot(footprint: &Footprint, offset: Offset) -> u16 {
    // Every offset was recorded by `Lowering::visit` before the footprint was built.
    footprint.slot_of(offset).unwrap_or(0)
}

fn emit_condition(cond: &Cond, footprint: &Footprint, code: &mut Vec<Op>) {
    match cond {
        Cond::Const(value) => code.push(Op::Const(i32::from(*value))),
        Cond::All(children) => emit_fold(children, Op::And, 1, footprint, code),
        Cond::Any(children) => emit_fold(children, Op::Or, 0, footprint, code),
        Cond::Not(child) => {
            emit_condition(child, footprint, code);
            code.push(Op::Not);
        }
        Cond::Cmp(op, a, b) => {
            emit_expr(a, footprint, code);
            emit_expr(b, footprint, code);
            code.push(*op);
        }
    }
}

/// Emits `c0 c1 op c2 op ...`, or `empty` for an empty list.
fn emit_fold(children: &[Cond], op: Op, empty: i32, footprint: &Footprint, code: &mut Vec<Op>) {
    let Some((first, rest)) = children.split_first() else {
        code.push(Op::Const(empty));
        return;
    };
    emit_condition(first, footprint, code);
    for child in rest {
        emit_condition(child, footprint, code);
        code.push(op);
    }
}

fn emit_expr(expr: &Expr, footprint: &Footprint, code: &mut Vec<Op>) {
    match expr {
        Expr::Const(value) => code.push(Op::Const(*value)),
        Expr::Load(offset, field) => code.push(Op::Load {
            slot: slot(footprint, *offset),
            field: *field,
        }),
        Expr::Count(conditions) => emit_fold(conditions, Op::Add, 0, footprint, code),
        Expr::Binary(op, a, b) => {
            emit_expr(a, footprint, code);
            emit_expr(b, footprint, code);
            code.push(*op);
        }
    }
}

fn emit_action(action: LoweredAction, footprint: &Footprint) -> Action {
    match action {
        LoweredAction::Set(field, value) => {
            let mut code = Vec::new();
            emit_expr(&value, footprint, &mut code);
            Action::Set { field, value: code }
        }
        LoweredAction::Copy(offset) => Action::Copy {
            slot: slot(footprint, offset),
        },
        LoweredAction::Clear => Action::Clear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::samples;
    use serde_json::json;

    fn compile(value: serde_json::Value) -> Result<CompiledPlan, CompileError> {
        let def: RuleSetDef = serde_json::from_value(value).unwrap();
        Compiler::new(&BlockRegistry::new(), 4).compile(&def)
    }

    #[test]
    fn compiling_twice_is_identical() {
        let registry = BlockRegistry::new();
        let compiler = Compiler::new(&registry, 4);
        for def in samples::all() {
            let a = compiler.compile(&def).unwrap();
            let b = compiler.compile(&def).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.fingerprint(), b.fingerprint());
            assert_eq!(a.kernel().source(), b.kernel().source());
        }
    }

    #[test]
    fn distinct_rule_sets_have_distinct_fingerprints() {
        let registry = BlockRegistry::new();
        let compiler = Compiler::new(&registry, 4);
        let gravity = compiler.compile(&samples::gravity()).unwrap();
        let life = compiler.compile(&samples::game_of_life()).unwrap();
        assert_ne!(gravity.fingerprint(), life.fingerprint());
    }

    #[test]
    fn rejects_offsets_beyond_radius() {
        let err = compile(json!({
            "name": "far",
            "scope": ["sand"],
            "rules": [{ "when": { "is": { "at": [0, -5, 0], "block": "void" } }, "then": ["clear"] }]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnboundedFootprint {
                rule_set: "far".into(),
                offset: [0, -5, 0],
                limit: 4
            }
        );
    }

    #[test]
    fn nested_counts_accumulate_offsets() {
        let nested = |depth_offset: i32| {
            json!({
                "name": "nested",
                "scope": ["sand"],
                "rules": [{
                    "when": { "gt": [
                        { "count": { "around": [[depth_offset, 0, 0]], "when": { "eq": [
                            { "count": { "around": [[depth_offset, 0, 0]], "when": { "is": { "block": "sand" } } } },
                            { "literal": 1 }
                        ] } } },
                        { "literal": 0 }
                    ] },
                    "then": ["clear"]
                }]
            })
        };
        let plan = compile(nested(2)).unwrap();
        assert_eq!(plan.footprint().radius(), 4);
        assert!(plan.footprint().contains(Vector3::new(4, 0, 0)));
        assert!(matches!(
            compile(nested(3)),
            Err(CompileError::UnboundedFootprint { offset: [6, 0, 0], .. })
        ));
    }

    #[test]
    fn offsets_at_the_edge_of_i32_are_rejected() {
        let err = compile(json!({
            "name": "edge",
            "scope": ["sand"],
            "rules": [{ "when": { "is": { "at": [i32::MIN, 0, 0], "block": "void" } }, "then": ["clear"] }]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnboundedFootprint {
                rule_set: "edge".into(),
                offset: [i32::MIN, 0, 0],
                limit: 4
            }
        );
    }

    #[test]
    fn nested_offsets_that_overflow_are_rejected() {
        let err = compile(json!({
            "name": "wrap",
            "scope": ["sand"],
            "rules": [{
                "when": { "gt": [
                    { "count": { "around": [[i32::MAX, 0, 0]], "when": { "is": { "at": [1, 0, 0], "block": "sand" } } } },
                    { "literal": 0 }
                ] },
                "then": ["clear"]
            }]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnboundedFootprint {
                rule_set: "wrap".into(),
                offset: [i32::MAX, 0, 0],
                limit: 4
            }
        );
    }

    #[test]
    fn footprint_radius_of_extreme_offsets_saturates() {
        let footprint = Footprint::new([Vector3::new(i32::MIN, 0, 0), Vector3::new(0, 3, 0)]);
        assert_eq!(footprint.radius(), i32::MAX);
        assert_eq!(footprint.len(), 3);
    }

    #[test]
    fn footprint_is_canonical_with_centre_first() {
        let plan = compile(json!({
            "name": "order",
            "scope": ["sand"],
            "rules": [
                { "when": { "is": { "at": "up", "block": "void" } }, "then": ["clear"] },
                { "when": { "is": { "at": "west", "block": "void" } }, "then": [{ "copy": { "from": "down" } }] }
            ]
        }))
        .unwrap();
        assert_eq!(
            plan.footprint().offsets(),
            &[
                Vector3::new(0, 0, 0),
                Vector3::new(-1, 0, 0),
                Vector3::new(0, -1, 0),
                Vector3::new(0, 1, 0),
            ]
        );
        assert_eq!(
            plan.program().rules[0].guard,
            vec![Op::Load { slot: 3, field: Field::Block }, Op::Const(0), Op::Eq]
        );
        assert_eq!(plan.program().rules[1].actions, vec![Action::Copy { slot: 2 }]);
    }

    #[test]
    fn resolution_errors() {
        let base = |when: serde_json::Value, then: serde_json::Value| {
            json!({ "name": "r", "scope": ["sand"], "rules": [{ "when": when, "then": then }] })
        };
        assert_eq!(
            compile(base(json!({ "is": { "block": "unobtainium" } }), json!(["clear"]))).unwrap_err(),
            CompileError::UnknownBlock("unobtainium".into())
        );
        assert_eq!(
            compile(base(json!("always"), json!([{ "set": { "field": "age", "value": { "literal": 1 } } }])))
                .unwrap_err(),
            CompileError::UnknownField("age".into())
        );
        assert_eq!(
            compile(base(json!({ "is": { "at": "moore2d", "block": "sand" } }), json!(["clear"]))).unwrap_err(),
            CompileError::NotASingleOffset("moore2d".into())
        );
        assert_eq!(
            compile(base(json!({ "gt": [
                { "count": { "around": "hexagonal", "when": "always" } },
                { "literal": 0 }
            ] }), json!(["clear"])))
            .unwrap_err(),
            CompileError::UnknownNeighborhood("hexagonal".into())
        );
        assert_eq!(
            compile(base(json!("always"), json!([]))).unwrap_err(),
            CompileError::EmptyActions { rule_set: "r".into(), index: 0 }
        );
        assert_eq!(
            compile(json!({ "name": "r", "scope": [], "rules": [{ "when": "always", "then": ["clear"] }] }))
                .unwrap_err(),
            CompileError::EmptyScope("r".into())
        );
        assert_eq!(
            compile(json!({ "name": "r", "scope": ["sand"], "rules": [] })).unwrap_err(),
            CompileError::EmptyRuleSet("r".into())
        );
        assert_eq!(
            compile(json!({
                "name": "r", "scope": ["sand"], "fields": { "age": 2 },
                "rules": [{ "when": "always", "then": ["clear"] }]
            }))
            .unwrap_err(),
            CompileError::InvalidStateSlot { field: "age".into(), slot: 2, available: STATE_SLOTS }
        );
    }

    #[test]
    fn count_flattens_to_sum_of_conditions() {
        let plan = compile(json!({
            "name": "count",
            "scope": ["white"],
            "rules": [{
                "when": { "eq": [
                    { "count": { "around": [[1, 0, 0], [-1, 0, 0]], "when": { "is": { "block": "white" } } } },
                    { "literal": 2 }
                ] },
                "then": ["clear"]
            }]
        }))
        .unwrap();
        let white = 8;
        assert_eq!(
            plan.program().rules[0].guard,
            vec![
                Op::Load { slot: 2, field: Field::Block },
                Op::Const(white),
                Op::Eq,
                Op::Load { slot: 1, field: Field::Block },
                Op::Const(white),
                Op::Eq,
                Op::Add,
                Op::Const(2),
                Op::Eq,
            ]
        );
    }
}
