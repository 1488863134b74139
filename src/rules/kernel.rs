//! # Kernel Module
//!
//! The batched form of a compiled plan: the halo window layout it reads from,
//! the linear delta of each footprint slot inside that window, and WGSL
//! compute-shader source generated from the plan's instruction streams.
//!
//! ## Window Layout
//!
//! Cells are packed per chunk into a cube of edge `16 + 2r`, where `r` is the
//! footprint radius: the chunk itself plus a halo of `r` cells on every side.
//! Inside a window, cell `(x, y, z)` lives at `x + E*y + E*E*z`, so the
//! neighbor at offset `o` of any centre is at `centre + delta(o)` with
//! `delta(o) = o.x + E*o.y + E*E*o.z`, whatever window the centre is in.
//!
//! ## Buffer Interface
//!
//! | binding | type                       | content                                |
//! |---------|----------------------------|----------------------------------------|
//! | 0       | `uniform Params`           | number of work items                   |
//! | 1       | `storage, read` `u32[]`    | packed windows                         |
//! | 2       | `storage, read` `u32[]`    | centre index of each work item         |
//! | 3       | `storage, read_write` `u32[]` | `[flags, next]` per work item       |

use std::fmt::Write;

use crate::rules::compiler::Footprint;
use crate::rules::program::{Action, CellSource, Op, Program};
use crate::rules::MatchPolicy;
use crate::voxels::block::{Cell, Field};
use crate::voxels::chunk::CHUNK_DIMENSION;

/// Work items per workgroup in the generated shader.
pub const WORKGROUP_SIZE: u32 = 64;

/// Most workgroups a single dispatch dimension may hold.
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Geometry of the halo windows a kernel reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowLayout {
    /// Halo width on every side.
    pub radius: i32,
    /// Window edge length, `CHUNK_DIMENSION + 2 * radius`.
    pub edge: i32,
}

impl WindowLayout {
    /// Layout for a footprint radius.
    pub fn new(radius: i32) -> Self {
        WindowLayout {
            radius,
            edge: CHUNK_DIMENSION + 2 * radius,
        }
    }

    /// Number of cells in one window.
    pub fn volume(&self) -> usize {
        (self.edge * self.edge * self.edge) as usize
    }

    /// Linear index of a window-local position.
    pub fn index(&self, x: i32, y: i32, z: i32) -> usize {
        (x + self.edge * y + self.edge * self.edge * z) as usize
    }

    /// Linear distance between a centre and its neighbor at offset `(x, y, z)`.
    pub fn delta(&self, x: i32, y: i32, z: i32) -> i32 {
        x + self.edge * y + self.edge * self.edge * z
    }
}

/// The batched kernel form of a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelProgram {
    window: WindowLayout,
    deltas: Vec<i32>,
    source: String,
}

impl KernelProgram {
    /// Renders the kernel form of a program.
    pub fn build(program: &Program, footprint: &Footprint) -> Self {
        let window = WindowLayout::new(footprint.radius());
        let deltas = footprint
            .offsets()
            .iter()
            .map(|o| window.delta(o.x, o.y, o.z))
            .collect::<Vec<_>>();
        let source = WgslWriter::default().render(program, &deltas);
        KernelProgram {
            window,
            deltas,
            source,
        }
    }

    /// Halo window geometry.
    pub fn window(&self) -> WindowLayout {
        self.window
    }

    /// Linear delta of each footprint slot.
    pub fn deltas(&self) -> &[i32] {
        &self.deltas
    }

    /// WGSL source of the compute shader, entry point `main`.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A footprint read out of packed windows, for running the kernel form on the CPU.
pub struct PackedWindow<'a> {
    /// Packed cells of every window in the batch.
    pub cells: &'a [u32],
    /// Index of the centre cell in `cells`.
    pub centre: usize,
    /// Slot deltas of the kernel.
    pub deltas: &'a [i32],
}

impl CellSource for PackedWindow<'_> {
    fn cell(&self, slot: u16) -> Option<Cell> {
        let delta = *self.deltas.get(slot as usize)? as isize;
        let index = (self.centre as isize).checked_add(delta)?;
        let bits = *self.cells.get(usize::try_from(index).ok()?)?;
        Some(Cell::unpack(bits))
    }
}

const PRELUDE: &str = r#"struct Params {
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> cells: array<u32>;
@group(0) @binding(2) var<storage, read> centres: array<u32>;
@group(0) @binding(3) var<storage, read_write> results: array<u32>;

fn block_of(cell: u32) -> i32 {
    return i32(cell & 0xFFFFu);
}

fn state_of(cell: u32, slot: u32) -> i32 {
    return i32((cell >> (16u + 8u * slot)) & 0xFFu);
}

fn with_block(cell: u32, value: i32) -> u32 {
    return (cell & 0xFFFF0000u) | (u32(value) & 0xFFFFu);
}

fn with_state(cell: u32, slot: u32, value: i32) -> u32 {
    let shift = 16u + 8u * slot;
    return (cell & ~(0xFFu << shift)) | ((u32(value) & 0xFFu) << shift);
}

fn safe_div(a: i32, b: i32) -> i32 {
    if (b == 0) {
        return 0;
    }
    return a / b;
}

fn safe_rem(a: i32, b: i32) -> i32 {
    if (b == 0) {
        return 0;
    }
    return a % b;
}

fn sign_of_diff(a: i32, b: i32) -> i32 {
    if (a < b) {
        return -1;
    }
    if (a > b) {
        return 1;
    }
    return 0;
}

fn flag(value: bool) -> i32 {
    return select(0, 1, value);
}
"#;

/// Emits WGSL from postfix instruction streams.
///
/// Each stream becomes straight-line code: every instruction defines a fresh
/// `let` temporary and the emitter tracks the stack of temporary names.
#[derive(Default)]
struct WgslWriter {
    out: String,
    next_temp: usize,
}

impl WgslWriter {
    fn render(mut self, program: &Program, deltas: &[i32]) -> String {
        self.out.push_str(PRELUDE);
        self.line(0, "");
        self.line(0, &format!("// rule-set: {}", program.name.replace('\n', " ")));
        self.line(0, &format!("@compute @workgroup_size({WORKGROUP_SIZE})"));
        self.line(
            0,
            "fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {",
        );
        self.line(1, &format!("let item = gid.x + gid.y * groups.x * {WORKGROUP_SIZE}u;"));
        self.line(1, "if (item >= params.count) {");
        self.line(2, "return;");
        self.line(1, "}");
        self.line(1, "let centre = i32(centres[item]);");
        for (slot, delta) in deltas.iter().enumerate() {
            self.line(1, &format!("let n{slot} = cells[u32(centre + ({delta}))];"));
        }
        self.line(1, "var next: u32 = n0;");
        self.line(1, "var matched = false;");

        for (index, rule) in program.rules.iter().enumerate() {
            match &rule.name {
                Some(name) => self.line(1, &format!("// rule {index}: {}", name.replace('\n', " "))),
                None => self.line(1, &format!("// rule {index}")),
            }
            let depth = match program.policy {
                MatchPolicy::FirstMatch => {
                    self.line(1, "if (!matched) {");
                    2
                }
                MatchPolicy::AllMatches => {
                    self.line(1, "{");
                    2
                }
            };
            let guard = self.stream(depth, &rule.guard);
            self.line(depth, &format!("if ({guard} != 0) {{"));
            self.line(depth + 1, "matched = true;");
            for action in &rule.actions {
                match action {
                    Action::Set { field, value } => {
                        let value = self.stream(depth + 1, value);
                        let assignment = match field {
                            Field::Block => format!("next = with_block(next, {value});"),
                            Field::State(slot) => {
                                format!("next = with_state(next, {slot}u, {value});")
                            }
                        };
                        self.line(depth + 1, &assignment);
                    }
                    Action::Copy { slot } => self.line(depth + 1, &format!("next = n{slot};")),
                    Action::Clear => self.line(depth + 1, "next = 0u;"),
                }
            }
            self.line(depth, "}");
            self.line(1, "}");
        }

        self.line(1, "var flags = 0u;");
        self.line(1, "if (matched) {");
        self.line(2, "flags = flags | 1u;");
        self.line(1, "}");
        self.line(1, "if (next != n0) {");
        self.line(2, "flags = flags | 2u;");
        self.line(1, "}");
        self.line(1, "results[item * 2u] = flags;");
        self.line(1, "results[item * 2u + 1u] = next;");
        self.line(0, "}");
        self.out
    }

    /// Emits one stream, returning the temporary holding its value.
    fn stream(&mut self, depth: usize, code: &[Op]) -> String {
        let mut stack: Vec<String> = Vec::new();
        for op in code {
            let expression = match *op {
                Op::Const(value) => literal(value),
                Op::Load { slot, field } => match field {
                    Field::Block => format!("block_of(n{slot})"),
                    Field::State(state) => format!("state_of(n{slot}, {state}u)"),
                },
                Op::Not => {
                    let a = stack.pop().unwrap_or_else(|| "0".to_owned());
                    format!("flag({a} == 0)")
                }
                binary => {
                    let b = stack.pop().unwrap_or_else(|| "0".to_owned());
                    let a = stack.pop().unwrap_or_else(|| "0".to_owned());
                    match binary {
                        Op::Add => format!("{a} + {b}"),
                        Op::Sub => format!("{a} - {b}"),
                        Op::Mul => format!("{a} * {b}"),
                        Op::Div => format!("safe_div({a}, {b})"),
                        Op::Rem => format!("safe_rem({a}, {b})"),
                        Op::Compare => format!("sign_of_diff({a}, {b})"),
                        Op::Eq => format!("flag({a} == {b})"),
                        Op::Ne => format!("flag({a} != {b})"),
                        Op::Lt => format!("flag({a} < {b})"),
                        Op::Gt => format!("flag({a} > {b})"),
                        Op::And => format!("flag({a} != 0 && {b} != 0)"),
                        Op::Or => format!("flag({a} != 0 || {b} != 0)"),
                        Op::Const(_) | Op::Load { .. } | Op::Not => unreachable!(),
                    }
                }
            };
            let temp = format!("t{}", self.next_temp);
            self.next_temp += 1;
            self.line(depth, &format!("let {temp}: i32 = {expression};"));
            stack.push(temp);
        }
        stack.pop().unwrap_or_else(|| "0".to_owned())
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str("    ");
        }
        // Writing into a String cannot fail.
        let _ = writeln!(self.out, "{text}");
    }
}

/// WGSL has no negative literals for `i32::MIN`, so it is spelled as an expression.
fn literal(value: i32) -> String {
    if value == i32::MIN {
        "(-2147483647 - 1)".to_owned()
    } else if value < 0 {
        format!("({value})")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::compiler::Compiler;
    use crate::rules::samples;
    use crate::voxels::block::block_registry::BlockRegistry;
    use cgmath::Vector3;

    #[test]
    fn deltas_follow_window_layout() {
        let footprint = Footprint::new([Vector3::new(0, -1, 0), Vector3::new(1, 0, 1)]);
        let program = Program {
            name: "d".into(),
            policy: MatchPolicy::FirstMatch,
            rules: Vec::new(),
            slots: footprint.len() as u16,
        };
        let kernel = KernelProgram::build(&program, &footprint);
        assert_eq!(kernel.window(), WindowLayout { radius: 1, edge: 18 });
        assert_eq!(kernel.deltas(), &[0, -18, 1 + 18 * 18]);
    }

    #[test]
    fn packed_window_reads_relative_to_centre() {
        let layout = WindowLayout::new(1);
        let mut cells = vec![0u32; layout.volume()];
        let centre = layout.index(5, 5, 5);
        cells[layout.index(5, 4, 5)] = Cell::new(2).pack();
        let deltas = [0, layout.delta(0, -1, 0), layout.delta(0, 1, 0)];
        let window = PackedWindow {
            cells: &cells,
            centre,
            deltas: &deltas,
        };
        assert_eq!(window.cell(1), Some(Cell::new(2)));
        assert_eq!(window.cell(2), Some(Cell::VOID));
        assert_eq!(window.cell(3), None);

        let edge = PackedWindow {
            cells: &cells,
            centre: 0,
            deltas: &deltas,
        };
        assert_eq!(edge.cell(1), None);
    }

    #[test]
    fn generated_source_has_one_branch_per_rule() {
        let registry = BlockRegistry::new();
        let plan = Compiler::new(&registry, 4)
            .compile(&samples::gravity())
            .unwrap();
        let source = plan.kernel().source();
        assert!(source.contains("@compute @workgroup_size(64)"));
        assert_eq!(source.matches("if (!matched) {").count(), plan.program().rules.len());
        assert!(source.contains("results[item * 2u + 1u] = next;"));
        for slot in 0..plan.footprint().len() {
            assert!(source.contains(&format!("let n{slot} = cells[")));
        }
    }

    #[test]
    fn all_matches_policy_drops_the_matched_guard() {
        let registry = BlockRegistry::new();
        let mut def = samples::grass_growth();
        def.policy = MatchPolicy::AllMatches;
        let plan = Compiler::new(&registry, 4).compile(&def).unwrap();
        assert!(!plan.kernel().source().contains("if (!matched)"));
    }

    #[test]
    fn literals_are_valid_wgsl() {
        assert_eq!(literal(5), "5");
        assert_eq!(literal(-5), "(-5)");
        assert_eq!(literal(i32::MIN), "(-2147483647 - 1)");
    }
}
