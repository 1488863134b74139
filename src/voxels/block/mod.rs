//! # Block Module
//!
//! The per-cell state stored in chunks and moved through compute buffers.
//! A cell is a block type plus a small fixed set of auxiliary state slots
//! (age, fluid level, orientation and the like).

pub mod block_registry;

/// The underlying integer type used to represent block types in memory.
pub type BlockId = u16;

/// The block id of the absent/void state.
pub const VOID_BLOCK: BlockId = 0;

/// Number of auxiliary state slots carried by every cell.
pub const STATE_SLOTS: usize = 2;

/// The state of a single voxel cell.
///
/// # Memory Layout
/// `#[repr(C)]` with no padding, four bytes per cell. The packed `u32` form
/// used by compute buffers is built explicitly by [`Cell::pack`] so it does not
/// depend on host endianness:
///
/// | bits  | content      |
/// |-------|--------------|
/// | 0-15  | block id     |
/// | 16-23 | state slot 0 |
/// | 24-31 | state slot 1 |
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Cell {
    /// The block type of this cell.
    pub block: BlockId,
    /// Auxiliary state slots, addressed by rule-set field names.
    pub states: [u8; STATE_SLOTS],
}

impl Cell {
    /// The absent/void state returned for unallocated, unloaded and out-of-bounds cells.
    pub const VOID: Cell = Cell {
        block: VOID_BLOCK,
        states: [0; STATE_SLOTS],
    };

    /// Creates a cell of the given block type with zeroed state slots.
    pub const fn new(block: BlockId) -> Self {
        Cell {
            block,
            states: [0; STATE_SLOTS],
        }
    }

    /// Creates a cell with explicit state slot values.
    pub const fn with_states(block: BlockId, states: [u8; STATE_SLOTS]) -> Self {
        Cell { block, states }
    }

    /// Returns `true` for the absent/void state.
    pub fn is_void(&self) -> bool {
        self.block == VOID_BLOCK
    }

    /// Packs the cell into its compute buffer representation.
    pub fn pack(self) -> u32 {
        u32::from(self.block) | u32::from(self.states[0]) << 16 | u32::from(self.states[1]) << 24
    }

    /// Rebuilds a cell from its compute buffer representation.
    pub fn unpack(bits: u32) -> Self {
        Cell {
            block: (bits & 0xFFFF) as BlockId,
            states: [((bits >> 16) & 0xFF) as u8, (bits >> 24) as u8],
        }
    }

    /// Reads a field as a signed rule value.
    pub fn field(&self, field: Field) -> i32 {
        match field {
            Field::Block => i32::from(self.block),
            Field::State(slot) => i32::from(self.states[slot as usize]),
        }
    }

    /// Writes a rule value into a field, keeping only the low bits that fit.
    pub fn set_field(&mut self, field: Field, value: i32) {
        match field {
            Field::Block => self.block = value as BlockId,
            Field::State(slot) => self.states[slot as usize] = value as u8,
        }
    }
}

/// A field of a cell that rules can read and write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    /// The block type id.
    Block,
    /// An auxiliary state slot, `0..STATE_SLOTS`.
    State(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_layout_matches_buffer_format() {
        let cell = Cell::with_states(0x1234, [0xAB, 0xCD]);
        assert_eq!(cell.pack(), 0xCDAB_1234);
        assert_eq!(Cell::unpack(0xCDAB_1234), cell);
        assert_eq!(Cell::VOID.pack(), 0);
    }

    #[test]
    fn set_field_truncates_to_field_width() {
        let mut cell = Cell::new(3);
        cell.set_field(Field::State(1), 300);
        assert_eq!(cell.states[1], 44);
        cell.set_field(Field::State(0), -1);
        assert_eq!(cell.field(Field::State(0)), 255);
        cell.set_field(Field::Block, 0x1_0005);
        assert_eq!(cell.block, 5);
    }
}
