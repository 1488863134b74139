//! # Block Registry Module
//!
//! Maps block names used in rule definitions to the compact ids stored in cells.
//!
//! The built-in palette is a compile-time perfect-hash map, so resolving a
//! built-in name never allocates. Hosts that have their own block types
//! register them at runtime; custom ids are handed out after the palette.

use std::collections::HashMap;

use phf::phf_map;

use super::{BlockId, VOID_BLOCK};
use crate::error::RegistryError;

/// Built-in block types, available in every registry.
pub static BUILTIN_BLOCKS: phf::Map<&'static str, BlockId> = phf_map! {
    "void" => 0,
    "stone" => 1,
    "sand" => 2,
    "water" => 3,
    "fire" => 4,
    "dirt" => 5,
    "grass" => 6,
    "wood" => 7,
    "white" => 8,
    "hay" => 9,
    "ash" => 10,
    "leaves" => 11,
};

/// First id handed out to runtime registrations.
pub const FIRST_CUSTOM_BLOCK: BlockId = 64;

/// Name/id table for block types.
///
/// # Examples
///
/// ```
/// use voxel_automata::voxels::block::block_registry::BlockRegistry;
///
/// let mut registry = BlockRegistry::new();
/// assert_eq!(registry.id("sand"), Some(2));
/// let glass = registry.register("glass")?;
/// assert_eq!(registry.name(glass), Some("glass"));
/// # Ok::<(), voxel_automata::error::RegistryError>(())
/// ```
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    custom: HashMap<String, BlockId>,
    names: HashMap<BlockId, String>,
    next_id: Option<BlockId>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    /// Creates a registry holding only the built-in palette.
    pub fn new() -> Self {
        BlockRegistry {
            custom: HashMap::new(),
            names: HashMap::new(),
            next_id: Some(FIRST_CUSTOM_BLOCK),
        }
    }

    /// Resolves a block name to its id.
    ///
    /// # Returns
    /// The id, or `None` if the name is neither built in nor registered.
    pub fn id(&self, name: &str) -> Option<BlockId> {
        BUILTIN_BLOCKS
            .get(name)
            .copied()
            .or_else(|| self.custom.get(name).copied())
    }

    /// Resolves an id back to its name.
    pub fn name(&self, id: BlockId) -> Option<&str> {
        if id == VOID_BLOCK {
            return Some("void");
        }
        BUILTIN_BLOCKS
            .entries()
            .find(|(_, builtin)| **builtin == id)
            .map(|(name, _)| *name)
            .or_else(|| self.names.get(&id).map(String::as_str))
    }

    /// Registers a custom block type, returning its id.
    ///
    /// Registering a name that already exists returns the existing id.
    ///
    /// # Returns
    /// The id, or `RegistryError::IdsExhausted` once the last id is taken.
    pub fn register(&mut self, name: &str) -> Result<BlockId, RegistryError> {
        if let Some(id) = self.id(name) {
            return Ok(id);
        }
        let id = self
            .next_id
            .ok_or_else(|| RegistryError::IdsExhausted(name.to_owned()))?;
        self.next_id = id.checked_add(1);
        self.custom.insert(name.to_owned(), id);
        self.names.insert(id, name.to_owned());
        log::debug!("Registered block type '{}' as {}", name, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_both_ways() {
        let registry = BlockRegistry::new();
        assert_eq!(registry.id("void"), Some(VOID_BLOCK));
        assert_eq!(registry.id("fire"), Some(4));
        assert_eq!(registry.name(2), Some("sand"));
        assert_eq!(registry.id("unobtainium"), None);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut registry = BlockRegistry::new();
        let a = registry.register("glass").unwrap();
        let b = registry.register("glass").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, FIRST_CUSTOM_BLOCK);
        assert_eq!(registry.register("stone"), Ok(1));
        assert_eq!(registry.register("obsidian"), Ok(FIRST_CUSTOM_BLOCK + 1));
    }

    #[test]
    fn ids_run_out_instead_of_wrapping_to_void() {
        let mut registry = BlockRegistry::new();
        registry.next_id = Some(BlockId::MAX);
        assert_eq!(registry.register("last"), Ok(BlockId::MAX));
        assert_eq!(
            registry.register("one_too_many"),
            Err(RegistryError::IdsExhausted("one_too_many".into()))
        );
        assert_eq!(registry.id("one_too_many"), None);
        assert_eq!(registry.name(VOID_BLOCK), Some("void"));
        // Known names still resolve once ids are gone.
        assert_eq!(registry.register("last"), Ok(BlockId::MAX));
    }
}
