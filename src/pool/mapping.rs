//! The bijection between virtual block numbers and (vdev index, physical block)
//! pairs that copy-on-write writes mutate.

use std::collections::{HashMap, HashSet};

use crate::pool::{MappingError, MappingResult};

/// A virtual block maps to at most one `(vdev index, physical block)` pair, and
/// vice versa. A vdev's position in `StoragePool::vdevs` is its stable index for the
/// mapping's lifetime, per the "mapping as an arena" design: keying by an integer
/// pair instead of device identity makes `clone()` a deep-independent copy for free.
#[derive(Debug, Clone, Default)]
pub struct PhysicalVirtualBlockMapping {
    virtual_to_physical: HashMap<usize, (usize, usize)>,
    physical_to_virtual: HashMap<(usize, usize), usize>,
}

impl PhysicalVirtualBlockMapping {
    pub fn new() -> Self { Self::default() }

    /// Bind `virtual_block` to `(vdev, physical_block)`. Fails if either side is
    /// already in use.
    pub fn enroll(&mut self, vdev: usize, physical_block: usize, virtual_block: usize) -> MappingResult<()> {
        if self.check_virtual(virtual_block) {
            return Err(MappingError::AlreadyMapped(format!("virtual block {}", virtual_block)));
        }
        if self.check_physical(vdev, physical_block) {
            return Err(MappingError::AlreadyMapped(format!(
                "vdev {} physical block {}",
                vdev, physical_block
            )));
        }
        self.virtual_to_physical.insert(virtual_block, (vdev, physical_block));
        self.physical_to_virtual.insert((vdev, physical_block), virtual_block);
        Ok(())
    }

    /// Rebind an already-mapped virtual block to a new physical slot. Returns the
    /// slot it was previously bound to.
    pub fn update(
        &mut self,
        virtual_block: usize,
        new_vdev: usize,
        new_physical_block: usize,
    ) -> MappingResult<(usize, usize)> {
        if !self.check_virtual(virtual_block) {
            return Err(MappingError::Missing(format!("virtual block {}", virtual_block)));
        }
        if self.check_physical(new_vdev, new_physical_block) {
            return Err(MappingError::AlreadyMapped(format!(
                "vdev {} physical block {}",
                new_vdev, new_physical_block
            )));
        }
        let old = self
            .virtual_to_physical
            .insert(virtual_block, (new_vdev, new_physical_block))
            .expect("check_virtual confirmed this key exists");
        self.physical_to_virtual.remove(&old);
        self.physical_to_virtual.insert((new_vdev, new_physical_block), virtual_block);
        Ok(old)
    }

    /// Clear the mapping for `virtual_block`, returning the physical slot it was
    /// bound to.
    pub fn unenroll(&mut self, virtual_block: usize) -> MappingResult<(usize, usize)> {
        let physical = self
            .virtual_to_physical
            .remove(&virtual_block)
            .ok_or_else(|| MappingError::Missing(format!("virtual block {}", virtual_block)))?;
        self.physical_to_virtual.remove(&physical);
        Ok(physical)
    }

    /// `unenroll` via the physical side. Returns the virtual block that was bound.
    pub fn unenroll_physical(&mut self, vdev: usize, physical_block: usize) -> MappingResult<usize> {
        let virtual_block = self.get_virtual(vdev, physical_block)?;
        self.unenroll(virtual_block)?;
        Ok(virtual_block)
    }

    pub fn get_physical(&self, virtual_block: usize) -> MappingResult<(usize, usize)> {
        self.virtual_to_physical
            .get(&virtual_block)
            .copied()
            .ok_or_else(|| MappingError::Missing(format!("virtual block {}", virtual_block)))
    }

    pub fn get_virtual(&self, vdev: usize, physical_block: usize) -> MappingResult<usize> {
        self.physical_to_virtual
            .get(&(vdev, physical_block))
            .copied()
            .ok_or_else(|| MappingError::Missing(format!("vdev {} physical block {}", vdev, physical_block)))
    }

    pub fn check_virtual(&self, virtual_block: usize) -> bool { self.virtual_to_physical.contains_key(&virtual_block) }

    pub fn check_physical(&self, vdev: usize, physical_block: usize) -> bool {
        self.physical_to_virtual.contains_key(&(vdev, physical_block))
    }

    /// The set of currently mapped virtual blocks.
    pub fn virtual_usage_set(&self) -> HashSet<usize> { self.virtual_to_physical.keys().copied().collect() }

    /// The currently mapped physical blocks, grouped by vdev index.
    pub fn physical_usage_sets(&self) -> HashMap<usize, HashSet<usize>> {
        let mut out: HashMap<usize, HashSet<usize>> = HashMap::new();
        for &(vdev, pb) in self.physical_to_virtual.keys() {
            out.entry(vdev).or_insert_with(HashSet::new).insert(pb);
        }
        out
    }
}
