//! The copy-on-write storage pool: the virtual/physical block mapping, snapshot
//! lifecycle, and the allocator that ties them to a pool's vdevs.

pub mod mapping;
pub mod snapshot;
pub mod storage_pool;

pub use mapping::PhysicalVirtualBlockMapping;
pub use snapshot::Snapshot;
pub use storage_pool::{StoragePool, StoragePoolBuilder};

use crate::device::DeviceError;

quick_error! {
    /// Errors from the virtual/physical block mapping.
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub enum MappingError {
        /// Lookup for a key that has no mapping.
        Missing(key: String) {
            display("no mapping for {}", key)
        }
        /// `enroll`/`update` collided on either side of the mapping.
        AlreadyMapped(key: String) {
            display("{} is already mapped", key)
        }
    }
}

pub type MappingResult<T> = Result<T, MappingError>;

quick_error! {
    /// Errors from pool-level operations.
    #[derive(Debug, Clone, PartialEq)]
    pub enum PoolError {
        /// A vdev-level operation failed.
        Device(err: DeviceError) {
            display("{}", err)
            from()
        }
        /// A mapping-level operation failed.
        Mapping(err: MappingError) {
            display("{}", err)
            from()
        }
        /// Virtual block index outside `[0, total pool blocks)`.
        OutOfRange(index: usize, bound: usize) {
            display("virtual block {} out of range, pool has {} blocks", index, bound)
        }
        /// Written payload length did not match the pool's block size.
        BadSize(got: usize, expected: usize) {
            display("wrote {} bytes to a block of size {}", got, expected)
        }
        /// The allocator scanned every block of the chosen vdev and found none free.
        PoolFull {
            display("no free physical block available on any vdev")
        }
        /// A pool's vdevs disagree on block size.
        MismatchedBlockSize {
            display("all vdevs in a pool must share one block size")
        }
        /// A pool was built with no vdevs.
        EmptyPool {
            display("a pool needs at least one vdev")
        }
        /// The builder was missing a required field.
        Builder(message: String) {
            display("{}", message)
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
