//! An in-memory simulator of a ZFS-like copy-on-write block storage stack.
//!
//! Physical block devices ([`device::physical::PhysicalDevice`]) aggregate into
//! virtual devices ([`device::stripe::VirtualDeviceStripe`],
//! [`device::mirror::VirtualDeviceMirror`]) that stripe or mirror their children.
//! Virtual devices compose into a [`pool::storage_pool::StoragePool`], which presents
//! a sparse virtual block address space with copy-on-write writes and cheap
//! point-in-time snapshots. [`fs::FileSystem`] is a minimal client built on top of the
//! pool's block interface.
//!
//! Everything lives in memory for the lifetime of the process; there is no on-disk
//! format and no crash consistency story.

#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate quick_error;
#[macro_use]
pub extern crate slog;
extern crate slog_stdlog;

pub mod device;
pub mod fs;
pub mod log;
pub mod pool;

pub use device::{physical::PhysicalDevice,
                  state::{PhysicalDeviceState, VirtualDeviceState},
                  Device};
pub use fs::FileSystem;
pub use pool::storage_pool::StoragePool;
