//! Device abstraction: the uniform read/write/size/state contract shared by
//! physical and virtual devices.
//!
//! Pool and vdev code is written against `dyn Device`, not a concrete type, so a
//! stripe can hold mirrors, a mirror can hold stripes, and the pool never needs to
//! know which.

pub mod mirror;
pub mod physical;
pub mod state;
pub mod stripe;
pub mod virtual_device;

use state::PhysicalDeviceState;

quick_error! {
    /// Errors shared by every device implementation.
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub enum DeviceError {
        /// Block index outside `[0, size / block_size)`.
        OutOfRange(index: usize, bound: usize) {
            display("block {} out of range, device has {} blocks", index, bound)
        }
        /// Written payload length did not match the device's block size.
        BadSize(got: usize, expected: usize) {
            display("wrote {} bytes to a block of size {}", got, expected)
        }
        /// Read or write attempted while the device's state is not Online.
        NotOnline(state: String) {
            display("device is not online, current state: {}", state)
        }
        /// Mirror read found no unique majority value among replicas.
        Corruption(block: usize) {
            display("block {} has no unique majority value among mirror replicas", block)
        }
        /// A mirror child that must be quarantined could not transition to a
        /// faulted state.
        FaultQuarantineFailed(child: String) {
            display("could not quarantine child {}, fault transition rejected", child)
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// The capability set every block-addressable store implements, physical or
/// virtual. Mirror-only operations (integrity checking) are intentionally absent
/// here — they live on `VirtualDeviceMirror` directly.
pub trait Device: std::fmt::Debug {
    fn name(&self) -> &str;
    /// Reads may need to bring an offline child online first (virtual devices), so
    /// this takes `&mut self` even though physical device reads never mutate.
    fn read_block(&mut self, block_number: usize) -> DeviceResult<Vec<u8>>;
    fn write_block(&mut self, block_number: usize, data: &[u8]) -> DeviceResult<bool>;
    fn get_block_size(&self) -> usize;
    fn get_size(&self) -> usize;
    fn num_blocks(&self) -> usize { self.get_size() / self.get_block_size() }
    fn attempt_bring_online(&mut self) -> bool;
    fn mark_faulted(&mut self) -> bool;
    fn is_online(&self) -> bool;
    fn is_faulted(&self) -> bool;
}

/// Convenience used by every `read_block`/`write_block` implementation.
pub(crate) fn check_range(index: usize, bound: usize) -> DeviceResult<()> {
    if index >= bound {
        Err(DeviceError::OutOfRange(index, bound))
    } else {
        Ok(())
    }
}

pub(crate) fn check_size(got: usize, expected: usize) -> DeviceResult<()> {
    if got != expected {
        Err(DeviceError::BadSize(got, expected))
    } else {
        Ok(())
    }
}

pub(crate) fn check_online(state_name: impl Into<String>, online: bool) -> DeviceResult<()> {
    if online {
        Ok(())
    } else {
        Err(DeviceError::NotOnline(state_name.into()))
    }
}

/// Re-exported for convenience so callers don't need to reach into `state`.
pub type PhysicalState = PhysicalDeviceState;
