//! Physical devices: a fixed-size byte array partitioned into equal blocks.

use crate::device::{check_online, check_range, check_size,
                     state::{DeviceStateMachine, PhysicalDeviceState},
                     Device, DeviceResult};

/// A physical disk: a fixed-size byte array holding no redundancy of its own.
#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    name: String,
    size: usize,
    block_size: usize,
    data: Vec<u8>,
    state: PhysicalDeviceState,
}

impl PhysicalDevice {
    /// Create a physical disk with a given size and block size, both in bytes.
    ///
    /// # Panics
    /// Panics if `size` is not a positive multiple of `block_size`, matching the
    /// assertion-style construction-time validation used throughout this crate's
    /// device layer (construction failures are programmer errors, not runtime
    /// conditions callers recover from).
    pub fn new(name: impl Into<String>, size: usize, block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be positive");
        assert!(size > 0, "disk size must be positive");
        assert!(size % block_size == 0, "disk size must be a multiple of block size");
        PhysicalDevice {
            name: name.into(),
            size,
            block_size,
            data: vec![0u8; size],
            state: PhysicalDeviceState::Offline,
        }
    }

    pub fn state(&self) -> PhysicalDeviceState { self.state }

    pub fn size(&self) -> usize { self.size }

    pub fn block_size(&self) -> usize { self.block_size }

    fn transition(&mut self, target: PhysicalDeviceState) -> bool {
        self.state = self.state.request_transition(target);
        self.state == target
    }
}

impl Device for PhysicalDevice {
    fn name(&self) -> &str { &self.name }

    fn read_block(&mut self, block_number: usize) -> DeviceResult<Vec<u8>> {
        check_range(block_number, self.num_blocks())?;
        check_online(self.state.to_string(), self.is_online())?;
        let start = block_number * self.block_size;
        Ok(self.data[start..start + self.block_size].to_vec())
    }

    fn write_block(&mut self, block_number: usize, data: &[u8]) -> DeviceResult<bool> {
        check_range(block_number, self.num_blocks())?;
        check_size(data.len(), self.block_size)?;
        check_online(self.state.to_string(), self.is_online())?;
        let start = block_number * self.block_size;
        self.data[start..start + self.block_size].copy_from_slice(data);
        Ok(true)
    }

    fn get_block_size(&self) -> usize { self.block_size }

    fn get_size(&self) -> usize { self.size }

    fn attempt_bring_online(&mut self) -> bool { self.transition(PhysicalDeviceState::Online) }

    fn mark_faulted(&mut self) -> bool {
        let target = if self.is_online() {
            PhysicalDeviceState::Faulted
        } else {
            PhysicalDeviceState::FaultedOffline
        };
        self.transition(target)
    }

    fn is_online(&self) -> bool { self.state.is_online() }

    fn is_faulted(&self) -> bool { self.state.is_faulted() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_offline() {
        let pd = PhysicalDevice::new("pd0", 100, 10);
        assert_eq!(pd.state(), PhysicalDeviceState::Offline);
    }

    #[test]
    fn read_write_round_trip_when_online() {
        let mut pd = PhysicalDevice::new("pd0", 100, 10);
        assert!(pd.read_block(0).is_err());
        pd.attempt_bring_online();
        assert!(pd.write_block(0, &[1u8; 10]).unwrap());
        assert_eq!(pd.read_block(0).unwrap(), vec![1u8; 10]);
    }

    #[test]
    fn out_of_range_and_bad_size() {
        let mut pd = PhysicalDevice::new("pd0", 100, 10);
        pd.attempt_bring_online();
        assert!(matches!(pd.read_block(10), Err(crate::device::DeviceError::OutOfRange(10, 10))));
        assert!(matches!(
            pd.write_block(0, &[1u8; 3]),
            Err(crate::device::DeviceError::BadSize(3, 10))
        ));
    }

    #[test]
    fn fault_transitions_depend_on_online_state() {
        let mut pd = PhysicalDevice::new("pd0", 100, 10);
        assert!(pd.mark_faulted());
        assert_eq!(pd.state(), PhysicalDeviceState::FaultedOffline);

        let mut pd2 = PhysicalDevice::new("pd1", 100, 10);
        pd2.attempt_bring_online();
        assert!(pd2.mark_faulted());
        assert_eq!(pd2.state(), PhysicalDeviceState::Faulted);
    }
}
