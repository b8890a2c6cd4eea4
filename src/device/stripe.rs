//! Striped virtual devices: children are concatenated into one larger address
//! space, no redundancy.

use crate::{device::{check_range, check_size,
                      virtual_device::{attempt_bring_online_generic, ReplayMode, VirtualDeviceCore,
                                       WriteIntent},
                      Device, DeviceError, DeviceResult},
            log::Logger};

/// A vdev whose logical space is the concatenation of its children's. All
/// children must share a block size.
#[derive(Debug)]
pub struct VirtualDeviceStripe {
    core: VirtualDeviceCore,
    block_size: usize,
    size: usize,
    /// `offsets[i]` = the global block number at which child `i` begins.
    offsets: Vec<usize>,
}

/// Resolve a global block number to (child index, local block number) given a
/// stripe's precomputed child offsets. Free function so it can be shared between
/// `resolve` and the intent-replay closure without fighting the borrow checker over
/// `self`.
fn resolve_in(offsets: &[usize], total_blocks: usize, block_number: usize) -> DeviceResult<(usize, usize)> {
    check_range(block_number, total_blocks)?;
    for i in (0..offsets.len()).rev() {
        if block_number >= offsets[i] {
            return Ok((i, block_number - offsets[i]));
        }
    }
    unreachable!("offsets[0] is always 0, so the loop above always matches")
}

fn write_resolved(
    core: &mut VirtualDeviceCore,
    child_idx: usize,
    local: usize,
    global_block_number: usize,
    data: &[u8],
    mode: ReplayMode,
) -> DeviceResult<bool> {
    let name = core.name.clone();
    let child = &mut core.children[child_idx];
    if !child.is_online() {
        let success = child.attempt_bring_online();
        debug!(Logger::global(), "attempted to bring child online"; "device" => &name, "child" => child.name(), "success" => success);
    }
    if child.is_online() {
        let result = child.write_block(local, data);
        core.self_check_state();
        result
    } else {
        if mode == ReplayMode::Normal {
            core.intents.push(WriteIntent { block_number: global_block_number, data: data.to_vec() });
        }
        core.self_check_state();
        Ok(false)
    }
}

impl VirtualDeviceStripe {
    /// Build a stripe out of the given children, in order.
    ///
    /// # Panics
    /// Panics if `children` is empty or the children disagree on block size.
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn Device>>) -> Self {
        assert!(!children.is_empty(), "stripe needs at least one child");
        let block_size = children[0].get_block_size();
        assert!(
            children.iter().all(|d| d.get_block_size() == block_size),
            "all devices must have the same block size"
        );

        let mut offsets = Vec::with_capacity(children.len());
        let mut rolling = 0usize;
        for child in &children {
            offsets.push(rolling);
            rolling += child.num_blocks();
        }
        let size = children.iter().map(Device::get_size).sum();

        VirtualDeviceStripe { core: VirtualDeviceCore::new(name, children), block_size, size, offsets }
    }

    pub fn state(&self) -> crate::device::state::VirtualDeviceState { self.core.state }

    pub fn attempt_bring_online(&mut self) -> bool {
        let offsets = self.offsets.clone();
        let total_blocks = self.num_blocks();
        attempt_bring_online_generic(&mut self.core, move |core, block_number, data| {
            match resolve_in(&offsets, total_blocks, block_number) {
                Ok((child_idx, local)) => {
                    write_resolved(core, child_idx, local, block_number, data, ReplayMode::Replaying)
                        .unwrap_or(false)
                },
                Err(_) => false,
            }
        })
    }

    fn resolve(&self, block_number: usize) -> DeviceResult<(usize, usize)> {
        resolve_in(&self.offsets, self.num_blocks(), block_number)
    }

    pub fn write_block(&mut self, block_number: usize, data: &[u8]) -> DeviceResult<bool> {
        check_size(data.len(), self.block_size)?;
        self.core.self_check_state();
        let (child_idx, local) = self.resolve(block_number)?;
        write_resolved(&mut self.core, child_idx, local, block_number, data, ReplayMode::Normal)
    }

    pub fn read_block(&mut self, block_number: usize) -> DeviceResult<Vec<u8>> {
        let (child_idx, local) = self.resolve(block_number)?;
        let child = &mut self.core.children[child_idx];
        if !child.is_online() {
            child.attempt_bring_online();
        }
        if child.is_online() {
            child.read_block(local)
        } else {
            Err(DeviceError::NotOnline(self.core.state.to_string()))
        }
    }

    pub fn get_block_size(&self) -> usize { self.block_size }

    pub fn get_size(&self) -> usize { self.size }

    pub fn num_blocks(&self) -> usize { self.size / self.block_size }

    pub fn mark_faulted(&mut self) -> bool { self.core.mark_faulted() }

    pub fn is_online(&self) -> bool { self.core.is_online() }

    pub fn is_faulted(&self) -> bool { self.core.is_faulted() }

    pub fn name(&self) -> &str { &self.core.name }
}

impl Device for VirtualDeviceStripe {
    fn name(&self) -> &str { VirtualDeviceStripe::name(self) }

    fn read_block(&mut self, block_number: usize) -> DeviceResult<Vec<u8>> {
        VirtualDeviceStripe::read_block(self, block_number)
    }

    fn write_block(&mut self, block_number: usize, data: &[u8]) -> DeviceResult<bool> {
        VirtualDeviceStripe::write_block(self, block_number, data)
    }

    fn get_block_size(&self) -> usize { self.block_size }

    fn get_size(&self) -> usize { self.size }

    fn attempt_bring_online(&mut self) -> bool { VirtualDeviceStripe::attempt_bring_online(self) }

    fn mark_faulted(&mut self) -> bool { self.core.mark_faulted() }

    fn is_online(&self) -> bool { self.core.is_online() }

    fn is_faulted(&self) -> bool { self.core.is_faulted() }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::physical::PhysicalDevice;

    fn online_pd(name: &str, size: usize, bs: usize) -> Box<dyn Device> {
        let mut pd = PhysicalDevice::new(name, size, bs);
        pd.attempt_bring_online();
        Box::new(pd)
    }

    #[test]
    fn single_device_stripe_round_trip() {
        let mut vd = VirtualDeviceStripe::new("vdev1", vec![online_pd("pd0", 100, 10)]);
        assert!(vd.write_block(9, b"HelloHello").unwrap());
        assert_eq!(vd.read_block(9).unwrap(), b"HelloHello");
    }

    #[test]
    fn resolves_across_children() {
        let children = vec![online_pd("pd0", 50, 10), online_pd("pd1", 50, 10)];
        let mut vd = VirtualDeviceStripe::new("vdev1", children);
        assert_eq!(vd.num_blocks(), 10);
        assert!(vd.write_block(7, &[9u8; 10]).unwrap());
        assert_eq!(vd.read_block(7).unwrap(), vec![9u8; 10]);
    }

    #[test]
    fn offline_child_queues_intent_and_faults() {
        let pd = PhysicalDevice::new("pd0", 100, 10); // left offline deliberately
        let mut vd = VirtualDeviceStripe::new("vdev1", vec![Box::new(pd)]);
        let result = vd.write_block(0, &[1u8; 10]).unwrap();
        assert!(!result);
        assert!(vd.is_faulted());
        assert_eq!(vd.core.intents.len(), 1);
    }

    #[test]
    fn intent_replay_drains_in_fifo_order() {
        let pd = PhysicalDevice::new("pd0", 100, 10);
        let mut vd = VirtualDeviceStripe::new("vdev1", vec![Box::new(pd)]);
        vd.write_block(0, b"AAAAAAAAAA").unwrap();
        vd.write_block(1, b"BBBBBBBBBB").unwrap();
        assert_eq!(vd.core.intents.len(), 2);

        assert!(vd.attempt_bring_online());
        assert_eq!(vd.core.intents.len(), 0);
        assert_eq!(vd.read_block(0).unwrap(), b"AAAAAAAAAA");
        assert_eq!(vd.read_block(1).unwrap(), b"BBBBBBBBBB");
    }
}
