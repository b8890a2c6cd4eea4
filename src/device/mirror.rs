//! Mirrored virtual devices: every child holds identical content. Adds a
//! majority-vote read-repair protocol on top of the common virtual device
//! behavior.

use std::collections::HashMap;

use crate::{device::{check_size,
                      virtual_device::{attempt_bring_online_generic, ReplayMode, VirtualDeviceCore,
                                       WriteIntent},
                      Device, DeviceError, DeviceResult},
            log::Logger};

/// A vdev whose children all hold identical content. Size and block size are the
/// size/block size of a single child.
#[derive(Debug)]
pub struct VirtualDeviceMirror {
    core: VirtualDeviceCore,
    block_size: usize,
    size: usize,
}

impl VirtualDeviceMirror {
    /// Build a mirror out of the given children.
    ///
    /// # Panics
    /// Panics if `children` is empty, or they disagree on size or block size.
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn Device>>) -> Self {
        assert!(!children.is_empty(), "mirror needs at least one child");
        let size = children[0].get_size();
        let block_size = children[0].get_block_size();
        assert!(children.iter().all(|d| d.get_size() == size), "all devices must have the same size");
        assert!(
            children.iter().all(|d| d.get_block_size() == block_size),
            "all devices must have the same block size"
        );
        VirtualDeviceMirror { core: VirtualDeviceCore::new(name, children), block_size, size }
    }

    pub fn state(&self) -> crate::device::state::VirtualDeviceState { self.core.state }

    pub fn name(&self) -> &str { &self.core.name }

    pub fn get_block_size(&self) -> usize { self.block_size }

    pub fn get_size(&self) -> usize { self.size }

    pub fn num_blocks(&self) -> usize { self.size / self.block_size }

    pub fn mark_faulted(&mut self) -> bool { self.core.mark_faulted() }

    pub fn is_online(&self) -> bool { self.core.is_online() }

    pub fn is_faulted(&self) -> bool { self.core.is_faulted() }

    pub fn attempt_bring_online(&mut self) -> bool {
        attempt_bring_online_generic(&mut self.core, |core, block_number, data| {
            write_to_all(core, block_number, data, ReplayMode::Replaying).unwrap_or(false)
        })
    }

    /// Write `data` to block `block_number`. For each offline child, attempt to
    /// bring it online first, then write to every online child, recording
    /// per-child success. Any failure enqueues a write intent and transitions the
    /// vdev toward Faulted.
    pub fn write_block(&mut self, block_number: usize, data: &[u8]) -> DeviceResult<bool> {
        check_size(data.len(), self.block_size)?;
        for child in self.core.children.iter_mut() {
            if !child.is_online() {
                child.attempt_bring_online();
            }
        }
        self.core.self_check_state();
        write_to_all(&mut self.core, block_number, data, ReplayMode::Normal)
    }

    /// Read block `block_number`. Checks replica integrity first: if all replicas
    /// agree, returns child 0's value deterministically. On disagreement, returns
    /// the majority value (marking every divergent child faulted), or fails with
    /// `Corruption` if no unique majority exists.
    pub fn read_block(&mut self, block_number: usize) -> DeviceResult<Vec<u8>> {
        let reads = self.read_all_children(block_number)?;
        if reads.iter().skip(1).all(|r| r == &reads[0]) {
            return Ok(reads[0].clone());
        }

        match majority_value(&reads) {
            Some(majority) => {
                self.quarantine_divergent(&reads, &majority)?;
                Ok(majority)
            },
            None => Err(DeviceError::Corruption(block_number)),
        }
    }

    fn read_all_children(&mut self, block_number: usize) -> DeviceResult<Vec<Vec<u8>>> {
        self.core.children.iter_mut().map(|c| c.read_block(block_number)).collect()
    }

    fn quarantine_divergent(&mut self, reads: &[Vec<u8>], majority: &[u8]) -> DeviceResult<()> {
        for (child, read) in self.core.children.iter_mut().zip(reads.iter()) {
            if read.as_slice() != majority {
                if !child.mark_faulted() {
                    return Err(DeviceError::FaultQuarantineFailed(child.name().to_string()));
                }
            }
        }
        self.core.self_check_state();
        Ok(())
    }

    /// Read every child for block `i`, and if they disagree, attempt a
    /// majority-vote repair. With a unique majority value, every divergent child is
    /// marked faulted and, if `repair` is set, rewritten with the majority value;
    /// repair succeeds iff every child then reads that value. With no unique
    /// majority, repair is impossible and this returns `false`. Either way, any
    /// disagreement transitions the vdev toward Faulted.
    pub fn check_integrity(&mut self, block: usize, repair: bool) -> DeviceResult<bool> {
        let reads = self.read_all_children(block)?;
        if reads.iter().skip(1).all(|r| r == &reads[0]) {
            return Ok(true);
        }

        self.core.mark_faulted();
        let majority = match majority_value(&reads) {
            Some(m) => m,
            None => return Ok(false),
        };

        for (child, read) in self.core.children.iter_mut().zip(reads.iter()) {
            if read.as_slice() != majority {
                if !child.mark_faulted() {
                    return Err(DeviceError::FaultQuarantineFailed(child.name().to_string()));
                }
                if repair {
                    // mark_faulted just took this child offline (Online -> Faulted);
                    // bring it back online before rewriting, same as write_block does
                    // for any offline child.
                    child.attempt_bring_online();
                    child.write_block(block, &majority)?;
                }
            }
        }
        self.core.self_check_state();

        if !repair {
            return Ok(false);
        }
        let after = self.read_all_children(block)?;
        Ok(after.iter().all(|r| r == &majority))
    }

    /// `check_integrity` over every block in the device. Returns true iff every
    /// block check returned true.
    pub fn check_all_integrity(&mut self, repair: bool) -> DeviceResult<bool> {
        let mut all_ok = true;
        for block in 0..self.num_blocks() {
            if !self.check_integrity(block, repair)? {
                all_ok = false;
            }
        }
        Ok(all_ok)
    }
}

impl Device for VirtualDeviceMirror {
    fn name(&self) -> &str { VirtualDeviceMirror::name(self) }

    fn read_block(&mut self, block_number: usize) -> DeviceResult<Vec<u8>> {
        VirtualDeviceMirror::read_block(self, block_number)
    }

    fn write_block(&mut self, block_number: usize, data: &[u8]) -> DeviceResult<bool> {
        VirtualDeviceMirror::write_block(self, block_number, data)
    }

    fn get_block_size(&self) -> usize { self.block_size }

    fn get_size(&self) -> usize { self.size }

    fn attempt_bring_online(&mut self) -> bool { VirtualDeviceMirror::attempt_bring_online(self) }

    fn mark_faulted(&mut self) -> bool { self.core.mark_faulted() }

    fn is_online(&self) -> bool { self.core.is_online() }

    fn is_faulted(&self) -> bool { self.core.is_faulted() }
}

/// The unique majority value among `reads`, or `None` if the top frequency is tied
/// between two or more distinct values.
fn majority_value(reads: &[Vec<u8>]) -> Option<Vec<u8>> {
    let mut counts: HashMap<&Vec<u8>, usize> = HashMap::new();
    for r in reads {
        *counts.entry(r).or_insert(0) += 1;
    }
    let max = *counts.values().max()?;
    let mut winners = counts.into_iter().filter(|(_, c)| *c == max);
    let (value, _) = winners.next()?;
    if winners.next().is_some() {
        None
    } else {
        Some(value.clone())
    }
}

fn write_to_all(
    core: &mut VirtualDeviceCore,
    block_number: usize,
    data: &[u8],
    mode: ReplayMode,
) -> DeviceResult<bool> {
    let name = core.name.clone();
    let mut successes = Vec::with_capacity(core.children.len());
    for child in core.children.iter_mut() {
        successes.push(child.write_block(block_number, data).unwrap_or(false));
    }
    if successes.iter().all(|s| *s) {
        core.self_check_state();
        return Ok(true);
    }

    let failed: Vec<&str> =
        core.children.iter().zip(successes.iter()).filter(|(_, ok)| !**ok).map(|(d, _)| d.name()).collect();
    debug!(Logger::global(), "mirror write failed on some children, vdev faulted";
        "device" => &name, "block" => block_number, "failing" => format!("{:?}", failed));
    if mode == ReplayMode::Normal {
        core.intents.push(WriteIntent { block_number, data: data.to_vec() });
    }
    core.self_check_state();
    Ok(false)
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
    fn read_repair_detects_and_fixes_divergence() {
        let children = vec![online_pd("pd0", 100, 10), online_pd("pd1", 100, 10), online_pd("pd2", 100, 10)];
        let mut vd = VirtualDeviceMirror::new("vdev1", children);
        vd.write_block(0, b"HelloHello").unwrap();
        vd.write_block(1, b"WorldWorld").unwrap();

        vd.core.children[1].write_block(1, b"BadDataBad").unwrap();

        assert!(!vd.check_all_integrity(false).unwrap());
        assert!(vd.is_faulted());
        assert!(vd.core.children[1].is_faulted());

        // Bring the quarantined child back online so repair can rewrite it.
        vd.core.children[1].attempt_bring_online();
        assert!(vd.check_all_integrity(true).unwrap());
        assert_eq!(vd.core.children[1].read_block(1).unwrap(), b"WorldWorld");
    }

    #[test]
    fn majority_vote_marks_exactly_divergent_children() {
        let children: Vec<Box<dyn Device>> =
            (0..5).map(|i| online_pd(&format!("pd{}", i), 100, 10)).collect();
        let mut vd = VirtualDeviceMirror::new("vdev1", children);
        vd.write_block(0, b"GoodGood00").unwrap();
        vd.core.children[0].write_block(0, b"BadBadBad0").unwrap();
        vd.core.children[1].write_block(0, b"BadBadBad0").unwrap();

        let value = vd.read_block(0).unwrap();
        assert_eq!(value, b"GoodGood00");
        assert!(vd.core.children[0].is_faulted());
        assert!(vd.core.children[1].is_faulted());
        assert!(!vd.core.children[2].is_faulted());
        assert!(!vd.core.children[3].is_faulted());
        assert!(!vd.core.children[4].is_faulted());
    }

    #[test]
    fn no_unique_majority_is_corruption() {
        let children: Vec<Box<dyn Device>> = vec![online_pd("pd0", 100, 10), online_pd("pd1", 100, 10)];
        let mut vd = VirtualDeviceMirror::new("vdev1", children);
        vd.core.children[0].write_block(0, b"AAAAAAAAAA").unwrap();
        vd.core.children[1].write_block(0, b"BBBBBBBBBB").unwrap();

        assert_eq!(vd.read_block(0), Err(DeviceError::Corruption(0)));
    }

    #[test]
    fn intent_queue_drains_on_bring_online() {
        let offline_pd = PhysicalDevice::new("pd1", 100, 10);
        let children = vec![online_pd("pd0", 100, 10), Box::new(offline_pd) as Box<dyn Device>];
        let mut vd = VirtualDeviceMirror::new("vdev1", children);

        assert!(!vd.write_block(0, b"AAAAAAAAAA").unwrap());
        assert!(!vd.write_block(1, b"BBBBBBBBBB").unwrap());
        assert_eq!(vd.core.intents.len(), 2);

        assert!(vd.attempt_bring_online());
        assert_eq!(vd.core.intents.len(), 0);
    }
}
