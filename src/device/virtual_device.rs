//! Common state and behavior shared by [`VirtualDeviceStripe`](crate::device::stripe::VirtualDeviceStripe)
//! and [`VirtualDeviceMirror`](crate::device::mirror::VirtualDeviceMirror).

use crate::{device::{state::{DeviceStateMachine, VirtualDeviceState},
                      Device},
            log::Logger};

/// Whether a write is happening normally, or as part of intent-queue replay.
///
/// This is an explicit parameter threaded through the write path rather than a
/// shared mutable flag on `self`: it prevents a write that fails during replay from
/// re-enqueuing the very intent it is trying to drain.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplayMode {
    Normal,
    Replaying,
}

/// A deferred write, queued because a child was unreachable at write time.
#[derive(Debug, Clone)]
pub struct WriteIntent {
    pub block_number: usize,
    pub data: Vec<u8>,
}

/// State shared by every virtual device kind: its children, its own state, and its
/// write-intent queue.
#[derive(Debug)]
pub struct VirtualDeviceCore {
    pub name: String,
    pub children: Vec<Box<dyn Device>>,
    pub state: VirtualDeviceState,
    pub intents: Vec<WriteIntent>,
}

impl VirtualDeviceCore {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn Device>>) -> Self {
        let mut core = VirtualDeviceCore {
            name: name.into(),
            children,
            state: VirtualDeviceState::Offline,
            intents: Vec::new(),
        };
        core.self_check_state();
        core
    }

    fn attempt_state_update(&mut self, target: VirtualDeviceState) {
        if self.state == target {
            return;
        }
        let next = self.state.request_transition(target);
        if next == target {
            debug!(Logger::global(), "virtual device state transitioned";
                "device" => &self.name, "from" => self.state.to_string(), "to" => next.to_string());
        } else {
            debug!(Logger::global(), "virtual device state transition rejected";
                "device" => &self.name, "from" => self.state.to_string(), "requested" => target.to_string());
        }
        self.state = next;
    }

    /// Recompute `state` from the children and intent queue, checked in order:
    /// Online, then Offline, then Faulted/FaultedOffline, then the Degraded
    /// fallback (a direct assignment, not a guarded transition, since Degraded is
    /// reachable from every operational source state).
    pub fn self_check_state(&mut self) {
        let all_online = self.children.iter().all(|d| d.is_online());
        let all_offline = self.children.iter().all(|d| !d.is_online() && !d.is_faulted());
        let any_faulted = self.children.iter().any(|d| d.is_faulted());
        let intents_pending = !self.intents.is_empty();

        if all_online && !any_faulted && !intents_pending {
            self.attempt_state_update(VirtualDeviceState::Online);
        } else if all_offline && !any_faulted {
            self.attempt_state_update(VirtualDeviceState::Offline);
        } else if any_faulted || intents_pending {
            let all_children_offline = self.children.iter().all(|d| !d.is_online());
            if all_children_offline {
                self.attempt_state_update(VirtualDeviceState::FaultedOffline);
            } else {
                self.attempt_state_update(VirtualDeviceState::Faulted);
            }
        } else {
            self.state = VirtualDeviceState::Degraded;
        }
    }

    pub fn mark_faulted(&mut self) -> bool {
        let target = match self.state {
            VirtualDeviceState::Online => VirtualDeviceState::Faulted,
            VirtualDeviceState::Offline => VirtualDeviceState::FaultedOffline,
            _ => return false,
        };
        self.attempt_state_update(target);
        self.state == target
    }

    pub fn is_online(&self) -> bool { self.state.is_online() }

    pub fn is_faulted(&self) -> bool { self.state.is_faulted() }
}

/// Bring every child online in order, self-check, then drain the write-intent
/// queue in FIFO order. `write_one` performs a single replayed write (delegating to
/// the concrete vdev's own `write_block` in [`ReplayMode::Replaying`]); drained
/// intents that succeed are removed, and on the first failure the remainder stay
/// queued for a future bring-online attempt.
pub fn attempt_bring_online_generic(
    core: &mut VirtualDeviceCore,
    mut write_one: impl FnMut(&mut VirtualDeviceCore, usize, &[u8]) -> bool,
) -> bool {
    for child in core.children.iter_mut() {
        child.attempt_bring_online();
    }
    core.self_check_state();

    if !core.intents.is_empty() {
        let pending = std::mem::take(&mut core.intents);
        let mut remaining = Vec::new();
        let mut replay_failed = false;
        for intent in pending {
            if replay_failed {
                remaining.push(intent);
                continue;
            }
            if write_one(core, intent.block_number, &intent.data) {
                debug!(Logger::global(), "replayed write intent"; "device" => &core.name, "block" => intent.block_number);
            } else {
                debug!(Logger::global(), "failed to replay write intent"; "device" => &core.name, "block" => intent.block_number);
                remaining.push(intent);
                replay_failed = true;
            }
        }
        core.intents = remaining;
        core.self_check_state();
    }

    core.state.is_online()
}
