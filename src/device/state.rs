//! Device state machines.
//!
//! Both physical and virtual devices are modeled as tagged variants rather than a
//! class hierarchy: each state is a plain enum value carrying two orthogonal
//! capability flags (`online?`, `faulted?`) via [`DeviceCapability`], and legal
//! transitions are pure data consulted by [`DeviceStateMachine::request_transition`].

use bitflags::bitflags;
use std::fmt;
use strum_macros::Display;

bitflags! {
    /// Orthogonal capability flags carried by every device state.
    ///
    /// `Online` and `Faulted` are independent: `FaultedOffline` is both faulted and
    /// not online, while the virtual-only `Degraded` state is neither.
    pub struct DeviceCapability: u8 {
        const ONLINE  = 0b01;
        const FAULTED = 0b10;
    }
}

/// Common behavior shared by [`PhysicalDeviceState`] and [`VirtualDeviceState`].
pub trait DeviceStateMachine: Copy + Eq + fmt::Debug + fmt::Display {
    /// Capability flags carried by this state.
    fn capability(&self) -> DeviceCapability;

    /// Request a transition to `target`. Returns the resulting state: `target` if
    /// the transition is legal, `self` unchanged otherwise (a rejected request is a
    /// no-op, per the device contract).
    fn request_transition(&self, target: Self) -> Self;

    /// True if this state is considered online (capability-wise).
    fn is_online(&self) -> bool { self.capability().contains(DeviceCapability::ONLINE) }

    /// True if this state is considered faulted (capability-wise).
    fn is_faulted(&self) -> bool { self.capability().contains(DeviceCapability::FAULTED) }
}

/// States a [`PhysicalDevice`](crate::device::physical::PhysicalDevice) can be in.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum PhysicalDeviceState {
    Online,
    Offline,
    Faulted,
    FaultedOffline,
    Disconnected,
}

impl DeviceStateMachine for PhysicalDeviceState {
    fn capability(&self) -> DeviceCapability {
        use PhysicalDeviceState::*;
        match self {
            Online => DeviceCapability::ONLINE,
            Offline | Disconnected => DeviceCapability::empty(),
            Faulted => DeviceCapability::FAULTED,
            FaultedOffline => DeviceCapability::FAULTED,
        }
    }

    fn request_transition(&self, target: Self) -> Self {
        use PhysicalDeviceState::*;
        let legal = match self {
            Online => matches!(target, Offline | Faulted),
            Offline => matches!(target, Online | Disconnected),
            Faulted => matches!(target, FaultedOffline | Online),
            FaultedOffline => matches!(target, Faulted),
            Disconnected => matches!(target, Offline | FaultedOffline),
        };
        if legal {
            target
        } else {
            *self
        }
    }
}

/// States a virtual device ([`VirtualDeviceStripe`](crate::device::stripe::VirtualDeviceStripe),
/// [`VirtualDeviceMirror`](crate::device::mirror::VirtualDeviceMirror)) can be in.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum VirtualDeviceState {
    Online,
    Offline,
    Faulted,
    FaultedOffline,
    /// Operational but reduced: mixed online/offline children, no faults, no
    /// pending write intents. Neither online nor offline nor faulted.
    Degraded,
}

impl DeviceStateMachine for VirtualDeviceState {
    fn capability(&self) -> DeviceCapability {
        use VirtualDeviceState::*;
        match self {
            Online => DeviceCapability::ONLINE,
            Offline => DeviceCapability::empty(),
            Faulted => DeviceCapability::FAULTED,
            FaultedOffline => DeviceCapability::FAULTED,
            Degraded => DeviceCapability::empty(),
        }
    }

    fn request_transition(&self, target: Self) -> Self {
        use VirtualDeviceState::*;
        let legal = match self {
            Online => matches!(target, Offline | Faulted | Degraded),
            Offline => matches!(target, Online | Faulted | Degraded),
            Faulted => matches!(target, FaultedOffline | Online | Degraded),
            FaultedOffline => matches!(target, Faulted),
            Degraded => matches!(target, Offline | Online | Faulted),
        };
        if legal {
            target
        } else {
            *self
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn physical_legal_transitions() {
        use PhysicalDeviceState::*;
        assert_eq!(Offline.request_transition(Online), Online);
        assert_eq!(Online.request_transition(Disconnected), Online);
        assert_eq!(Online.request_transition(Faulted), Faulted);
        assert_eq!(Faulted.request_transition(FaultedOffline), FaultedOffline);
        assert_eq!(FaultedOffline.request_transition(Online), FaultedOffline);
    }

    #[test]
    fn physical_capability_flags() {
        assert!(PhysicalDeviceState::Online.is_online());
        assert!(!PhysicalDeviceState::Online.is_faulted());
        assert!(PhysicalDeviceState::FaultedOffline.is_faulted());
        assert!(!PhysicalDeviceState::FaultedOffline.is_online());
        assert!(!PhysicalDeviceState::Disconnected.is_online());
        assert!(!PhysicalDeviceState::Disconnected.is_faulted());
    }

    #[test]
    fn virtual_degraded_is_reachable_from_every_operational_state() {
        use VirtualDeviceState::*;
        assert_eq!(Online.request_transition(Degraded), Degraded);
        assert_eq!(Offline.request_transition(Degraded), Degraded);
        assert_eq!(Faulted.request_transition(Degraded), Degraded);
        assert_eq!(FaultedOffline.request_transition(Degraded), FaultedOffline);
    }

    #[test]
    fn virtual_capability_flags() {
        assert!(!VirtualDeviceState::Degraded.is_online());
        assert!(!VirtualDeviceState::Degraded.is_faulted());
    }
}
