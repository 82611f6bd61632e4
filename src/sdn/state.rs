//! Device lifecycle state machine
//!
//! `Unbound -> Bound -> {Enabled <-> Disabled} -> Destroyed`, using the
//! state-machines crate in dynamic dispatch mode.

use crate::error::Error;
use state_machines::state_machine;

state_machine! {
    name: DeviceMachine,
    dynamic: true,
    initial: Unbound,
    states: [Unbound, Bound, Enabled, Disabled, Destroyed],
    events {
        bind {
            transition: { from: Unbound, to: Bound }
        }
        enable {
            transition: { from: [Bound, Disabled], to: Enabled }
        }
        disable {
            transition: { from: [Bound, Enabled], to: Disabled }
        }
        destroy {
            transition: { from: [Bound, Enabled, Disabled], to: Destroyed }
        }
    }
}

/// Lifecycle state for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unbound,
    Bound,
    Enabled,
    Disabled,
    Destroyed,
}

impl DeviceState {
    fn from_machine(s: &str) -> Self {
        match s {
            "Bound" => DeviceState::Bound,
            "Enabled" => DeviceState::Enabled,
            "Disabled" => DeviceState::Disabled,
            "Destroyed" => DeviceState::Destroyed,
            _ => DeviceState::Unbound,
        }
    }

    /// Bound, enabled or disabled: a backend object is held
    pub fn is_bound(self) -> bool {
        matches!(
            self,
            DeviceState::Bound | DeviceState::Enabled | DeviceState::Disabled
        )
    }
}

/// Lifecycle tracker owned by each device handle
pub struct Lifecycle {
    machine: DynamicDeviceMachine<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lifecycle({:?})", self.state())
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            machine: DeviceMachine::new(()).into_dynamic(),
        }
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_machine(self.machine.current_state())
    }

    pub fn is_bound(&self) -> bool {
        self.state().is_bound()
    }

    pub fn bind(&mut self) -> crate::error::Result<()> {
        self.machine
            .handle(DeviceMachineEvent::Bind)
            .map_err(|_| Error::AlreadyExists("device is already bound".into()))
    }

    pub fn enable(&mut self) -> crate::error::Result<()> {
        if self.state() == DeviceState::Enabled {
            return Ok(());
        }
        self.machine
            .handle(DeviceMachineEvent::Enable)
            .map_err(|_| Error::NotBound)
    }

    pub fn disable(&mut self) -> crate::error::Result<()> {
        if self.state() == DeviceState::Disabled {
            return Ok(());
        }
        self.machine
            .handle(DeviceMachineEvent::Disable)
            .map_err(|_| Error::NotBound)
    }

    pub fn destroy(&mut self) -> crate::error::Result<()> {
        self.machine
            .handle(DeviceMachineEvent::Destroy)
            .map_err(|_| Error::NotBound)
    }
}
