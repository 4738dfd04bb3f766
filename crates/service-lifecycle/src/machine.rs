//! Service lifecycle state machine.
//!
//! ```text
//!            Bind / StartCommand            StoreReady
//!  Created ───────────────────► Starting ───────────────► ForegroundRunning ◄─┐
//!     ▲        [CreateStore]         │    [PromoteForeground]   │   │  Bind / StartCommand / Unbind
//!     │                              │ Destroy                  │   └─ TaskRemoved [ScheduleRelaunch]
//!     │ Stopped                      ▼                          │
//!     │ [ReleaseForeground]     Destroying ◄────────────────────┘
//!     └─────────────────────────────┘        Destroy [BroadcastRestart]
//! ```
//!
//! The machine only decides. Every output is an effect the service performs
//! through its host adapter.

use rust_fsm::*;
use serde::Serialize;
use tracing::{debug, warn};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub service_machine(Created)

    Created => {
        Bind => Starting [CreateStore],
        StartCommand => Starting [CreateStore],
        Destroy => Destroying [BroadcastRestart]
    },
    Starting => {
        StoreReady => ForegroundRunning [PromoteForeground],
        Destroy => Destroying [BroadcastRestart]
    },
    ForegroundRunning => {
        Bind => ForegroundRunning,
        StartCommand => ForegroundRunning,
        Unbind => ForegroundRunning,
        TaskRemoved => ForegroundRunning [ScheduleRelaunch],
        Destroy => Destroying [BroadcastRestart]
    },
    Destroying => {
        Stopped => Created [ReleaseForeground]
    }
}

pub use service_machine::Input as ServiceInput;
pub use service_machine::Output as ServiceOutput;
pub use service_machine::State as ServiceMachineState;
pub use service_machine::StateMachine as ServiceMachine;

/// Externally visible phase, for health output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Created,
    Starting,
    ForegroundRunning,
    Destroying,
}

impl From<&ServiceMachineState> for ServicePhase {
    fn from(state: &ServiceMachineState) -> Self {
        match state {
            ServiceMachineState::Created => ServicePhase::Created,
            ServiceMachineState::Starting => ServicePhase::Starting,
            ServiceMachineState::ForegroundRunning => ServicePhase::ForegroundRunning,
            ServiceMachineState::Destroying => ServicePhase::Destroying,
        }
    }
}

/// Running/foreground flags of a service instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceLifecycleState {
    pub running: bool,
    pub foreground: bool,
}

/// Drives [`ServiceMachine`] and keeps [`ServiceLifecycleState`] in step.
pub struct LifecycleTracker {
    machine: ServiceMachine,
    state: ServiceLifecycleState,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            machine: ServiceMachine::new(),
            state: ServiceLifecycleState::default(),
        }
    }

    /// Feed one event. Returns the effect to perform, if any.
    ///
    /// Events that are impossible in the current phase (e.g. an unbind
    /// before any bind) are ignored.
    pub fn handle(&mut self, input: ServiceInput) -> Option<ServiceOutput> {
        let from = self.phase();
        match self.machine.consume(&input) {
            Ok(output) => {
                match (&input, &output) {
                    (ServiceInput::Bind | ServiceInput::StartCommand, _)
                        if from == ServicePhase::Created =>
                    {
                        self.state.running = true;
                    }
                    (_, Some(ServiceOutput::PromoteForeground)) => self.state.foreground = true,
                    (_, Some(ServiceOutput::ReleaseForeground)) => {
                        self.state = ServiceLifecycleState::default();
                    }
                    _ => {}
                }
                debug!(
                    input = ?input,
                    from = ?from,
                    to = ?self.phase(),
                    output = ?output,
                    "Lifecycle transition"
                );
                output
            }
            Err(_) => {
                warn!(input = ?input, phase = ?from, "Ignoring lifecycle event");
                None
            }
        }
    }

    pub fn phase(&self) -> ServicePhase {
        self.machine.state().into()
    }

    pub fn state(&self) -> ServiceLifecycleState {
        self.state
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}
