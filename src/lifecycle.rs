//! Install/activate state machine.

use std::fmt;

use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Not installed yet, or the last install failed
  New,
  Installing,
  /// Installed, waiting to take over from the previous version
  Installed,
  Activating,
  Activated,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::New => "new",
      Self::Installing => "installing",
      Self::Installed => "installed-waiting",
      Self::Activating => "activating",
      Self::Activated => "activated",
    };
    f.write_str(name)
  }
}

/// Tracks where this worker instance is in its lifecycle.
///
/// Transitions are driven by host events and explicit skip-waiting calls.
#[derive(Debug)]
pub struct LifecycleManager {
  state: LifecycleState,
  skip_waiting: bool,
}

impl Default for LifecycleManager {
  fn default() -> Self {
    Self::new()
  }
}

impl LifecycleManager {
  pub fn new() -> Self {
    Self {
      state: LifecycleState::New,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn begin_install(&mut self) -> Result<(), WorkerError> {
    self.transition("install", &[LifecycleState::New], LifecycleState::Installing)
  }

  pub fn finish_install(&mut self) -> Result<(), WorkerError> {
    self.transition(
      "finish install",
      &[LifecycleState::Installing],
      LifecycleState::Installed,
    )
  }

  /// A failed install returns to `New` so the host can retry the event.
  pub fn fail_install(&mut self) {
    if self.state == LifecycleState::Installing {
      self.state = LifecycleState::New;
    }
  }

  /// Ask to activate without waiting for open pages to close.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  /// Whether the host should fire activate now.
  pub fn should_activate(&self) -> bool {
    self.state == LifecycleState::Installed && self.skip_waiting
  }

  pub fn begin_activate(&mut self) -> Result<(), WorkerError> {
    self.transition(
      "activate",
      &[LifecycleState::Installed],
      LifecycleState::Activating,
    )
  }

  pub fn finish_activate(&mut self) -> Result<(), WorkerError> {
    self.transition(
      "finish activate",
      &[LifecycleState::Activating],
      LifecycleState::Activated,
    )
  }

  fn transition(
    &mut self,
    event: &'static str,
    from: &[LifecycleState],
    to: LifecycleState,
  ) -> Result<(), WorkerError> {
    if !from.contains(&self.state) {
      return Err(WorkerError::InvalidTransition {
        event,
        state: self.state.to_string(),
      });
    }
    self.state = to;
    Ok(())
  }
}
