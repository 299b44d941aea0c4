//! Lifecycle of a single cache generation.

use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;

/// Lifecycle state of a cache generation.
///
/// `New -> Installing -> Installed -> Active -> Superseded -> Deleted`, with
/// `Installing -> Redundant` when population fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Known by tag, nothing stored yet
  New,
  /// Manifest is being fetched
  Installing,
  /// Fully stored, waiting for the previous generation to let go
  Installed,
  /// Serving fetches
  Active,
  /// Replaced by a newer active generation
  Superseded,
  /// Store removed
  Deleted,
  /// Install failed; never serves
  Redundant,
}

impl GenerationState {
  pub fn can_transition_to(self, next: Self) -> bool {
    use GenerationState::*;
    matches!(
      (self, next),
      (New, Installing)
        | (Installing, Installed)
        | (Installing, Redundant)
        | (Installed, Active)
        | (Active, Superseded)
        | (Superseded, Deleted)
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::New => "new",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Active => "active",
      Self::Superseded => "superseded",
      Self::Deleted => "deleted",
      Self::Redundant => "redundant",
    }
  }
}

impl std::fmt::Display for GenerationState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Installed => write!(f, "installed (waiting)"),
      other => write!(f, "{}", other.as_str()),
    }
  }
}

impl FromStr for GenerationState {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "new" => Ok(Self::New),
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "active" => Ok(Self::Active),
      "superseded" => Ok(Self::Superseded),
      "deleted" => Ok(Self::Deleted),
      "redundant" => Ok(Self::Redundant),
      other => Err(eyre!("Unknown generation state '{}'", other)),
    }
  }
}

/// A generation tag together with its current state.
#[derive(Debug, Clone)]
pub struct Generation {
  tag: String,
  state: GenerationState,
}

impl Generation {
  pub fn new(tag: impl Into<String>, state: GenerationState) -> Self {
    Self {
      tag: tag.into(),
      state,
    }
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn state(&self) -> GenerationState {
    self.state
  }

  /// Fail unless moving to `next` is allowed from the current state.
  pub fn guard(&self, next: GenerationState) -> Result<()> {
    if self.state.can_transition_to(next) {
      Ok(())
    } else {
      Err(eyre!(
        "Generation {} cannot move from {} to {}",
        self.tag,
        self.state.as_str(),
        next.as_str()
      ))
    }
  }

  pub fn transition(&mut self, next: GenerationState) -> Result<()> {
    self.guard(next)?;
    tracing::debug!(
      generation = %self.tag,
      from = self.state.as_str(),
      to = next.as_str(),
      "generation transition"
    );
    self.state = next;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path() {
    let mut generation = Generation::new("v1", GenerationState::New);
    for next in [
      GenerationState::Installing,
      GenerationState::Installed,
      GenerationState::Active,
      GenerationState::Superseded,
      GenerationState::Deleted,
    ] {
      generation.transition(next).unwrap();
    }
    assert_eq!(generation.state(), GenerationState::Deleted);
  }

  #[test]
  fn test_failed_install_is_terminal() {
    let mut generation = Generation::new("v1", GenerationState::New);
    generation.transition(GenerationState::Installing).unwrap();
    generation.transition(GenerationState::Redundant).unwrap();

    assert!(generation.transition(GenerationState::Installed).is_err());
    assert!(generation.transition(GenerationState::Active).is_err());
    assert_eq!(generation.state(), GenerationState::Redundant);
  }

  #[test]
  fn test_cannot_skip_install() {
    let generation = Generation::new("v1", GenerationState::New);
    assert!(generation.guard(GenerationState::Active).is_err());
    assert!(generation.guard(GenerationState::Installed).is_err());
  }

  #[test]
  fn test_state_round_trips_through_str() {
    for state in [
      GenerationState::Installed,
      GenerationState::Active,
      GenerationState::Superseded,
    ] {
      assert_eq!(state.as_str().parse::<GenerationState>().unwrap(), state);
    }
    assert!("bogus".parse::<GenerationState>().is_err());
  }

  #[test]
  fn test_display_marks_waiting() {
    assert_eq!(GenerationState::Installed.to_string(), "installed (waiting)");
    assert_eq!(GenerationState::Active.to_string(), "active");
  }
}
