//! User-facing side effects of API calls.

use url::Url;

/// Pages the client can send the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
  Login,
  Logout,
}

impl Navigation {
  pub fn path(self) -> &'static str {
    match self {
      Self::Login => "/login",
      Self::Logout => "/logout",
    }
  }
}

/// Where alerts and navigations end up.
pub trait Page: Send + Sync {
  /// Show a blocking message to the user.
  fn alert(&self, message: &str);

  /// Send the user to another page.
  fn navigate(&self, target: Navigation);
}

/// Page that writes alerts to stderr and prints navigation targets.
pub struct TerminalPage {
  origin: Url,
}

impl TerminalPage {
  pub fn new(origin: Url) -> Self {
    Self { origin }
  }
}

impl Page for TerminalPage {
  fn alert(&self, message: &str) {
    eprintln!("{}", message);
  }

  fn navigate(&self, target: Navigation) {
    match self.origin.join(target.path()) {
      Ok(url) => println!("Continue at {}", url),
      Err(_) => println!("Continue at {}", target.path()),
    }
  }
}

/// Page that remembers what happened, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPage {
  pub alerts: std::sync::Mutex<Vec<String>>,
  pub navigations: std::sync::Mutex<Vec<Navigation>>,
}

#[cfg(test)]
impl RecordingPage {
  pub fn alerts(&self) -> Vec<String> {
    self.alerts.lock().unwrap().clone()
  }

  pub fn navigations(&self) -> Vec<Navigation> {
    self.navigations.lock().unwrap().clone()
  }
}

#[cfg(test)]
impl Page for RecordingPage {
  fn alert(&self, message: &str) {
    self.alerts.lock().unwrap().push(message.to_string());
  }

  fn navigate(&self, target: Navigation) {
    self.navigations.lock().unwrap().push(target);
  }
}
