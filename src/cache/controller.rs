//! Cache-first resource controller with an explicit generation lifecycle.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::generation::{Generation, GenerationState};
use super::storage::CacheStorage;
use super::traits::{FetchResult, Fetcher};

/// The one control payload the controller understands.
pub const SKIP_WAITING: &str = "skipWaiting";

/// Lifecycle events delivered to a resource cache worker.
#[allow(async_fn_in_trait)]
pub trait ServiceWorker {
  /// Populate the current generation from the manifest.
  async fn install(&mut self) -> Result<InstallOutcome>;

  /// Answer a resource request, cache first.
  async fn fetch(&self, url: &Url) -> Result<FetchResult>;

  /// Make the current generation active and drop every other one.
  fn activate(&mut self) -> Result<Activation>;

  /// Handle a control message posted by a page.
  fn message(&mut self, payload: &str) -> Result<MessageOutcome>;
}

/// Recognized control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  SkipWaiting,
}

impl ControlMessage {
  pub fn parse(payload: &str) -> Option<Self> {
    match payload {
      SKIP_WAITING => Some(Self::SkipWaiting),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
  /// Number of stored entries
  pub entries: usize,
  /// Set when a pending skip-waiting activated the generation right away
  pub activation: Option<Activation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
  /// Generation is active; `deleted` lists the stores that were removed
  Activated { deleted: Vec<String> },
  /// Clients of the previous generation are still open
  Waiting { clients: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
  /// Waiting generation was activated immediately
  Activated { deleted: Vec<String> },
  /// Remembered until install completes
  Deferred,
  /// Nothing to accelerate in the current state
  NoEffect,
  /// Payload is not a known control message
  Unrecognized,
}

/// Resource cache controller for one generation.
///
/// Owns its storage and fetcher; there is no process-wide state.
pub struct CacheController<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: F,
  origin: Url,
  manifest: Vec<String>,
  generation: Generation,
  skip_waiting: bool,
  /// Open clients still controlled by the previous generation
  old_clients: usize,
}

impl<S: CacheStorage, F: Fetcher> CacheController<S, F> {
  /// Create a controller, picking up the generation's state from storage.
  pub fn new(
    storage: Arc<S>,
    fetcher: F,
    origin: Url,
    tag: impl Into<String>,
    manifest: Vec<String>,
  ) -> Result<Self> {
    let tag = tag.into();
    let state = storage
      .generation(&tag)?
      .map(|record| record.state)
      .unwrap_or(GenerationState::New);

    debug!(generation = %tag, state = state.as_str(), "controller created");

    Ok(Self {
      storage,
      fetcher,
      origin,
      manifest,
      generation: Generation::new(tag, state),
      skip_waiting: false,
      old_clients: 0,
    })
  }

  pub fn tag(&self) -> &str {
    self.generation.tag()
  }

  pub fn state(&self) -> GenerationState {
    self.generation.state()
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Resolve a manifest path (or any path) to the request key used by the store.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid resource path '{}': {}", path, e))
  }

  #[allow(dead_code)]
  pub fn client_opened(&mut self) {
    self.old_clients += 1;
  }

  #[allow(dead_code)]
  pub fn client_closed(&mut self) {
    self.old_clients = self.old_clients.saturating_sub(1);
  }

  #[allow(dead_code)]
  pub fn open_clients(&self) -> usize {
    self.old_clients
  }

  /// Fetch every manifest entry, then write them all in one transaction.
  async fn populate(&self) -> Result<usize> {
    let urls = self
      .manifest
      .iter()
      .map(|path| self.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    let fetches = urls.iter().map(|url| async move {
      let response = self.fetcher.fetch(url).await?;
      if !response.is_success() {
        return Err(eyre!(
          "Request for {} failed with status {}",
          url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((url.to_string(), response))
    });

    let entries = try_join_all(fetches).await?;
    self
      .storage
      .put_generation(self.generation.tag(), &entries)?;

    Ok(entries.len())
  }

  fn activate_now(&mut self) -> Result<Vec<String>> {
    self.generation.guard(GenerationState::Active)?;
    self.storage.mark_active(self.generation.tag())?;
    self.generation.transition(GenerationState::Active)?;
    self.old_clients = 0;

    let deleted = self.prune()?;
    info!(
      generation = %self.generation.tag(),
      deleted = deleted.len(),
      "generation activated"
    );
    Ok(deleted)
  }

  /// Delete every store that is not the current generation.
  fn prune(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name == self.generation.tag() {
        continue;
      }
      if self.storage.delete(&name)? {
        info!(generation = %name, "deleted stale cache generation");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

impl<S: CacheStorage, F: Fetcher> ServiceWorker for CacheController<S, F> {
  async fn install(&mut self) -> Result<InstallOutcome> {
    self.generation.transition(GenerationState::Installing)?;
    info!(
      generation = %self.generation.tag(),
      resources = self.manifest.len(),
      "installing cache generation"
    );

    let entries = match self.populate().await {
      Ok(entries) => entries,
      Err(e) => {
        self.generation.transition(GenerationState::Redundant)?;
        warn!(generation = %self.generation.tag(), error = %e, "install failed");
        return Err(e);
      }
    };

    self.generation.transition(GenerationState::Installed)?;
    info!(generation = %self.generation.tag(), entries, "cache generation installed");

    let activation = if self.skip_waiting {
      Some(Activation::Activated {
        deleted: self.activate_now()?,
      })
    } else {
      None
    };

    Ok(InstallOutcome {
      entries,
      activation,
    })
  }

  async fn fetch(&self, url: &Url) -> Result<FetchResult> {
    if let Some(active) = self.storage.active_generation()? {
      if let Some(response) = self.storage.match_request(&active, url.as_str())? {
        debug!(%url, generation = %active, "served from cache");
        return Ok(FetchResult::from_cache(response));
      }
    }

    // Read-through: the network response is not written back.
    let response = self.fetcher.fetch(url).await?;
    Ok(FetchResult::from_network(response))
  }

  fn activate(&mut self) -> Result<Activation> {
    self.generation.guard(GenerationState::Active)?;

    if self.old_clients > 0 && !self.skip_waiting {
      info!(
        generation = %self.generation.tag(),
        clients = self.old_clients,
        "waiting for previous generation's clients to close"
      );
      return Ok(Activation::Waiting {
        clients: self.old_clients,
      });
    }

    Ok(Activation::Activated {
      deleted: self.activate_now()?,
    })
  }

  fn message(&mut self, payload: &str) -> Result<MessageOutcome> {
    let Some(ControlMessage::SkipWaiting) = ControlMessage::parse(payload) else {
      warn!(payload, "ignoring unrecognized control message");
      return Ok(MessageOutcome::Unrecognized);
    };

    self.skip_waiting = true;
    match self.generation.state() {
      GenerationState::Installed => Ok(MessageOutcome::Activated {
        deleted: self.activate_now()?,
      }),
      GenerationState::New | GenerationState::Installing => Ok(MessageOutcome::Deferred),
      _ => Ok(MessageOutcome::NoEffect),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::traits::{FetchSource, StoredResponse};
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const ORIGIN: &str = "http://payroll.test";

  /// Serves canned responses by URL; anything else is a connection error.
  struct FakeFetcher {
    responses: HashMap<String, StoredResponse>,
    calls: Arc<AtomicUsize>,
  }

  impl FakeFetcher {
    fn new(paths: &[(&str, u16, &str)]) -> (Self, Arc<AtomicUsize>) {
      let calls = Arc::new(AtomicUsize::new(0));
      let responses = paths
        .iter()
        .map(|(path, status, body)| {
          (
            format!("{}{}", ORIGIN, path),
            StoredResponse::new(*status, vec![], body.as_bytes().to_vec()),
          )
        })
        .collect();
      (
        Self {
          responses,
          calls: calls.clone(),
        },
        calls,
      )
    }
  }

  impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<StoredResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .responses
        .get(url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("connection refused: {}", url))
    }
  }

  fn site() -> Vec<(&'static str, u16, &'static str)> {
    vec![
      ("/", 200, "<html>root</html>"),
      ("/index.html", 200, "<html>index</html>"),
      ("/styles.css", 200, "body{}"),
      ("/live.json", 200, "{\"live\":true}"),
    ]
  }

  fn manifest() -> Vec<String> {
    vec!["/".into(), "/index.html".into(), "/styles.css".into()]
  }

  fn controller(
    storage: &Arc<SqliteStorage>,
    tag: &str,
    paths: &[(&str, u16, &str)],
    manifest: Vec<String>,
  ) -> (CacheController<SqliteStorage, FakeFetcher>, Arc<AtomicUsize>) {
    let (fetcher, calls) = FakeFetcher::new(paths);
    let origin = Url::parse(ORIGIN).unwrap();
    let controller = CacheController::new(storage.clone(), fetcher, origin, tag, manifest).unwrap();
    (controller, calls)
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_install_stores_manifest_and_waits() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, calls) = controller(&storage, "v1", &site(), manifest());

    let outcome = sw.install().await.unwrap();

    assert_eq!(outcome.entries, 3);
    assert_eq!(outcome.activation, None);
    assert_eq!(sw.state(), GenerationState::Installed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(storage.entries("v1").unwrap().len(), 3);
    assert!(storage.active_generation().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing_on_network_error() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let mut paths = manifest();
    paths.push("/zra.png".into());
    let (mut sw, _) = controller(&storage, "v1", &site(), paths);

    assert!(sw.install().await.is_err());

    assert_eq!(sw.state(), GenerationState::Redundant);
    assert!(storage.generation("v1").unwrap().is_none());
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_fails_on_error_status() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let mut paths = site();
    paths.push(("/work.js", 404, "not found"));
    let mut entries = manifest();
    entries.push("/work.js".into());
    let (mut sw, _) = controller(&storage, "v1", &paths, entries);

    let err = sw.install().await.unwrap_err();

    assert!(err.to_string().contains("404"));
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_install_leaves_previous_generation_serving() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut v1, _) = controller(&storage, "v1", &site(), manifest());
    v1.install().await.unwrap();
    v1.activate().unwrap();

    let mut broken = manifest();
    broken.push("/gone.css".into());
    let (mut v2, v2_calls) = controller(&storage, "v2", &site(), broken);
    assert!(v2.install().await.is_err());

    let before = v2_calls.load(Ordering::SeqCst);
    let result = v2.fetch(&url("/styles.css")).await.unwrap();
    assert_eq!(result.source, FetchSource::Cache);
    assert_eq!(v2_calls.load(Ordering::SeqCst), before);
    assert_eq!(storage.keys().unwrap(), vec!["v1".to_string()]);
  }

  #[tokio::test]
  async fn test_second_install_of_same_generation_is_rejected() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();

    assert!(sw.install().await.is_err());

    let (mut reloaded, _) = controller(&storage, "v1", &site(), manifest());
    assert_eq!(reloaded.state(), GenerationState::Installed);
    assert!(reloaded.install().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_keeps_only_current_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let stale = StoredResponse::new(200, vec![], b"old".to_vec());
    storage
      .put_generation("v0", &[(url("/").to_string(), stale.clone())])
      .unwrap();
    storage
      .put_generation("other-app", &[(url("/").to_string(), stale)])
      .unwrap();

    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();
    let activation = sw.activate().unwrap();

    let mut deleted = match activation {
      Activation::Activated { deleted } => deleted,
      other => panic!("expected activation, got {:?}", other),
    };
    deleted.sort();
    assert_eq!(deleted, vec!["other-app".to_string(), "v0".to_string()]);
    assert_eq!(storage.keys().unwrap(), vec!["v1".to_string()]);
    assert_eq!(storage.active_generation().unwrap().as_deref(), Some("v1"));
    assert_eq!(sw.state(), GenerationState::Active);
  }

  #[tokio::test]
  async fn test_rollover_replaces_active_generation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut v1, _) = controller(&storage, "v1", &site(), manifest());
    v1.install().await.unwrap();
    v1.activate().unwrap();

    let (mut v2, _) = controller(&storage, "v2", &site(), manifest());
    v2.install().await.unwrap();
    // Both generations coexist until v2 activates
    assert_eq!(storage.keys().unwrap().len(), 2);
    assert_eq!(storage.active_generation().unwrap().as_deref(), Some("v1"));

    v2.activate().unwrap();
    assert_eq!(storage.keys().unwrap(), vec!["v2".to_string()]);
  }

  #[tokio::test]
  async fn test_fetch_hit_skips_network() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, calls) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();
    sw.activate().unwrap();
    let before = calls.load(Ordering::SeqCst);

    let result = sw.fetch(&url("/index.html")).await.unwrap();

    assert_eq!(result.source, FetchSource::Cache);
    assert_eq!(result.response.body, b"<html>index</html>");
    assert_eq!(calls.load(Ordering::SeqCst), before);
  }

  #[tokio::test]
  async fn test_fetch_miss_issues_one_request_and_does_not_store() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, calls) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();
    sw.activate().unwrap();
    let before = calls.load(Ordering::SeqCst);

    let result = sw.fetch(&url("/live.json")).await.unwrap();

    assert_eq!(result.source, FetchSource::Network);
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    assert!(storage
      .match_request("v1", url("/live.json").as_str())
      .unwrap()
      .is_none());

    sw.fetch(&url("/live.json")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), before + 2);
  }

  #[tokio::test]
  async fn test_fetch_network_failure_propagates() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (sw, _) = controller(&storage, "v1", &site(), manifest());

    assert!(sw.fetch(&url("/offline.html")).await.is_err());
  }

  #[tokio::test]
  async fn test_waiting_generation_does_not_serve() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();

    let result = sw.fetch(&url("/")).await.unwrap();
    assert_eq!(result.source, FetchSource::Network);
  }

  #[tokio::test]
  async fn test_activate_waits_for_open_clients() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();
    sw.client_opened();
    sw.client_opened();
    assert_eq!(sw.open_clients(), 2);

    assert_eq!(sw.activate().unwrap(), Activation::Waiting { clients: 2 });
    assert_eq!(sw.state(), GenerationState::Installed);

    sw.client_closed();
    sw.client_closed();
    assert!(matches!(sw.activate().unwrap(), Activation::Activated { .. }));
  }

  #[tokio::test]
  async fn test_skip_waiting_forces_activation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();
    sw.client_opened();

    let outcome = sw.message(SKIP_WAITING).unwrap();

    assert_eq!(outcome, MessageOutcome::Activated { deleted: vec![] });
    assert_eq!(sw.state(), GenerationState::Active);
    assert_eq!(storage.active_generation().unwrap().as_deref(), Some("v1"));
  }

  #[tokio::test]
  async fn test_skip_waiting_before_install_activates_on_completion() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());

    assert_eq!(sw.message(SKIP_WAITING).unwrap(), MessageOutcome::Deferred);
    let outcome = sw.install().await.unwrap();

    assert_eq!(
      outcome.activation,
      Some(Activation::Activated { deleted: vec![] })
    );
    assert_eq!(sw.state(), GenerationState::Active);
  }

  #[tokio::test]
  async fn test_skip_waiting_on_active_generation_has_no_effect() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());
    sw.install().await.unwrap();
    sw.activate().unwrap();

    assert_eq!(sw.message(SKIP_WAITING).unwrap(), MessageOutcome::NoEffect);
  }

  #[test]
  fn test_unrecognized_message_is_ignored() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());

    assert_eq!(
      sw.message("skipwaiting").unwrap(),
      MessageOutcome::Unrecognized
    );
    assert_eq!(sw.state(), GenerationState::New);
  }

  #[test]
  fn test_activate_before_install_is_rejected() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut sw, _) = controller(&storage, "v1", &site(), manifest());

    assert!(sw.activate().is_err());
    assert!(storage.keys().unwrap().is_empty());
  }

  #[test]
  fn test_resolve_joins_against_origin() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (sw, _) = controller(&storage, "v1", &site(), manifest());

    assert_eq!(
      sw.resolve("/work.css").unwrap().as_str(),
      "http://payroll.test/work.css"
    );
  }
}
