//! Controller orchestration.
//!
//! Wires the flag cache, the remote config source, the visibility applier and
//! the change watcher into one explicit controller object per page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::events::{
	ConfigAppliedEvent, ConfigLoadedEvent, ControllerEvent, EventDispatcher, EventHandler,
	LoadFailedEvent, LoadStage, LoggingHandler,
};
use crate::flags::FlagSet;
use crate::loader::{self, CacheMiss, ConfigSource, FetchError, LoadOutcome, ReqwestConfigSource};
use crate::page::Page;
use crate::storage::{CacheError, FlagCache, MemoryFlagCache};
use crate::visibility::{ApplyReport, ChangeWatcher, apply_flags};

pub const DEFAULT_ENDPOINT: &str = "https://lonie12.github.io/red-i-cdn/config.json";
pub const DEFAULT_STORAGE_KEY: &str = "red-international-config";
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Result alias used by controller construction.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors raised while building a controller or editing its override.
///
/// Lifecycle methods never fail; they recover and log instead.
#[derive(Debug, Error)]
pub enum ControllerError {
	#[error("invalid endpoint url: {0}")]
	Url(#[from] url::ParseError),
	#[error("config source setup failed: {0}")]
	Source(#[from] FetchError),
	#[error("cache error: {0}")]
	Cache(#[from] CacheError),
	#[error("invalid controller config: {0}")]
	Config(#[from] serde_json::Error),
	#[error("no page attached to the controller")]
	MissingPage,
}

/// Controller configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
	/// Remote flag endpoint, fetched with a single GET.
	pub endpoint: String,
	/// Cache entry holding the development override.
	pub storage_key: String,
	pub debounce_ms: u64,
	/// Flags held until a load succeeds.
	pub defaults: FlagSet,
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			endpoint: DEFAULT_ENDPOINT.to_string(),
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
			debounce_ms: DEFAULT_DEBOUNCE_MS,
			defaults: FlagSet::defaults(),
		}
	}
}

impl ControllerConfig {
	pub fn from_json(raw: &str) -> ControllerResult<Self> {
		Ok(serde_json::from_str(raw)?)
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn endpoint_url(&self) -> ControllerResult<Url> {
		Ok(Url::parse(&self.endpoint)?)
	}
}

/// Fluent builder for [`VisibilityController`].
pub struct ControllerBuilder {
	config: ControllerConfig,
	cache: Option<Arc<dyn FlagCache>>,
	source: Option<Arc<dyn ConfigSource>>,
	page: Option<Arc<dyn Page>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl ControllerBuilder {
	pub fn new() -> Self {
		Self {
			config: ControllerConfig::default(),
			cache: None,
			source: None,
			page: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: ControllerConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.config.endpoint = endpoint.into();
		self
	}

	pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
		self.config.storage_key = key.into();
		self
	}

	pub fn with_debounce(mut self, debounce: Duration) -> Self {
		self.config.debounce_ms = debounce.as_millis().min(u64::MAX as u128) as u64;
		self
	}

	pub fn with_defaults(mut self, defaults: FlagSet) -> Self {
		self.config.defaults = defaults;
		self
	}

	/// Defaults to a process-local [`MemoryFlagCache`].
	pub fn with_cache(mut self, cache: Arc<dyn FlagCache>) -> Self {
		self.cache = Some(cache);
		self
	}

	/// Defaults to a [`ReqwestConfigSource`] for the configured endpoint.
	pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
		self.source = Some(source);
		self
	}

	pub fn with_page(mut self, page: Arc<dyn Page>) -> Self {
		self.page = Some(page);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn build(self) -> ControllerResult<VisibilityController> {
		let endpoint = self.config.endpoint_url()?;
		let page = self.page.ok_or(ControllerError::MissingPage)?;

		let source: Arc<dyn ConfigSource> = match self.source {
			Some(source) => source,
			None => Arc::new(ReqwestConfigSource::new(endpoint)?),
		};
		let cache: Arc<dyn FlagCache> = self
			.cache
			.unwrap_or_else(|| Arc::new(MemoryFlagCache::new()));

		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		let shared = ControllerShared {
			flags: Mutex::new(self.config.defaults.clone()),
			config: self.config,
			page,
			events: Arc::new(events),
		};

		Ok(VisibilityController {
			shared: Arc::new(shared),
			cache,
			source,
			initialized: Arc::new(AtomicBool::new(false)),
			watcher: tokio::sync::Mutex::new(None),
		})
	}
}

impl Default for ControllerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// State shared with the watcher task.
struct ControllerShared {
	config: ControllerConfig,
	flags: Mutex<FlagSet>,
	page: Arc<dyn Page>,
	events: Arc<EventDispatcher>,
}

impl ControllerShared {
	fn lock_flags(&self) -> MutexGuard<'_, FlagSet> {
		self.flags.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Reapply the held flags.
	fn apply(&self) -> ApplyReport {
		let report = {
			let flags = self.lock_flags();
			self.apply_locked(&flags)
		};
		self.applied(report);
		report
	}

	/// Swap in `next` and apply it without letting another application
	/// interleave.
	fn replace_and_apply(&self, next: FlagSet) -> ApplyReport {
		let report = {
			let mut flags = self.lock_flags();
			*flags = next;
			self.apply_locked(&flags)
		};
		self.applied(report);
		report
	}

	fn apply_locked(&self, flags: &FlagSet) -> ApplyReport {
		let mut report = ApplyReport::default();
		self.page
			.with_tree(&mut |tree| report = apply_flags(tree, flags));
		report
	}

	fn applied(&self, report: ApplyReport) {
		self.events
			.dispatch(ControllerEvent::ConfigApplied(ConfigAppliedEvent {
				report,
				timestamp: chrono::Utc::now(),
			}));
	}
}

/// Config-driven visibility controller for one page.
pub struct VisibilityController {
	shared: Arc<ControllerShared>,
	cache: Arc<dyn FlagCache>,
	source: Arc<dyn ConfigSource>,
	initialized: Arc<AtomicBool>,
	watcher: tokio::sync::Mutex<Option<ChangeWatcher>>,
}

impl VisibilityController {
	/// Controller with default configuration for `page`.
	pub fn new(page: Arc<dyn Page>) -> ControllerResult<Self> {
		Self::builder().with_page(page).build()
	}

	pub fn builder() -> ControllerBuilder {
		ControllerBuilder::new()
	}

	/// Load and apply the configuration, then start watching the page.
	/// Calling it again while initialized does nothing.
	pub async fn initialize(&self) {
		let mut watcher = self.watcher.lock().await;
		if self.initialized.load(Ordering::Acquire) {
			return;
		}

		self.shared.events.dispatch(ControllerEvent::Initializing);
		self.load_config().await;
		self.initialized.store(true, Ordering::Release);

		let shared = self.shared.clone();
		*watcher = Some(ChangeWatcher::start(
			self.shared.page.clone(),
			self.initialized.clone(),
			self.shared.config.debounce(),
			self.shared.events.clone(),
			move || {
				shared.apply();
			},
		));
	}

	/// Disconnect the watcher. The page keeps its last applied state.
	pub async fn shutdown(&self) {
		let mut watcher = self.watcher.lock().await;
		self.initialized.store(false, Ordering::Release);
		if let Some(active) = watcher.take() {
			active.stop();
			self.shared.events.dispatch(ControllerEvent::Shutdown);
		}
	}

	/// Resolve the flag set (cache, remote, held flags) and apply it.
	pub async fn load_config(&self) -> LoadOutcome {
		let outcome = loader::resolve(
			self.cache.as_ref(),
			&self.shared.config.storage_key,
			self.source.as_ref(),
		)
		.await;

		match &outcome {
			LoadOutcome::Cache(flags) => {
				self.loaded("cache", flags);
				self.shared.replace_and_apply(flags.clone());
			}
			LoadOutcome::Remote { flags, cache_miss } => {
				self.cache_missed(cache_miss);
				self.loaded("remote", flags);
				self.shared.replace_and_apply(flags.clone());
			}
			LoadOutcome::Fallback { cache_miss, error } => {
				self.cache_missed(cache_miss);
				self.failed(LoadStage::Remote, self.source.describe(), error.to_string());
				self.shared.apply();
			}
		}

		outcome
	}

	/// Reapply the current flags to the page.
	pub fn apply_config(&self) -> ApplyReport {
		self.shared.apply()
	}

	/// Enabled state of `service`; unknown services are disabled.
	pub fn is_active(&self, service: &str) -> bool {
		self.shared.lock_flags().is_active(service)
	}

	/// Run the load/apply sequence again.
	pub async fn refresh(&self) -> LoadOutcome {
		log::info!("[red-international] refreshing configuration");
		self.load_config().await
	}

	/// Snapshot of the flags currently held.
	pub fn flags(&self) -> FlagSet {
		self.shared.lock_flags().clone()
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	pub fn settings(&self) -> &ControllerConfig {
		&self.shared.config
	}

	/// Store `flags` as the local development override. Takes effect on the
	/// next load.
	pub fn set_local_override(&self, flags: &FlagSet) -> ControllerResult<()> {
		self.cache
			.set(&self.shared.config.storage_key, &flags.to_json())?;
		Ok(())
	}

	pub fn clear_local_override(&self) -> ControllerResult<()> {
		self.cache.remove(&self.shared.config.storage_key)?;
		Ok(())
	}

	fn loaded(&self, source: &'static str, flags: &FlagSet) {
		self.shared
			.events
			.dispatch(ControllerEvent::ConfigLoaded(ConfigLoadedEvent {
				source,
				flags: flags.clone(),
				timestamp: chrono::Utc::now(),
			}));
	}

	fn cache_missed(&self, miss: &CacheMiss) {
		if !matches!(miss, CacheMiss::Absent) {
			let key = self.shared.config.storage_key.clone();
			self.failed(LoadStage::Cache, key, miss.to_string());
		}
	}

	fn failed(&self, stage: LoadStage, origin: String, error: String) {
		self.shared
			.events
			.dispatch(ControllerEvent::LoadFailed(LoadFailedEvent {
				stage,
				origin,
				error,
				timestamp: chrono::Utc::now(),
			}));
	}
}
