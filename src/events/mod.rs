//! Controller lifecycle events.
//!
//! Every notable step (load, failure, application, debounced reapply) is
//! broadcast to registered handlers. The controller always registers a
//! [`LoggingHandler`]; hosts can add their own for metrics or tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::flags::FlagSet;
use crate::visibility::ApplyReport;

/// Stage of the load sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Cache,
    Remote,
}

#[derive(Debug, Clone)]
pub struct ConfigLoadedEvent {
    pub source: &'static str,
    pub flags: FlagSet,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoadFailedEvent {
    pub stage: LoadStage,
    /// Cache key or remote location that failed.
    pub origin: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConfigAppliedEvent {
    pub report: ApplyReport,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReapplyScheduledEvent {
    pub added: usize,
    pub delay: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Initializing,
    ConfigLoaded(ConfigLoadedEvent),
    LoadFailed(LoadFailedEvent),
    ConfigApplied(ConfigAppliedEvent),
    ReapplyScheduled(ReapplyScheduledEvent),
    Shutdown,
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ControllerEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ControllerEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ControllerEvent) {
        match event {
            ControllerEvent::Initializing => {
                log::info!("[red-international] initializing");
            }
            ControllerEvent::ConfigLoaded(loaded) => {
                log::info!(
                    "[red-international] config loaded from {}: {}",
                    loaded.source,
                    loaded.flags
                );
            }
            ControllerEvent::LoadFailed(failed) => match failed.stage {
                LoadStage::Cache => {
                    log::warn!(
                        "[red-international] invalid cached config under {}: {}",
                        failed.origin,
                        failed.error
                    );
                }
                LoadStage::Remote => {
                    log::warn!(
                        "[red-international] failed to load remote config from {}, keeping current flags: {}",
                        failed.origin,
                        failed.error
                    );
                }
            },
            ControllerEvent::ConfigApplied(applied) => {
                log::info!(
                    "[red-international] configuration applied ({} services, {} elements)",
                    applied.report.services,
                    applied.report.elements
                );
            }
            ControllerEvent::ReapplyScheduled(scheduled) => {
                log::debug!(
                    "[red-international] {} flagged elements added, reapplying in {}ms",
                    scheduled.added,
                    scheduled.delay.as_millis()
                );
            }
            ControllerEvent::Shutdown => {
                log::info!("[red-international] shut down");
            }
        }
    }
}
