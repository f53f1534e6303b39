//! Debounced reapplication when flagged elements appear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::events::{ControllerEvent, EventDispatcher, ReapplyScheduledEvent};
use crate::page::{AddedElement, MutationCallback, Page, SubscriptionId};

/// Subscription to a page's mutation feed plus the task that reapplies.
///
/// Dropping the watcher disconnects it.
pub struct ChangeWatcher {
    page: Arc<dyn Page>,
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Subscribe to `page` and spawn the reapply task. Must be called from
    /// within a tokio runtime.
    ///
    /// Batches containing at least one flag target schedule `reapply` after
    /// `debounce`, but only while `ready` is set. Batches arriving while a
    /// reapply is pending are folded into it.
    pub fn start<F>(
        page: Arc<dyn Page>,
        ready: Arc<AtomicBool>,
        debounce: Duration,
        events: Arc<EventDispatcher>,
        reapply: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<usize>();

        let callback: MutationCallback = Arc::new(move |added: &[AddedElement]| {
            if !ready.load(Ordering::Acquire) {
                return;
            }
            let flagged = added.iter().filter(|el| el.is_flag_target()).count();
            if flagged > 0 {
                // The receiver only goes away once the watcher is stopped.
                let _ = tx.send(flagged);
            }
        });

        let subscription = page.on_relevant_mutation(callback);
        let task = tokio::spawn(run(rx, debounce, events, reapply));

        Self {
            page,
            subscription,
            task,
        }
    }

    /// Disconnect from the page and stop pending reapplications.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.page.unsubscribe(self.subscription);
        self.task.abort();
    }
}

async fn run<F>(
    mut rx: mpsc::UnboundedReceiver<usize>,
    debounce: Duration,
    events: Arc<EventDispatcher>,
    reapply: F,
) where
    F: Fn() + Send + Sync + 'static,
{
    while let Some(mut added) = rx.recv().await {
        events.dispatch(ControllerEvent::ReapplyScheduled(ReapplyScheduledEvent {
            added,
            delay: debounce,
            timestamp: chrono::Utc::now(),
        }));

        sleep(debounce).await;
        while let Ok(more) = rx.try_recv() {
            added += more;
        }

        log::trace!("[red-international] reapplying after {added} flagged insertions");
        reapply();
    }
}
