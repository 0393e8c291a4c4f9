//! Per-file decision pipeline and refresh dispatch.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use crate::broadcaster::{RefreshBroadcaster, RefreshOutcome};
use crate::error::WatchError;
use crate::inclusion::{
    ExtensionAllowList, InclusionDecision, InclusionFilter, dotted_extension, is_in_node_modules,
};
use crate::timer::CoalescingTimer;

/// Quiet period collapsing the event storm after the root is re-created.
pub const ROOT_RECREATE_DEBOUNCE: Duration = Duration::from_millis(2000);

/// A refresh the pipeline decided to request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RefreshRequest {
    pub delayed: bool,
}

/// Rules applied to every changed file.
pub(crate) struct RefreshRules {
    extensions: String,
    allow_list: OnceLock<ExtensionAllowList>,
    recompile_extensions: Vec<String>,
    server_refresh_timeout: Duration,
    filter: Option<Arc<dyn InclusionFilter>>,
}

impl RefreshRules {
    pub(crate) fn new(
        extensions: String,
        recompile_extensions: Vec<String>,
        server_refresh_timeout: Duration,
        filter: Option<Arc<dyn InclusionFilter>>,
    ) -> Self {
        Self {
            extensions,
            allow_list: OnceLock::new(),
            recompile_extensions,
            server_refresh_timeout,
            filter,
        }
    }

    /// Allow-list parsed on first use and immutable afterwards.
    fn allow_list(&self) -> &ExtensionAllowList {
        self.allow_list.get_or_init(|| {
            let list = ExtensionAllowList::parse(&self.extensions);
            tracing::debug!(extensions = %self.extensions, count = list.len(), "Extension allow-list loaded");
            list
        })
    }

    /// Run the decision pipeline for one changed file.
    pub(crate) fn evaluate(&self, path: &Path) -> Option<RefreshRequest> {
        if is_in_node_modules(path) {
            return None;
        }
        let extension = dotted_extension(path)?;

        let decision = self
            .filter
            .as_ref()
            .map_or(InclusionDecision::Continue, |f| f.decide(path));
        match decision {
            InclusionDecision::DontRefresh => return None,
            InclusionDecision::Continue if !self.allow_list().contains(&extension) => return None,
            InclusionDecision::Continue | InclusionDecision::ForceRefresh => {}
        }

        let delayed = !self.server_refresh_timeout.is_zero()
            && self
                .recompile_extensions
                .iter()
                .any(|ext| ext.eq_ignore_ascii_case(&extension));

        Some(RefreshRequest { delayed })
    }
}

/// Turns pipeline decisions into broadcaster calls.
///
/// Refreshes are immediate unless the root was just re-created, in which case
/// they are debounced so the burst of files landing in the new root produces
/// one reload.
pub(crate) struct RefreshDispatcher {
    rules: RefreshRules,
    broadcaster: Arc<dyn RefreshBroadcaster>,
    timer: Mutex<Option<CoalescingTimer>>,
    root_recreated: Arc<AtomicBool>,
    recreate_debounce: Duration,
}

impl RefreshDispatcher {
    pub(crate) fn new(
        rules: RefreshRules,
        broadcaster: Arc<dyn RefreshBroadcaster>,
        recreate_debounce: Duration,
    ) -> Result<Self, WatchError> {
        let timer = CoalescingTimer::new().map_err(|source| WatchError::Spawn {
            thread: "coalescing timer",
            source,
        })?;
        Ok(Self {
            rules,
            broadcaster,
            timer: Mutex::new(Some(timer)),
            root_recreated: Arc::new(AtomicBool::new(false)),
            recreate_debounce,
        })
    }

    /// Handle one changed file.
    pub(crate) fn on_file_changed(&self, path: &Path) {
        let Some(request) = self.rules.evaluate(path) else {
            tracing::trace!(path = %path.display(), "Change ignored");
            return;
        };

        if self.root_recreated.load(Ordering::Acquire) {
            let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(timer) = timer.as_ref() else {
                return;
            };
            let broadcaster = Arc::clone(&self.broadcaster);
            let root_recreated = Arc::clone(&self.root_recreated);
            timer.debounce(self.recreate_debounce, request.delayed, move |delayed| {
                let outcome = broadcaster.request_refresh(delayed);
                root_recreated.store(false, Ordering::Release);
                log_outcome(outcome, delayed, "root re-created");
            });
            tracing::debug!(path = %path.display(), "Change coalesced after root re-creation");
        } else {
            let outcome = self.broadcaster.request_refresh(request.delayed);
            tracing::debug!(path = %path.display(), "Change detected");
            log_outcome(outcome, request.delayed, "file changed");
        }
    }

    /// Remember that the root directory was just created again.
    pub(crate) fn mark_root_recreated(&self) {
        self.root_recreated.store(true, Ordering::Release);
    }

    /// Drop the timer; pending debounced refreshes never fire.
    pub(crate) fn shutdown(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(timer);
    }
}

fn log_outcome(outcome: RefreshOutcome, delayed: bool, reason: &str) {
    match outcome {
        RefreshOutcome::Delivered(clients) => {
            tracing::info!(clients, delayed, reason, "Refresh sent");
        }
        RefreshOutcome::Deferred => {
            tracing::info!(delayed, reason, "Refresh deferred for server recompile");
        }
        RefreshOutcome::NoClients => {
            tracing::debug!(reason, "Refresh requested with no clients connected");
        }
    }
}
