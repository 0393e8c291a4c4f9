//! Dual content/container file watcher.
//!
//! The content watch follows files under the root recursively. The container
//! watch observes the root's parent directory so that deleting, re-creating
//! or renaming the root itself (IDE clean builds, `git checkout` of the whole
//! folder) is noticed and the content watch is rebuilt.
//!
//! Container transitions are applied on a supervisor thread that owns both
//! watch handles; notify callbacks only send it messages.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use lr_protocol::{DEFAULT_EXTENSIONS, DEFAULT_RECOMPILE_EXTENSIONS};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::broadcaster::RefreshBroadcaster;
use crate::dispatch::{ROOT_RECREATE_DEBOUNCE, RefreshDispatcher, RefreshRules};
use crate::error::WatchError;
use crate::inclusion::InclusionFilter;
use crate::subscription::{SubscriptionId, Subscriptions};
use crate::target::WatchTarget;

/// Watcher configuration.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Global switch, read once per [`ChangeWatcher::start`].
    pub enabled: bool,
    /// Folder to monitor.
    pub root: PathBuf,
    /// Comma separated extension allow-list, e.g. `.live,.css,.js`.
    pub extensions: String,
    /// Extensions of templates the origin server compiles on demand.
    pub recompile_extensions: Vec<String>,
    /// Server recompile delay; zero disables the delayed hint.
    pub server_refresh_timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("."),
            extensions: DEFAULT_EXTENSIONS.to_owned(),
            recompile_extensions: DEFAULT_RECOMPILE_EXTENSIONS.map(str::to_owned).to_vec(),
            server_refresh_timeout: Duration::ZERO,
        }
    }
}

/// What happened to the root directory, as seen from its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RootTransition {
    Created,
    Deleted,
    RenamedTo,
    RenamedAway,
}

/// Message for the supervisor thread.
enum Control {
    Root(RootTransition),
    Shutdown,
}

/// A live watch handle and the subscription its handler checks.
struct ScopeWatch {
    id: SubscriptionId,
    _watcher: RecommendedWatcher,
}

/// Everything needed to (re)create the two watches.
#[derive(Clone)]
struct WatchContext {
    target: WatchTarget,
    dispatcher: Arc<RefreshDispatcher>,
    subscriptions: Arc<Mutex<Subscriptions>>,
    control: mpsc::Sender<Control>,
}

impl WatchContext {
    fn subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Recursive watch on the root feeding the dispatcher.
    fn watch_content(&self) -> Result<ScopeWatch, WatchError> {
        let (id, subscription) = self.subscriptions().register("content");
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut repeats = RepeatFilter::default();

        let handler = move |res: notify::Result<Event>| {
            if !subscription.is_active() {
                return;
            }
            match res {
                Ok(event) => {
                    let Some(path) = changed_path(&event) else {
                        return;
                    };
                    if repeats.is_repeat(path, Instant::now()) {
                        tracing::trace!(path = %path.display(), "Repeated event for the same change");
                        return;
                    }
                    dispatcher.on_file_changed(path);
                }
                Err(e) => tracing::warn!(error = %e, "Content watch error"),
            }
        };

        create_watch(handler, self.target.path(), RecursiveMode::Recursive)
            .map(|watcher| ScopeWatch {
                id,
                _watcher: watcher,
            })
            .inspect_err(|_| self.subscriptions().cancel(id))
    }

    /// Non-recursive watch on the parent, reporting root transitions.
    fn watch_container(&self) -> Result<ScopeWatch, WatchError> {
        let (id, subscription) = self.subscriptions().register("container");
        let target = self.target.clone();
        let control = self.control.clone();

        let handler = move |res: notify::Result<Event>| {
            if !subscription.is_active() {
                return;
            }
            match res {
                Ok(event) => {
                    if let Some(transition) = classify_container_event(&event, &target) {
                        tracing::debug!(?transition, root = %target.path().display(), "Root folder changed");
                        let _ = control.send(Control::Root(transition));
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Container watch error"),
            }
        };

        create_watch(handler, self.target.parent(), RecursiveMode::NonRecursive)
            .map(|watcher| ScopeWatch {
                id,
                _watcher: watcher,
            })
            .inspect_err(|_| self.subscriptions().cancel(id))
    }

    /// Unsubscribe the handler, then release the handle.
    fn close(&self, scope: Option<ScopeWatch>) {
        if let Some(scope) = scope {
            self.subscriptions().cancel(scope.id);
            drop(scope);
        }
    }

    /// Content watch after the root (re)appeared; failures are only logged.
    fn reestablish_content(&self) -> Option<ScopeWatch> {
        self.watch_content()
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to re-establish content watch"))
            .ok()
    }
}

fn create_watch<F>(handler: F, path: &Path, mode: RecursiveMode) -> Result<RecommendedWatcher, WatchError>
where
    F: notify::EventHandler,
{
    let watch_err = |source| WatchError::Watch {
        path: path.to_path_buf(),
        source,
    };
    let mut watcher = notify::recommended_watcher(handler).map_err(watch_err)?;
    watcher.watch(path, mode).map_err(watch_err)?;
    Ok(watcher)
}

/// Window in which further events for the same path belong to one change.
const SAME_CHANGE_WINDOW: Duration = Duration::from_millis(50);

/// Collapses the events a single write produces.
///
/// Writing a new file reports a creation followed by a data modification on
/// inotify; only the first one of such a run reaches the dispatcher.
#[derive(Debug, Default)]
struct RepeatFilter {
    last: Option<(PathBuf, Instant)>,
}

impl RepeatFilter {
    fn is_repeat(&mut self, path: &Path, now: Instant) -> bool {
        if let Some((last, at)) = &self.last
            && last == path
            && now.saturating_duration_since(*at) < SAME_CHANGE_WINDOW
        {
            return true;
        }
        self.last = Some((path.to_path_buf(), now));
        false
    }
}

/// Path of the file a content event is about, if the event is relevant.
///
/// Creations, content/write-time modifications and the new name of a rename
/// count; removals and access events do not. One write can still produce
/// several relevant events, see [`RepeatFilter`].
fn changed_path(event: &Event) -> Option<&Path> {
    let path = match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(
            ModifyKind::Data(_)
            | ModifyKind::Any
            | ModifyKind::Other
            | ModifyKind::Metadata(MetadataKind::WriteTime),
        )
        | EventKind::Modify(ModifyKind::Name(
            RenameMode::To | RenameMode::Any | RenameMode::Other,
        )) => event.paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1),
        _ => None,
    };
    path.map(PathBuf::as_path)
}

/// Map a parent-directory event to a root transition.
///
/// Entries not named like the root are ignored.
pub(crate) fn classify_container_event(
    event: &Event,
    target: &WatchTarget,
) -> Option<RootTransition> {
    let mentions_root = || event.paths.iter().any(|p| target.is_root_entry(p));

    match event.kind {
        EventKind::Create(_) => mentions_root().then_some(RootTransition::Created),
        EventKind::Remove(_) => mentions_root().then_some(RootTransition::Deleted),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => {
                let (from, to) = (event.paths.first()?, event.paths.get(1)?);
                if target.is_root_entry(to) {
                    Some(RootTransition::RenamedTo)
                } else if target.is_root_entry(from) {
                    Some(RootTransition::RenamedAway)
                } else {
                    None
                }
            }
            RenameMode::To => mentions_root().then_some(RootTransition::RenamedTo),
            RenameMode::From => mentions_root().then_some(RootTransition::RenamedAway),
            RenameMode::Any | RenameMode::Other => {
                if !mentions_root() {
                    None
                } else if target.path().is_dir() {
                    Some(RootTransition::RenamedTo)
                } else {
                    Some(RootTransition::RenamedAway)
                }
            }
        },
        _ => None,
    }
}

/// Supervisor loop: owns the watch handles and applies root transitions.
fn supervise(
    ctx: &WatchContext,
    mut content: Option<ScopeWatch>,
    mut container: Option<ScopeWatch>,
    control: &mpsc::Receiver<Control>,
) {
    for message in control {
        let transition = match message {
            Control::Shutdown => break,
            Control::Root(transition) => transition,
        };

        match transition {
            RootTransition::Created => {
                ctx.dispatcher.mark_root_recreated();
                ctx.close(content.take());
                content = ctx.reestablish_content();
            }
            RootTransition::Deleted | RootTransition::RenamedAway => {
                ctx.close(content.take());
            }
            RootTransition::RenamedTo => {
                ctx.close(container.take());
                ctx.close(content.take());
                content = ctx.reestablish_content();
                container = ctx
                    .watch_container()
                    .inspect_err(|e| tracing::warn!(error = %e, "Failed to re-establish container watch"))
                    .ok();
            }
        }

        tracing::info!(
            ?transition,
            content_watch = content.is_some(),
            root = %ctx.target.path().display(),
            "Watches updated"
        );
    }

    ctx.close(container.take());
    ctx.close(content.take());
}

struct Running {
    ctx: WatchContext,
    supervisor: Option<JoinHandle<()>>,
}

/// Watches a root folder and requests refreshes for relevant changes.
///
/// Owns all OS watch handles; [`start`](Self::start) and
/// [`stop`](Self::stop) bracket their lifetime. Dropping the watcher stops it.
pub struct ChangeWatcher {
    options: WatchOptions,
    broadcaster: Arc<dyn RefreshBroadcaster>,
    filter: Option<Arc<dyn InclusionFilter>>,
    recreate_debounce: Duration,
    running: Option<Running>,
}

impl ChangeWatcher {
    /// Create a stopped watcher.
    #[must_use]
    pub fn new(options: WatchOptions, broadcaster: Arc<dyn RefreshBroadcaster>) -> Self {
        Self {
            options,
            broadcaster,
            filter: None,
            recreate_debounce: ROOT_RECREATE_DEBOUNCE,
            running: None,
        }
    }

    /// Consult `filter` before the extension allow-list.
    #[must_use]
    pub fn with_inclusion_filter(mut self, filter: Arc<dyn InclusionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Override the quiet period used after the root is re-created.
    #[must_use]
    pub fn with_recreate_debounce(mut self, debounce: Duration) -> Self {
        self.recreate_debounce = debounce;
        self
    }

    /// Start both watches.
    ///
    /// Does nothing when disabled. A running watcher is stopped first, so the
    /// target is replaced wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be resolved or a watch handle
    /// cannot be created. Nothing is retried.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if !self.options.enabled {
            tracing::debug!("Live reload disabled, file watcher not started");
            return Ok(());
        }
        self.stop();

        let target = WatchTarget::resolve(&self.options.root)?;
        let rules = RefreshRules::new(
            self.options.extensions.clone(),
            self.options.recompile_extensions.clone(),
            self.options.server_refresh_timeout,
            self.filter.clone(),
        );
        let dispatcher = Arc::new(RefreshDispatcher::new(
            rules,
            Arc::clone(&self.broadcaster),
            self.recreate_debounce,
        )?);
        let (control_tx, control_rx) = mpsc::channel();
        let ctx = WatchContext {
            target,
            dispatcher,
            subscriptions: Arc::new(Mutex::new(Subscriptions::default())),
            control: control_tx,
        };

        let content = ctx.watch_content().inspect_err(|_| ctx.dispatcher.shutdown())?;
        let container = match ctx.watch_container() {
            Ok(container) => container,
            Err(e) => {
                ctx.close(Some(content));
                ctx.dispatcher.shutdown();
                return Err(e);
            }
        };

        let supervisor_ctx = ctx.clone();
        let supervisor = thread::Builder::new()
            .name("lr-watch-supervisor".to_owned())
            .spawn(move || {
                supervise(&supervisor_ctx, Some(content), Some(container), &control_rx);
            })
            .map_err(|source| {
                ctx.subscriptions().cancel_all();
                ctx.dispatcher.shutdown();
                WatchError::Spawn {
                    thread: "watch supervisor",
                    source,
                }
            })?;

        tracing::info!(
            root = %ctx.target.path().display(),
            extensions = %self.options.extensions,
            handlers = ctx.subscriptions().len(),
            "File watcher started"
        );
        self.running = Some(Running {
            ctx,
            supervisor: Some(supervisor),
        });
        Ok(())
    }

    /// Stop watching.
    ///
    /// Unsubscribes every handler (most recent first), releases the watch
    /// handles and drops the timer so nothing fires afterwards. Safe to call
    /// repeatedly or on a watcher that never started.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        let cancelled = running.ctx.subscriptions().cancel_all();
        tracing::debug!(?cancelled, "Watch handlers unsubscribed");

        let _ = running.ctx.control.send(Control::Shutdown);
        if let Some(supervisor) = running.supervisor.take() {
            let _ = supervisor.join();
        }
        running.ctx.dispatcher.shutdown();

        tracing::info!(root = %running.ctx.target.path().display(), "File watcher stopped");
    }

    /// Whether the watches are active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The active target, if running.
    #[must_use]
    pub fn target(&self) -> Option<&WatchTarget> {
        self.running.as_ref().map(|r| &r.ctx.target)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::RecordingBroadcaster;
    use crate::inclusion::InclusionDecision;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::Instant;

    fn target(path: &str) -> WatchTarget {
        WatchTarget::resolve(Path::new(path)).unwrap()
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    /// Poll `condition` until it holds or `timeout` passes.
    fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    fn watcher_for(root: &Path, broadcaster: &Arc<RecordingBroadcaster>) -> ChangeWatcher {
        let options = WatchOptions {
            root: root.to_path_buf(),
            extensions: ".live,.css,.html".to_owned(),
            ..WatchOptions::default()
        };
        ChangeWatcher::new(options, Arc::clone(broadcaster) as Arc<dyn RefreshBroadcaster>)
    }

    #[test]
    fn test_changed_path_kinds() {
        let create = event(EventKind::Create(CreateKind::File), &["/site/a.css"]);
        assert_eq!(changed_path(&create), Some(Path::new("/site/a.css")));

        let modify = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/site/a.css"],
        );
        assert_eq!(changed_path(&modify), Some(Path::new("/site/a.css")));

        let rename = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/site/a.tmp", "/site/a.css"],
        );
        assert_eq!(changed_path(&rename), Some(Path::new("/site/a.css")));

        let rename_from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/site/a.css"],
        );
        assert_eq!(changed_path(&rename_from), None);

        let remove = event(EventKind::Remove(RemoveKind::File), &["/site/a.css"]);
        assert_eq!(changed_path(&remove), None);

        let attrs = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/site/a.css"],
        );
        assert_eq!(changed_path(&attrs), None);
    }

    #[test]
    fn test_repeat_filter_collapses_one_write() {
        let mut repeats = RepeatFilter::default();
        let start = Instant::now();
        let page = Path::new("/site/page.html");

        assert!(!repeats.is_repeat(page, start));
        assert!(repeats.is_repeat(page, start + Duration::from_millis(2)));
        // Another file is its own change
        assert!(!repeats.is_repeat(Path::new("/site/app.css"), start + Duration::from_millis(3)));
        assert!(!repeats.is_repeat(page, start + Duration::from_millis(4)));
        // Same file after the window is a new change
        assert!(!repeats.is_repeat(page, start + Duration::from_millis(200)));
    }

    #[test]
    fn test_new_file_write_refreshes_once() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("site");
        fs::create_dir(&root).unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let mut watcher = watcher_for(&root, &broadcaster);
        watcher.start().unwrap();

        fs::write(root.join("fresh.css"), "body {}").unwrap();
        assert!(wait_for(Duration::from_secs(3), || broadcaster.count() > 0));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(broadcaster.count(), 1);

        watcher.stop();
    }

    #[test]
    fn test_classify_container_events() {
        let target = target("/work/site");
        let classify = |kind, paths: &[&str]| classify_container_event(&event(kind, paths), &target);

        assert_eq!(
            classify(EventKind::Create(CreateKind::Folder), &["/work/site"]),
            Some(RootTransition::Created)
        );
        assert_eq!(
            classify(EventKind::Remove(RemoveKind::Folder), &["/work/SITE"]),
            Some(RootTransition::Deleted)
        );
        assert_eq!(
            classify(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/work/site-tmp", "/work/site"]
            ),
            Some(RootTransition::RenamedTo)
        );
        assert_eq!(
            classify(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/work/site", "/work/site-old"]
            ),
            Some(RootTransition::RenamedAway)
        );
        assert_eq!(
            classify(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/work/site"]),
            Some(RootTransition::RenamedTo)
        );
        assert_eq!(
            classify(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/work/site"]),
            Some(RootTransition::RenamedAway)
        );
        // Siblings and content modifications are not root transitions
        assert_eq!(
            classify(EventKind::Create(CreateKind::Folder), &["/work/other"]),
            None
        );
        assert_eq!(
            classify(
                EventKind::Modify(ModifyKind::Data(DataChange::Any)),
                &["/work/site"]
            ),
            None
        );
    }

    #[test]
    fn test_start_disabled_is_noop() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let options = WatchOptions {
            enabled: false,
            root: PathBuf::from("/definitely/not/here"),
            ..WatchOptions::default()
        };
        let mut watcher =
            ChangeWatcher::new(options, Arc::clone(&broadcaster) as Arc<dyn RefreshBroadcaster>);

        assert!(watcher.start().is_ok());
        assert!(!watcher.is_running());
        assert!(watcher.target().is_none());
    }

    #[test]
    fn test_start_missing_root_fails_once() {
        let temp = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let mut watcher = watcher_for(&temp.path().join("missing"), &broadcaster);

        let err = watcher.start().unwrap_err();
        assert!(matches!(err, WatchError::Watch { .. }), "got {err:?}");
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let mut watcher = watcher_for(temp.path(), &broadcaster);

        watcher.stop();
        watcher.start().unwrap();
        assert!(watcher.is_running());
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_listed_change_requests_refresh() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("site");
        fs::create_dir(&root).unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let mut watcher = watcher_for(&root, &broadcaster);
        watcher.start().unwrap();
        assert_eq!(watcher.target().unwrap().name(), "site");

        fs::write(root.join("notes.txt"), "ignored").unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(broadcaster.count(), 0);

        fs::write(root.join("app.css"), "body {}").unwrap();
        assert!(wait_for(Duration::from_secs(3), || broadcaster.count() > 0));
        assert!(broadcaster.requests().iter().all(|(_, delayed)| !delayed));
    }

    #[test]
    fn test_filter_suppresses_listed_change() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("site");
        fs::create_dir(&root).unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let filter: Arc<dyn InclusionFilter> = Arc::new(|_: &Path| InclusionDecision::DontRefresh);
        let mut watcher = watcher_for(&root, &broadcaster).with_inclusion_filter(filter);
        watcher.start().unwrap();

        fs::write(root.join("app.css"), "body {}").unwrap();
        thread::sleep(Duration::from_millis(400));
        assert_eq!(broadcaster.count(), 0);
    }

    #[test]
    fn test_no_refresh_after_stop() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("site");
        fs::create_dir(&root).unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let mut watcher = watcher_for(&root, &broadcaster);
        watcher.start().unwrap();
        watcher.stop();

        fs::write(root.join("app.css"), "body {}").unwrap();
        thread::sleep(Duration::from_millis(400));
        assert_eq!(broadcaster.count(), 0);
    }

    #[test]
    fn test_root_recreate_burst_refreshes_once() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("site");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("index.html"), "<html></html>").unwrap();

        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let debounce = Duration::from_millis(400);
        let mut watcher = watcher_for(&root, &broadcaster).with_recreate_debounce(debounce);
        watcher.start().unwrap();

        fs::remove_dir_all(&root).unwrap();
        thread::sleep(Duration::from_millis(200));
        fs::create_dir(&root).unwrap();
        thread::sleep(Duration::from_millis(300));

        let mut last_write = Instant::now();
        for i in 0..20 {
            fs::write(root.join(format!("page{i}.html")), "<p>rebuilt</p>").unwrap();
            last_write = Instant::now();
            thread::sleep(Duration::from_millis(20));
        }

        assert!(wait_for(Duration::from_secs(3), || broadcaster.count() > 0));
        thread::sleep(debounce);
        let requests = broadcaster.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].0.duration_since(last_write) >= debounce);
    }
}
