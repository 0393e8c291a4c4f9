//! File change detection for lr.
//!
//! [`ChangeWatcher`] monitors a root folder and asks a [`RefreshBroadcaster`]
//! to refresh connected clients when a relevant file changes.
//!
//! # Decision pipeline
//!
//! For every created, modified or renamed file under the root:
//!
//! 1. Paths under `node_modules` are ignored.
//! 2. Paths without an extension are ignored.
//! 3. The optional [`InclusionFilter`] can veto ([`InclusionDecision::DontRefresh`])
//!    or force ([`InclusionDecision::ForceRefresh`]) the refresh.
//! 4. Otherwise the extension must be on the [`ExtensionAllowList`].
//! 5. Templates the origin server recompiles get the "delayed" hint.
//!
//! # Root re-creation
//!
//! A second watch on the root's parent notices the root being deleted,
//! re-created or renamed. After re-creation, refreshes are debounced by
//! [`ROOT_RECREATE_DEBOUNCE`] through a [`CoalescingTimer`] so a whole rebuilt
//! tree produces a single reload.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lr_watcher::{ChangeWatcher, WatchOptions};
//!
//! let mut watcher = ChangeWatcher::new(WatchOptions::default(), broadcaster);
//! watcher.start()?;
//! // ...
//! watcher.stop();
//! ```

mod broadcaster;
mod dispatch;
mod error;
mod inclusion;
mod subscription;
mod target;
mod timer;
mod watcher;

pub use broadcaster::{RefreshBroadcaster, RefreshOutcome};
pub use dispatch::ROOT_RECREATE_DEBOUNCE;
pub use error::WatchError;
pub use inclusion::{ExtensionAllowList, GlobInclusionFilter, InclusionDecision, InclusionFilter};
pub use target::WatchTarget;
pub use timer::CoalescingTimer;
pub use watcher::{ChangeWatcher, WatchOptions};
