/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bookkeeping of globally committed versions.

use std::sync::Mutex;

use crate::types::data_types::{Version, ViewNumber};

/// Receives every globally committed version from the state machine.
pub trait GlobalCommitHandler: Send + Sync {
    /// Mark `version`, committed in `view`, as globally committed.
    fn perform_global_commit(&self, version: Version, view: ViewNumber);

    /// Get the view in which `version` was committed.
    fn get_view_for_version(&self, version: Version) -> ViewNumber;
}

pub(crate) type CommitListener = Box<dyn Fn(Version) + Send>;

/// A [`GlobalCommitHandler`] that remembers the view of every committed version and notifies listeners.
///
/// Only the first version committed in each view is stored: since neither views nor versions ever go
/// backwards, every version committed after it and before the first version of the next view belongs
/// to the same view.
pub struct ViewHistory {
    state: Mutex<ViewHistoryState>,
    listeners: Mutex<Vec<CommitListener>>,
}

struct ViewHistoryState {
    // (view, first version committed in that view), ascending in both.
    views: Vec<(ViewNumber, Version)>,
    last_committed: Version,
}

impl ViewHistory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ViewHistoryState {
                views: Vec::new(),
                last_committed: Version::none(),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register `listener` to be called with every newly committed version.
    pub fn on_global_commit(&self, listener: impl Fn(Version) + Send + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    pub fn last_committed_version(&self) -> Version {
        self.state.lock().unwrap().last_committed
    }
}

impl Default for ViewHistory {
    fn default() -> Self {
        ViewHistory::new()
    }
}

impl GlobalCommitHandler for ViewHistory {
    /// # Panics
    ///
    /// Panics if `version` is lower than a version that was already committed, or if `view` is lower
    /// than the view of a previous commit. Either means a committed version is being rolled back.
    fn perform_global_commit(&self, version: Version, view: ViewNumber) {
        {
            let mut state = self.state.lock().unwrap();
            if version == state.last_committed {
                return;
            }
            assert!(
                version > state.last_committed,
                "Cannot globally commit version {} after version {}",
                version,
                state.last_committed
            );

            match state.views.last() {
                Some((last_view, _)) if *last_view == view => (),
                Some((last_view, _)) if *last_view > view => panic!(
                    "Cannot globally commit in view {} after committing in view {}",
                    view, last_view
                ),
                _ => state.views.push((view, version)),
            }
            state.last_committed = version;
        }

        for listener in self.listeners.lock().unwrap().iter() {
            listener(version)
        }
    }

    fn get_view_for_version(&self, version: Version) -> ViewNumber {
        let state = self.state.lock().unwrap();
        let idx = state.views.partition_point(|(_, first)| *first <= version);
        if idx == 0 {
            ViewNumber::init()
        } else {
            state.views[idx - 1].0
        }
    }
}
