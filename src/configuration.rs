// Copyright (c) 2019-present Dmitry Stepanov and Fyrox Engine contributors.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Runtime bookkeeping of the statechart: which states are active, which child
//! is current inside every active composite and what the shallow-history
//! pseudostates remember.

use crate::{core::pool::Handle, state::State};
use fxhash::FxHashMap;

/// The active configuration of a running chart. At any quiescent point the
/// active states form a connected subtree rooted at the statechart; every
/// active composite has exactly one current child and every active concurrent
/// state has all of its regions active. Pseudostates never appear here.
///
/// The activation order is preserved so the active states can be reported from
/// the root outward.
pub(crate) struct Configuration<C> {
    active: Vec<Handle<State<C>>>,
    current: FxHashMap<Handle<State<C>>, Handle<State<C>>>,
    history: FxHashMap<Handle<State<C>>, Handle<State<C>>>,
}

impl<C> Default for Configuration<C> {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            current: FxHashMap::default(),
            history: FxHashMap::default(),
        }
    }
}

impl<C> Configuration<C> {
    pub fn is_active(&self, state: Handle<State<C>>) -> bool {
        self.active.contains(&state)
    }

    /// Marks a state active and makes it the current child of its parent. The
    /// caller is responsible for checking that the parent is active first.
    pub fn activate(&mut self, state: Handle<State<C>>, parent: Handle<State<C>>) {
        if !self.is_active(state) {
            self.active.push(state);
        }
        self.current.remove(&state);
        if parent.is_some() {
            self.current.insert(parent, state);
        }
    }

    /// Removes a state from the active set and detaches it from its parent's
    /// current-child pointer.
    pub fn deactivate(&mut self, state: Handle<State<C>>, parent: Handle<State<C>>) {
        self.active.retain(|&active| active != state);
        self.current.remove(&state);
        if self.current.get(&parent) == Some(&state) {
            self.current.remove(&parent);
        }
    }

    /// Returns the current child of an active composite, or `Handle::NONE` if
    /// it has none.
    pub fn current_child(&self, state: Handle<State<C>>) -> Handle<State<C>> {
        self.current.get(&state).copied().unwrap_or(Handle::NONE)
    }

    /// Remembers the last current child of a composite for its shallow-history
    /// pseudostate.
    pub fn store_history(&mut self, history: Handle<State<C>>, child: Handle<State<C>>) {
        self.history.insert(history, child);
    }

    /// Returns the state remembered by a shallow-history pseudostate, if any.
    pub fn history_for(&self, history: Handle<State<C>>) -> Option<Handle<State<C>>> {
        self.history.get(&history).copied()
    }

    /// Active states in activation order, root first.
    pub fn active_iter(&self) -> impl Iterator<Item = Handle<State<C>>> + '_ {
        self.active.iter().copied()
    }

    /// History memory as (pseudostate, remembered state) pairs.
    pub fn history_iter(
        &self,
    ) -> impl Iterator<Item = (Handle<State<C>>, Handle<State<C>>)> + '_ {
        self.history.iter().map(|(&k, &v)| (k, v))
    }

    /// Drops the whole active set and the history memory.
    pub fn clear(&mut self) {
        self.active.clear();
        self.current.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    type Cfg = Configuration<()>;

    fn handle(index: u32) -> Handle<State<()>> {
        Handle::new(index, 1)
    }

    #[test]
    fn activation_tracks_current_child() {
        let mut cfg = Cfg::default();
        let root = handle(0);
        let child = handle(1);

        cfg.activate(root, Handle::NONE);
        cfg.activate(child, root);

        assert!(cfg.is_active(root));
        assert!(cfg.is_active(child));
        assert_eq!(cfg.current_child(root), child);
        assert_eq!(cfg.active_iter().collect::<Vec<_>>(), vec![root, child]);
    }

    #[test]
    fn deactivation_clears_parent_pointer() {
        let mut cfg = Cfg::default();
        let root = handle(0);
        let child = handle(1);

        cfg.activate(root, Handle::NONE);
        cfg.activate(child, root);
        cfg.deactivate(child, root);

        assert!(!cfg.is_active(child));
        assert!(cfg.current_child(root).is_none());
        assert!(cfg.is_active(root));
    }

    #[test]
    fn reactivation_does_not_duplicate() {
        let mut cfg = Cfg::default();
        let root = handle(0);

        cfg.activate(root, Handle::NONE);
        cfg.activate(root, Handle::NONE);

        assert_eq!(cfg.active_iter().count(), 1);
    }

    #[test]
    fn history_roundtrip_and_clear() {
        let mut cfg = Cfg::default();
        let history = handle(5);
        let remembered = handle(6);

        assert_eq!(cfg.history_for(history), None);
        cfg.store_history(history, remembered);
        assert_eq!(cfg.history_for(history), Some(remembered));

        cfg.clear();
        assert_eq!(cfg.history_for(history), None);
        assert_eq!(cfg.active_iter().count(), 0);
    }
}
