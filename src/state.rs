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

//! A state is a vertex of the statechart tree. See [`State`] docs for more info.

use crate::{callback::ActionFn, core::pool::Handle, transition::Transition};
use fyrox_core::NameProvider;
use std::fmt::{self, Debug, Formatter};
use strum_macros::{AsRefStr, VariantNames};

/// Everything a composite state needs to drive its OR-decomposition: the
/// ordered child list, the initial pseudostate that selects the default child
/// and the optional shallow-history pseudostate.
pub struct CompositeData<C> {
    /// Non-pseudo children of the composite, in insertion order. The initial
    /// and history pseudostates are kept in their dedicated slots instead.
    pub(crate) children: Vec<Handle<State<C>>>,
    pub(crate) initial: Handle<State<C>>,
    pub(crate) history: Handle<State<C>>,
}

impl<C> Default for CompositeData<C> {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            initial: Handle::NONE,
            history: Handle::NONE,
        }
    }
}

impl<C> CompositeData<C> {
    /// Returns the ordered list of non-pseudo children.
    #[inline]
    pub fn children(&self) -> &[Handle<State<C>>] {
        &self.children
    }

    /// Returns a handle of the initial pseudostate, or `Handle::NONE` if none
    /// was added yet.
    #[inline]
    pub fn initial(&self) -> Handle<State<C>> {
        self.initial
    }

    /// Returns a handle of the shallow-history pseudostate, or `Handle::NONE`
    /// if the composite keeps no history.
    #[inline]
    pub fn history(&self) -> Handle<State<C>> {
        self.history
    }
}

/// The ordered regions of a concurrent state. Every region is a composite and
/// all regions are active simultaneously while the concurrent state is active.
pub struct ConcurrentData<C> {
    pub(crate) regions: Vec<Handle<State<C>>>,
}

impl<C> Default for ConcurrentData<C> {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
        }
    }
}

impl<C> ConcurrentData<C> {
    /// Returns the regions in declaration order.
    #[inline]
    pub fn regions(&self) -> &[Handle<State<C>>] {
        &self.regions
    }
}

/// The kind of a state vertex. All behavioral differences between the vertices
/// of a statechart are driven by matching on this tag; there is no other
/// dispatch mechanism.
#[derive(AsRefStr, VariantNames)]
pub enum StateKind<C> {
    /// An atomic state without children.
    Leaf,
    /// A state whose children form a nested OR-decomposition: exactly one
    /// child is active at a time. The statechart root is a composite whose
    /// parent is `Handle::NONE`.
    Composite(CompositeData<C>),
    /// A state whose composite children (regions) are all active
    /// simultaneously (AND-decomposition).
    Concurrent(ConcurrentData<C>),
    /// Pseudostate holding the single default transition into the enclosing
    /// composite's default child.
    Initial,
    /// Pseudostate that evaluates its outgoing transitions immediately on
    /// entry; exactly one of them must fire.
    Choice,
    /// Pseudostate that re-enters the last active direct child of its
    /// enclosing composite.
    ShallowHistory,
    /// Terminal marker: entering it marks the enclosing composite finished.
    Final,
}

impl<C> StateKind<C> {
    /// Returns `true` for the transient vertices that are traversed within a
    /// single dispatch step and never stay active.
    #[inline]
    pub fn is_pseudostate(&self) -> bool {
        matches!(
            self,
            StateKind::Initial | StateKind::Choice | StateKind::ShallowHistory
        )
    }
}

impl<C> Debug for StateKind<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A single vertex of the statechart tree.
///
/// States are created through the build-time API of
/// [`crate::Statechart`] (`add_state`, `add_composite`, ...) and referenced by
/// [`Handle`]s afterwards; the chart's arena owns the storage. A state holds
/// its name, a back-reference to its parent, its [`StateKind`], optional
/// `entry`/`do`/`exit` actions and the ordered list of outgoing transitions.
///
/// The transition list keeps guarded transitions in front of guard-less ones,
/// so more specific rules win when an event matches several candidates; a
/// choice pseudostate keeps plain declaration order instead.
pub struct State<C> {
    pub(crate) name: String,
    pub(crate) parent: Handle<State<C>>,
    pub(crate) kind: StateKind<C>,
    pub(crate) on_entry: Option<ActionFn<C>>,
    pub(crate) on_do: Option<ActionFn<C>>,
    pub(crate) on_exit: Option<ActionFn<C>>,
    pub(crate) transitions: Vec<Handle<Transition<C>>>,
}

impl<C> State<C> {
    pub(crate) fn new(name: &str, parent: Handle<State<C>>, kind: StateKind<C>) -> Self {
        Self {
            name: name.to_owned(),
            parent,
            kind,
            on_entry: None,
            on_do: None,
            on_exit: None,
            transitions: Vec::new(),
        }
    }

    /// Returns the name of the state. A unique name is recommended although not
    /// enforced.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a handle of the parent state. It is `Handle::NONE` only for the
    /// statechart root.
    #[inline]
    pub fn parent(&self) -> Handle<State<C>> {
        self.parent
    }

    /// Returns the kind of the state.
    #[inline]
    pub fn kind(&self) -> &StateKind<C> {
        &self.kind
    }

    /// Returns handles of the outgoing transitions in evaluation order.
    #[inline]
    pub fn transitions(&self) -> &[Handle<Transition<C>>] {
        &self.transitions
    }

    /// Returns `true` if the state is a transient vertex (initial, choice or
    /// shallow history).
    #[inline]
    pub fn is_pseudostate(&self) -> bool {
        self.kind.is_pseudostate()
    }

    pub(crate) fn composite(&self) -> Option<&CompositeData<C>> {
        if let StateKind::Composite(ref data) = self.kind {
            Some(data)
        } else {
            None
        }
    }

    pub(crate) fn composite_mut(&mut self) -> Option<&mut CompositeData<C>> {
        if let StateKind::Composite(ref mut data) = self.kind {
            Some(data)
        } else {
            None
        }
    }
}

impl<C> NameProvider for State<C> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl<C> Debug for State<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::VariantNames;

    #[test]
    fn kind_tags() {
        assert!(StateKind::<()>::Initial.is_pseudostate());
        assert!(StateKind::<()>::Choice.is_pseudostate());
        assert!(StateKind::<()>::ShallowHistory.is_pseudostate());
        assert!(!StateKind::<()>::Leaf.is_pseudostate());
        assert!(!StateKind::<()>::Final.is_pseudostate());
        assert!(!StateKind::Composite(CompositeData::<()>::default()).is_pseudostate());
    }

    #[test]
    fn kind_names() {
        assert_eq!(StateKind::<()>::Leaf.as_ref(), "Leaf");
        assert!(StateKind::<()>::VARIANTS.contains(&"ShallowHistory"));
    }

    #[test]
    fn state_reports_name() {
        let state = State::<()>::new("idle", Handle::NONE, StateKind::Leaf);
        assert_eq!(state.name(), "idle");
        assert!(state.parent().is_none());
        assert!(state.transitions().is_empty());
    }
}
