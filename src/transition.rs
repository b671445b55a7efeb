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

//! Transition is a directed relationship between a source state and a target
//! state. See [`Transition`] docs for more info.

use crate::{
    callback::{ActionFn, GuardFn},
    chart::Statechart,
    core::pool::{Handle, Pool},
    error::ChartError,
    event::Event,
    state::State,
};
use std::fmt::{self, Debug, Formatter};
use strum_macros::{AsRefStr, EnumString, VariantNames};

/// Whether a transition leaves its source state when it fires.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, VariantNames)]
pub enum TransitionKind {
    /// The ordinary transition: the exit set is deactivated, the action runs,
    /// the entry set is activated.
    #[default]
    External,
    /// A transition that executes without exiting or re-entering the state in
    /// which it is defined; its exit and entry sets are empty and only its
    /// action fires.
    Internal,
}

/// A directed relationship between a source state and a target state. Firing it
/// takes the state machine from one configuration to another, representing the
/// complete response of the machine to a particular event instance.
///
/// At construction time the transition eagerly computes the ordered **exit
/// set** (states to deactivate, innermost first) and **entry set** (states to
/// activate, outermost first) from the Least Common Ancestor of source and
/// target. A self-transition treats the source's parent as the LCA, so the
/// state is exited and re-entered.
///
/// Transitions are assembled with a [`TransitionBuilder`] and owned by the
/// chart's arena.
pub struct Transition<C> {
    pub(crate) source: Handle<State<C>>,
    pub(crate) target: Handle<State<C>>,
    pub(crate) kind: TransitionKind,
    pub(crate) trigger: Option<Event>,
    pub(crate) guard: Option<GuardFn<C>>,
    pub(crate) action: Option<ActionFn<C>>,
    pub(crate) exit_set: Vec<Handle<State<C>>>,
    pub(crate) entry_set: Vec<Handle<State<C>>>,
}

impl<C> Transition<C> {
    /// Returns a handle of the source state.
    #[inline]
    pub fn source(&self) -> Handle<State<C>> {
        self.source
    }

    /// Returns a handle of the target state.
    #[inline]
    pub fn target(&self) -> Handle<State<C>> {
        self.target
    }

    /// Returns the kind of the transition.
    #[inline]
    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    /// Returns the event trigger of the transition. A transition without a
    /// trigger only matches the "no event" sentinel of default and completion
    /// firings.
    #[inline]
    pub fn trigger(&self) -> Option<&Event> {
        self.trigger.as_ref()
    }

    /// Returns the states deactivated by a firing, innermost first.
    #[inline]
    pub fn exit_set(&self) -> &[Handle<State<C>>] {
        &self.exit_set
    }

    /// Returns the states activated by a firing, outermost first.
    #[inline]
    pub fn entry_set(&self) -> &[Handle<State<C>>] {
        &self.entry_set
    }

    /// Returns `true` for a local transition: an external transition between a
    /// composite and one of its descendants (in either direction) whose exit
    /// set does not include the composite itself. Firing it deactivates
    /// whichever child of the composite was current, but the composite is
    /// neither left nor re-entered.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.kind == TransitionKind::External
            && (!self.exit_set.contains(&self.source) || !self.entry_set.contains(&self.target))
    }
}

impl<C> Debug for Transition<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("kind", &self.kind)
            .field("trigger", &self.trigger)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Builder for transitions, in the usual `with_x` style:
///
/// ```rust
/// use statechart::{Statechart, TransitionBuilder};
///
/// let mut chart = Statechart::new("doors", ());
/// let initial = chart.add_initial(chart.root()).unwrap();
/// let closed = chart.add_state("closed", chart.root()).unwrap();
/// let open = chart.add_state("open", chart.root()).unwrap();
///
/// TransitionBuilder::new(initial, closed).build(&mut chart).unwrap();
/// TransitionBuilder::new(closed, open)
///     .with_trigger("push")
///     .build(&mut chart)
///     .unwrap();
/// ```
pub struct TransitionBuilder<C> {
    pub(crate) source: Handle<State<C>>,
    pub(crate) target: Handle<State<C>>,
    pub(crate) kind: TransitionKind,
    pub(crate) trigger: Option<Event>,
    pub(crate) guard: Option<GuardFn<C>>,
    pub(crate) action: Option<ActionFn<C>>,
}

impl<C> TransitionBuilder<C>
where
    C: 'static,
{
    /// Creates a builder for an external transition between two states.
    pub fn new(start: Handle<State<C>>, end: Handle<State<C>>) -> Self {
        Self {
            source: start,
            target: end,
            kind: TransitionKind::External,
            trigger: None,
            guard: None,
            action: None,
        }
    }

    /// Creates a builder for an internal transition: the state handles the
    /// event without being left and re-entered, only the action fires.
    pub fn internal(state: Handle<State<C>>) -> Self {
        Self {
            source: state,
            target: state,
            kind: TransitionKind::Internal,
            trigger: None,
            guard: None,
            action: None,
        }
    }

    /// Sets the event trigger. Accepts anything convertible into an [`Event`],
    /// in particular a plain name string.
    pub fn with_trigger(mut self, event: impl Into<Event>) -> Self {
        self.trigger = Some(event.into());
        self
    }

    /// Sets the guard condition. Guards must be side-effect-free.
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(Option<&Event>, &C) -> bool + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Sets the always-passing `else` guard. Conventionally used on the last
    /// branch of a choice pseudostate.
    pub fn with_else_guard(mut self) -> Self {
        self.guard = Some(crate::callback::else_guard());
        self
    }

    /// Sets the transition action, invoked between the exit and the entry
    /// sequences of a firing.
    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(Option<&Event>, &mut C) + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// Computes the exit and entry sets, validates the model rules and
    /// registers the transition with its source state. Guarded transitions go
    /// to the head of the source's list (more specific rules first); a choice
    /// keeps declaration order.
    pub fn build(self, chart: &mut Statechart<C>) -> Result<Handle<Transition<C>>, ChartError> {
        chart.insert_transition(self)
    }
}

/// Collects the chain of states from the outermost ancestor below the root down
/// to the given state itself. The root is never part of a chain, which keeps it
/// out of every exit and entry set.
pub(crate) fn ancestor_chain<C: 'static>(
    states: &Pool<State<C>>,
    state: Handle<State<C>>,
) -> Vec<Handle<State<C>>> {
    let mut chain = Vec::new();
    let mut node = state;
    while node.is_some() && states[node].parent.is_some() {
        chain.push(node);
        node = states[node].parent;
    }
    chain.reverse();
    chain
}

/// Derives the exit set (innermost first) and the entry set (outermost first)
/// of a transition from the LCA of its source and target chains. A
/// self-transition uses the source's parent as the LCA, so the state is exited
/// and re-entered.
pub(crate) fn compute_paths<C: 'static>(
    states: &Pool<State<C>>,
    source: Handle<State<C>>,
    target: Handle<State<C>>,
) -> (Vec<Handle<State<C>>>, Vec<Handle<State<C>>>) {
    let start_chain = ancestor_chain(states, source);
    let end_chain = ancestor_chain(states, target);
    let min_len = start_chain.len().min(end_chain.len());

    let lca = if source == target {
        min_len.saturating_sub(1)
    } else {
        let mut lca = 0;
        while lca < min_len && start_chain[lca] == end_chain[lca] {
            lca += 1;
        }
        lca
    };

    let exit_set = start_chain[lca..].iter().rev().copied().collect();
    let entry_set = end_chain[lca..].to_vec();

    (exit_set, entry_set)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chart::Statechart;

    fn chart() -> Statechart<()> {
        Statechart::new("chart", ())
    }

    #[test]
    fn sibling_transition_sets() {
        let mut chart = chart();
        let root = chart.root();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();

        let transition = TransitionBuilder::new(a, b)
            .with_trigger("go")
            .build(&mut chart)
            .unwrap();

        assert_eq!(chart.transition(transition).exit_set(), [a]);
        assert_eq!(chart.transition(transition).entry_set(), [b]);
        assert!(!chart.transition(transition).is_local());
    }

    #[test]
    fn nested_transition_sets_are_ordered() {
        let mut chart = chart();
        let root = chart.root();
        let outer = chart.add_composite("outer", root).unwrap();
        let inner = chart.add_composite("inner", outer).unwrap();
        let deep = chart.add_state("deep", inner).unwrap();
        let other = chart.add_state("other", root).unwrap();

        let transition = TransitionBuilder::new(deep, other)
            .with_trigger("up")
            .build(&mut chart)
            .unwrap();

        // Innermost first on the way out, outermost first on the way in.
        assert_eq!(chart.transition(transition).exit_set(), [deep, inner, outer]);
        assert_eq!(chart.transition(transition).entry_set(), [other]);
    }

    #[test]
    fn self_transition_exits_and_reenters() {
        let mut chart = chart();
        let root = chart.root();
        let a = chart.add_state("a", root).unwrap();

        let transition = TransitionBuilder::new(a, a)
            .with_trigger("again")
            .build(&mut chart)
            .unwrap();

        assert_eq!(chart.transition(transition).exit_set(), [a]);
        assert_eq!(chart.transition(transition).entry_set(), [a]);
    }

    #[test]
    fn local_transition_spares_the_composite() {
        let mut chart = chart();
        let root = chart.root();
        let composite = chart.add_composite("composite", root).unwrap();
        chart.add_initial(composite).unwrap();
        let child = chart.add_state("child", composite).unwrap();

        let down = TransitionBuilder::new(composite, child)
            .with_trigger("down")
            .build(&mut chart)
            .unwrap();

        assert!(chart.transition(down).exit_set().is_empty());
        assert_eq!(chart.transition(down).entry_set(), [child]);
        assert!(chart.transition(down).is_local());

        let up = TransitionBuilder::new(child, composite)
            .with_trigger("up")
            .build(&mut chart)
            .unwrap();

        assert_eq!(chart.transition(up).exit_set(), [child]);
        assert!(chart.transition(up).entry_set().is_empty());
        assert!(chart.transition(up).is_local());
    }

    #[test]
    fn internal_transition_has_empty_sets() {
        let mut chart = chart();
        let root = chart.root();
        let a = chart.add_state("a", root).unwrap();

        let transition = TransitionBuilder::internal(a)
            .with_trigger("note")
            .build(&mut chart)
            .unwrap();

        assert_eq!(chart.transition(transition).kind(), TransitionKind::Internal);
        assert!(chart.transition(transition).exit_set().is_empty());
        assert!(chart.transition(transition).entry_set().is_empty());
    }

    #[test]
    fn guarded_transitions_come_first() {
        let mut chart = chart();
        let root = chart.root();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();

        let plain = TransitionBuilder::new(a, b)
            .with_trigger("go")
            .build(&mut chart)
            .unwrap();
        let guarded = TransitionBuilder::new(a, b)
            .with_trigger("go")
            .with_guard(|_, _| false)
            .build(&mut chart)
            .unwrap();

        assert_eq!(chart.state(a).transitions(), [guarded, plain]);
    }

    #[test]
    fn choice_keeps_declaration_order() {
        let mut chart = chart();
        let root = chart.root();
        let choice = chart.add_choice(root).unwrap();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();

        let first = TransitionBuilder::new(choice, a)
            .with_guard(|_, _| false)
            .build(&mut chart)
            .unwrap();
        let second = TransitionBuilder::new(choice, b)
            .with_else_guard()
            .build(&mut chart)
            .unwrap();

        assert_eq!(chart.state(choice).transitions(), [first, second]);
    }

    #[test]
    fn rejects_ill_formed_sources() {
        let mut chart = chart();
        let root = chart.root();
        let a = chart.add_state("a", root).unwrap();
        let final_state = chart.add_final(root).unwrap();
        let initial = chart.add_initial(root).unwrap();

        assert_eq!(
            TransitionBuilder::new(root, a).build(&mut chart),
            Err(ChartError::TransitionFromRoot)
        );
        assert_eq!(
            TransitionBuilder::new(final_state, a).build(&mut chart),
            Err(ChartError::TransitionFromFinal)
        );

        TransitionBuilder::new(initial, a).build(&mut chart).unwrap();
        assert_eq!(
            TransitionBuilder::new(initial, a).build(&mut chart),
            Err(ChartError::MultipleDefaultTransitions("initial".to_owned()))
        );

        let history = chart.add_shallow_history(root).unwrap();
        assert_eq!(
            TransitionBuilder::new(history, a)
                .with_trigger("oops")
                .build(&mut chart),
            Err(ChartError::TriggeredDefaultTransition("history".to_owned()))
        );

        assert_eq!(
            TransitionBuilder::internal(initial).build(&mut chart),
            Err(ChartError::InvalidInternalSource)
        );
    }
}
