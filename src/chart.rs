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

//! The statechart itself: the arena that owns all states and transitions, the
//! build-time assembly API and the run-time dispatcher. See [`Statechart`] docs
//! for more info.

use crate::{
    configuration::Configuration,
    core::{
        log::{Log, MessageKind},
        pool::{Handle, Pool},
    },
    error::ChartError,
    event::Event,
    state::{CompositeData, ConcurrentData, State, StateKind},
    transition::{compute_paths, Transition, TransitionBuilder, TransitionKind},
};
use fxhash::FxHashMap;
use fyrox_core::find_by_name_ref;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Plain-data export of the runtime state of a chart: the active state names
/// from the root outward plus the shallow-history memory as a map from the
/// name of the composite keeping the history to the name of the remembered
/// child. The crate does not persist anything itself; embeddings serialize
/// this in whatever format they like.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChartSnapshot {
    /// Names of the active states in activation order, root first.
    pub active_states: Vec<String>,
    /// Composite name to remembered child name, one entry per shallow-history
    /// pseudostate with stored memory.
    pub history: FxHashMap<String, String>,
}

/// A UML-style hierarchical state machine (statechart).
///
/// The chart owns every state and transition in two [`Pool`] arenas and hands
/// out [`Handle`]s; parent links, child lists and transition endpoints are all
/// handles, so the cyclic structure of a statechart never turns into cyclic
/// ownership. The generic parameter `C` is an opaque user context that is
/// threaded into every guard and action.
///
/// # Terminology
///
/// `State` - a vertex of the tree. A *leaf* is atomic, a *composite* holds
/// children of which exactly one is active at a time, a *concurrent* state
/// holds composite *regions* that are all active simultaneously, a *final*
/// state marks its composite finished. *Initial*, *choice* and
/// *shallow-history* are transient pseudostates traversed within a single
/// dispatch step.
/// `Transition` - a directed edge between two states with an optional event
/// trigger, an optional guard and an optional action. Its exit and entry
/// sequences are precomputed from the Least Common Ancestor of its endpoints.
/// `Dispatch` - routing of one event through the active configuration,
/// innermost states first, firing at most one transition per region.
///
/// # Example
///
/// ```rust
/// use statechart::{Event, Statechart, TransitionBuilder};
///
/// #[derive(Default)]
/// struct Lamp {
///     lit: bool,
/// }
///
/// let mut chart = Statechart::new("lamp", Lamp::default());
/// let root = chart.root();
///
/// let initial = chart.add_initial(root).unwrap();
/// let off = chart.add_state("off", root).unwrap();
/// let on = chart.add_state("on", root).unwrap();
///
/// chart
///     .set_entry_action(on, |_, lamp: &mut Lamp| lamp.lit = true)
///     .unwrap();
/// chart.set_exit_action(on, |_, lamp| lamp.lit = false).unwrap();
///
/// TransitionBuilder::new(initial, off).build(&mut chart).unwrap();
/// TransitionBuilder::new(off, on)
///     .with_trigger("flick")
///     .build(&mut chart)
///     .unwrap();
/// TransitionBuilder::new(on, off)
///     .with_trigger("flick")
///     .build(&mut chart)
///     .unwrap();
///
/// chart.start().unwrap();
/// assert!(chart.is_active("off"));
///
/// chart.dispatch(&Event::new("flick")).unwrap();
/// assert!(chart.is_active("on"));
/// assert!(chart.context().lit);
/// ```
///
/// # Re-entrancy
///
/// The dispatcher is strictly non-reentrant: a guard or action must never call
/// [`Statechart::dispatch`] on the machine that invoked it. Events produced
/// inside callbacks go through [`Statechart::enqueue`] (or a cloned
/// [`Statechart::event_sender`]) and are delivered on the next
/// [`Statechart::drain_events`] in FIFO order.
pub struct Statechart<C> {
    pub(crate) states: Pool<State<C>>,
    pub(crate) transitions: Pool<Transition<C>>,
    root: Handle<State<C>>,
    context: C,
    configuration: Configuration<C>,
    started: bool,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    debug: bool,
}

impl<C> Statechart<C>
where
    C: 'static,
{
    /// Creates a new statechart with the given name and user context. The
    /// chart itself is the root of the state tree: a composite without a
    /// parent, without actions and without outgoing transitions.
    pub fn new(name: &str, context: C) -> Self {
        let mut states = Pool::new();
        let root = states.spawn(State::new(
            name,
            Handle::NONE,
            StateKind::Composite(CompositeData::default()),
        ));
        let (sender, receiver) = channel();

        Self {
            states,
            transitions: Pool::new(),
            root,
            context,
            configuration: Configuration::default(),
            started: false,
            sender,
            receiver,
            debug: false,
        }
    }

    /// Returns the name of the statechart.
    #[inline]
    pub fn name(&self) -> &str {
        &self.states[self.root].name
    }

    /// Returns a handle of the root state, the parent for all top-level states.
    #[inline]
    pub fn root(&self) -> Handle<State<C>> {
        self.root
    }

    /// Returns a shared reference to the user context.
    #[inline]
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Returns a mutable reference to the user context.
    #[inline]
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Turns on/off the debug mode. Debug mode logs every state entered or
    /// left and every transition fired.
    #[inline]
    pub fn debug(&mut self, state: bool) {
        self.debug = state;
    }

    // ------------------------------------------------------------------
    // Build-time API.
    // ------------------------------------------------------------------

    /// Adds a new leaf state and returns its handle.
    pub fn add_state(
        &mut self,
        name: &str,
        parent: Handle<State<C>>,
    ) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state(name, parent, StateKind::Leaf)
    }

    /// Adds a new composite state and returns its handle. If the parent is a
    /// concurrent state, the composite is automatically registered as one of
    /// its regions.
    pub fn add_composite(
        &mut self,
        name: &str,
        parent: Handle<State<C>>,
    ) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state(name, parent, StateKind::Composite(CompositeData::default()))
    }

    /// Adds a new concurrent state and returns its handle. Its regions are the
    /// composite states subsequently added under it; anything else is rejected.
    pub fn add_concurrent(
        &mut self,
        name: &str,
        parent: Handle<State<C>>,
    ) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state(
            name,
            parent,
            StateKind::Concurrent(ConcurrentData::default()),
        )
    }

    /// Adds a final state to a composite. Entering it marks the composite
    /// finished and makes the composite re-attempt dispatch with the "no
    /// event" sentinel, which lets a default outgoing transition fire.
    pub fn add_final(&mut self, parent: Handle<State<C>>) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state("final", parent, StateKind::Final)
    }

    /// Adds the initial pseudostate of a composite. A composite holds at most
    /// one; its single outgoing transition selects the default child.
    pub fn add_initial(
        &mut self,
        parent: Handle<State<C>>,
    ) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state("initial", parent, StateKind::Initial)
    }

    /// Adds the shallow-history pseudostate of a composite. A composite holds
    /// at most one; entering it re-activates the last active direct child of
    /// the composite, or fires its single default transition when there is no
    /// memory yet.
    pub fn add_shallow_history(
        &mut self,
        parent: Handle<State<C>>,
    ) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state("history", parent, StateKind::ShallowHistory)
    }

    /// Adds a choice pseudostate. On entry its outgoing transitions are
    /// evaluated in declaration order and the first one whose guard passes
    /// fires; if none passes the configuration is ill-formed and dispatch
    /// fails with [`ChartError::NoEnabledBranch`].
    pub fn add_choice(&mut self, parent: Handle<State<C>>) -> Result<Handle<State<C>>, ChartError> {
        self.insert_state("choice", parent, StateKind::Choice)
    }

    /// Sets the entry action of a state, executed whenever the state is
    /// entered, regardless of the transition taken to reach it.
    pub fn set_entry_action<F>(
        &mut self,
        state: Handle<State<C>>,
        action: F,
    ) -> Result<(), ChartError>
    where
        F: Fn(Option<&Event>, &mut C) + 'static,
    {
        self.action_target(state)?.on_entry = Some(Box::new(action));
        Ok(())
    }

    /// Sets the do action of a state, invoked right after the entry action.
    /// Long-running activities belong to the embedding; a do action that needs
    /// to report back can enqueue events through a cloned
    /// [`Statechart::event_sender`].
    pub fn set_do_action<F>(
        &mut self,
        state: Handle<State<C>>,
        action: F,
    ) -> Result<(), ChartError>
    where
        F: Fn(Option<&Event>, &mut C) + 'static,
    {
        self.action_target(state)?.on_do = Some(Box::new(action));
        Ok(())
    }

    /// Sets the exit action of a state, executed upon deactivation regardless
    /// of which transition was taken out of the state.
    pub fn set_exit_action<F>(
        &mut self,
        state: Handle<State<C>>,
        action: F,
    ) -> Result<(), ChartError>
    where
        F: Fn(Option<&Event>, &mut C) + 'static,
    {
        self.action_target(state)?.on_exit = Some(Box::new(action));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Run-time API.
    // ------------------------------------------------------------------

    /// Starts the chart: activates the root, then dispatches the "no event"
    /// sentinel into the root's initial pseudostate, which cascades down to the
    /// default leaf configuration (through any nested initial, choice and
    /// history pseudostates on the way). Fails if the chart is already running
    /// or if the root has no initial pseudostate.
    pub fn start(&mut self) -> Result<(), ChartError> {
        if self.started {
            return Err(ChartError::AlreadyStarted);
        }

        let initial = self.composite_initial(self.root);
        if initial.is_none() {
            return Err(ChartError::MissingInitial(self.name().to_owned()));
        }

        if self.debug {
            Log::writeln(MessageKind::Information, format!("Start: {}", self.name()));
        }

        self.configuration.clear();
        self.configuration.activate(self.root, Handle::NONE);
        self.started = true;

        self.fire_default(initial)?;

        Ok(())
    }

    /// Stops the chart: deactivates the whole active subtree children-first
    /// (running exit actions on the way), then clears the active configuration
    /// and the history memory. Stopping a chart that is not running is a no-op.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }

        if self.debug {
            Log::writeln(MessageKind::Information, format!("Stop: {}", self.name()));
        }

        self.deactivate_state(self.root, None);
        self.configuration.clear();
        self.started = false;
    }

    /// Routes an event through the active configuration, giving it first to
    /// the deepest active states, and fires at most one matching transition
    /// per orthogonal region. Returns `Ok(true)` if any transition fired; an
    /// event that matches nothing is not an error.
    pub fn dispatch(&mut self, event: &Event) -> Result<bool, ChartError> {
        if !self.started {
            return Err(ChartError::NotStarted);
        }

        if self.debug {
            Log::writeln(MessageKind::Information, format!("Dispatch: {event}"));
        }

        self.step(self.root, Some(event))
    }

    /// Puts an event at the back of the pending queue. This is the only safe
    /// way to emit an event from inside a guard or action; the queue is
    /// delivered by the next [`Statechart::drain_events`].
    pub fn enqueue(&self, event: Event) {
        self.sender.send(event).ok();
    }

    /// Returns a cloneable sender feeding the pending queue. Hand it to
    /// long-running activities (possibly on other threads) so they can report
    /// back without touching the chart.
    pub fn event_sender(&self) -> Sender<Event> {
        self.sender.clone()
    }

    /// Dispatches all pending events in enqueue order. Each event is fully
    /// processed, including its completion cascades, before the next one is
    /// dequeued. Returns `Ok(true)` if any of them fired a transition.
    pub fn drain_events(&mut self) -> Result<bool, ChartError> {
        if !self.started {
            return Err(ChartError::NotStarted);
        }

        let mut fired = false;
        while let Ok(event) = self.receiver.try_recv() {
            fired |= self.dispatch(&event)?;
        }

        Ok(fired)
    }

    /// Checks whether some active state has the given name.
    pub fn is_active(&self, name: &str) -> bool {
        self.configuration
            .active_iter()
            .any(|state| self.states[state].name == name)
    }

    /// Checks whether the statechart has finished, i.e. whether the current
    /// active child of the root is a final state.
    pub fn is_finished(&self) -> bool {
        let child = self.configuration.current_child(self.root);
        child.is_some() && self.is_final_state(child)
    }

    /// Returns the names of the active states in activation order, from the
    /// root outward.
    pub fn active_states(&self) -> Vec<&str> {
        self.configuration
            .active_iter()
            .map(|state| self.states[state].name.as_str())
            .collect()
    }

    /// Exports the serializable runtime state of the chart: active state names
    /// plus history memory. See [`ChartSnapshot`].
    pub fn snapshot(&self) -> ChartSnapshot {
        ChartSnapshot {
            active_states: self
                .configuration
                .active_iter()
                .map(|state| self.states[state].name.clone())
                .collect(),
            history: self
                .configuration
                .history_iter()
                .map(|(history, remembered)| {
                    let composite = self.states[history].parent;
                    (
                        self.states[composite].name.clone(),
                        self.states[remembered].name.clone(),
                    )
                })
                .collect(),
        }
    }

    /// Tries to find a state by its name. Returns the handle of the state and
    /// its reference. Names are not enforced to be unique; the first match in
    /// creation order wins.
    pub fn find_state_by_name<S: AsRef<str>>(
        &self,
        name: S,
    ) -> Option<(Handle<State<C>>, &State<C>)> {
        find_by_name_ref(self.states.pair_iter(), name)
    }

    /// Borrows a state using its handle, panics if the handle is invalid.
    #[inline]
    pub fn state(&self, state: Handle<State<C>>) -> &State<C> {
        &self.states[state]
    }

    /// Returns a reference to the inner state container.
    #[inline]
    pub fn states(&self) -> &Pool<State<C>> {
        &self.states
    }

    /// Borrows a transition using its handle, panics if the handle is invalid.
    #[inline]
    pub fn transition(&self, transition: Handle<Transition<C>>) -> &Transition<C> {
        &self.transitions[transition]
    }

    /// Returns a reference to the inner transition container.
    #[inline]
    pub fn transitions(&self) -> &Pool<Transition<C>> {
        &self.transitions
    }

    // ------------------------------------------------------------------
    // Model assembly internals.
    // ------------------------------------------------------------------

    fn insert_state(
        &mut self,
        name: &str,
        parent: Handle<State<C>>,
        kind: StateKind<C>,
    ) -> Result<Handle<State<C>>, ChartError> {
        if parent.is_none() {
            return Err(ChartError::MissingParent);
        }

        let (parent_name, parent_is_composite, parent_is_concurrent, has_initial, has_history) = {
            let parent_node = self
                .states
                .try_borrow(parent)
                .ok_or(ChartError::InvalidStateHandle)?;
            match &parent_node.kind {
                StateKind::Composite(data) => (
                    parent_node.name.clone(),
                    true,
                    false,
                    data.initial.is_some(),
                    data.history.is_some(),
                ),
                StateKind::Concurrent(_) => (parent_node.name.clone(), false, true, false, false),
                _ => (parent_node.name.clone(), false, false, false, false),
            }
        };

        if !parent_is_composite && !parent_is_concurrent {
            return Err(ChartError::InvalidParent(parent_name));
        }
        if parent_is_concurrent && !matches!(&kind, StateKind::Composite(_)) {
            return Err(ChartError::InvalidRegion);
        }
        if matches!(&kind, StateKind::Initial) && has_initial {
            return Err(ChartError::DuplicateInitial(parent_name));
        }
        if matches!(&kind, StateKind::ShallowHistory) && has_history {
            return Err(ChartError::DuplicateHistory(parent_name));
        }

        let is_initial = matches!(&kind, StateKind::Initial);
        let is_history = matches!(&kind, StateKind::ShallowHistory);

        let handle = self.states.spawn(State::new(name, parent, kind));

        match &mut self.states[parent].kind {
            StateKind::Composite(data) => {
                if is_initial {
                    data.initial = handle;
                } else if is_history {
                    data.history = handle;
                } else {
                    data.children.push(handle);
                }
            }
            StateKind::Concurrent(data) => data.regions.push(handle),
            _ => (),
        }

        Ok(handle)
    }

    pub(crate) fn insert_transition(
        &mut self,
        builder: TransitionBuilder<C>,
    ) -> Result<Handle<Transition<C>>, ChartError> {
        let TransitionBuilder {
            source,
            target,
            kind,
            trigger,
            guard,
            action,
        } = builder;

        if self.states.try_borrow(target).is_none() {
            return Err(ChartError::InvalidStateHandle);
        }
        let (source_name, source_is_final, source_is_pseudo, source_is_default, source_is_choice) = {
            let node = self
                .states
                .try_borrow(source)
                .ok_or(ChartError::InvalidStateHandle)?;
            (
                node.name.clone(),
                matches!(node.kind, StateKind::Final),
                node.kind.is_pseudostate(),
                matches!(node.kind, StateKind::Initial | StateKind::ShallowHistory),
                matches!(node.kind, StateKind::Choice),
            )
        };

        if source == self.root {
            return Err(ChartError::TransitionFromRoot);
        }
        if source_is_final {
            return Err(ChartError::TransitionFromFinal);
        }
        if kind == TransitionKind::Internal && source_is_pseudo {
            return Err(ChartError::InvalidInternalSource);
        }
        if source_is_default {
            if trigger.is_some() || guard.is_some() {
                return Err(ChartError::TriggeredDefaultTransition(source_name));
            }
            if !self.states[source].transitions.is_empty() {
                return Err(ChartError::MultipleDefaultTransitions(source_name));
            }
        }

        let (exit_set, entry_set) = if kind == TransitionKind::Internal {
            (Vec::new(), Vec::new())
        } else {
            compute_paths(&self.states, source, target)
        };

        let guarded = guard.is_some();
        let handle = self.transitions.spawn(Transition {
            source,
            target,
            kind,
            trigger,
            guard,
            action,
            exit_set,
            entry_set,
        });

        // More specific rules first: guarded transitions jump the queue, except
        // on a choice where declaration order is the contract.
        let node = &mut self.states[source];
        if source_is_choice || !guarded {
            node.transitions.push(handle);
        } else {
            node.transitions.insert(0, handle);
        }

        Ok(handle)
    }

    fn action_target(&mut self, state: Handle<State<C>>) -> Result<&mut State<C>, ChartError> {
        if state == self.root {
            return Err(ChartError::RootAction);
        }
        let node = self
            .states
            .try_borrow_mut(state)
            .ok_or(ChartError::InvalidStateHandle)?;
        if node.kind.is_pseudostate() {
            return Err(ChartError::PseudostateAction);
        }
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Dispatcher internals.
    // ------------------------------------------------------------------

    /// Routes the event to one state of the active configuration: children
    /// first, then the state's own outgoing transitions.
    fn step(&mut self, state: Handle<State<C>>, event: Option<&Event>) -> Result<bool, ChartError> {
        if self.is_composite(state) {
            self.step_composite(state, event)
        } else if self.is_concurrent(state) {
            self.step_concurrent(state, event)
        } else if self.is_final_state(state) || self.is_pseudostate(state) {
            Ok(false)
        } else {
            self.try_own_transitions(state, event)
        }
    }

    fn step_composite(
        &mut self,
        state: Handle<State<C>>,
        event: Option<&Event>,
    ) -> Result<bool, ChartError> {
        if !self.configuration.is_active(state) {
            return Err(ChartError::InactiveDispatch(self.states[state].name.clone()));
        }

        let child = self.configuration.current_child(state);
        let mut consumed = false;
        if child.is_some() && !self.is_final_state(child) {
            consumed = self.step(child, event)?;
        }

        if consumed {
            // The substate handled the event. If it landed on a final state and
            // we are still active, re-attempt with the "no event" sentinel so a
            // completion transition can fire.
            if self.configuration.is_active(state) {
                let child = self.configuration.current_child(state);
                if child.is_some() && self.is_final_state(child) {
                    self.try_own_transitions(state, None)?;
                }
            }
            return Ok(true);
        }

        self.try_own_transitions(state, event)
    }

    fn step_concurrent(
        &mut self,
        state: Handle<State<C>>,
        event: Option<&Event>,
    ) -> Result<bool, ChartError> {
        if !self.configuration.is_active(state) {
            return Err(ChartError::InactiveDispatch(self.states[state].name.clone()));
        }

        // Broadcast to every region in declaration order; consumption is the OR
        // across regions. A region may fire a transition that leaves the whole
        // concurrent state, so re-check liveness between regions.
        let mut consumed = false;
        for region in self.regions_of(state) {
            if !self.configuration.is_active(state) {
                break;
            }
            if self.configuration.is_active(region) {
                consumed |= self.step(region, event)?;
            }
        }

        if consumed {
            return Ok(true);
        }

        self.try_own_transitions(state, event)
    }

    /// Scans the outgoing transitions of a state in list order and fires the
    /// first allowed one.
    fn try_own_transitions(
        &mut self,
        state: Handle<State<C>>,
        event: Option<&Event>,
    ) -> Result<bool, ChartError> {
        let transitions = self.states[state].transitions.clone();
        for transition in transitions {
            if self.transition_allowed(transition, event) {
                self.fire(transition, event)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A transition is allowed iff its trigger matches the event (an absent
    /// trigger matches only the "no event" sentinel) and its guard, if any,
    /// passes.
    fn transition_allowed(&self, transition: Handle<Transition<C>>, event: Option<&Event>) -> bool {
        let transition = &self.transitions[transition];

        let trigger_matches = match (transition.trigger.as_ref(), event) {
            (Some(trigger), Some(event)) => trigger == event,
            (None, None) => true,
            _ => false,
        };
        if !trigger_matches {
            return false;
        }

        match transition.guard.as_ref() {
            Some(guard) => guard(event, &self.context),
            None => true,
        }
    }

    /// Executes one firing: the exit sequence innermost first, then the
    /// action, then the entry sequence outermost first including the cascades
    /// through initial, choice and shallow-history pseudostates.
    fn fire(
        &mut self,
        transition: Handle<Transition<C>>,
        event: Option<&Event>,
    ) -> Result<(), ChartError> {
        let (kind, source, target) = {
            let transition = &self.transitions[transition];
            (transition.kind, transition.source, transition.target)
        };

        if self.debug {
            Log::writeln(
                MessageKind::Information,
                format!(
                    "Firing transition: {} -> {}",
                    self.states[source].name, self.states[target].name
                ),
            );
        }

        if kind == TransitionKind::Internal {
            if let Some(action) = self.transitions[transition].action.as_ref() {
                action(event, &mut self.context);
            }
            return Ok(());
        }

        let mut exits = self.transitions[transition].exit_set.clone();
        // A local transition spares the composite itself, but whichever child
        // was current still has to go.
        if !exits.contains(&source) {
            let child = self.configuration.current_child(source);
            if child.is_some() {
                exits.insert(0, child);
            }
        }
        // The inner exits clear the current-child pointers on their way up, so
        // capture shallow history for every exiting composite first.
        for state in exits.iter().copied() {
            self.store_shallow_history(state);
        }
        for state in exits {
            self.deactivate_state(state, event);
        }

        if let Some(action) = self.transitions[transition].action.as_ref() {
            action(event, &mut self.context);
        }

        let entries = self.transitions[transition].entry_set.clone();
        let mut end = target;
        for (i, state) in entries.iter().copied().enumerate() {
            if self.is_pseudostate(state) {
                self.enter_pseudostate(state, event, &mut end)?;
            } else {
                self.activate_node(state, event)?;
                if self.is_concurrent(state) {
                    let via = entries.get(i + 1).copied().unwrap_or(Handle::NONE);
                    self.activate_regions(state, via, event)?;
                }
            }
        }

        self.finish_entry(end)
    }

    /// Marks a state active, updates the configuration tree and runs its entry
    /// and do actions. Activating an already-active state is a no-op.
    fn activate_node(
        &mut self,
        state: Handle<State<C>>,
        event: Option<&Event>,
    ) -> Result<(), ChartError> {
        if self.configuration.is_active(state) {
            return Ok(());
        }

        let parent = self.states[state].parent;
        if parent.is_some() && !self.configuration.is_active(parent) {
            return Err(ChartError::ParentNotActive(self.states[state].name.clone()));
        }
        self.configuration.activate(state, parent);

        if self.debug {
            Log::writeln(
                MessageKind::Information,
                format!("Entering state: {}", self.states[state].name),
            );
        }

        if let Some(entry) = self.states[state].on_entry.as_ref() {
            entry(event, &mut self.context);
        }
        if let Some(activity) = self.states[state].on_do.as_ref() {
            activity(event, &mut self.context);
        }

        Ok(())
    }

    /// Deactivates a state subtree children-first: a composite stores its
    /// shallow history and takes its current child down, a concurrent takes
    /// down every region. The state's own exit action runs last, after all of
    /// its internal activity is gone.
    fn deactivate_state(&mut self, state: Handle<State<C>>, event: Option<&Event>) {
        if !self.configuration.is_active(state) {
            return;
        }

        if self.is_composite(state) {
            self.store_shallow_history(state);
            let child = self.configuration.current_child(state);
            if child.is_some() {
                self.deactivate_state(child, event);
            }
        } else if self.is_concurrent(state) {
            for region in self.regions_of(state) {
                self.deactivate_state(region, event);
            }
        }

        if self.debug {
            Log::writeln(
                MessageKind::Information,
                format!("Leaving state: {}", self.states[state].name),
            );
        }

        if let Some(exit) = self.states[state].on_exit.as_ref() {
            exit(event, &mut self.context);
        }

        let parent = self.states[state].parent;
        self.configuration.deactivate(state, parent);
    }

    /// Runs the firing rules of a transient vertex reached by an entry
    /// sequence. Pseudostates never join the active configuration; they fire
    /// and are gone within the same dispatch step.
    fn enter_pseudostate(
        &mut self,
        state: Handle<State<C>>,
        event: Option<&Event>,
        end: &mut Handle<State<C>>,
    ) -> Result<(), ChartError> {
        if matches!(self.states[state].kind, StateKind::Initial) {
            self.fire_default(state)
        } else if matches!(self.states[state].kind, StateKind::Choice) {
            self.run_choice(state)
        } else {
            self.run_history(state, event, end)
        }
    }

    /// Fires the single outgoing transition of an initial or shallow-history
    /// pseudostate with the "no event" sentinel.
    fn fire_default(&mut self, pseudostate: Handle<State<C>>) -> Result<(), ChartError> {
        match self.states[pseudostate].transitions.first().copied() {
            Some(transition) => self.fire(transition, None),
            None => Err(ChartError::MissingDefaultTransition(
                self.states[pseudostate].name.clone(),
            )),
        }
    }

    /// Evaluates the branches of a choice in declaration order and fires the
    /// first one whose guard passes. A choice with no passing branch is a
    /// fatal configuration error.
    fn run_choice(&mut self, choice: Handle<State<C>>) -> Result<(), ChartError> {
        let branches = self.states[choice].transitions.clone();
        for branch in branches {
            if self.transition_allowed(branch, None) {
                return self.fire(branch, None);
            }
        }
        Err(ChartError::NoEnabledBranch(self.states[choice].name.clone()))
    }

    /// Restores the memory of a shallow-history pseudostate by rewriting the
    /// in-flight transition target to the remembered state, or fires the
    /// history's default transition when there is nothing to restore.
    fn run_history(
        &mut self,
        history: Handle<State<C>>,
        event: Option<&Event>,
        end: &mut Handle<State<C>>,
    ) -> Result<(), ChartError> {
        if let Some(remembered) = self.configuration.history_for(history) {
            *end = remembered;
            self.activate_node(remembered, event)?;
            if self.is_concurrent(remembered) {
                self.activate_regions(remembered, Handle::NONE, event)?;
            }
            Ok(())
        } else {
            self.fire_default(history)
        }
    }

    /// Default-activates every region of a concurrent state that is not
    /// entered explicitly by the in-flight entry sequence.
    fn activate_regions(
        &mut self,
        state: Handle<State<C>>,
        via: Handle<State<C>>,
        event: Option<&Event>,
    ) -> Result<(), ChartError> {
        for region in self.regions_of(state) {
            if region == via || self.configuration.is_active(region) {
                continue;
            }
            self.activate_node(region, event)?;
            self.cascade_initial(region)?;
        }
        Ok(())
    }

    /// Entering a composite itself (rather than a specific descendant) leaves
    /// it without a current child; the initial pseudostate then selects one.
    /// This also covers local transitions, which deactivate the previous child
    /// without re-entering the composite.
    fn finish_entry(&mut self, end: Handle<State<C>>) -> Result<(), ChartError> {
        if self.is_composite(end)
            && self.configuration.is_active(end)
            && self.configuration.current_child(end).is_none()
        {
            self.cascade_initial(end)?;
        }
        Ok(())
    }

    /// Captures the current child of a composite into its shallow-history
    /// memory, if the composite keeps one. History never remembers a final
    /// state. A no-op for anything that is not a composite with a current
    /// child.
    fn store_shallow_history(&mut self, state: Handle<State<C>>) {
        let history = self.composite_history(state);
        let child = self.configuration.current_child(state);
        if history.is_some() && child.is_some() && !self.is_final_state(child) {
            self.configuration.store_history(history, child);
        }
    }

    fn cascade_initial(&mut self, composite: Handle<State<C>>) -> Result<(), ChartError> {
        let initial = self.composite_initial(composite);
        if initial.is_none() {
            return Err(ChartError::MissingInitial(
                self.states[composite].name.clone(),
            ));
        }
        self.fire_default(initial)
    }

    // ------------------------------------------------------------------
    // Small structural helpers.
    // ------------------------------------------------------------------

    fn is_composite(&self, state: Handle<State<C>>) -> bool {
        matches!(self.states[state].kind, StateKind::Composite(_))
    }

    fn is_concurrent(&self, state: Handle<State<C>>) -> bool {
        matches!(self.states[state].kind, StateKind::Concurrent(_))
    }

    fn is_final_state(&self, state: Handle<State<C>>) -> bool {
        matches!(self.states[state].kind, StateKind::Final)
    }

    fn is_pseudostate(&self, state: Handle<State<C>>) -> bool {
        self.states[state].kind.is_pseudostate()
    }

    fn composite_initial(&self, state: Handle<State<C>>) -> Handle<State<C>> {
        self.states[state]
            .composite()
            .map(|data| data.initial)
            .unwrap_or(Handle::NONE)
    }

    fn composite_history(&self, state: Handle<State<C>>) -> Handle<State<C>> {
        self.states[state]
            .composite()
            .map(|data| data.history)
            .unwrap_or(Handle::NONE)
    }

    fn regions_of(&self, state: Handle<State<C>>) -> Vec<Handle<State<C>>> {
        if let StateKind::Concurrent(data) = &self.states[state].kind {
            data.regions.clone()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Trace {
        log: Vec<String>,
    }

    impl Trace {
        fn push(&mut self, entry: &str) {
            self.log.push(entry.to_owned());
        }
    }

    fn traced(chart: &Statechart<Trace>) -> Vec<String> {
        chart.context().log.clone()
    }

    #[test]
    fn construction_rules() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();

        assert_eq!(
            chart.add_state("orphan", Handle::NONE),
            Err(ChartError::MissingParent)
        );

        let leaf = chart.add_state("leaf", root).unwrap();
        assert_eq!(
            chart.add_state("child", leaf),
            Err(ChartError::InvalidParent("leaf".to_owned()))
        );

        chart.add_initial(root).unwrap();
        assert_eq!(
            chart.add_initial(root),
            Err(ChartError::DuplicateInitial("chart".to_owned()))
        );

        let composite = chart.add_composite("composite", root).unwrap();
        chart.add_shallow_history(composite).unwrap();
        assert_eq!(
            chart.add_shallow_history(composite),
            Err(ChartError::DuplicateHistory("composite".to_owned()))
        );

        let concurrent = chart.add_concurrent("concurrent", root).unwrap();
        assert_eq!(
            chart.add_state("region", concurrent),
            Err(ChartError::InvalidRegion)
        );
        let region = chart.add_composite("region", concurrent).unwrap();
        if let StateKind::Concurrent(data) = chart.state(concurrent).kind() {
            assert_eq!(data.regions(), [region]);
        } else {
            panic!("expected a concurrent state");
        }
    }

    #[test]
    fn actions_rejected_on_root_and_pseudostates() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();

        assert_eq!(
            chart.set_entry_action(root, |_, _| ()),
            Err(ChartError::RootAction)
        );
        assert_eq!(
            chart.set_exit_action(initial, |_, _| ()),
            Err(ChartError::PseudostateAction)
        );
    }

    #[test]
    fn lifecycle_guards() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();

        // No initial state yet.
        assert_eq!(
            chart.start(),
            Err(ChartError::MissingInitial("chart".to_owned()))
        );
        assert_eq!(
            chart.dispatch(&Event::new("tick")),
            Err(ChartError::NotStarted)
        );

        let initial = chart.add_initial(root).unwrap();
        let idle = chart.add_state("idle", root).unwrap();
        TransitionBuilder::new(initial, idle).build(&mut chart).unwrap();

        chart.start().unwrap();
        assert_eq!(chart.start(), Err(ChartError::AlreadyStarted));
        assert!(chart.is_active("idle"));
        assert_eq!(chart.active_states(), vec!["chart", "idle"]);

        chart.stop();
        assert!(!chart.is_active("idle"));
        chart.stop(); // Idempotent.
        chart.start().unwrap();
        assert!(chart.is_active("idle"));
    }

    #[test]
    fn event_miss_returns_false_and_changes_nothing() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let idle = chart.add_state("idle", root).unwrap();
        TransitionBuilder::new(initial, idle).build(&mut chart).unwrap();

        chart.start().unwrap();
        let before = chart.snapshot();

        assert_eq!(chart.dispatch(&Event::new("unknown")), Ok(false));
        assert_eq!(chart.snapshot(), before);
    }

    #[test]
    fn entry_and_exit_actions_observe_firing_order() {
        let mut chart = Statechart::new("chart", Trace::default());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();

        chart.set_entry_action(a, |_, t: &mut Trace| t.push("enter a")).unwrap();
        chart.set_do_action(a, |_, t| t.push("do a")).unwrap();
        chart.set_exit_action(a, |_, t| t.push("exit a")).unwrap();
        chart.set_entry_action(b, |_, t| t.push("enter b")).unwrap();

        TransitionBuilder::new(initial, a).build(&mut chart).unwrap();
        TransitionBuilder::new(a, b)
            .with_trigger("go")
            .with_action(|_, t: &mut Trace| t.push("action"))
            .build(&mut chart)
            .unwrap();

        chart.start().unwrap();
        chart.dispatch(&Event::new("go")).unwrap();

        assert_eq!(
            traced(&chart),
            vec!["enter a", "do a", "exit a", "action", "enter b"]
        );
    }

    #[test]
    fn internal_transition_runs_action_only() {
        let mut chart = Statechart::new("chart", Trace::default());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let a = chart.add_state("a", root).unwrap();

        chart.set_entry_action(a, |_, t: &mut Trace| t.push("enter")).unwrap();
        chart.set_exit_action(a, |_, t| t.push("exit")).unwrap();

        TransitionBuilder::new(initial, a).build(&mut chart).unwrap();
        TransitionBuilder::internal(a)
            .with_trigger("note")
            .with_action(|_, t: &mut Trace| t.push("noted"))
            .build(&mut chart)
            .unwrap();

        chart.start().unwrap();
        assert_eq!(chart.dispatch(&Event::new("note")), Ok(true));

        // Entered once, never exited, the internal action fired.
        assert_eq!(traced(&chart), vec!["enter", "noted"]);
        assert!(chart.is_active("a"));
    }

    #[test]
    fn guards_select_transitions() {
        let mut chart = Statechart::new("chart", 0i32);
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();
        let c = chart.add_state("c", root).unwrap();

        TransitionBuilder::new(initial, a).build(&mut chart).unwrap();
        // Guard-less first by declaration, but the guarded one must win.
        TransitionBuilder::new(a, b).with_trigger("go").build(&mut chart).unwrap();
        TransitionBuilder::new(a, c)
            .with_trigger("go")
            .with_guard(|_, counter| *counter > 0)
            .build(&mut chart)
            .unwrap();

        *chart.context_mut() = 1;
        chart.start().unwrap();
        chart.dispatch(&Event::new("go")).unwrap();
        assert!(chart.is_active("c"));

        // With a failing guard the guard-less transition is the fallback.
        chart.stop();
        *chart.context_mut() = 0;
        chart.start().unwrap();
        chart.dispatch(&Event::new("go")).unwrap();
        assert!(chart.is_active("b"));
    }

    #[test]
    fn guard_reads_event_payload() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();

        TransitionBuilder::new(initial, a).build(&mut chart).unwrap();
        TransitionBuilder::new(a, b)
            .with_trigger("set")
            .with_guard(|event, _| {
                event.and_then(|e| e.payload::<u32>("value")).copied() == Some(7)
            })
            .build(&mut chart)
            .unwrap();

        chart.start().unwrap();
        assert_eq!(
            chart.dispatch(&Event::new("set").with_payload("value", 3u32)),
            Ok(false)
        );
        assert_eq!(
            chart.dispatch(&Event::new("set").with_payload("value", 7u32)),
            Ok(true)
        );
        assert!(chart.is_active("b"));
    }

    #[test]
    fn queue_is_fifo_and_callback_safe() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let a = chart.add_state("a", root).unwrap();
        let b = chart.add_state("b", root).unwrap();
        let c = chart.add_state("c", root).unwrap();

        TransitionBuilder::new(initial, a).build(&mut chart).unwrap();
        let sender = chart.event_sender();
        TransitionBuilder::new(a, b)
            .with_trigger("first")
            .with_action(move |_, _| {
                // Emitting from a callback goes through the queue, never
                // through a synchronous dispatch.
                sender.send(Event::new("second")).ok();
            })
            .build(&mut chart)
            .unwrap();
        TransitionBuilder::new(b, c).with_trigger("second").build(&mut chart).unwrap();

        chart.start().unwrap();
        chart.enqueue(Event::new("first"));
        assert_eq!(chart.drain_events(), Ok(true));
        assert!(chart.is_active("c"));
    }

    #[test]
    fn snapshot_reports_names_and_history() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();
        let initial = chart.add_initial(root).unwrap();
        let composite = chart.add_composite("composite", root).unwrap();
        let elsewhere = chart.add_state("elsewhere", root).unwrap();
        let composite_initial = chart.add_initial(composite).unwrap();
        chart.add_shallow_history(composite).unwrap();
        let inner = chart.add_state("inner", composite).unwrap();

        TransitionBuilder::new(initial, composite).build(&mut chart).unwrap();
        TransitionBuilder::new(composite_initial, inner).build(&mut chart).unwrap();
        TransitionBuilder::new(composite, elsewhere)
            .with_trigger("leave")
            .build(&mut chart)
            .unwrap();

        chart.start().unwrap();
        assert_eq!(
            chart.snapshot().active_states,
            vec!["chart", "composite", "inner"]
        );

        chart.dispatch(&Event::new("leave")).unwrap();
        let snapshot = chart.snapshot();
        assert_eq!(snapshot.active_states, vec!["chart", "elsewhere"]);
        assert_eq!(
            snapshot.history.get("composite"),
            Some(&"inner".to_owned())
        );
    }

    #[test]
    fn find_state_by_name_returns_first_match() {
        let mut chart = Statechart::new("chart", ());
        let root = chart.root();
        let idle = chart.add_state("idle", root).unwrap();
        chart.add_state("busy", root).unwrap();

        let (handle, state) = chart.find_state_by_name("idle").unwrap();
        assert_eq!(handle, idle);
        assert_eq!(state.name(), "idle");
        assert!(chart.find_state_by_name("missing").is_none());
    }
}
