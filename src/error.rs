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

//! Errors produced by the statechart, either while assembling an ill-formed model
//! or while driving it. See [`ChartError`] docs for more info.

use thiserror::Error;

/// Everything that can go wrong while building or running a statechart.
///
/// Model errors are raised by the build-time API and mean the model itself is
/// ill-formed; runtime errors are raised by [`crate::Statechart::start`],
/// [`crate::Statechart::dispatch`] and friends. An event that simply matches no
/// transition is *not* an error - dispatch returns `Ok(false)` for it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChartError {
    /// A state was created without a parent. Only the statechart root itself has
    /// no parent.
    #[error("a state must be created with a parent context")]
    MissingParent,

    /// A state or transition handle does not point into this chart.
    #[error("invalid state handle")]
    InvalidStateHandle,

    /// The requested parent is a leaf, final or pseudostate and cannot contain
    /// child states.
    #[error("state '{0}' cannot contain child states")]
    InvalidParent(String),

    /// Only composite states can become regions of a concurrent state.
    #[error("a concurrent state can only contain composite regions")]
    InvalidRegion,

    /// The composite already has an initial pseudostate.
    #[error("initial state already present in '{0}'")]
    DuplicateInitial(String),

    /// The composite already has a shallow-history pseudostate.
    #[error("history state already present in '{0}'")]
    DuplicateHistory(String),

    /// The statechart root cannot be the source of a transition.
    #[error("cannot add a transition from the statechart root")]
    TransitionFromRoot,

    /// Final states have no outgoing transitions.
    #[error("cannot add a transition from a final state")]
    TransitionFromFinal,

    /// Initial and shallow-history pseudostates hold exactly one outgoing
    /// transition.
    #[error("'{0}' supports a single outgoing transition")]
    MultipleDefaultTransitions(String),

    /// The single outgoing transition of an initial or shallow-history
    /// pseudostate fires unconditionally, so it cannot carry a trigger or a
    /// guard.
    #[error("the default transition of '{0}' cannot have a trigger or a guard")]
    TriggeredDefaultTransition(String),

    /// Internal transitions only make sense on states that can stay active.
    #[error("an internal transition requires a leaf, composite or concurrent state")]
    InvalidInternalSource,

    /// The statechart root carries no entry, do or exit actions.
    #[error("the statechart root cannot have entry, do or exit actions")]
    RootAction,

    /// Pseudostates are traversed within a single dispatch step and never run
    /// entry, do or exit actions.
    #[error("pseudostates cannot have entry, do or exit actions")]
    PseudostateAction,

    /// [`crate::Statechart::start`] was called on a chart that is already
    /// running.
    #[error("the state machine is already running")]
    AlreadyStarted,

    /// A runtime operation was attempted on a stopped chart.
    #[error("the state machine has not been started")]
    NotStarted,

    /// A composite was entered (or the chart was started) without an initial
    /// pseudostate to cascade into.
    #[error("'{0}' has no initial state")]
    MissingInitial(String),

    /// An initial or shallow-history pseudostate was reached before its default
    /// transition was added.
    #[error("pseudostate '{0}' has no outgoing transition")]
    MissingDefaultTransition(String),

    /// A choice pseudostate was entered but none of its outgoing transitions
    /// passed its guard. Add an else branch to make a choice total.
    #[error("no outgoing transition of choice '{0}' is enabled")]
    NoEnabledBranch(String),

    /// An inactive state was asked to dispatch an event. This indicates a
    /// corrupted configuration and never happens through the public API.
    #[error("inactive state '{0}' cannot dispatch events")]
    InactiveDispatch(String),

    /// A state was activated while its parent was not active, which would break
    /// the configuration tree.
    #[error("cannot activate '{0}' while its parent is inactive")]
    ParentNotActive(String),
}
