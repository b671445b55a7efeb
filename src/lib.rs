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

//! UML-style hierarchical state machine (statechart) runtime.
//!
//! A statechart is a state machine whose states form a tree: *composite*
//! states nest other states with exactly one child active at a time,
//! *concurrent* states run several composite regions simultaneously, and
//! transient *pseudostates* (initial, choice, shallow history) route the
//! machine through the tree without ever staying active themselves. The
//! machine is assembled declaratively with the build-time API of
//! [`Statechart`] and then driven through [`Statechart::dispatch`], which
//! preserves the UML semantics for exit/entry ordering, completion events,
//! history restoration and guard evaluation.
//!
//! A small chart with a composite state looks like this:
//!
//! ```text
//!  root ─ initial
//!       │
//!       ├── *** working ********************
//!       │   *                              *
//!       │   *  initial ──> drafting        *
//!       │   *                 │ submit     *
//!       │   *                 v            *
//!       │   *              reviewing ──> final
//!       │   *                              *
//!       │   ********************************
//!       │                  │ (completion)
//!       └──────────────> done
//! ```
//!
//! ```rust
//! use statechart::{Event, Statechart, TransitionBuilder};
//!
//! let mut chart = Statechart::new("pipeline", ());
//! let root = chart.root();
//!
//! let initial = chart.add_initial(root).unwrap();
//! let working = chart.add_composite("working", root).unwrap();
//! let done = chart.add_state("done", root).unwrap();
//!
//! let working_initial = chart.add_initial(working).unwrap();
//! let drafting = chart.add_state("drafting", working).unwrap();
//! let reviewing = chart.add_state("reviewing", working).unwrap();
//! let finished = chart.add_final(working).unwrap();
//!
//! TransitionBuilder::new(initial, working).build(&mut chart).unwrap();
//! TransitionBuilder::new(working_initial, drafting).build(&mut chart).unwrap();
//! TransitionBuilder::new(drafting, reviewing)
//!     .with_trigger("submit")
//!     .build(&mut chart)
//!     .unwrap();
//! TransitionBuilder::new(reviewing, finished)
//!     .with_trigger("approve")
//!     .build(&mut chart)
//!     .unwrap();
//! // No trigger: fires on the completion event of `working`.
//! TransitionBuilder::new(working, done).build(&mut chart).unwrap();
//!
//! chart.start().unwrap();
//! chart.dispatch(&Event::new("submit")).unwrap();
//! chart.dispatch(&Event::new("approve")).unwrap();
//!
//! assert!(chart.is_active("done"));
//! ```
//!
//! The runtime is single-threaded and non-reentrant: callbacks never call
//! [`Statechart::dispatch`] themselves, they enqueue follow-up events through
//! [`Statechart::enqueue`] or a cloned [`Statechart::event_sender`].

#![warn(missing_docs)]

pub use fyrox_core as core;

pub use callback::{else_guard, ActionFn, GuardFn};
pub use chart::{ChartSnapshot, Statechart};
pub use error::ChartError;
pub use event::Event;
pub use state::{CompositeData, ConcurrentData, State, StateKind};
pub use transition::{Transition, TransitionBuilder, TransitionKind};

pub mod callback;
pub mod chart;
mod configuration;
pub mod error;
pub mod event;
pub mod state;
pub mod transition;
