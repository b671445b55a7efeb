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

//! User callbacks threaded through the statechart: guards and actions.

use crate::event::Event;

/// A guard is a boolean predicate attached to a transition as a fine-grained
/// control over its firing. It is evaluated when an event instance is
/// dispatched; if it returns `true` at that time the transition is enabled,
/// otherwise it is disabled.
///
/// Guards receive the dispatched event (`None` stands for the "no event"
/// sentinel used by default and completion transitions) and a shared borrow of
/// the user context, so they cannot mutate it - guards are expected to be pure.
pub type GuardFn<C> = Box<dyn Fn(Option<&Event>, &C) -> bool>;

/// A side-effecting callback invoked exactly once per firing. The same shape is
/// used for transition actions and for state `entry`/`do`/`exit` actions.
///
/// Actions receive the event which led to the transition (`None` for default
/// and completion firings) and a mutable borrow of the user context.
pub type ActionFn<C> = Box<dyn Fn(Option<&Event>, &mut C)>;

/// Builds the `else` guard, which always passes. Conventionally used as the
/// last outgoing transition of a choice pseudostate to make the choice total.
pub fn else_guard<C>() -> GuardFn<C> {
    Box::new(|_, _| true)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn else_guard_always_passes() {
        let guard = else_guard::<()>();
        assert!(guard(None, &()));
        assert!(guard(Some(&Event::new("anything")), &()));
    }
}
