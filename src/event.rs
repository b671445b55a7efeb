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

//! An event is a named occurrence that drives the statechart. See [`Event`] docs
//! for more info.

use fxhash::FxHashMap;
use std::{
    any::Any,
    fmt::{self, Display, Formatter},
};

/// A specification of a type of observable occurrence. The occurrence that
/// generates an event instance is assumed to take place at an instant in time
/// with no duration.
///
/// Two events match iff their names are equal; the payload does not take part in
/// matching. The payload is an open keyword map, so an event can carry arbitrary
/// data to guards and actions:
///
/// ```rust
/// use statechart::Event;
///
/// let event = Event::new("key_pressed").with_payload("code", 42u32);
///
/// assert_eq!(event, Event::new("key_pressed"));
/// assert_eq!(event.payload::<u32>("code"), Some(&42));
/// assert_eq!(event.payload::<u32>("missing"), None);
/// ```
pub struct Event {
    name: String,
    payload: FxHashMap<String, Box<dyn Any + Send>>,
}

impl Event {
    /// Creates a new event with the given name and an empty payload.
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self {
            name: name.as_ref().to_owned(),
            payload: FxHashMap::default(),
        }
    }

    /// Adds a keyword value to the payload of the event and returns the event,
    /// so the calls could be chained.
    pub fn with_payload<V: Any + Send>(mut self, key: impl Into<String>, value: V) -> Self {
        self.payload.insert(key.into(), Box::new(value));
        self
    }

    /// Returns the name of the event.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tries to fetch a payload value by its key, downcasting it to the
    /// requested type. Returns `None` if there is no such key or the stored
    /// value has a different type.
    pub fn payload<T: Any>(&self, key: &str) -> Option<&T> {
        self.payload.get(key).and_then(|v| v.downcast_ref())
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Event {}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Event: {}", self.name)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("payload_keys", &self.payload.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Self {
            name,
            payload: FxHashMap::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality_compares_names_only() {
        let plain = Event::new("tick");
        let with_payload = Event::new("tick").with_payload("count", 10usize);

        assert_eq!(plain, with_payload);
        assert_ne!(plain, Event::new("tock"));
    }

    #[test]
    fn payload_downcast() {
        let event = Event::new("measured")
            .with_payload("value", 3.5f32)
            .with_payload("unit", "m".to_string());

        assert_eq!(event.payload::<f32>("value"), Some(&3.5));
        assert_eq!(event.payload::<String>("unit"), Some(&"m".to_string()));
        assert_eq!(event.payload::<u32>("value"), None);
    }

    #[test]
    fn string_sugar() {
        let event: Event = "flick".into();
        assert_eq!(event.name(), "flick");
        assert_eq!(event, Event::new("flick"));
    }

    #[test]
    fn display() {
        assert_eq!(Event::new("started").to_string(), "Event: started");
    }
}
