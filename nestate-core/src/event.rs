//! Event identifiers routed through a machine.

use std::fmt;

/// An event delivered to state handlers.
///
/// Events are plain `u32` values wrapped for type safety. Values `0x00`
/// through `0x0f` are reserved for the engine; caller-defined events start
/// at [`Event::USER`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(pub u32);

impl Event {
    /// The null event. Returned by a handler to mark an event consumed;
    /// never dispatched.
    pub const NONE: Event = Event(0x00);
    /// Delivered to a state's handler when the state is entered.
    pub const ENTRY: Event = Event(0x01);
    /// Delivered to a state's handler when the state is exited.
    pub const EXIT: Event = Event(0x02);
    /// First caller-defined event value.
    pub const USER: Event = Event(0x10);

    /// The n-th caller-defined event, `USER + n`.
    pub const fn user(n: u32) -> Event {
        Event(Event::USER.0 + n)
    }

    /// True for the null event.
    pub const fn is_none(self) -> bool {
        self.0 == Event::NONE.0
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Event::NONE => f.write_str("NONE"),
            Event::ENTRY => f.write_str("ENTRY"),
            Event::EXIT => f.write_str("EXIT"),
            Event(raw) if raw >= Event::USER.0 => write!(f, "USER+{}", raw - Event::USER.0),
            Event(raw) => write!(f, "Event({raw:#04x})"),
        }
    }
}
