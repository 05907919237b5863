//! Key input decoding and event delivery.

mod events;
mod tracker;

pub use events::{
    EventDispatcher, EventKind, ListenerOptions, Listeners, SubscriptionId, Throttle,
};
pub use tracker::{ButtonEvent, ButtonReport, ButtonStates, ButtonTracker};
