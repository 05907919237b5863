//! Typed event subscriptions with optional throttling.
//!
//! Throttling is driven by the caller's clock: [`EventDispatcher::dispatch`]
//! and [`EventDispatcher::flush_due`] take the current instant, and trailing
//! calls only fire once `flush_due` (or a later dispatch) observes that their
//! window has elapsed.

use std::time::{Duration, Instant};
use tracing::debug;

use super::tracker::{ButtonEvent, ButtonReport, ButtonStates};
use crate::buttons::check_button;
use crate::Result;

/// Default throttle window for listeners.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(100);

/// Kind of event a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A key went down.
    Pressed,
    /// A key came up.
    Released,
    /// Full state after every key report.
    State,
}

/// Handle returned by every subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Rate limit applied to a single listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    /// Minimum time between two calls.
    pub window: Duration,
    /// Call immediately on the first event of a window.
    pub leading: bool,
    /// Call with the last coalesced event once the window has elapsed.
    pub trailing: bool,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            window: DEFAULT_THROTTLE_WINDOW,
            leading: true,
            trailing: false,
        }
    }
}

/// Options for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Throttle to apply, or `None` to receive every event.
    pub throttle: Option<Throttle>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            throttle: Some(Throttle::default()),
        }
    }
}

impl ListenerOptions {
    /// Every event is delivered.
    pub fn unthrottled() -> Self {
        Self { throttle: None }
    }

    /// Events are rate limited by `throttle`.
    pub fn throttled(throttle: Throttle) -> Self {
        Self {
            throttle: Some(throttle),
        }
    }
}

/// Leading/trailing edge coalescing state for one listener.
struct Gate<T> {
    throttle: Throttle,
    window_end: Option<Instant>,
    pending: Option<T>,
}

impl<T> Gate<T> {
    fn new(throttle: Throttle) -> Self {
        Self {
            throttle,
            window_end: None,
            pending: None,
        }
    }

    /// Offers an event; returns it if the listener should be called now.
    fn offer(&mut self, now: Instant, value: T) -> Option<T> {
        match self.window_end {
            Some(end) if now < end => {
                if self.throttle.trailing {
                    self.pending = Some(value);
                }
                None
            }
            _ => {
                self.window_end = Some(now + self.throttle.window);
                if self.throttle.leading {
                    Some(value)
                } else {
                    if self.throttle.trailing {
                        self.pending = Some(value);
                    }
                    None
                }
            }
        }
    }

    /// Returns the coalesced event once its window has elapsed.
    fn due(&mut self, now: Instant) -> Option<T> {
        let end = self.window_end?;
        if now < end {
            return None;
        }
        match self.pending.take() {
            Some(value) => {
                // A trailing call opens a new window
                self.window_end = Some(now + self.throttle.window);
                Some(value)
            }
            None => {
                self.window_end = None;
                None
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and(self.window_end)
    }
}

struct Listener<T> {
    id: SubscriptionId,
    /// Only deliver events for this logical button.
    button: Option<u8>,
    handler: Box<dyn FnMut(T) + Send>,
    gate: Option<Gate<T>>,
}

impl<T: Copy> Listener<T> {
    fn deliver(&mut self, now: Instant, value: T) {
        self.flush(now);
        let value = match self.gate.as_mut() {
            Some(gate) => gate.offer(now, value),
            None => Some(value),
        };
        if let Some(value) = value {
            (self.handler)(value);
        }
    }

    fn flush(&mut self, now: Instant) {
        if let Some(value) = self.gate.as_mut().and_then(|gate| gate.due(now)) {
            (self.handler)(value);
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.gate.as_ref().and_then(Gate::deadline)
    }
}

/// Listeners of every event kind, in subscription order.
#[derive(Default)]
pub struct Listeners {
    pressed: Vec<Listener<u8>>,
    released: Vec<Listener<u8>>,
    state: Vec<Listener<ButtonStates>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("pressed", &self.pressed.len())
            .field("released", &self.released.len())
            .field("state", &self.state.len())
            .finish()
    }
}

impl Listeners {
    /// Delivers the transitions of a report, then its state snapshot.
    pub fn dispatch(&mut self, now: Instant, report: &ButtonReport) {
        for event in &report.transitions {
            let (listeners, button) = match *event {
                ButtonEvent::Pressed(button) => (&mut self.pressed, button),
                ButtonEvent::Released(button) => (&mut self.released, button),
            };
            for listener in listeners.iter_mut() {
                if listener.button.map_or(true, |b| b == button) {
                    listener.deliver(now, button);
                }
            }
        }

        for listener in self.state.iter_mut() {
            listener.deliver(now, report.state);
        }
    }

    /// Fires trailing calls whose window has elapsed.
    pub fn flush_due(&mut self, now: Instant) {
        self.pressed.iter_mut().for_each(|l| l.flush(now));
        self.released.iter_mut().for_each(|l| l.flush(now));
        self.state.iter_mut().for_each(|l| l.flush(now));
    }

    fn next_deadline(&self) -> Option<Instant> {
        let pressed = self.pressed.iter().filter_map(Listener::deadline);
        let released = self.released.iter().filter_map(Listener::deadline);
        let state = self.state.iter().filter_map(Listener::deadline);
        pressed.chain(released).chain(state).min()
    }

    fn count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Pressed => self.pressed.len(),
            EventKind::Released => self.released.len(),
            EventKind::State => self.state.len(),
        }
    }

    fn ids(&self) -> Vec<(SubscriptionId, EventKind)> {
        let pressed = self.pressed.iter().map(|l| (l.id, EventKind::Pressed));
        let released = self.released.iter().map(|l| (l.id, EventKind::Released));
        let state = self.state.iter().map(|l| (l.id, EventKind::State));
        pressed.chain(released).chain(state).collect()
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.pressed.len() + self.released.len() + self.state.len();
        self.pressed.retain(|l| l.id != id);
        self.released.retain(|l| l.id != id);
        self.state.retain(|l| l.id != id);
        self.pressed.len() + self.released.len() + self.state.len() != before
    }

    fn clear(&mut self) {
        self.pressed.clear();
        self.released.clear();
        self.state.clear();
    }

    fn append(&mut self, mut other: Listeners) {
        self.pressed.append(&mut other.pressed);
        self.released.append(&mut other.released);
        self.state.append(&mut other.state);
    }
}

/// Changes made while listeners were detached, applied on reattach.
#[derive(Debug, Default)]
struct Detached {
    ids: Vec<(SubscriptionId, EventKind)>,
    removed: Vec<SubscriptionId>,
    cleared: bool,
}

impl Detached {
    fn is_live(&self, id: SubscriptionId) -> bool {
        !self.cleared && !self.removed.contains(&id) && self.ids.iter().any(|(i, _)| *i == id)
    }

    fn live_count(&self, kind: EventKind) -> usize {
        if self.cleared {
            return 0;
        }
        self.ids
            .iter()
            .filter(|(id, k)| *k == kind && !self.removed.contains(id))
            .count()
    }
}

/// Registry of key event listeners.
///
/// Listeners can be [detached](EventDispatcher::detach) so they run without
/// the registry borrowed. Subscriptions made in the meantime are kept, and
/// removals are applied to the detached listeners when they are reattached.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    next_id: u64,
    listeners: Listeners,
    detached: Option<Detached>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn listener<T>(
        &mut self,
        button: Option<u8>,
        options: ListenerOptions,
        handler: Box<dyn FnMut(T) + Send>,
    ) -> Listener<T> {
        self.next_id += 1;
        Listener {
            id: SubscriptionId(self.next_id),
            button,
            handler,
            gate: options.throttle.map(Gate::new),
        }
    }

    /// Calls `handler` with the logical button whenever any key goes down.
    pub fn on_pressed<F>(&mut self, options: ListenerOptions, handler: F) -> SubscriptionId
    where
        F: FnMut(u8) + Send + 'static,
    {
        let listener = self.listener::<u8>(None, options, Box::new(handler));
        let id = listener.id;
        self.listeners.pressed.push(listener);
        id
    }

    /// Calls `handler` with the logical button whenever any key comes up.
    pub fn on_released<F>(&mut self, options: ListenerOptions, handler: F) -> SubscriptionId
    where
        F: FnMut(u8) + Send + 'static,
    {
        let listener = self.listener::<u8>(None, options, Box::new(handler));
        let id = listener.id;
        self.listeners.released.push(listener);
        id
    }

    /// Calls `handler` whenever `button` goes down.
    pub fn on_button_pressed<F>(
        &mut self,
        button: u8,
        options: ListenerOptions,
        mut handler: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut() + Send + 'static,
    {
        check_button(button)?;
        let callback: Box<dyn FnMut(u8) + Send> = Box::new(move |_: u8| handler());
        let listener = self.listener(Some(button), options, callback);
        let id = listener.id;
        self.listeners.pressed.push(listener);
        Ok(id)
    }

    /// Calls `handler` whenever `button` comes up.
    pub fn on_button_released<F>(
        &mut self,
        button: u8,
        options: ListenerOptions,
        mut handler: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut() + Send + 'static,
    {
        check_button(button)?;
        let callback: Box<dyn FnMut(u8) + Send> = Box::new(move |_: u8| handler());
        let listener = self.listener(Some(button), options, callback);
        let id = listener.id;
        self.listeners.released.push(listener);
        Ok(id)
    }

    /// Calls `handler` with the full key state after every key report.
    pub fn on_state<F>(&mut self, options: ListenerOptions, handler: F) -> SubscriptionId
    where
        F: FnMut(ButtonStates) + Send + 'static,
    {
        let listener = self.listener::<ButtonStates>(None, options, Box::new(handler));
        let id = listener.id;
        self.listeners.state.push(listener);
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if self.listeners.remove(id) {
            return true;
        }
        match self.detached.as_mut() {
            Some(detached) if detached.is_live(id) => {
                detached.removed.push(id);
                true
            }
            _ => false,
        }
    }

    /// Removes every listener, including detached ones.
    pub fn clear(&mut self) {
        self.listeners.clear();
        if let Some(detached) = self.detached.as_mut() {
            detached.cleared = true;
        }
        debug!("All button listeners removed");
    }

    /// Number of listeners for an event kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        let detached = self.detached.as_ref().map_or(0, |d| d.live_count(kind));
        self.listeners.count(kind) + detached
    }

    /// Takes the listeners out for delivery.
    ///
    /// They must be handed back with [`reattach`](Self::reattach) before the
    /// next detach.
    pub fn detach(&mut self) -> Listeners {
        let listeners = std::mem::take(&mut self.listeners);
        self.detached = Some(Detached {
            ids: listeners.ids(),
            ..Detached::default()
        });
        listeners
    }

    /// Returns detached listeners, dropping those removed in the meantime.
    ///
    /// Listeners subscribed while detached keep their place after the
    /// returned ones.
    pub fn reattach(&mut self, mut listeners: Listeners) {
        if let Some(detached) = self.detached.take() {
            if detached.cleared {
                listeners.clear();
            } else {
                for id in detached.removed {
                    listeners.remove(id);
                }
            }
        }
        listeners.append(std::mem::take(&mut self.listeners));
        self.listeners = listeners;
    }

    /// Delivers the transitions of a report, then its state snapshot.
    pub fn dispatch(&mut self, now: Instant, report: &ButtonReport) {
        self.listeners.dispatch(now, report);
    }

    /// Fires trailing calls whose window has elapsed.
    pub fn flush_due(&mut self, now: Instant) {
        self.listeners.flush_due(now);
    }

    /// Earliest instant at which a pending trailing call becomes due.
    ///
    /// Detached listeners are not considered.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.listeners.next_deadline()
    }
}
