//! One-shot callbacks fired by future inbound frames.
//!
//! A trigger pairs a predicate over named frame fields with a callback. The
//! first inbound frame matching every field consumes the trigger: it is
//! removed from the registry before the callback runs, so a callback may
//! register a new trigger under the same name.

use insteon_protocol::{Field, PlmCommand, PlmMessage};
use std::time::Instant;

/// Required field values of a matching frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramePredicate {
    command: Option<PlmCommand>,
    fields: Vec<(Field, u8)>,
}

impl FramePredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: PlmCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn field(mut self, field: Field, value: u8) -> Self {
        self.fields.push((field, value));
        self
    }

    pub fn matches(&self, msg: &PlmMessage) -> bool {
        if self.command.is_some_and(|c| c != msg.command()) {
            return false;
        }
        self.fields
            .iter()
            .all(|(field, value)| msg.get(*field) == Some(*value))
    }
}

/// Callback run with the context that owns the registry.
pub type TriggerCallback<C> = Box<dyn FnOnce(&mut C, &PlmMessage, Instant) + Send>;

struct Trigger<C> {
    name: String,
    predicate: FramePredicate,
    expires_at: Option<Instant>,
    callback: TriggerCallback<C>,
}

/// Registry of named triggers.
pub struct TriggerManager<C> {
    triggers: Vec<Trigger<C>>,
}

impl<C> TriggerManager<C> {
    pub fn new() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }

    /// Registers a trigger, replacing any trigger with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        predicate: FramePredicate,
        expires_at: Option<Instant>,
        callback: TriggerCallback<C>,
    ) {
        let name = name.into();
        self.triggers.retain(|t| t.name != name);
        self.triggers.push(Trigger {
            name,
            predicate,
            expires_at,
            callback,
        });
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.name != name);
        before != self.triggers.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.triggers.iter().any(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Removes and returns the callbacks of every trigger matching `msg`.
    pub fn take_matching(&mut self, msg: &PlmMessage) -> Vec<(String, TriggerCallback<C>)> {
        let mut fired = Vec::new();
        let mut kept = Vec::with_capacity(self.triggers.len());
        for trigger in self.triggers.drain(..) {
            if trigger.predicate.matches(msg) {
                fired.push((trigger.name, trigger.callback));
            } else {
                kept.push(trigger);
            }
        }
        self.triggers = kept;
        fired
    }

    /// Drops triggers whose deadline passed and returns their names.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        self.triggers.retain(|t| match t.expires_at {
            Some(deadline) if deadline <= now => {
                expired.push(t.name.clone());
                false
            }
            _ => true,
        });
        expired
    }
}

impl<C> Default for TriggerManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs every trigger of `manager` that matches `msg` against `ctx`.
///
/// `manager` is reached through `ctx` so callbacks can register follow-up
/// triggers.
pub fn fire<C>(
    ctx: &mut C,
    manager: fn(&mut C) -> &mut TriggerManager<C>,
    msg: &PlmMessage,
    now: Instant,
) -> usize {
    let fired = manager(ctx).take_matching(msg);
    let count = fired.len();
    for (name, callback) in fired {
        tracing::debug!("Trigger '{}' fired by {}", name, msg.to_hex());
        callback(ctx, msg, now);
    }
    count
}
