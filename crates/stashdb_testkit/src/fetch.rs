//! Background fetch event handler used by the `background-fetch` suite.
//!
//! The handler picks its `update_ui` calls from the registration ID:
//!
//! | registration      | behavior                                    |
//! |-------------------|---------------------------------------------|
//! | `update-once`     | one update inside `wait_until`              |
//! | `update-twice`    | two updates inside `wait_until`             |
//! | `update-inactive` | one update from a timer, after dispatch     |
//!
//! Outcomes are posted to an [`Outbox`] as `"update success"` or the error
//! message.

use parking_lot::Mutex;
use serde::Serialize;
use stashdb_core::{
    dispatch, BackgroundFetchEvent, BackgroundFetchEventKind, BackgroundFetchRegistration,
    CoreError, EventLoop, UiOptions,
};
use std::sync::Arc;
use std::time::Duration;

/// Message posted when every update succeeded.
pub const UPDATE_SUCCESS: &str = "update success";

/// A message from the handler to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchMessage {
    /// Event type that produced the message.
    pub event_type: String,
    /// `"update success"` or an error message.
    pub update: String,
}

/// Collects messages posted by the handler.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    messages: Arc<Mutex<Vec<FetchMessage>>>,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a message.
    pub fn post(&self, event_type: &str, update: impl Into<String>) {
        self.messages.lock().push(FetchMessage {
            event_type: event_type.to_string(),
            update: update.into(),
        });
    }

    /// Removes and returns every posted message.
    pub fn take(&self) -> Vec<FetchMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

fn message_of(error: &CoreError) -> String {
    match error {
        CoreError::Dom(e) => e.message.clone(),
        other => other.to_string(),
    }
}

fn update_params(registration_id: &str) -> Vec<UiOptions> {
    match registration_id {
        "update-once" => vec![UiOptions::title("Title1")],
        "update-twice" => vec![UiOptions::title("Title1"), UiOptions::title("Title2")],
        _ => Vec::new(),
    }
}

/// Handles a `backgroundfetchsuccess` event.
pub fn handle_success(event: &BackgroundFetchEvent, event_loop: &EventLoop, outbox: &Outbox) {
    let event_type = event.event_type();

    if event.registration().id == "update-inactive" {
        let late = event.clone();
        let outbox = outbox.clone();
        event_loop.set_timeout(Duration::from_millis(1), move || {
            if let Err(e) = late.update_ui(UiOptions::title("New title")) {
                outbox.post(event_type, message_of(&e));
            }
        });
        return;
    }

    let extension = match event.wait_until() {
        Ok(extension) => extension,
        Err(e) => {
            outbox.post(event_type, message_of(&e));
            return;
        }
    };
    let mut update = UPDATE_SUCCESS.to_string();
    for params in update_params(&event.registration().id) {
        if let Err(e) = event.update_ui(params) {
            update = message_of(&e);
            break;
        }
    }
    let outbox = outbox.clone();
    event_loop.queue_task(move || {
        outbox.post(event_type, update);
        drop(extension);
    });
}

/// Dispatches a success event for `registration_id`, runs the loop until
/// idle and returns the posted messages.
pub fn run_success_event(event_loop: &EventLoop, registration_id: &str) -> Vec<FetchMessage> {
    let outbox = Outbox::new();
    let event = BackgroundFetchEvent::new(
        BackgroundFetchEventKind::Success,
        BackgroundFetchRegistration::new(registration_id),
    );
    dispatch(&event, |event| handle_success(event, event_loop, &outbox));
    event_loop.run_until_idle();
    outbox.take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::{ALREADY_UPDATED_MESSAGE, INACTIVE_MESSAGE};

    fn update_for(id: &str) -> String {
        let event_loop = EventLoop::new(Duration::from_micros(100));
        let messages = run_success_event(&event_loop, id);
        assert_eq!(messages.len(), 1, "one message per event");
        assert_eq!(messages[0].event_type, "backgroundfetchsuccess");
        messages[0].update.clone()
    }

    #[test]
    fn registrations_select_the_outcome() {
        assert_eq!(update_for("update-once"), UPDATE_SUCCESS);
        assert_eq!(update_for("update-twice"), ALREADY_UPDATED_MESSAGE);
        assert_eq!(update_for("update-inactive"), INACTIVE_MESSAGE);
    }

    #[test]
    fn unknown_registration_updates_nothing() {
        assert_eq!(update_for("something-else"), UPDATE_SUCCESS);
    }
}
