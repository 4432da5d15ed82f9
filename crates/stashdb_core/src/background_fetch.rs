//! Background fetch events and their UI updates.
//!
//! A [`BackgroundFetchEvent`] is *active* while its handler runs inside
//! [`dispatch`] and while any [`LifetimeExtension`] from
//! [`BackgroundFetchEvent::wait_until`] is alive. `update_ui` succeeds at
//! most once per event and only while the event is active.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Message of the error returned when the event is no longer active.
pub const INACTIVE_MESSAGE: &str = "ExtendableEvent is no longer active.";

/// Message of the error returned by a second `update_ui`.
pub const ALREADY_UPDATED_MESSAGE: &str = "updateUI may only be called once.";

/// Which outcome of a background fetch an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackgroundFetchEventKind {
    /// Every fetch completed.
    Success,
    /// At least one fetch failed.
    Fail,
    /// The fetch was aborted.
    Abort,
    /// The user clicked the download UI.
    Click,
}

impl BackgroundFetchEventKind {
    /// Returns the event type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "backgroundfetchsuccess",
            Self::Fail => "backgroundfetchfail",
            Self::Abort => "backgroundfetchabort",
            Self::Click => "backgroundfetchclick",
        }
    }

    /// Whether handlers of this event may call `update_ui`.
    #[must_use]
    pub fn allows_ui_update(&self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

/// The registration a background fetch event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundFetchRegistration {
    /// Developer-chosen registration ID.
    pub id: String,
    /// Total bytes expected, 0 if unknown.
    pub download_total: u64,
    /// Bytes downloaded so far.
    pub downloaded: u64,
}

impl BackgroundFetchRegistration {
    /// Creates a registration with unknown totals.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            download_total: 0,
            downloaded: 0,
        }
    }
}

/// An icon shown by the download UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageResource {
    /// Image URL.
    pub src: String,
    /// Space-separated sizes, e.g. `"48x48 96x96"`.
    pub sizes: Option<String>,
    /// MIME type.
    pub mime_type: Option<String>,
}

/// New contents for the download UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UiOptions {
    /// Title text.
    pub title: Option<String>,
    /// Icons, in preference order.
    pub icons: Vec<ImageResource>,
}

impl UiOptions {
    /// Options that only change the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            icons: Vec::new(),
        }
    }
}

/// Receives accepted UI updates.
pub trait UiPresenter: Send + Sync {
    /// Shows `options` for the registration `registration_id`.
    fn present(&self, registration_id: &str, options: &UiOptions);
}

struct EventState {
    dispatching: bool,
    extensions: usize,
    ui_updated: bool,
}

struct EventInner {
    kind: BackgroundFetchEventKind,
    registration: BackgroundFetchRegistration,
    presenter: Option<Arc<dyn UiPresenter>>,
    state: Mutex<EventState>,
}

/// A background fetch event as seen by its handler.
///
/// Clones share state, so a clone moved into a timer still observes
/// whether the event is active.
#[derive(Clone)]
pub struct BackgroundFetchEvent {
    inner: Arc<EventInner>,
}

impl BackgroundFetchEvent {
    /// Creates an event for `registration`.
    #[must_use]
    pub fn new(kind: BackgroundFetchEventKind, registration: BackgroundFetchRegistration) -> Self {
        Self::with_presenter(kind, registration, None)
    }

    /// Creates an event whose accepted UI updates go to `presenter`.
    #[must_use]
    pub fn with_presenter(
        kind: BackgroundFetchEventKind,
        registration: BackgroundFetchRegistration,
        presenter: Option<Arc<dyn UiPresenter>>,
    ) -> Self {
        Self {
            inner: Arc::new(EventInner {
                kind,
                registration,
                presenter,
                state: Mutex::new(EventState {
                    dispatching: false,
                    extensions: 0,
                    ui_updated: false,
                }),
            }),
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> BackgroundFetchEventKind {
        self.inner.kind
    }

    /// Returns the event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.inner.kind.as_str()
    }

    /// Returns the registration.
    #[must_use]
    pub fn registration(&self) -> &BackgroundFetchRegistration {
        &self.inner.registration
    }

    /// Returns true while the handler runs or a lifetime extension is alive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let state = self.inner.state.lock();
        state.dispatching || state.extensions > 0
    }

    /// Extends the event's lifetime until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the event is no longer active.
    pub fn wait_until(&self) -> CoreResult<LifetimeExtension> {
        let mut state = self.inner.state.lock();
        if !(state.dispatching || state.extensions > 0) {
            return Err(CoreError::invalid_state(INACTIVE_MESSAGE));
        }
        state.extensions += 1;
        Ok(LifetimeExtension {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Replaces the download UI's title and icons.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` with [`INACTIVE_MESSAGE`] if the event is no
    ///   longer active (checked first)
    /// - `InvalidStateError` with [`ALREADY_UPDATED_MESSAGE`] on a second call
    /// - `TypeError` for event kinds without a download UI
    pub fn update_ui(&self, options: UiOptions) -> CoreResult<()> {
        {
            let mut state = self.inner.state.lock();
            if !(state.dispatching || state.extensions > 0) {
                return Err(CoreError::invalid_state(INACTIVE_MESSAGE));
            }
            if state.ui_updated {
                return Err(CoreError::invalid_state(ALREADY_UPDATED_MESSAGE));
            }
            if !self.inner.kind.allows_ui_update() {
                return Err(CoreError::dom(
                    crate::error::ErrorKind::Type,
                    format!("{} events cannot update the UI", self.event_type()),
                ));
            }
            state.ui_updated = true;
        }
        debug!(
            registration = %self.inner.registration.id,
            title = ?options.title,
            icons = options.icons.len(),
            "background fetch UI updated"
        );
        if let Some(presenter) = &self.inner.presenter {
            presenter.present(&self.inner.registration.id, &options);
        }
        Ok(())
    }
}

impl std::fmt::Debug for BackgroundFetchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundFetchEvent")
            .field("type", &self.event_type())
            .field("registration", &self.inner.registration.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Keeps a [`BackgroundFetchEvent`] active while alive.
#[must_use = "the event becomes inactive once this guard is dropped"]
pub struct LifetimeExtension {
    inner: Arc<EventInner>,
}

impl Drop for LifetimeExtension {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.extensions = state.extensions.saturating_sub(1);
    }
}

impl std::fmt::Debug for LifetimeExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeExtension")
            .field("registration", &self.inner.registration.id)
            .finish()
    }
}

/// Runs `handler` with `event` active. The event stays active afterwards
/// only while lifetime extensions taken by the handler are alive.
pub fn dispatch<R>(event: &BackgroundFetchEvent, handler: impl FnOnce(&BackgroundFetchEvent) -> R) -> R {
    event.inner.state.lock().dispatching = true;
    let result = handler(event);
    event.inner.state.lock().dispatching = false;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<(String, UiOptions)>>);

    impl UiPresenter for Recorder {
        fn present(&self, registration_id: &str, options: &UiOptions) {
            self.0
                .lock()
                .push((registration_id.to_string(), options.clone()));
        }
    }

    fn success(id: &str) -> BackgroundFetchEvent {
        BackgroundFetchEvent::new(
            BackgroundFetchEventKind::Success,
            BackgroundFetchRegistration::new(id),
        )
    }

    fn message(result: CoreResult<()>) -> String {
        match result {
            Ok(()) => "ok".into(),
            Err(CoreError::Dom(e)) => e.message,
            Err(other) => other.to_string(),
        }
    }

    #[test]
    fn update_during_dispatch_is_presented() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let event = BackgroundFetchEvent::with_presenter(
            BackgroundFetchEventKind::Success,
            BackgroundFetchRegistration::new("update-once"),
            Some(recorder.clone() as Arc<dyn UiPresenter>),
        );
        dispatch(&event, |e| e.update_ui(UiOptions::title("Title1"))).unwrap();

        let shown = recorder.0.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].0, "update-once");
        assert_eq!(shown[0].1.title.as_deref(), Some("Title1"));
    }

    #[test]
    fn second_update_fails() {
        let event = success("update-twice");
        let results = dispatch(&event, |e| {
            [
                e.update_ui(UiOptions::title("Title1")),
                e.update_ui(UiOptions::title("Title2")),
            ]
        });
        let [first, second] = results;
        assert!(first.is_ok());
        assert_eq!(message(second), ALREADY_UPDATED_MESSAGE);
    }

    #[test]
    fn update_after_dispatch_fails() {
        let event = success("update-inactive");
        dispatch(&event, |_| ());
        assert!(!event.is_active());
        assert_eq!(message(event.update_ui(UiOptions::title("New title"))), INACTIVE_MESSAGE);
    }

    #[test]
    fn inactive_check_comes_first() {
        let event = success("x");
        dispatch(&event, |e| e.update_ui(UiOptions::title("a"))).unwrap();
        assert_eq!(message(event.update_ui(UiOptions::title("b"))), INACTIVE_MESSAGE);
    }

    #[test]
    fn wait_until_keeps_the_event_active() {
        let event = success("extended");
        let guard = dispatch(&event, BackgroundFetchEvent::wait_until).unwrap();
        assert!(event.is_active());
        event.update_ui(UiOptions::title("late")).unwrap();
        drop(guard);
        assert!(!event.is_active());
        assert!(event.wait_until().is_err());
    }

    #[test]
    fn abort_events_have_no_ui() {
        let event = BackgroundFetchEvent::new(
            BackgroundFetchEventKind::Abort,
            BackgroundFetchRegistration::new("gone"),
        );
        let result = dispatch(&event, |e| e.update_ui(UiOptions::default()));
        assert!(matches!(result, Err(e) if e.kind() == crate::error::ErrorKind::Type));
    }
}
