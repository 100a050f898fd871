//! Test doubles.
//!
//! [`MockLocationBackend`] is a scripted location device: it records every
//! command, answers permission prompts with configured statuses and reports
//! back through whatever sink the tracker registered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{LocationBackend, LocationEvents, PushTokenHandler};
use crate::config::DEFAULT_PROMPTED_ELEVATED_KEY;
use crate::error::ErrorDetail;
use crate::location::{AuthorizationStatus, Heading, Location, PushToken};

static NEXT_KEY: AtomicU64 = AtomicU64::new(0);

/// A flag key no other instance in this process uses.
pub fn unique_flag_key() -> String {
    format!(
        "{}_{}_{}",
        DEFAULT_PROMPTED_ELEVATED_KEY,
        std::process::id(),
        NEXT_KEY.fetch_add(1, Ordering::Relaxed)
    )
}

struct MockState {
    status: AuthorizationStatus,
    location: Option<Location>,
    heading: Option<Heading>,
    desired_accuracy: f64,
    when_in_use_response: AuthorizationStatus,
    always_response: AuthorizationStatus,
    defer_decisions: bool,
    pending_decision: Option<AuthorizationStatus>,
    push_result: Result<PushToken, ErrorDetail>,
    one_shot_requests: usize,
    when_in_use_prompts: usize,
    always_prompts: usize,
    authorization_notifications: usize,
    updating_location: bool,
    updating_heading: bool,
    monitoring_pushes: bool,
}

/// Scripted [`LocationBackend`].
pub struct MockLocationBackend {
    state: Mutex<MockState>,
    sink: Mutex<Option<Weak<dyn LocationEvents>>>,
}

impl MockLocationBackend {
    /// Starts undetermined; both prompts answer `WhenInUse` immediately.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                status: AuthorizationStatus::NotDetermined,
                location: None,
                heading: None,
                desired_accuracy: 100.0,
                when_in_use_response: AuthorizationStatus::WhenInUse,
                always_response: AuthorizationStatus::WhenInUse,
                defer_decisions: false,
                pending_decision: None,
                push_result: Ok(PushToken::new(Vec::new())),
                one_shot_requests: 0,
                when_in_use_prompts: 0,
                always_prompts: 0,
                authorization_notifications: 0,
                updating_location: false,
                updating_heading: false,
                monitoring_pushes: false,
            }),
            sink: Mutex::new(None),
        }
    }

    pub fn with_status(status: AuthorizationStatus) -> Arc<Self> {
        let backend = Self::new();
        backend.set_authorization_status(status);
        Arc::new(backend)
    }

    pub fn set_authorization_status(&self, status: AuthorizationStatus) {
        self.state.lock().status = status;
    }

    /// Status the user "chooses" at the when-in-use prompt.
    pub fn set_when_in_use_response(&self, status: AuthorizationStatus) {
        self.state.lock().when_in_use_response = status;
    }

    /// Status the user "chooses" at the always prompt.
    pub fn set_always_response(&self, status: AuthorizationStatus) {
        self.state.lock().always_response = status;
    }

    /// When set, prompt decisions wait for [`deliver_authorization_decision`].
    ///
    /// [`deliver_authorization_decision`]: Self::deliver_authorization_decision
    pub fn set_defer_decisions(&self, defer: bool) {
        self.state.lock().defer_decisions = defer;
    }

    pub fn has_pending_decision(&self) -> bool {
        self.state.lock().pending_decision.is_some()
    }

    /// Apply a deferred prompt decision and notify. Returns false if none was pending.
    pub fn deliver_authorization_decision(&self) -> bool {
        let decision = self.state.lock().pending_decision.take();
        match decision {
            Some(status) => {
                self.set_authorization_status(status);
                self.notify_authorization_changed();
                true
            }
            None => false,
        }
    }

    pub fn set_location(&self, location: Option<Location>) {
        self.state.lock().location = location;
    }

    pub fn set_heading(&self, heading: Option<Heading>) {
        self.state.lock().heading = heading;
    }

    /// Token handed out by push monitoring, given as hex.
    pub fn set_push_token_hex(&self, hex: &str) {
        self.state.lock().push_result = Ok(PushToken::from_hex(hex));
    }

    pub fn set_push_error(&self, error: ErrorDetail) {
        self.state.lock().push_result = Err(error);
    }

    pub fn deliver_locations(&self, locations: Vec<Location>) {
        if let Some(sink) = self.sink() {
            sink.locations_updated(locations);
        }
    }

    pub fn deliver_error(&self, error: ErrorDetail) {
        if let Some(sink) = self.sink() {
            sink.location_failed(error);
        }
    }

    pub fn deliver_heading(&self, heading: Heading) {
        if let Some(sink) = self.sink() {
            sink.heading_updated(heading);
        }
    }

    pub fn notify_authorization_changed(&self) {
        self.state.lock().authorization_notifications += 1;
        if let Some(sink) = self.sink() {
            sink.authorization_changed();
        }
    }

    pub fn one_shot_requests(&self) -> usize {
        self.state.lock().one_shot_requests
    }

    pub fn when_in_use_prompts(&self) -> usize {
        self.state.lock().when_in_use_prompts
    }

    pub fn always_prompts(&self) -> usize {
        self.state.lock().always_prompts
    }

    /// Total system prompts shown.
    pub fn prompt_count(&self) -> usize {
        let state = self.state.lock();
        state.when_in_use_prompts + state.always_prompts
    }

    pub fn authorization_notifications(&self) -> usize {
        self.state.lock().authorization_notifications
    }

    pub fn is_updating_location(&self) -> bool {
        self.state.lock().updating_location
    }

    pub fn is_updating_heading(&self) -> bool {
        self.state.lock().updating_heading
    }

    pub fn is_monitoring_pushes(&self) -> bool {
        self.state.lock().monitoring_pushes
    }

    fn sink(&self) -> Option<Arc<dyn LocationEvents>> {
        self.sink.lock().as_ref().and_then(Weak::upgrade)
    }

    fn decide(&self, response: AuthorizationStatus) {
        {
            let mut state = self.state.lock();
            if state.defer_decisions {
                state.pending_decision = Some(response);
                return;
            }
            state.status = response;
        }
        self.notify_authorization_changed();
    }
}

impl Default for MockLocationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationBackend for MockLocationBackend {
    fn set_event_sink(&self, sink: Weak<dyn LocationEvents>) {
        *self.sink.lock() = Some(sink);
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.state.lock().status
    }

    fn last_location(&self) -> Option<Location> {
        self.state.lock().location.clone()
    }

    fn last_heading(&self) -> Option<Heading> {
        self.state.lock().heading.clone()
    }

    fn desired_accuracy(&self) -> f64 {
        self.state.lock().desired_accuracy
    }

    fn set_desired_accuracy(&self, meters: f64) {
        self.state.lock().desired_accuracy = meters;
    }

    fn request_one_shot(&self) {
        self.state.lock().one_shot_requests += 1;
    }

    fn start_location_updates(&self) {
        self.state.lock().updating_location = true;
    }

    fn stop_location_updates(&self) {
        self.state.lock().updating_location = false;
    }

    fn start_heading_updates(&self) {
        self.state.lock().updating_heading = true;
    }

    fn stop_heading_updates(&self) {
        self.state.lock().updating_heading = false;
    }

    fn start_location_push_monitoring(&self, on_token: PushTokenHandler) {
        let result = {
            let mut state = self.state.lock();
            state.monitoring_pushes = true;
            state.push_result.clone()
        };
        on_token(result);
    }

    fn stop_location_push_monitoring(&self) {
        self.state.lock().monitoring_pushes = false;
    }

    fn request_when_in_use_authorization(&self) {
        let response = {
            let mut state = self.state.lock();
            state.when_in_use_prompts += 1;
            state.when_in_use_response
        };
        self.decide(response);
    }

    fn request_always_authorization(&self) {
        let response = {
            let mut state = self.state.lock();
            state.always_prompts += 1;
            state.always_response
        };
        self.decide(response);
    }
}
