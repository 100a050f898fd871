//! Tracker Module
//!
//! [`LocationTracker`] owns the backend handle and is the only component that
//! issues commands to it. It wires the request queue and the authorization
//! flow to the backend, and routes backend reports back to them.

use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, oneshot};

use crate::authorization::{AuthorizationFlow, AuthorizationHandler};
use crate::backend::{LocationBackend, LocationEvents, PushTokenHandler};
use crate::config::TrackerConfig;
use crate::error::{AuthorizationError, ErrorDetail, RequestError};
use crate::location::{AuthorizationStatus, Heading, Location};
use crate::logger::{Logger, TracingLogger};
use crate::requests::{Dispatch, LocationRequestHandler, QueueStats, RequestOptions, RequestQueue};
use crate::storage::{FileFlagStore, FlagStore};

const CALLER: &str = "LocationTracker";

/// Buffered notifications per subscriber before the slowest one lags.
const EVENT_CAPACITY: usize = 64;

/// Completion of [`LocationTracker::request_current_user_location`].
pub type CurrentLocationHandler = Box<dyn FnOnce(Option<Location>) + Send + 'static>;

/// Notifications published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    LocationsUpdated(Vec<Location>),
    Failed(ErrorDetail),
    AuthorizationChanged(AuthorizationStatus),
    HeadingUpdated(Heading),
}

/// Coordinates callers of a single location backend.
pub struct LocationTracker {
    backend: Arc<dyn LocationBackend>,
    requests: RequestQueue,
    authorization: Arc<AuthorizationFlow>,
    config: TrackerConfig,
    logger: Arc<dyn Logger>,
    events: broadcast::Sender<TrackerEvent>,
}

impl LocationTracker {
    /// Build a tracker and register it as the backend's event sink.
    pub fn new(
        backend: Arc<dyn LocationBackend>,
        flags: Arc<dyn FlagStore>,
        config: TrackerConfig,
        logger: Arc<dyn Logger>,
    ) -> Arc<Self> {
        let authorization = AuthorizationFlow::new(
            Arc::clone(&backend),
            flags,
            config.prompted_elevated_key.clone(),
            Arc::clone(&logger),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let tracker = Arc::new(Self {
            backend,
            requests: RequestQueue::new(),
            authorization,
            config,
            logger,
            events,
        });

        let sink: Weak<dyn LocationEvents> = Arc::downgrade(&tracker) as Weak<dyn LocationEvents>;
        tracker.backend.set_event_sink(sink);
        tracker
    }

    /// Tracker configured from the environment, with flags on disk and
    /// logging through `tracing`.
    pub fn from_env(backend: Arc<dyn LocationBackend>) -> Arc<Self> {
        let config = TrackerConfig::from_env();
        let flags = Arc::new(FileFlagStore::new(config.data_dir.clone()));
        Self::new(backend, flags, config, Arc::new(TracingLogger))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn authorization(&self) -> &Arc<AuthorizationFlow> {
        &self.authorization
    }

    /// Subscribe to location, heading, error and authorization notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    // Authorization

    pub fn authorization_status(&self) -> AuthorizationStatus {
        self.backend.authorization_status()
    }

    /// Request when-in-use access.
    pub fn request_when_in_use_authorization(&self, completion: AuthorizationHandler) {
        self.authorization.prompt_when_in_use(completion);
    }

    /// Request when-in-use access if needed, then always access.
    pub fn request_always_authorization(&self, completion: AuthorizationHandler) {
        self.authorization.prompt_elevated(completion);
    }

    pub async fn when_in_use_authorization(&self) -> Result<(), AuthorizationError> {
        let (tx, rx) = oneshot::channel();
        self.request_when_in_use_authorization(Box::new(move |result: Result<(), AuthorizationError>| {
            let _ = tx.send(result);
        }));
        rx.await.unwrap_or_else(|_| Err(abandoned_authorization()))
    }

    pub async fn always_authorization(&self) -> Result<(), AuthorizationError> {
        let (tx, rx) = oneshot::channel();
        self.request_always_authorization(Box::new(move |result: Result<(), AuthorizationError>| {
            let _ = tx.send(result);
        }));
        rx.await.unwrap_or_else(|_| Err(abandoned_authorization()))
    }

    // One-shot requests

    /// Ask for a single fix; `None` options use the configured defaults.
    ///
    /// Concurrent callers share one backend request. Without a completion
    /// only the backend's desired accuracy is updated.
    pub fn request_location(
        &self,
        options: Option<RequestOptions>,
        completion: Option<LocationRequestHandler>,
    ) {
        let options = options.unwrap_or(self.config.default_options);
        self.backend.set_desired_accuracy(options.stop_at_accuracy);

        if self.requests.request_one(options, completion) == Dispatch::Trigger {
            self.backend.request_one_shot();
        }
    }

    pub async fn locate(&self, options: RequestOptions) -> Result<Vec<Location>, RequestError> {
        let (tx, rx) = oneshot::channel();
        self.request_location(
            Some(options),
            Some(Box::new(move |result: Result<Vec<Location>, RequestError>| {
                let _ = tx.send(result);
            })),
        );
        rx.await.unwrap_or_else(|_| {
            Err(RequestError::Backend(ErrorDetail::new(
                "LocationTracker.locate",
                2,
                "request dropped before completion",
            )))
        })
    }

    /// Most recent fix at `accuracy`, only with always access.
    ///
    /// Yields `None` without always access or when the backend fails.
    pub fn request_current_user_location(&self, accuracy: f64, completion: CurrentLocationHandler) {
        if self.authorization_status() != AuthorizationStatus::Always {
            completion(None);
            return;
        }

        let logger = Arc::clone(&self.logger);
        self.request_location(
            Some(RequestOptions::new(accuracy)),
            Some(Box::new(move |result: Result<Vec<Location>, RequestError>| match result {
                Ok(locations) => completion(locations.into_iter().last()),
                Err(e) => {
                    logger.error(CALLER, &format!("request location error: {}", e));
                    completion(None);
                }
            })),
        );
    }

    pub async fn current_user_location(&self, accuracy: f64) -> Option<Location> {
        let (tx, rx) = oneshot::channel();
        self.request_current_user_location(
            accuracy,
            Box::new(move |location: Option<Location>| {
                let _ = tx.send(location);
            }),
        );
        rx.await.ok().flatten()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn request_stats(&self) -> QueueStats {
        self.requests.stats()
    }

    // Last known values

    /// Last fix, unless the backend only has the (0, 0) placeholder.
    pub fn last_known_location(&self) -> Option<Location> {
        self.backend.last_location().filter(|location| !location.is_origin())
    }

    pub fn last_known_heading(&self) -> Option<Heading> {
        self.backend.last_heading()
    }

    // Continuous monitoring

    /// Start streaming. Pending one-shot requests fail with
    /// [`RequestError::ContinuousMonitoring`] since the backend drops them.
    pub fn start_monitoring_location(&self, monitor_heading: bool) {
        let superseded = self.requests.fail_all(RequestError::ContinuousMonitoring);
        if superseded > 0 {
            self.logger.debug(
                CALLER,
                &format!("continuous monitoring superseded {} one-shot requests", superseded),
            );
        }

        self.backend.start_location_updates();
        if monitor_heading {
            self.backend.start_heading_updates();
        }
    }

    pub fn stop_monitoring_location_and_heading(&self) {
        self.backend.stop_location_updates();
        self.backend.stop_heading_updates();
    }

    pub fn start_updating_heading(&self) {
        self.backend.start_heading_updates();
    }

    pub fn stop_updating_heading(&self) {
        self.backend.stop_heading_updates();
    }

    // Push monitoring

    pub fn start_monitoring_location_pushes(&self, on_token: PushTokenHandler) {
        self.logger.debug(CALLER, "start monitoring location pushes");
        self.backend.start_location_push_monitoring(on_token);
    }

    pub fn stop_monitoring_location_pushes(&self) {
        self.backend.stop_location_push_monitoring();
    }

    fn publish(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl LocationEvents for LocationTracker {
    fn locations_updated(&self, locations: Vec<Location>) {
        let resolved = self.requests.complete_all(&locations);
        if resolved > 0 {
            self.logger
                .debug(CALLER, &format!("resolved {} one-shot requests", resolved));
        }
        self.publish(TrackerEvent::LocationsUpdated(locations));
    }

    fn location_failed(&self, error: ErrorDetail) {
        let failed = self.requests.fail_all(RequestError::Backend(error.clone()));
        self.logger.error(
            CALLER,
            &format!("backend error {} (failed {} one-shot requests)", error, failed),
        );
        self.publish(TrackerEvent::Failed(error));
    }

    fn heading_updated(&self, heading: Heading) {
        self.publish(TrackerEvent::HeadingUpdated(heading));
    }

    fn authorization_changed(&self) {
        // Published first: a resumed step may prompt again and report the next
        // change before this call returns.
        self.publish(TrackerEvent::AuthorizationChanged(self.authorization_status()));
        self.authorization.authorization_did_change();
    }
}

fn abandoned_authorization() -> AuthorizationError {
    AuthorizationError::Unexpected(ErrorDetail::new(
        "LocationTracker.authorization",
        2,
        "authorization flow dropped before deciding",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoOpLogger;
    use crate::storage::MemoryFlagStore;
    use crate::testing::{unique_flag_key, MockLocationBackend};

    fn tracker_with(backend: &Arc<MockLocationBackend>) -> Arc<LocationTracker> {
        LocationTracker::new(
            backend.clone(),
            Arc::new(MemoryFlagStore::new()),
            TrackerConfig::default().with_prompted_elevated_key(unique_flag_key()),
            Arc::new(NoOpLogger),
        )
    }

    #[test]
    fn request_location_sets_desired_accuracy() {
        let backend = MockLocationBackend::with_status(AuthorizationStatus::Always);
        let tracker = tracker_with(&backend);

        tracker.request_location(Some(RequestOptions::HUNDRED_METERS), None);
        assert_eq!(backend.desired_accuracy(), 100.0);
        assert_eq!(backend.one_shot_requests(), 0);

        tracker.request_location(None, Some(Box::new(|_: Result<Vec<Location>, RequestError>| {})));
        assert_eq!(backend.desired_accuracy(), 10.0);
        assert_eq!(backend.one_shot_requests(), 1);
    }

    #[test]
    fn last_known_location_hides_origin_placeholder() {
        let backend = MockLocationBackend::with_status(AuthorizationStatus::Always);
        let tracker = tracker_with(&backend);

        assert_eq!(tracker.last_known_location(), None);
        backend.set_location(Some(Location::new(0.0, 0.0, 5.0)));
        assert_eq!(tracker.last_known_location(), None);

        let fix = Location::new(45.5, -73.6, 5.0);
        backend.set_location(Some(fix.clone()));
        assert_eq!(tracker.last_known_location(), Some(fix));
    }

    #[test]
    fn stop_monitoring_leaves_queue_alone() {
        let backend = MockLocationBackend::with_status(AuthorizationStatus::Always);
        let tracker = tracker_with(&backend);

        tracker.start_monitoring_location(true);
        tracker.request_location(None, Some(Box::new(|_: Result<Vec<Location>, RequestError>| {})));
        tracker.stop_monitoring_location_and_heading();

        assert_eq!(tracker.pending_requests(), 1);
        assert!(!backend.is_updating_location());
        assert!(!backend.is_updating_heading());
    }

    #[test]
    fn dropped_tracker_stops_receiving_reports() {
        let backend = MockLocationBackend::with_status(AuthorizationStatus::Always);
        let tracker = tracker_with(&backend);
        drop(tracker);

        backend.deliver_locations(vec![Location::new(1.0, 1.0, 1.0)]);
        backend.notify_authorization_changed();
    }
}
