//! Backend Module
//!
//! The location device is split into two capabilities: [`LocationBackend`]
//! receives commands, [`LocationEvents`] receives what the device reports.
//! The tracker registers itself as the event sink of the backend it owns.
//!
//! # Backend contract
//!
//! - The backend services a single one-shot request at a time. Calling
//!   [`LocationBackend::request_one_shot`] while one is outstanding silently
//!   cancels the earlier one, and results carry no request identity.
//! - Starting continuous location updates drops any outstanding one-shot
//!   request.
//! - Prompt requests resolve asynchronously: the decision is reported through
//!   [`LocationEvents::authorization_changed`], possibly before the prompt call
//!   returns.

use std::sync::Weak;

use crate::error::ErrorDetail;
use crate::location::{AuthorizationStatus, Heading, Location, PushToken};

/// Completion for push-based monitoring registration.
pub type PushTokenHandler = Box<dyn FnOnce(Result<PushToken, ErrorDetail>) + Send + 'static>;

/// Commands understood by the location device.
pub trait LocationBackend: Send + Sync {
    /// Install the sink that receives this backend's reports.
    fn set_event_sink(&self, sink: Weak<dyn LocationEvents>);

    fn authorization_status(&self) -> AuthorizationStatus;

    fn last_location(&self) -> Option<Location>;

    fn last_heading(&self) -> Option<Heading>;

    /// Accuracy in meters the device should aim for.
    fn desired_accuracy(&self) -> f64;

    fn set_desired_accuracy(&self, meters: f64);

    /// Ask for a single fix. Cancels any outstanding one-shot request.
    fn request_one_shot(&self);

    fn start_location_updates(&self);

    fn stop_location_updates(&self);

    fn start_heading_updates(&self);

    fn stop_heading_updates(&self);

    fn start_location_push_monitoring(&self, on_token: PushTokenHandler);

    fn stop_location_push_monitoring(&self);

    /// Show the coarse ("when in use") permission prompt.
    fn request_when_in_use_authorization(&self);

    /// Show the elevated ("always") permission prompt.
    fn request_always_authorization(&self);
}

/// Reports delivered by the location device.
pub trait LocationEvents: Send + Sync {
    fn locations_updated(&self, locations: Vec<Location>);

    fn location_failed(&self, error: ErrorDetail);

    fn heading_updated(&self, heading: Heading);

    fn authorization_changed(&self);
}
