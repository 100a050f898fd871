//! Location Tracker Library
//!
//! Coordinates access to one exclusive location backend on behalf of many
//! callers: one-shot requests are batched onto a single outstanding backend
//! request, and permission escalation runs as a resumable state machine.

pub mod authorization;
pub mod backend;
pub mod config;
pub mod error;
pub mod location;
pub mod logger;
pub mod logging;
pub mod requests;
pub mod storage;
pub mod synchronized;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;

pub use authorization::{AuthorizationFlow, AuthorizationHandler};
pub use backend::{LocationBackend, LocationEvents, PushTokenHandler};
pub use config::{LoggingConfig, TrackerConfig};
pub use error::{AuthorizationError, ErrorDetail, RequestError};
pub use location::{AuthorizationStatus, Heading, Location, PushToken};
pub use logger::{LogLevel, Logger, NoOpLogger, TracingLogger};
pub use requests::{LocationRequestHandler, RequestOptions};
pub use storage::{FileFlagStore, FlagStore, MemoryFlagStore};
pub use synchronized::Synchronized;
pub use tracker::{LocationTracker, TrackerEvent};
