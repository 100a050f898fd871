//! Logging sink abstraction.
//!
//! Components report through an injected [`Logger`] so hosts decide where
//! messages end up. [`TracingLogger`] forwards to `tracing`; closures with the
//! signature `Fn(&str, LogLevel, &str)` are loggers too, which is what tests
//! use to capture output.
//!
//! Logging is advisory. A sink must never block and never fail.

/// Severity of a sink message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Fire-and-forget logging sink.
pub trait Logger: Send + Sync {
    /// `caller` names the component that emitted the message.
    fn log(&self, caller: &str, level: LogLevel, message: &str);

    fn debug(&self, caller: &str, message: &str) {
        self.log(caller, LogLevel::Debug, message);
    }

    fn error(&self, caller: &str, message: &str) {
        self.log(caller, LogLevel::Error, message);
    }
}

impl<F> Logger for F
where
    F: Fn(&str, LogLevel, &str) + Send + Sync,
{
    fn log(&self, caller: &str, level: LogLevel, message: &str) {
        self(caller, level, message)
    }
}

/// Forwards sink messages to the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, caller: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(caller, "{}", message),
            LogLevel::Error => tracing::error!(caller, "{}", message),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    #[inline]
    fn log(&self, _caller: &str, _level: LogLevel, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn loggers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TracingLogger>();
        assert_send_sync::<NoOpLogger>();
    }

    #[test]
    fn closures_capture_messages() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let lines = Arc::clone(&lines);
            move |caller: &str, level: LogLevel, message: &str| {
                lines
                    .lock()
                    .unwrap()
                    .push(format!("[{}] {} : {}", caller, level, message));
            }
        };

        let logger: Arc<dyn Logger> = Arc::new(sink);
        logger.debug("AuthorizationFlow", "prompting");
        logger.error("LocationTracker", "no fix");

        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "[AuthorizationFlow] debug : prompting".to_string(),
                "[LocationTracker] error : no fix".to_string(),
            ]
        );
    }

    #[test]
    fn tracing_and_noop_accept_messages() {
        let loggers: Vec<Box<dyn Logger>> = vec![Box::new(TracingLogger), Box::new(NoOpLogger)];
        for logger in loggers {
            logger.debug("test", "debug message");
            logger.error("test", "error message");
        }
    }
}
