//! Authorization Module
//!
//! Drives permission escalation: coarse "when in use" first, then elevated
//! "always". Every step reads the backend's current status, acts on it, and
//! when the decision lies with the user, parks a continuation that re-runs
//! the same step once the backend reports an authorization change.
//!
//! The elevated prompt is shown at most once per install. The persisted flag
//! is written before the prompt is issued, so a process killed mid-prompt
//! loses that opportunity rather than showing the prompt twice.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::LocationBackend;
use crate::error::{AuthorizationError, ErrorDetail};
use crate::location::AuthorizationStatus;
use crate::logger::Logger;
use crate::storage::FlagStore;

const CALLER: &str = "AuthorizationFlow";

/// Completion of an escalation request. Called exactly once.
pub type AuthorizationHandler =
    Box<dyn FnOnce(Result<(), AuthorizationError>) + Send + 'static>;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// A step waiting for the next authorization change.
struct Parked {
    resume: Continuation,
    /// Some step in the chain issued the elevated prompt and waits on it.
    elevated_prompt: bool,
}

/// What the when-in-use escalation does for a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenInUseStep {
    /// Ask the user, then re-evaluate.
    Prompt,
    Granted,
    Denied,
    Unexpected(AuthorizationStatus),
}

impl WhenInUseStep {
    pub fn decide(status: AuthorizationStatus) -> Self {
        match status {
            AuthorizationStatus::NotDetermined => Self::Prompt,
            AuthorizationStatus::WhenInUse | AuthorizationStatus::Always => Self::Granted,
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => Self::Denied,
            AuthorizationStatus::Unknown(_) => Self::Unexpected(status),
        }
    }
}

/// What the elevated escalation does for a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevatedStep {
    /// Run the when-in-use escalation first, then re-evaluate.
    EscalateWhenInUse,
    /// Spend the one elevated prompt, then re-evaluate.
    Prompt,
    /// Capped at when-in-use: the elevated prompt was already spent.
    AlreadyPrompted,
    Granted,
    Denied,
    Unexpected(AuthorizationStatus),
}

impl ElevatedStep {
    pub fn decide(status: AuthorizationStatus, already_prompted: bool) -> Self {
        match status {
            AuthorizationStatus::NotDetermined => Self::EscalateWhenInUse,
            AuthorizationStatus::WhenInUse if !already_prompted => Self::Prompt,
            AuthorizationStatus::WhenInUse => Self::AlreadyPrompted,
            AuthorizationStatus::Always => Self::Granted,
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => Self::Denied,
            AuthorizationStatus::Unknown(_) => Self::Unexpected(status),
        }
    }
}

/// Permission escalation state machine.
pub struct AuthorizationFlow {
    backend: Arc<dyn LocationBackend>,
    flags: Arc<dyn FlagStore>,
    prompted_elevated_key: String,
    logger: Arc<dyn Logger>,
    on_authorization_updated: Mutex<Option<Parked>>,
}

impl AuthorizationFlow {
    /// `prompted_elevated_key` scopes the persisted flag; isolated instances
    /// (tests) must each use their own key.
    pub fn new(
        backend: Arc<dyn LocationBackend>,
        flags: Arc<dyn FlagStore>,
        prompted_elevated_key: impl Into<String>,
        logger: Arc<dyn Logger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            flags,
            prompted_elevated_key: prompted_elevated_key.into(),
            logger,
            on_authorization_updated: Mutex::new(None),
        })
    }

    pub fn prompted_elevated_key(&self) -> &str {
        &self.prompted_elevated_key
    }

    /// Whether the elevated prompt was already shown on this install.
    pub fn has_prompted_elevated_access(&self) -> bool {
        self.flags.get_bool(&self.prompted_elevated_key)
    }

    /// Record the elevated prompt as spent without showing it.
    pub fn mark_elevated_access_prompted(&self) {
        self.flags.set_bool(&self.prompted_elevated_key, true);
    }

    /// Whether a step is parked waiting for an authorization change.
    pub fn has_pending_resume(&self) -> bool {
        self.on_authorization_updated.lock().is_some()
    }

    /// Escalate to when-in-use access.
    pub fn prompt_when_in_use(self: &Arc<Self>, completion: AuthorizationHandler) {
        let status = self.backend.authorization_status();
        self.logger
            .debug(CALLER, &format!("[when-in-use] status {}", status));

        match WhenInUseStep::decide(status) {
            WhenInUseStep::Prompt => {
                let flow = Arc::downgrade(self);
                let resume = Box::new(move || {
                    if let Some(flow) = flow.upgrade() {
                        flow.prompt_when_in_use(completion);
                    }
                });
                if !self.park(resume, false) {
                    self.logger
                        .debug(CALLER, "[when-in-use] decision already pending, waiting on it");
                    return;
                }
                self.logger
                    .debug(CALLER, "[when-in-use] not determined, requesting when-in-use access");
                self.backend.request_when_in_use_authorization();
            }
            WhenInUseStep::Granted => {
                self.logger.debug(CALLER, "[when-in-use] authorized");
                completion(Ok(()));
            }
            WhenInUseStep::Denied => {
                self.logger.debug(CALLER, "[when-in-use] denied or restricted");
                completion(Err(AuthorizationError::LocationDenied));
            }
            WhenInUseStep::Unexpected(status) => {
                self.logger.error(CALLER, "[when-in-use] unknown authorization status");
                completion(Err(unexpected("AuthorizationFlow.prompt_when_in_use", status)));
            }
        }
    }

    /// Escalate to always access, going through when-in-use first if needed.
    pub fn prompt_elevated(self: &Arc<Self>, completion: AuthorizationHandler) {
        let status = self.backend.authorization_status();
        let already_prompted = self.has_prompted_elevated_access();
        self.logger.debug(
            CALLER,
            &format!("[always] status {}, prompted before: {}", status, already_prompted),
        );

        match ElevatedStep::decide(status, already_prompted) {
            ElevatedStep::EscalateWhenInUse => {
                self.logger
                    .debug(CALLER, "[always] not determined, escalating to when-in-use first");
                let flow = Arc::downgrade(self);
                // The when-in-use outcome is re-read from the backend status.
                self.prompt_when_in_use(Box::new(move |_: Result<(), AuthorizationError>| {
                    if let Some(flow) = flow.upgrade() {
                        flow.prompt_elevated(completion);
                    }
                }));
            }
            ElevatedStep::Prompt => {
                let flow: Weak<Self> = Arc::downgrade(self);
                let resume = Box::new(move || {
                    if let Some(flow) = flow.upgrade() {
                        flow.prompt_elevated(completion);
                    }
                });
                if !self.park(resume, true) {
                    self.logger
                        .debug(CALLER, "[always] decision already pending, waiting on it");
                    return;
                }
                self.mark_elevated_access_prompted();
                self.logger
                    .debug(CALLER, "[always] when-in-use, requesting always access");
                self.backend.request_always_authorization();
            }
            ElevatedStep::AlreadyPrompted => match self.join_elevated_prompt(completion) {
                None => {
                    self.logger
                        .debug(CALLER, "[always] always prompt still open, waiting on it");
                }
                Some(completion) => {
                    self.logger
                        .debug(CALLER, "[always] when-in-use and always access already prompted");
                    completion(Err(AuthorizationError::ElevatedAccessDenied));
                }
            },
            ElevatedStep::Granted => {
                self.logger.debug(CALLER, "[always] authorized");
                completion(Ok(()));
            }
            ElevatedStep::Denied => {
                self.logger.debug(CALLER, "[always] denied or restricted");
                completion(Err(AuthorizationError::LocationDenied));
            }
            ElevatedStep::Unexpected(status) => {
                self.logger.error(CALLER, "[always] unknown authorization status");
                completion(Err(unexpected("AuthorizationFlow.prompt_elevated", status)));
            }
        }
    }

    /// Resume the parked step, if any. The slot is cleared before the step
    /// runs, so a step that parks again is not lost. Returns whether a step ran.
    pub fn authorization_did_change(&self) -> bool {
        let parked = self.on_authorization_updated.lock().take();
        match parked {
            Some(parked) => {
                (parked.resume)();
                true
            }
            None => false,
        }
    }

    /// Park `resume` until the next authorization change. Returns false if a
    /// step was already parked; `resume` then runs right after it, on the same
    /// change, and no new prompt should be issued.
    fn park(&self, resume: Continuation, elevated_prompt: bool) -> bool {
        let mut slot = self.on_authorization_updated.lock();
        match slot.take() {
            None => {
                *slot = Some(Parked {
                    resume,
                    elevated_prompt,
                });
                true
            }
            Some(pending) => {
                *slot = Some(chain(pending, resume, elevated_prompt));
                false
            }
        }
    }

    /// Wait on an elevated prompt another caller already issued. Hands the
    /// completion back when no such prompt is open.
    fn join_elevated_prompt(
        self: &Arc<Self>,
        completion: AuthorizationHandler,
    ) -> Option<AuthorizationHandler> {
        let mut slot = self.on_authorization_updated.lock();
        match slot.take() {
            Some(pending) if pending.elevated_prompt => {
                let flow = Arc::downgrade(self);
                let resume: Continuation = Box::new(move || {
                    if let Some(flow) = flow.upgrade() {
                        flow.prompt_elevated(completion);
                    }
                });
                *slot = Some(chain(pending, resume, true));
                None
            }
            other => {
                *slot = other;
                Some(completion)
            }
        }
    }
}

fn chain(pending: Parked, resume: Continuation, elevated_prompt: bool) -> Parked {
    let first = pending.resume;
    Parked {
        resume: Box::new(move || {
            first();
            resume();
        }),
        elevated_prompt: pending.elevated_prompt || elevated_prompt,
    }
}

fn unexpected(domain: &str, status: AuthorizationStatus) -> AuthorizationError {
    AuthorizationError::Unexpected(ErrorDetail::new(
        domain,
        1,
        format!("Unknown authorization status {}", status),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocationEvents;
    use crate::error::ErrorDetail;
    use crate::location::{Heading, Location};
    use crate::logger::TracingLogger;
    use crate::storage::MemoryFlagStore;
    use crate::testing::{unique_flag_key, MockLocationBackend};

    type Outcome = Arc<Mutex<Vec<Result<(), AuthorizationError>>>>;

    /// Forwards authorization changes to the flow, like the tracker does.
    struct Forward(Weak<AuthorizationFlow>);

    impl LocationEvents for Forward {
        fn locations_updated(&self, _locations: Vec<Location>) {}
        fn location_failed(&self, _error: ErrorDetail) {}
        fn heading_updated(&self, _heading: Heading) {}
        fn authorization_changed(&self) {
            if let Some(flow) = self.0.upgrade() {
                flow.authorization_did_change();
            }
        }
    }

    struct Fixture {
        backend: Arc<MockLocationBackend>,
        flow: Arc<AuthorizationFlow>,
        _forward: Arc<Forward>,
        outcome: Outcome,
    }

    impl Fixture {
        fn new(initial: AuthorizationStatus) -> Self {
            let backend = MockLocationBackend::with_status(initial);
            let flow = AuthorizationFlow::new(
                backend.clone(),
                Arc::new(MemoryFlagStore::new()),
                unique_flag_key(),
                Arc::new(TracingLogger),
            );
            let forward = Arc::new(Forward(Arc::downgrade(&flow)));
            let sink: Weak<dyn LocationEvents> = Arc::downgrade(&forward) as Weak<dyn LocationEvents>;
            backend.set_event_sink(sink);
            Self {
                backend,
                flow,
                _forward: forward,
                outcome: Arc::default(),
            }
        }

        fn handler(&self) -> AuthorizationHandler {
            let outcome = Arc::clone(&self.outcome);
            Box::new(move |result: Result<(), AuthorizationError>| outcome.lock().push(result))
        }

        fn outcomes(&self) -> Vec<Result<(), AuthorizationError>> {
            self.outcome.lock().clone()
        }
    }

    #[test]
    fn when_in_use_step_table() {
        use AuthorizationStatus::*;
        assert_eq!(WhenInUseStep::decide(NotDetermined), WhenInUseStep::Prompt);
        assert_eq!(WhenInUseStep::decide(WhenInUse), WhenInUseStep::Granted);
        assert_eq!(WhenInUseStep::decide(Always), WhenInUseStep::Granted);
        assert_eq!(WhenInUseStep::decide(Denied), WhenInUseStep::Denied);
        assert_eq!(WhenInUseStep::decide(Restricted), WhenInUseStep::Denied);
        assert_eq!(
            WhenInUseStep::decide(Unknown(9)),
            WhenInUseStep::Unexpected(Unknown(9))
        );
    }

    #[test]
    fn elevated_step_table() {
        use AuthorizationStatus::*;
        assert_eq!(ElevatedStep::decide(NotDetermined, false), ElevatedStep::EscalateWhenInUse);
        assert_eq!(ElevatedStep::decide(NotDetermined, true), ElevatedStep::EscalateWhenInUse);
        assert_eq!(ElevatedStep::decide(WhenInUse, false), ElevatedStep::Prompt);
        assert_eq!(ElevatedStep::decide(WhenInUse, true), ElevatedStep::AlreadyPrompted);
        assert_eq!(ElevatedStep::decide(Always, true), ElevatedStep::Granted);
        assert_eq!(ElevatedStep::decide(Denied, false), ElevatedStep::Denied);
        assert_eq!(ElevatedStep::decide(Restricted, true), ElevatedStep::Denied);
    }

    #[test]
    fn grant_when_in_use_from_not_determined() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);

        f.flow.prompt_when_in_use(f.handler());

        assert_eq!(f.outcomes(), vec![Ok(())]);
        assert_eq!(f.backend.prompt_count(), 1);
        assert_eq!(f.backend.authorization_notifications(), 1);
        assert!(!f.flow.has_pending_resume());
    }

    #[test]
    fn deny_when_in_use_from_not_determined() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_when_in_use_response(AuthorizationStatus::Denied);

        f.flow.prompt_when_in_use(f.handler());

        assert_eq!(f.outcomes(), vec![Err(AuthorizationError::LocationDenied)]);
        assert_eq!(f.backend.prompt_count(), 1);
    }

    #[test]
    fn when_in_use_already_granted_shows_no_prompt() {
        for status in [AuthorizationStatus::WhenInUse, AuthorizationStatus::Always] {
            let f = Fixture::new(status);
            f.flow.prompt_when_in_use(f.handler());
            assert_eq!(f.outcomes(), vec![Ok(())]);
            assert_eq!(f.backend.prompt_count(), 0);
            assert_eq!(f.backend.authorization_notifications(), 0);
        }
    }

    #[test]
    fn unknown_status_is_reported_as_unexpected() {
        let f = Fixture::new(AuthorizationStatus::Unknown(17));

        f.flow.prompt_when_in_use(f.handler());
        f.flow.prompt_elevated(f.handler());

        assert_eq!(
            f.outcomes(),
            vec![
                Err(AuthorizationError::Unexpected(ErrorDetail::new(
                    "AuthorizationFlow.prompt_when_in_use",
                    1,
                    ""
                ))),
                Err(AuthorizationError::Unexpected(ErrorDetail::new(
                    "AuthorizationFlow.prompt_elevated",
                    1,
                    ""
                ))),
            ]
        );
        assert_eq!(f.backend.prompt_count(), 0);
    }

    #[test]
    fn grant_always_from_not_determined_prompts_twice() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_always_response(AuthorizationStatus::Always);

        f.flow.prompt_elevated(f.handler());

        assert_eq!(f.outcomes(), vec![Ok(())]);
        assert_eq!(f.backend.when_in_use_prompts(), 1);
        assert_eq!(f.backend.always_prompts(), 1);
        assert_eq!(f.backend.authorization_notifications(), 2);
    }

    #[test]
    fn deny_always_from_not_determined() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_always_response(AuthorizationStatus::WhenInUse);

        f.flow.prompt_elevated(f.handler());

        assert_eq!(f.outcomes(), vec![Err(AuthorizationError::ElevatedAccessDenied)]);
        assert_eq!(f.backend.prompt_count(), 2);
    }

    #[test]
    fn deny_when_in_use_while_escalating_to_always() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_when_in_use_response(AuthorizationStatus::Denied);

        f.flow.prompt_elevated(f.handler());

        assert_eq!(f.outcomes(), vec![Err(AuthorizationError::LocationDenied)]);
        assert_eq!(f.backend.prompt_count(), 1);
        assert!(!f.flow.has_prompted_elevated_access());
    }

    #[test]
    fn grant_always_from_when_in_use_sets_flag() {
        let f = Fixture::new(AuthorizationStatus::WhenInUse);
        f.backend.set_always_response(AuthorizationStatus::Always);
        assert!(!f.flow.has_prompted_elevated_access());

        f.flow.prompt_elevated(f.handler());

        assert_eq!(f.outcomes(), vec![Ok(())]);
        assert_eq!(f.backend.prompt_count(), 1);
        assert!(f.flow.has_prompted_elevated_access());
    }

    #[test]
    fn always_prompt_is_spent_once_per_install() {
        let f = Fixture::new(AuthorizationStatus::WhenInUse);
        f.flow.mark_elevated_access_prompted();

        f.flow.prompt_elevated(f.handler());
        f.flow.prompt_elevated(f.handler());

        assert_eq!(
            f.outcomes(),
            vec![
                Err(AuthorizationError::ElevatedAccessDenied),
                Err(AuthorizationError::ElevatedAccessDenied),
            ]
        );
        assert_eq!(f.backend.prompt_count(), 0);
    }

    #[test]
    fn denied_shows_no_prompt() {
        for status in [AuthorizationStatus::Denied, AuthorizationStatus::Restricted] {
            let f = Fixture::new(status);
            f.flow.prompt_elevated(f.handler());
            f.flow.prompt_when_in_use(f.handler());
            assert_eq!(
                f.outcomes(),
                vec![
                    Err(AuthorizationError::LocationDenied),
                    Err(AuthorizationError::LocationDenied),
                ]
            );
            assert_eq!(f.backend.prompt_count(), 0);
        }
    }

    #[test]
    fn flag_is_written_before_the_prompt_resolves() {
        let f = Fixture::new(AuthorizationStatus::WhenInUse);
        f.backend.set_defer_decisions(true);

        f.flow.prompt_elevated(f.handler());

        assert!(f.flow.has_prompted_elevated_access());
        assert!(f.flow.has_pending_resume());
        assert!(f.outcomes().is_empty());

        f.backend.set_always_response(AuthorizationStatus::Always);
        // The deferred decision was captured at prompt time (WhenInUse).
        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(f.outcomes(), vec![Err(AuthorizationError::ElevatedAccessDenied)]);
        assert!(!f.flow.has_pending_resume());
    }

    #[test]
    fn asynchronous_decisions_resume_each_stage() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_defer_decisions(true);
        f.backend.set_always_response(AuthorizationStatus::Always);

        f.flow.prompt_elevated(f.handler());
        assert_eq!(f.backend.when_in_use_prompts(), 1);
        assert!(f.flow.has_pending_resume());

        // when-in-use granted: the flow moves on and parks on the always prompt
        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(f.backend.always_prompts(), 1);
        assert!(f.flow.has_pending_resume());
        assert!(f.outcomes().is_empty());

        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(f.outcomes(), vec![Ok(())]);
        assert!(!f.flow.has_pending_resume());
    }

    #[test]
    fn resume_fires_once_per_change() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_defer_decisions(true);

        f.flow.prompt_when_in_use(f.handler());
        assert!(f.backend.deliver_authorization_decision());
        assert!(!f.flow.authorization_did_change());
        f.backend.notify_authorization_changed();

        assert_eq!(f.outcomes(), vec![Ok(())]);
    }

    #[test]
    fn concurrent_escalations_share_one_prompt() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_defer_decisions(true);

        f.flow.prompt_when_in_use(f.handler());
        f.flow.prompt_when_in_use(f.handler());
        assert_eq!(f.backend.when_in_use_prompts(), 1);

        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(f.outcomes(), vec![Ok(()), Ok(())]);
        assert!(!f.flow.has_pending_resume());
    }

    #[test]
    fn concurrent_elevated_escalations_share_the_always_prompt() {
        let f = Fixture::new(AuthorizationStatus::NotDetermined);
        f.backend.set_defer_decisions(true);
        f.backend.set_always_response(AuthorizationStatus::Always);

        f.flow.prompt_elevated(f.handler());
        f.flow.prompt_elevated(f.handler());
        assert_eq!(f.backend.when_in_use_prompts(), 1);

        // Both move on; the second joins the always prompt the first issued.
        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(f.backend.always_prompts(), 1);
        assert!(f.outcomes().is_empty());
        assert!(f.flow.has_pending_resume());

        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(f.outcomes(), vec![Ok(()), Ok(())]);
        assert!(!f.flow.has_pending_resume());
    }

    #[test]
    fn joined_elevated_waiters_share_a_refusal() {
        let f = Fixture::new(AuthorizationStatus::WhenInUse);
        f.backend.set_defer_decisions(true);

        f.flow.prompt_elevated(f.handler());
        f.flow.prompt_elevated(f.handler());
        assert_eq!(f.backend.always_prompts(), 1);
        assert!(f.outcomes().is_empty());

        assert!(f.backend.deliver_authorization_decision());
        assert_eq!(
            f.outcomes(),
            vec![
                Err(AuthorizationError::ElevatedAccessDenied),
                Err(AuthorizationError::ElevatedAccessDenied),
            ]
        );
        assert!(!f.flow.has_pending_resume());
    }
}
