//! AuthProcess: the per-connection handshake state machine.
//!
//! # State diagram
//!
//! ```text
//! Responder:  Idle ─start()─► WaitingForResponse ─AUTH_RESP─► Authenticated
//!                                                      └─────► Failed
//!
//! Initiator:  Idle ─start()─► WaitingForChallenge ─AUTH_REQ─► WaitingForUserSecret
//!               ─submit_secret(Some)─► WaitingForValidation ─AUTH_SUCCESS─► Authenticated
//!               ─submit_secret(None)─► Failed                └AUTH_FAIL───► Failed
//!
//! Any non-terminal state: timeout or abort() ─► Failed
//! ```
//!
//! A message that does not fit the current state is logged and ignored; it
//! never moves the machine.  Every transition into a terminal state clears
//! the timeout exactly once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::timer::{Timer, TimerHandle};
use crate::auth::{
    invalid_names_reason, AuthConfig, AuthError, AuthRole, AuthSignal, AuthState, SendFn,
    REASON_MISMATCH, REASON_NO_LOCAL_SECRET, REASON_PEER_REJECTED, REASON_TIMED_OUT,
    REASON_USER_CANCELLED,
};
use crate::domain::peer::ConnectionId;
use crate::domain::secret::{validate_names, Secret};
use crate::protocol::codec::encode_auth_message;
use crate::protocol::messages::AuthMessage;

/// Drives one connection's handshake to a terminal outcome.
pub struct AuthProcess {
    connection_id: ConnectionId,
    role: AuthRole,
    state: AuthState,
    config: AuthConfig,
    send: SendFn,
    timer: Arc<dyn Timer>,
    timer_handle: Option<TimerHandle>,
    /// Responder: the expected names.  Initiator: the names it sent.
    local_secret: Option<Secret>,
    failure_reason: Option<String>,
}

impl AuthProcess {
    /// Creates an idle process.  Nothing is sent or armed until [`start`](Self::start).
    ///
    /// A responder needs `local_secret` to have anything to compare against;
    /// an initiator normally passes `None` and receives its names later via
    /// [`submit_secret`](Self::submit_secret).
    pub fn new(
        connection_id: ConnectionId,
        role: AuthRole,
        send: SendFn,
        timer: Arc<dyn Timer>,
        config: AuthConfig,
        local_secret: Option<Secret>,
    ) -> Self {
        Self {
            connection_id,
            role,
            state: AuthState::Idle,
            config,
            send,
            timer,
            timer_handle: None,
            local_secret,
            failure_reason: None,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn role(&self) -> AuthRole {
        self.role
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// The reason recorded when the process entered `Failed`.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Arms the timeout and, for a responder, sends the challenge.
    ///
    /// Calling `start` on a process that is not `Idle` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encode`] if the challenge cannot be encoded.
    pub fn start(&mut self) -> Result<Option<AuthSignal>, AuthError> {
        if self.state != AuthState::Idle {
            warn!(connection = %self.connection_id, state = %self.state, "start() on a running handshake ignored");
            return Ok(None);
        }

        self.timer_handle = Some(self.timer.set(&self.connection_id, self.config.timeout));

        match self.role {
            AuthRole::Responder => {
                if self.local_secret.is_none() {
                    return Ok(Some(self.fail(REASON_NO_LOCAL_SECRET.to_string())));
                }
                self.state = AuthState::WaitingForResponse;
                debug!(connection = %self.connection_id, "sending challenge");
                self.send_message(&AuthMessage::Request)?;
            }
            AuthRole::Initiator => {
                self.state = AuthState::WaitingForChallenge;
                debug!(connection = %self.connection_id, "waiting for challenge");
            }
        }
        Ok(None)
    }

    /// Applies one decoded handshake message.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encode`] if a reply cannot be encoded.
    pub fn handle_message(&mut self, msg: AuthMessage) -> Result<Option<AuthSignal>, AuthError> {
        match (self.state, msg) {
            (AuthState::WaitingForResponse, AuthMessage::Response { names }) => {
                self.verify_response(names)
            }
            (AuthState::WaitingForChallenge, AuthMessage::Request) => {
                self.state = AuthState::WaitingForUserSecret;
                debug!(connection = %self.connection_id, "challenged; waiting for local secret");
                Ok(Some(AuthSignal::SecretRequired))
            }
            (AuthState::WaitingForValidation, AuthMessage::Success) => Ok(Some(self.succeed())),
            (AuthState::WaitingForValidation, AuthMessage::Fail { reason }) => {
                let reason = reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| REASON_PEER_REJECTED.to_string());
                Ok(Some(self.fail(reason)))
            }
            (state, msg) => {
                warn!(
                    connection = %self.connection_id,
                    %state,
                    kind = msg.kind(),
                    "ignoring unexpected handshake message"
                );
                Ok(None)
            }
        }
    }

    /// Delivers the initiator's names, or `None` if the user cancelled.
    ///
    /// Ignored unless the process is in `WaitingForUserSecret`; a late answer
    /// after a timeout is simply dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encode`] if the response cannot be encoded.
    pub fn submit_secret(&mut self, secret: Option<Secret>) -> Result<Option<AuthSignal>, AuthError> {
        if self.state != AuthState::WaitingForUserSecret {
            debug!(connection = %self.connection_id, state = %self.state, "late secret ignored");
            return Ok(None);
        }

        let Some(secret) = secret else {
            return Ok(Some(self.fail(REASON_USER_CANCELLED.to_string())));
        };

        let names = secret.names().to_vec();
        self.local_secret = Some(secret);
        self.send_message(&AuthMessage::Response { names })?;
        self.state = AuthState::WaitingForValidation;
        Ok(None)
    }

    /// Handles a fired timer.  Handles that do not belong to the currently
    /// armed timer are stale and ignored.
    pub fn on_timeout(&mut self, handle: TimerHandle) -> Option<AuthSignal> {
        if self.state.is_terminal() || self.timer_handle != Some(handle) {
            debug!(connection = %self.connection_id, ?handle, "stale timer ignored");
            return None;
        }
        Some(self.fail(REASON_TIMED_OUT.to_string()))
    }

    /// Fails the process without sending anything.  No-op once terminal.
    pub fn abort(&mut self, reason: &str) -> Option<AuthSignal> {
        if self.state.is_terminal() {
            return None;
        }
        Some(self.fail(reason.to_string()))
    }

    fn verify_response(&mut self, names: Vec<String>) -> Result<Option<AuthSignal>, AuthError> {
        let expected = self.config.name_count;

        if let Err(e) = validate_names(&names, expected) {
            debug!(connection = %self.connection_id, "rejecting response: {e}");
            let reason = invalid_names_reason(expected);
            self.send_message(&AuthMessage::Fail {
                reason: Some(reason.clone()),
            })?;
            return Ok(Some(self.fail(reason)));
        }

        let matched = self
            .local_secret
            .as_ref()
            .is_some_and(|secret| secret.matches(&names, self.config.match_policy));

        if matched {
            self.send_message(&AuthMessage::Success)?;
            Ok(Some(self.succeed()))
        } else {
            self.send_message(&AuthMessage::Fail {
                reason: Some(REASON_MISMATCH.to_string()),
            })?;
            Ok(Some(self.fail(REASON_MISMATCH.to_string())))
        }
    }

    fn succeed(&mut self) -> AuthSignal {
        self.clear_timer();
        self.state = AuthState::Authenticated;
        info!(connection = %self.connection_id, role = ?self.role, "handshake succeeded");
        AuthSignal::Authenticated
    }

    fn fail(&mut self, reason: String) -> AuthSignal {
        self.clear_timer();
        self.state = AuthState::Failed;
        info!(connection = %self.connection_id, role = ?self.role, "handshake failed: {reason}");
        self.failure_reason = Some(reason.clone());
        AuthSignal::Failed { reason }
    }

    fn clear_timer(&mut self) {
        if let Some(handle) = self.timer_handle.take() {
            self.timer.clear(handle);
        }
    }

    fn send_message(&self, msg: &AuthMessage) -> Result<(), AuthError> {
        let bytes = encode_auth_message(msg)?;
        if !(self.send)(&self.connection_id, &bytes) {
            warn!(
                connection = %self.connection_id,
                kind = msg.kind(),
                "send failed; waiting for timeout"
            );
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::timer::MockTimer;
    use crate::auth::REASON_INVALID_FORMAT;
    use crate::protocol::codec::decode_auth_message;
    use std::sync::Mutex;
    use std::time::Duration;

    // ── Test doubles ──────────────────────────────────────────────────────────

    type Sent = Arc<Mutex<Vec<AuthMessage>>>;

    fn recording_send(succeeds: bool) -> (SendFn, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let send: SendFn = Arc::new(move |_id: &ConnectionId, bytes: &[u8]| {
            let line = std::str::from_utf8(bytes).unwrap().trim_end();
            sink.lock().unwrap().push(decode_auth_message(line).unwrap());
            succeeds
        });
        (send, sent)
    }

    fn lenient_timer() -> Arc<dyn Timer> {
        let mut timer = MockTimer::new();
        timer.expect_set().returning(|_, _| TimerHandle(1));
        timer.expect_clear().return_const(());
        Arc::new(timer)
    }

    fn secret() -> Secret {
        Secret::new(["Lion", "Tiger", "Bear"])
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn responder(timer: Arc<dyn Timer>) -> (AuthProcess, Sent) {
        let (send, sent) = recording_send(true);
        let p = AuthProcess::new(
            ConnectionId::from("r"),
            AuthRole::Responder,
            send,
            timer,
            AuthConfig::default(),
            Some(secret()),
        );
        (p, sent)
    }

    fn initiator(timer: Arc<dyn Timer>) -> (AuthProcess, Sent) {
        let (send, sent) = recording_send(true);
        let p = AuthProcess::new(
            ConnectionId::from("i"),
            AuthRole::Initiator,
            send,
            timer,
            AuthConfig::default(),
            None,
        );
        (p, sent)
    }

    // ── Responder path ────────────────────────────────────────────────────────

    #[test]
    fn test_responder_start_arms_timer_and_sends_challenge() {
        // Arrange
        let mut timer = MockTimer::new();
        timer
            .expect_set()
            .withf(|id, delay| id.as_str() == "r" && *delay == Duration::from_secs(30))
            .times(1)
            .returning(|_, _| TimerHandle(9));
        timer.expect_clear().return_const(());
        let (mut p, sent) = responder(Arc::new(timer));

        // Act
        let signal = p.start().unwrap();

        // Assert
        assert_eq!(signal, None);
        assert_eq!(p.state(), AuthState::WaitingForResponse);
        assert_eq!(*sent.lock().unwrap(), vec![AuthMessage::Request]);
    }

    #[test]
    fn test_responder_accepts_matching_names_case_insensitively() {
        // Arrange
        let (mut p, sent) = responder(lenient_timer());
        p.start().unwrap();

        // Act
        let signal = p
            .handle_message(AuthMessage::Response {
                names: names(&["lion", "TIGER", "bear"]),
            })
            .unwrap();

        // Assert
        assert_eq!(signal, Some(AuthSignal::Authenticated));
        assert_eq!(p.state(), AuthState::Authenticated);
        assert_eq!(sent.lock().unwrap().last(), Some(&AuthMessage::Success));
    }

    #[test]
    fn test_responder_rejects_mismatched_names() {
        let (mut p, sent) = responder(lenient_timer());
        p.start().unwrap();

        let signal = p
            .handle_message(AuthMessage::Response {
                names: names(&["lion", "tiger", "wolf"]),
            })
            .unwrap();

        assert_eq!(
            signal,
            Some(AuthSignal::Failed {
                reason: REASON_MISMATCH.to_string()
            })
        );
        assert_eq!(p.state(), AuthState::Failed);
        assert_eq!(
            sent.lock().unwrap().last(),
            Some(&AuthMessage::Fail {
                reason: Some(REASON_MISMATCH.to_string())
            })
        );
    }

    #[test]
    fn test_responder_rejects_reordered_names_under_positional_policy() {
        let (mut p, _sent) = responder(lenient_timer());
        p.start().unwrap();

        let signal = p
            .handle_message(AuthMessage::Response {
                names: names(&["tiger", "lion", "bear"]),
            })
            .unwrap();

        assert!(matches!(signal, Some(AuthSignal::Failed { .. })));
    }

    #[test]
    fn test_responder_rejects_wrong_arity_and_blank_names() {
        // Even a response that contains the right names must fail on shape.
        let cases: [&[&str]; 4] = [
            &["lion", "tiger"],
            &["lion", "tiger", "bear", "bear"],
            &["lion", "", "bear"],
            &["lion", "   ", "bear"],
        ];

        for case in cases {
            // Arrange
            let (mut p, sent) = responder(lenient_timer());
            p.start().unwrap();

            // Act
            let signal = p
                .handle_message(AuthMessage::Response { names: names(case) })
                .unwrap();

            // Assert
            let expected_reason = invalid_names_reason(3);
            assert_eq!(
                signal,
                Some(AuthSignal::Failed {
                    reason: expected_reason.clone()
                }),
                "case {case:?}"
            );
            assert_eq!(
                sent.lock().unwrap().last(),
                Some(&AuthMessage::Fail {
                    reason: Some(expected_reason)
                })
            );
        }
    }

    #[test]
    fn test_responder_without_local_secret_fails_on_start() {
        let (send, sent) = recording_send(true);
        let mut p = AuthProcess::new(
            ConnectionId::new(),
            AuthRole::Responder,
            send,
            lenient_timer(),
            AuthConfig::default(),
            None,
        );

        let signal = p.start().unwrap();

        assert_eq!(
            signal,
            Some(AuthSignal::Failed {
                reason: REASON_NO_LOCAL_SECRET.to_string()
            })
        );
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_responder_ignores_request_and_success_messages() {
        let (mut p, sent) = responder(lenient_timer());
        p.start().unwrap();

        assert_eq!(p.handle_message(AuthMessage::Request).unwrap(), None);
        assert_eq!(p.handle_message(AuthMessage::Success).unwrap(), None);
        assert_eq!(
            p.handle_message(AuthMessage::Fail { reason: None }).unwrap(),
            None
        );

        assert_eq!(p.state(), AuthState::WaitingForResponse);
        assert_eq!(sent.lock().unwrap().len(), 1, "only the challenge was sent");
    }

    // ── Initiator path ────────────────────────────────────────────────────────

    #[test]
    fn test_initiator_start_is_passive() {
        let (mut p, sent) = initiator(lenient_timer());

        let signal = p.start().unwrap();

        assert_eq!(signal, None);
        assert_eq!(p.state(), AuthState::WaitingForChallenge);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_initiator_challenge_requests_secret() {
        let (mut p, _sent) = initiator(lenient_timer());
        p.start().unwrap();

        let signal = p.handle_message(AuthMessage::Request).unwrap();

        assert_eq!(signal, Some(AuthSignal::SecretRequired));
        assert_eq!(p.state(), AuthState::WaitingForUserSecret);
    }

    #[test]
    fn test_initiator_cancelled_secret_fails_without_sending() {
        // Arrange
        let (mut p, sent) = initiator(lenient_timer());
        p.start().unwrap();
        p.handle_message(AuthMessage::Request).unwrap();

        // Act
        let signal = p.submit_secret(None).unwrap();

        // Assert
        assert_eq!(
            signal,
            Some(AuthSignal::Failed {
                reason: REASON_USER_CANCELLED.to_string()
            })
        );
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_initiator_sends_response_then_accepts_success() {
        // Arrange
        let (mut p, sent) = initiator(lenient_timer());
        p.start().unwrap();
        p.handle_message(AuthMessage::Request).unwrap();

        // Act
        let after_submit = p.submit_secret(Some(Secret::parse(" lion , Tiger,bear "))).unwrap();
        let after_success = p.handle_message(AuthMessage::Success).unwrap();

        // Assert
        assert_eq!(after_submit, None);
        assert_eq!(
            *sent.lock().unwrap(),
            vec![AuthMessage::Response {
                names: names(&["lion", "Tiger", "bear"])
            }]
        );
        assert_eq!(after_success, Some(AuthSignal::Authenticated));
        assert_eq!(p.state(), AuthState::Authenticated);
    }

    #[test]
    fn test_initiator_uses_peer_fail_reason_or_default() {
        for (reason, expected) in [
            (Some("Names do not match".to_string()), "Names do not match"),
            (None, REASON_PEER_REJECTED),
            (Some("  ".to_string()), REASON_PEER_REJECTED),
        ] {
            let (mut p, _sent) = initiator(lenient_timer());
            p.start().unwrap();
            p.handle_message(AuthMessage::Request).unwrap();
            p.submit_secret(Some(secret())).unwrap();

            let signal = p.handle_message(AuthMessage::Fail { reason }).unwrap();

            assert_eq!(
                signal,
                Some(AuthSignal::Failed {
                    reason: expected.to_string()
                })
            );
        }
    }

    #[test]
    fn test_initiator_ignores_success_before_sending_response() {
        let (mut p, _sent) = initiator(lenient_timer());
        p.start().unwrap();

        assert_eq!(p.handle_message(AuthMessage::Success).unwrap(), None);
        assert_eq!(p.state(), AuthState::WaitingForChallenge);
    }

    #[test]
    fn test_secret_submitted_outside_waiting_state_is_ignored() {
        let (mut p, sent) = initiator(lenient_timer());
        p.start().unwrap();

        assert_eq!(p.submit_secret(Some(secret())).unwrap(), None);
        assert_eq!(p.state(), AuthState::WaitingForChallenge);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_failure_does_not_change_state() {
        let (send, _sent) = recording_send(false);
        let mut p = AuthProcess::new(
            ConnectionId::new(),
            AuthRole::Responder,
            send,
            lenient_timer(),
            AuthConfig::default(),
            Some(secret()),
        );

        p.start().unwrap();

        assert_eq!(p.state(), AuthState::WaitingForResponse);
    }

    // ── Timeout and abort ─────────────────────────────────────────────────────

    #[test]
    fn test_timeout_fails_and_clears_timer_exactly_once() {
        // Arrange
        let mut timer = MockTimer::new();
        timer.expect_set().times(1).returning(|_, _| TimerHandle(5));
        timer
            .expect_clear()
            .withf(|h| *h == TimerHandle(5))
            .times(1)
            .return_const(());
        let (mut p, _sent) = initiator(Arc::new(timer));
        p.start().unwrap();

        // Act
        let first = p.on_timeout(TimerHandle(5));
        let second = p.on_timeout(TimerHandle(5));
        let after_abort = p.abort("late abort");

        // Assert
        assert_eq!(
            first,
            Some(AuthSignal::Failed {
                reason: REASON_TIMED_OUT.to_string()
            })
        );
        assert_eq!(second, None);
        assert_eq!(after_abort, None);
        assert_eq!(p.failure_reason(), Some(REASON_TIMED_OUT));
    }

    #[test]
    fn test_timeout_during_secret_prompt_fails() {
        let (mut p, _sent) = initiator(lenient_timer());
        p.start().unwrap();
        p.handle_message(AuthMessage::Request).unwrap();

        let signal = p.on_timeout(TimerHandle(1));

        assert!(matches!(signal, Some(AuthSignal::Failed { .. })));
        // The answer that arrives afterwards is dropped.
        assert_eq!(p.submit_secret(Some(secret())).unwrap(), None);
        assert_eq!(p.state(), AuthState::Failed);
    }

    #[test]
    fn test_stale_timer_handle_is_ignored() {
        let (mut p, _sent) = responder(lenient_timer());
        p.start().unwrap();

        assert_eq!(p.on_timeout(TimerHandle(999)), None);
        assert_eq!(p.state(), AuthState::WaitingForResponse);
    }

    #[test]
    fn test_abort_is_idempotent() {
        // Arrange
        let mut timer = MockTimer::new();
        timer.expect_set().returning(|_, _| TimerHandle(3));
        timer.expect_clear().times(1).return_const(());
        let (mut p, sent) = responder(Arc::new(timer));
        p.start().unwrap();

        // Act
        let first = p.abort(REASON_INVALID_FORMAT);
        let second = p.abort(REASON_INVALID_FORMAT);

        // Assert
        assert_eq!(
            first,
            Some(AuthSignal::Failed {
                reason: REASON_INVALID_FORMAT.to_string()
            })
        );
        assert_eq!(second, None);
        assert_eq!(sent.lock().unwrap().len(), 1, "abort sends nothing");
    }

    #[test]
    fn test_abort_after_success_is_noop() {
        let (mut p, _sent) = responder(lenient_timer());
        p.start().unwrap();
        p.handle_message(AuthMessage::Response {
            names: names(&["lion", "tiger", "bear"]),
        })
        .unwrap();

        assert_eq!(p.abort("too late"), None);
        assert_eq!(p.state(), AuthState::Authenticated);
    }

    #[test]
    fn test_start_twice_is_ignored() {
        let mut timer = MockTimer::new();
        timer.expect_set().times(1).returning(|_, _| TimerHandle(1));
        timer.expect_clear().return_const(());
        let (mut p, sent) = responder(Arc::new(timer));

        p.start().unwrap();
        p.start().unwrap();

        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
