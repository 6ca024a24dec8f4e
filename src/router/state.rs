use thiserror::Error;

/// Lifecycle of one request through the router
///
/// ```text
/// Received -> Routed -> Executing -> Completed
///                  \              \-> Failed
///                   \-> Completed   (unmatched route)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Received,
    Routed,
    Executing,
    Completed,
    Failed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal request state transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: RequestState,
    pub to: RequestState,
}

impl RequestState {
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Routed)
                | (Routed, Executing)
                | (Routed, Completed)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    pub fn transition(self, next: RequestState) -> Result<RequestState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    #[test]
    fn test_happy_path() {
        let state = Received
            .transition(Routed)
            .and_then(|s| s.transition(Executing))
            .and_then(|s| s.transition(Completed))
            .unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failure_only_from_executing() {
        assert!(Executing.can_transition_to(Failed));
        assert!(!Routed.can_transition_to(Failed));
        assert!(!Received.can_transition_to(Failed));
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let err = Received.transition(Executing).unwrap_err();
        assert_eq!(err, TransitionError { from: Received, to: Executing });

        for terminal in [Completed, Failed] {
            for next in [Received, Routed, Executing, Completed, Failed] {
                assert!(terminal.transition(next).is_err());
            }
        }
    }
}
