//! 스트림 상태 머신
//!
//! Unbound → Bound → Connected | Listening → Closing → Closed

use std::fmt;

use crate::{Error, Result};

/// 스트림 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    #[default]
    Unbound,
    Bound,
    Connected,
    Listening,
    Closing,
    Closed,
}

impl StreamState {
    /// 전이 가능 여부
    pub fn can_transition_to(self, next: StreamState) -> bool {
        use StreamState::*;

        match (self, next) {
            (Closed, Closed) => true,
            (Closed, _) => false,
            (Closing, Closing | Closed) => true,
            (Closing, _) => false,
            (_, Closing | Closed) => true,
            (Unbound, Bound) => true,
            (Bound, Connected | Listening) => true,
            // 재연결: 기본 피어만 교체
            (Connected, Connected) => true,
            _ => false,
        }
    }

    /// 전이 시도
    pub fn transition(self, next: StreamState) -> Result<StreamState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidState {
                from: self,
                to: next,
            })
        }
    }

    /// 로컬 주소에 바인딩된 상태인지
    pub fn is_bound(self) -> bool {
        matches!(
            self,
            StreamState::Bound | StreamState::Connected | StreamState::Listening
        )
    }

    /// 닫히는 중이거나 닫힌 상태인지
    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closing | StreamState::Closed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StreamState::*;

    #[test]
    fn test_forward_path() {
        assert_eq!(Unbound.transition(Bound).unwrap(), Bound);
        assert_eq!(Bound.transition(Listening).unwrap(), Listening);
        assert_eq!(Bound.transition(Connected).unwrap(), Connected);
        assert!(Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_connected_and_listening_exclusive() {
        assert!(!Connected.can_transition_to(Listening));
        assert!(!Listening.can_transition_to(Connected));
        assert!(!Listening.can_transition_to(Listening));
        assert!(!Unbound.can_transition_to(Listening));

        let err = Listening.transition(Connected).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                from: Listening,
                to: Connected
            }
        ));
    }

    #[test]
    fn test_closing_is_terminal() {
        for state in [Unbound, Bound, Connected, Listening] {
            assert!(state.can_transition_to(Closing));
            assert!(state.can_transition_to(Closed));
        }
        assert!(Closing.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Closing.can_transition_to(Bound));
        assert!(!Closed.can_transition_to(Unbound));
    }
}
