//! 수락 필터
//!
//! 리스닝 중인 루트 스트림이 아직 하위 스트림이 없는 피어로부터
//! 데이터그램을 받았을 때 새 하위 스트림을 만들지 결정

use std::sync::Arc;

use crate::endpoint::Endpoint;

/// `(payload, origin) -> accept?`
pub type AdmissionFilter = Arc<dyn Fn(&[u8], &Endpoint) -> bool + Send + Sync>;

/// 모든 새 피어 수락 (기본값)
pub fn accept_all() -> AdmissionFilter {
    Arc::new(|_: &[u8], _: &Endpoint| true)
}

/// 지정한 피어만 수락
pub fn only_peer(peer: Endpoint) -> AdmissionFilter {
    Arc::new(move |_: &[u8], origin: &Endpoint| *origin == peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters() {
        let a = Endpoint::parse("127.0.0.1", 1000).unwrap();
        let b = Endpoint::parse("127.0.0.1", 1001).unwrap();

        let all = accept_all();
        assert!(all(&b""[..], &a));
        assert!(all(&b"x"[..], &b));

        let only = only_peer(a);
        assert!(only(&b"x"[..], &a));
        assert!(!only(&b"x"[..], &b));
    }
}
