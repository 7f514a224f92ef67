//! 에러 타입 정의

use thiserror::Error;

use crate::mode::DeliveryMode;
use crate::state::StreamState;

/// udpmux 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    // ── 설정 에러 (생성 시점에 동기적으로 실패) ──
    #[error("설정 에러: {0}")]
    Configuration(String),

    #[error("전송 모드 불일치: root={root}, child={child}")]
    ModeMismatch {
        root: DeliveryMode,
        child: DeliveryMode,
    },

    // ── 검증 에러 ──
    #[error("유효하지 않은 포트: {0}")]
    InvalidPort(i64),

    #[error("유효하지 않은 IP 주소: {0}")]
    InvalidAddress(String),

    // ── 프로토콜 에러 (완료 경로로 보고) ──
    #[error("Write after free.")]
    WriteAfterClose,

    #[error("전송 모드와 맞지 않는 데이터: expected {expected}, got {got}")]
    MalformedPayload {
        expected: DeliveryMode,
        got: &'static str,
    },

    #[error("페이로드 없음")]
    MissingPayload,

    #[error("목적지 엔드포인트를 결정할 수 없음")]
    MissingEndpoint,

    #[error("잘못된 상태 전이: {from} -> {to}")]
    InvalidState { from: StreamState, to: StreamState },

    #[error("이미 바인딩된 스트림")]
    AlreadyBound,

    #[error("연결 종료")]
    ConnectionClosed,

    // ── 하위 스트림에서 호출 불가 ──
    #[error("하위 스트림에서 지원하지 않는 동작: {0}")]
    Unsupported(&'static str),
}

/// 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 잘못된 생성 옵션
    Configuration,

    /// 잘못된 포트/주소 값
    Validation,

    /// 정상 동작 중 발생한 런타임 조건 (닫힌 뒤 쓰기 등)
    Protocol,

    /// 하위 스트림에 루트 전용 동작 호출
    Unsupported,

    /// 트랜스포트 IO 실패
    Io,
}

impl Error {
    /// 에러 분류 반환
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Configuration(_) | Error::ModeMismatch { .. } => ErrorKind::Configuration,
            Error::InvalidPort(_) | Error::InvalidAddress(_) => ErrorKind::Validation,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::WriteAfterClose
            | Error::MalformedPayload { .. }
            | Error::MissingPayload
            | Error::MissingEndpoint
            | Error::InvalidState { .. }
            | Error::AlreadyBound
            | Error::ConnectionClosed => ErrorKind::Protocol,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
