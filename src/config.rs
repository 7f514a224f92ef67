//! 스트림 설정

use std::fmt;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::filter::AdmissionFilter;
use crate::mode::DeliveryMode;
use crate::transport::TransportKind;
use crate::{
    Error, Result, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_READ_QUEUE_CAPACITY, MAX_DATAGRAM_SIZE,
};

/// 루트 스트림 생성 옵션
#[derive(Clone)]
pub struct Config {
    /// 전송 모드 (하위 스트림에도 그대로 상속)
    pub delivery_mode: DeliveryMode,

    /// 닫을 때 트랜스포트도 닫을지 여부
    pub close_transport: bool,

    /// 직접 트랜스포트를 열 때 사용할 종류
    pub transport_kind: TransportKind,

    /// 기본 원격 피어
    pub remote: Option<Endpoint>,

    /// 수락 필터 (None이면 모두 수락)
    pub admission_filter: Option<AdmissionFilter>,

    /// 스트림별 읽기 큐 크기 (데이터그램 수)
    pub read_queue_capacity: usize,

    /// 루트 알림 큐 크기. 가득 차면 새 피어는 수락되지 않음
    pub event_queue_capacity: usize,

    /// 수신 버퍼 크기 (바이트)
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::RawBytes,
            close_transport: true,
            transport_kind: TransportKind::Udp4,
            remote: None,
            admission_filter: None,
            read_queue_capacity: DEFAULT_READ_QUEUE_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 주소/포트 메타데이터를 바이트에 붙여 주고받는 설정
    pub fn tagged() -> Self {
        Self {
            delivery_mode: DeliveryMode::TaggedBytes,
            ..Self::default()
        }
    }

    /// `Packet` 값으로 주고받는 설정
    pub fn object_mode() -> Self {
        Self {
            delivery_mode: DeliveryMode::StructuredPacket,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_transport_kind(mut self, kind: TransportKind) -> Self {
        self.transport_kind = kind;
        self
    }

    pub fn with_close_transport(mut self, close_transport: bool) -> Self {
        self.close_transport = close_transport;
        self
    }

    pub fn with_remote(mut self, remote: Endpoint) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[u8], &Endpoint) -> bool + Send + Sync + 'static,
    {
        self.admission_filter = Some(Arc::new(filter));
        self
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.read_queue_capacity == 0 {
            return Err(Error::Configuration(
                "read_queue_capacity는 0보다 커야 함".into(),
            ));
        }

        if self.event_queue_capacity == 0 {
            return Err(Error::Configuration(
                "event_queue_capacity는 0보다 커야 함".into(),
            ));
        }

        if self.recv_buffer_size == 0 || self.recv_buffer_size > MAX_DATAGRAM_SIZE {
            return Err(Error::Configuration(format!(
                "recv_buffer_size 범위 초과: {} (1 ~ {})",
                self.recv_buffer_size, MAX_DATAGRAM_SIZE
            )));
        }

        if let Some(remote) = self.remote {
            self.transport_kind.ensure_supports(remote.address())?;
        }

        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("delivery_mode", &self.delivery_mode)
            .field("close_transport", &self.close_transport)
            .field("transport_kind", &self.transport_kind)
            .field("remote", &self.remote)
            .field(
                "admission_filter",
                &self.admission_filter.as_ref().map(|_| "<fn>"),
            )
            .field("read_queue_capacity", &self.read_queue_capacity)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .field("recv_buffer_size", &self.recv_buffer_size)
            .finish()
    }
}
