//! 전송 모드
//!
//! 엔드포인트 메타데이터가 페이로드와 함께 어떻게 전달되는지 결정
//! - RawBytes: 바이트만 전달
//! - TaggedBytes: 바이트 + 대역 외 주소/포트
//! - StructuredPacket: `Packet` 값

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::packet::Packet;
use crate::{Error, Result};

/// 스트림 전송 모드 (생성 시 고정)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// 페이로드 그대로
    #[default]
    RawBytes,

    /// 페이로드 + 출처/목적지 메타데이터
    TaggedBytes,

    /// `Packet` 값
    StructuredPacket,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryMode::RawBytes => "RawBytes",
            DeliveryMode::TaggedBytes => "TaggedBytes",
            DeliveryMode::StructuredPacket => "StructuredPacket",
        };
        f.write_str(name)
    }
}

/// 주소/포트 메타데이터가 붙은 바이트
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedBytes {
    pub bytes: Bytes,
    pub address: Option<IpAddr>,
    pub port: Option<u16>,
}

impl TaggedBytes {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            address: None,
            port: None,
        }
    }

    pub fn with_endpoint(bytes: impl Into<Bytes>, endpoint: Endpoint) -> Self {
        Self {
            bytes: bytes.into(),
            address: Some(endpoint.address()),
            port: Some(endpoint.port()),
        }
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        match (self.address, self.port) {
            (Some(address), Some(port)) => Endpoint::new(address, port).ok(),
            _ => None,
        }
    }
}

/// 스트림에서 읽고 쓰는 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Raw(Bytes),
    Tagged(TaggedBytes),
    Packet(Packet),
}

impl Datagram {
    /// 값 종류 이름 (에러 메시지용)
    pub fn kind(&self) -> &'static str {
        match self {
            Datagram::Raw(_) => "RawBytes",
            Datagram::Tagged(_) => "TaggedBytes",
            Datagram::Packet(_) => "StructuredPacket",
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Datagram::Raw(bytes) => Some(bytes),
            Datagram::Tagged(tagged) => Some(&tagged.bytes),
            Datagram::Packet(packet) => packet.payload(),
        }
    }

    /// 값에 붙은 엔드포인트 (Raw는 항상 None)
    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            Datagram::Raw(_) => None,
            Datagram::Tagged(tagged) => tagged.endpoint(),
            Datagram::Packet(packet) => packet.endpoint(),
        }
    }

    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            Datagram::Raw(bytes) => Some(bytes),
            Datagram::Tagged(tagged) => Some(tagged.bytes),
            Datagram::Packet(packet) => packet.into_parts().0,
        }
    }
}

impl From<Bytes> for Datagram {
    fn from(bytes: Bytes) -> Self {
        Datagram::Raw(bytes)
    }
}

impl From<Vec<u8>> for Datagram {
    fn from(bytes: Vec<u8>) -> Self {
        Datagram::Raw(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Datagram {
    fn from(bytes: &'static [u8]) -> Self {
        Datagram::Raw(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Datagram {
    fn from(text: &'static str) -> Self {
        Datagram::Raw(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Datagram {
    fn from(text: String) -> Self {
        Datagram::Raw(Bytes::from(text))
    }
}

impl From<TaggedBytes> for Datagram {
    fn from(tagged: TaggedBytes) -> Self {
        Datagram::Tagged(tagged)
    }
}

impl From<Packet> for Datagram {
    fn from(packet: Packet) -> Self {
        Datagram::Packet(packet)
    }
}

impl DeliveryMode {
    /// 수신 페이로드를 모드에 맞는 값으로 변환
    pub fn decode(self, payload: Bytes, origin: Endpoint) -> Datagram {
        match self {
            DeliveryMode::RawBytes => Datagram::Raw(payload),
            DeliveryMode::TaggedBytes => Datagram::Tagged(TaggedBytes::with_endpoint(payload, origin)),
            DeliveryMode::StructuredPacket => Datagram::Packet(Packet::to(payload, origin)),
        }
    }

    /// 송신 값에서 (페이로드, 목적지) 결정
    ///
    /// 우선순위: 호출별 명시 엔드포인트 > 값의 메타데이터/패킷 필드 > 스트림 기본 피어.
    /// 메타데이터는 주소와 포트를 필드별로 보충함
    pub fn resolve(
        self,
        datagram: Datagram,
        explicit: Option<Endpoint>,
        fallback: Option<Endpoint>,
    ) -> Result<(Bytes, Endpoint)> {
        let (payload, address, port) = match (self, datagram) {
            (DeliveryMode::RawBytes, Datagram::Raw(bytes)) => (bytes, None, None),
            (DeliveryMode::TaggedBytes, Datagram::Raw(bytes)) => (bytes, None, None),
            (DeliveryMode::TaggedBytes, Datagram::Tagged(tagged)) => {
                (tagged.bytes, tagged.address, tagged.port)
            }
            (DeliveryMode::StructuredPacket, Datagram::Packet(packet)) => {
                let (payload, address, port) = packet.into_parts();
                (payload.ok_or(Error::MissingPayload)?, address, port)
            }
            (mode, other) => {
                return Err(Error::MalformedPayload {
                    expected: mode,
                    got: other.kind(),
                })
            }
        };

        if let Some(endpoint) = explicit {
            return Ok((payload, endpoint));
        }

        let address = address
            .or(fallback.map(|f| f.address()))
            .ok_or(Error::MissingEndpoint)?;
        let port = port
            .or(fallback.map(|f| f.port()))
            .ok_or(Error::MissingEndpoint)?;

        Ok((payload, Endpoint::new(address, port)?))
    }
}
