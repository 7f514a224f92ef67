//! 패킷 (페이로드 + 선택적 엔드포인트)
//!
//! StructuredPacket 모드에서 스트림이 읽고 쓰는 값

use std::net::IpAddr;

use bytes::Bytes;

use crate::endpoint::{parse_ip, validate_port, Endpoint};
use crate::Result;

/// 페이로드와 피어 주소/포트를 묶은 값
///
/// 모든 필드가 선택적. 수신 시에는 항상 채워지며,
/// 송신 시 비어 있는 주소/포트는 스트림의 기본 피어로 보충됨
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    payload: Option<Bytes>,
    address: Option<IpAddr>,
    port: Option<u16>,
}

impl Packet {
    /// 페이로드만 가진 패킷
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: Some(payload.into()),
            address: None,
            port: None,
        }
    }

    /// 목적지가 지정된 패킷
    pub fn to(payload: impl Into<Bytes>, endpoint: Endpoint) -> Self {
        Self {
            payload: Some(payload.into()),
            address: Some(endpoint.address()),
            port: Some(endpoint.port()),
        }
    }

    pub fn builder() -> PacketBuilder {
        PacketBuilder::default()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// 주소와 포트가 모두 있을 때만 엔드포인트 반환
    pub fn endpoint(&self) -> Option<Endpoint> {
        match (self.address, self.port) {
            (Some(address), Some(port)) => Endpoint::new(address, port).ok(),
            _ => None,
        }
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = Some(payload.into());
    }

    pub fn set_port(&mut self, port: i64) -> Result<()> {
        self.port = Some(validate_port(port)?);
        Ok(())
    }

    pub fn set_address(&mut self, address: &str) -> Result<()> {
        self.address = Some(parse_ip(address)?);
        Ok(())
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.address = Some(endpoint.address());
        self.port = Some(endpoint.port());
    }

    /// (페이로드, 주소, 포트) 분해
    pub fn into_parts(self) -> (Option<Bytes>, Option<IpAddr>, Option<u16>) {
        (self.payload, self.address, self.port)
    }
}

/// 패킷 빌더
///
/// 각 필드를 타입별 메서드로 지정. 포트 검증은 `build`에서 수행
#[derive(Debug, Default)]
pub struct PacketBuilder {
    payload: Option<Bytes>,
    address: Option<IpAddr>,
    port: Option<i64>,
}

impl PacketBuilder {
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.port = Some(port);
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.address = Some(endpoint.address());
        self.port = Some(endpoint.port() as i64);
        self
    }

    pub fn build(self) -> Result<Packet> {
        let port = self.port.map(validate_port).transpose()?;
        Ok(Packet {
            payload: self.payload,
            address: self.address,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_builder_any_order() {
        let endpoint = Endpoint::parse("127.0.0.1", 4444).unwrap();
        let a = Packet::builder()
            .port(4444)
            .payload(&b"hello"[..])
            .address(endpoint.address())
            .build()
            .unwrap();
        let b = Packet::builder()
            .endpoint(endpoint)
            .payload(&b"hello"[..])
            .build()
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.endpoint(), Some(endpoint));
    }

    #[test]
    fn test_builder_rejects_bad_port() {
        let result = Packet::builder().payload(&b"x"[..]).port(0).build();
        assert!(matches!(result, Err(Error::InvalidPort(0))));
    }

    #[test]
    fn test_partial_packet() {
        let mut packet = Packet::new(&b"hi there"[..]);
        assert!(packet.endpoint().is_none());

        packet.set_port(5000).unwrap();
        assert!(packet.endpoint().is_none());
        assert!(packet.set_address("localhost").is_err());

        packet.set_address("127.0.0.1").unwrap();
        assert_eq!(packet.endpoint().unwrap().port(), 5000);
    }

    #[test]
    fn test_decode_only_packet_without_payload() {
        let packet = Packet::builder().port(53).build().unwrap();
        assert!(packet.payload().is_none());
        assert_eq!(packet.port(), Some(53));
    }
}
