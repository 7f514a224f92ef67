//! 피어 엔드포인트 (주소 + 포트) 와 라우팅 키

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::{Error, Result};

/// 유효한 포트인지 확인 (1 ~ 65535)
pub fn is_valid_port(port: i64) -> bool {
    (1..=0xffff).contains(&port)
}

/// 포트 검증
pub fn validate_port(port: i64) -> Result<u16> {
    if is_valid_port(port) {
        Ok(port as u16)
    } else {
        Err(Error::InvalidPort(port))
    }
}

/// IPv4/IPv6 리터럴 파싱
pub fn parse_ip(address: &str) -> Result<IpAddr> {
    address
        .parse()
        .map_err(|_| Error::InvalidAddress(address.to_string()))
}

/// 주소와 같은 패밀리의 unspecified 주소 (0.0.0.0 / ::)
pub fn unspecified_for(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// 원격 피어 엔드포인트
///
/// 생성 이후 변경되지 않음. 포트 0은 허용하지 않음
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    address: IpAddr,
    port: u16,
}

impl Endpoint {
    /// 새 엔드포인트 생성
    pub fn new(address: IpAddr, port: u16) -> Result<Self> {
        let port = validate_port(port as i64)?;
        Ok(Self { address, port })
    }

    /// 문자열 주소와 정수 포트로 생성
    pub fn parse(address: &str, port: i64) -> Result<Self> {
        let port = validate_port(port)?;
        Ok(Self {
            address: parse_ip(address)?,
            port,
        })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// 라우팅 테이블 키
    pub fn peer_key(&self) -> PeerKey {
        PeerKey(format!("{}:{}", self.address, self.port))
    }
}

impl TryFrom<SocketAddr> for Endpoint {
    type Error = Error;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}

/// 피어 키 (`address:port`)
///
/// 루트 스트림의 라우팅 테이블 인덱스로만 사용
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(String);

impl PeerKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range() {
        assert!(!is_valid_port(0));
        assert!(is_valid_port(1));
        assert!(is_valid_port(65535));
        assert!(!is_valid_port(65536));
        assert!(!is_valid_port(-1));
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(matches!(
            Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            Err(Error::InvalidPort(0))
        ));
        assert!(matches!(
            Endpoint::parse("not-an-ip", 80),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            Endpoint::parse("10.0.0.1", 70000),
            Err(Error::InvalidPort(70000))
        ));

        let endpoint = Endpoint::parse("::1", 9000).unwrap();
        assert_eq!(endpoint.address(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(endpoint.port(), 9000);
    }

    #[test]
    fn test_peer_key() {
        let v4 = Endpoint::parse("192.168.1.1", 8080).unwrap();
        assert_eq!(v4.peer_key().as_str(), "192.168.1.1:8080");

        let v6 = Endpoint::parse("::1", 8080).unwrap();
        assert_eq!(v6.peer_key().as_str(), "::1:8080");

        let same = Endpoint::try_from("192.168.1.1:8080".parse::<SocketAddr>().unwrap()).unwrap();
        assert_eq!(v4.peer_key(), same.peer_key());
    }

    #[test]
    fn test_unspecified_family() {
        let v6 = parse_ip("fe80::1").unwrap();
        assert_eq!(unspecified_for(v6), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        let v4 = parse_ip("8.8.8.8").unwrap();
        assert_eq!(unspecified_for(v4), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
