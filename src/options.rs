//! bind / connect / listen 호출 파라미터

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::endpoint::{parse_ip, validate_port, Endpoint};
use crate::filter::AdmissionFilter;
use crate::Result;

/// 로컬 바인드 파라미터 (모두 생략 시 임의 포트, 모든 인터페이스)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindOptions {
    pub(crate) port: Option<u16>,
    pub(crate) address: Option<IpAddr>,
}

impl BindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: i64) -> Result<Self> {
        self.port = Some(validate_port(port)?);
        Ok(self)
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn parse_address(self, address: &str) -> Result<Self> {
        Ok(self.address(parse_ip(address)?))
    }
}

/// 기본 목적지 지정 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub(crate) port: u16,
    pub(crate) address: Option<IpAddr>,
}

impl ConnectOptions {
    /// 주소 생략 시 루프백으로 연결
    pub fn new(port: i64) -> Result<Self> {
        Ok(Self {
            port: validate_port(port)?,
            address: None,
        })
    }

    pub fn to(endpoint: Endpoint) -> Self {
        Self {
            port: endpoint.port(),
            address: Some(endpoint.address()),
        }
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn parse_address(self, address: &str) -> Result<Self> {
        Ok(self.address(parse_ip(address)?))
    }
}

/// 리스닝 파라미터
#[derive(Clone, Default)]
pub struct ListenOptions {
    pub(crate) bind: BindOptions,
    pub(crate) filter: Option<AdmissionFilter>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: i64) -> Result<Self> {
        self.bind = self.bind.port(port)?;
        Ok(self)
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.bind = self.bind.address(address);
        self
    }

    pub fn parse_address(mut self, address: &str) -> Result<Self> {
        self.bind = self.bind.parse_address(address)?;
        Ok(self)
    }

    /// 수락 필터 교체 (생략 시 설정의 필터 유지)
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[u8], &Endpoint) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn admission_filter(mut self, filter: AdmissionFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenOptions")
            .field("bind", &self.bind)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
