//! 데이터그램 트랜스포트
//!
//! 루트 스트림이 사용하는 외부 협력자. OS UDP 소켓(`UdpTransport`) 외에
//! 같은 계약을 지키는 어떤 구현도 사용 가능

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::debug;

use crate::{Error, Result};

/// 트랜스포트 종류 (주소 패밀리)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    Udp4,
    Udp6,
}

impl TransportKind {
    /// `"udp4"` / `"udp6"` 파싱
    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "udp4" => Ok(TransportKind::Udp4),
            "udp6" => Ok(TransportKind::Udp6),
            other => Err(Error::Configuration(format!(
                "알 수 없는 트랜스포트 종류: {}",
                other
            ))),
        }
    }

    pub fn unspecified(self) -> IpAddr {
        match self {
            TransportKind::Udp4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            TransportKind::Udp6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    pub fn loopback(self) -> IpAddr {
        match self {
            TransportKind::Udp4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            TransportKind::Udp6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    /// 이 종류의 소켓으로 해당 주소를 다룰 수 있는지
    pub fn supports(self, address: IpAddr) -> bool {
        match self {
            TransportKind::Udp4 => address.is_ipv4(),
            // 듀얼 스택 소켓은 v4도 처리 가능
            TransportKind::Udp6 => true,
        }
    }

    /// `supports`가 false면 설정 에러
    pub fn ensure_supports(self, address: IpAddr) -> Result<()> {
        if self.supports(address) {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "주소 {}가 트랜스포트 {}와 맞지 않음",
                address, self
            )))
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp4 => f.write_str("udp4"),
            TransportKind::Udp6 => f.write_str("udp6"),
        }
    }
}

/// 비연결형 데이터그램 엔드포인트
///
/// `close`는 멱등이어야 하며, 닫힌 뒤에는 `closed()`가 즉시 완료되어야 함
pub trait Transport: Send + Sync + 'static {
    /// 로컬 주소에 바인딩하고 실제 바인딩된 주소 반환
    fn bind(&self, addr: SocketAddr) -> impl Future<Output = io::Result<SocketAddr>> + Send;

    /// 지정 주소로 데이터그램 송신
    fn send_to<'a>(
        &'a self,
        buf: &'a [u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;

    /// 데이터그램 하나 수신
    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a;

    /// 트랜스포트가 닫히면 완료
    fn closed(&self) -> impl Future<Output = ()> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn kind(&self) -> TransportKind;

    fn is_bound(&self) -> bool {
        self.local_addr().is_ok()
    }

    fn is_closed(&self) -> bool;

    fn close(&self);
}

/// 닫힘 신호 대기
async fn wait_flag(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn not_bound() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "트랜스포트가 바인딩되지 않음")
}

/// tokio UDP 소켓 기반 트랜스포트
///
/// 소켓은 `bind` 시점에 생성되고 `close` 시 해제됨
pub struct UdpTransport {
    kind: TransportKind,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    closed: watch::Sender<bool>,
}

impl UdpTransport {
    /// 바인딩되지 않은 트랜스포트 생성
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            socket: RwLock::new(None),
            closed: watch::channel(false).0,
        }
    }

    /// 이미 열려 있는 소켓 사용
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        let local = socket.local_addr()?;
        let kind = if local.is_ipv4() {
            TransportKind::Udp4
        } else {
            TransportKind::Udp6
        };

        Ok(Self {
            kind,
            socket: RwLock::new(Some(Arc::new(socket))),
            closed: watch::channel(false).0,
        })
    }

    fn socket(&self) -> io::Result<Arc<UdpSocket>> {
        self.socket.read().clone().ok_or_else(not_bound)
    }
}

impl Transport for UdpTransport {
    fn bind(&self, addr: SocketAddr) -> impl Future<Output = io::Result<SocketAddr>> + Send {
        async move {
            if self.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "닫힌 트랜스포트",
                ));
            }
            if self.socket.read().is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "이미 바인딩된 트랜스포트",
                ));
            }

            let socket = UdpSocket::bind(addr).await?;
            let local = socket.local_addr()?;
            *self.socket.write() = Some(Arc::new(socket));

            debug!("UDP 소켓 바인딩: {}", local);
            Ok(local)
        }
    }

    fn send_to<'a>(
        &'a self,
        buf: &'a [u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        let socket = self.socket();
        async move { socket?.send_to(buf, target).await }
    }

    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
        let socket = self.socket();
        async move { socket?.recv_from(buf).await }
    }

    fn closed(&self) -> impl Future<Output = ()> + Send {
        wait_flag(self.closed.subscribe())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close(&self) {
        let socket = self.socket.write().take();
        if self.closed.send_replace(true) {
            return;
        }
        if let Some(socket) = socket {
            debug!("UDP 소켓 닫힘: {:?}", socket.local_addr().ok());
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! 테스트용 메모리 트랜스포트

    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;

    pub(crate) struct MockTransport {
        local: Mutex<Option<SocketAddr>>,
        inbound_tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
        inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
        sent: Mutex<Vec<(Bytes, SocketAddr)>>,
        close_calls: AtomicUsize,
        closed: watch::Sender<bool>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Arc<Self> {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                local: Mutex::new(None),
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                sent: Mutex::new(Vec::new()),
                close_calls: AtomicUsize::new(0),
                closed: watch::channel(false).0,
            })
        }

        /// 원격 피어에서 데이터그램 도착
        pub(crate) fn inject(&self, payload: &'static [u8], from: &str) {
            let from: SocketAddr = from.parse().unwrap();
            self.inbound_tx
                .send((Bytes::from_static(payload), from))
                .unwrap();
        }

        pub(crate) fn sent(&self) -> Vec<(Bytes, SocketAddr)> {
            self.sent.lock().clone()
        }

        pub(crate) fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockTransport {
        fn bind(&self, addr: SocketAddr) -> impl Future<Output = io::Result<SocketAddr>> + Send {
            async move {
                let mut local = self.local.lock();
                if local.is_some() {
                    return Err(io::Error::new(io::ErrorKind::AddrInUse, "bound"));
                }
                let port = if addr.port() == 0 { 40000 } else { addr.port() };
                let addr = SocketAddr::new(addr.ip(), port);
                *local = Some(addr);
                Ok(addr)
            }
        }

        fn send_to<'a>(
            &'a self,
            buf: &'a [u8],
            target: SocketAddr,
        ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
            async move {
                self.sent.lock().push((Bytes::copy_from_slice(buf), target));
                Ok(buf.len())
            }
        }

        fn recv_from<'a>(
            &'a self,
            buf: &'a mut [u8],
        ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
            async move {
                let mut rx = self.inbound_rx.lock().await;
                match rx.recv().await {
                    Some((payload, from)) => {
                        let len = payload.len().min(buf.len());
                        buf[..len].copy_from_slice(&payload[..len]);
                        Ok((len, from))
                    }
                    None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")),
                }
            }
        }

        fn closed(&self) -> impl Future<Output = ()> + Send {
            wait_flag(self.closed.subscribe())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            (*self.local.lock()).ok_or_else(not_bound)
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Udp4
        }

        fn is_closed(&self) -> bool {
            *self.closed.borrow()
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_parse() {
        assert_eq!(TransportKind::parse("udp4").unwrap(), TransportKind::Udp4);
        assert_eq!(TransportKind::parse("udp6").unwrap(), TransportKind::Udp6);
        assert!(matches!(
            TransportKind::parse("tcp"),
            Err(Error::Configuration(_))
        ));
        assert!(!TransportKind::Udp4.supports("::1".parse().unwrap()));
        assert!(matches!(
            TransportKind::Udp4.ensure_supports("::1".parse().unwrap()),
            Err(Error::Configuration(_))
        ));
        assert!(TransportKind::Udp6
            .ensure_supports("127.0.0.1".parse().unwrap())
            .is_ok());
    }

    #[tokio::test]
    async fn test_udp_bind_once() {
        let transport = UdpTransport::new(TransportKind::Udp4);
        assert!(!transport.is_bound());

        let local = transport
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(local.port(), 0);
        assert_eq!(transport.local_addr().unwrap(), local);

        let again = transport.bind("127.0.0.1:0".parse().unwrap()).await;
        assert_eq!(again.unwrap_err().kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_udp_close_signals() {
        let transport = UdpTransport::new(TransportKind::Udp4);
        transport
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        transport.close();
        transport.close();

        assert!(transport.is_closed());
        assert!(!transport.is_bound());
        tokio::time::timeout(Duration::from_secs(1), transport.closed())
            .await
            .expect("closed() should resolve after close");
    }

    #[tokio::test]
    async fn test_udp_send_recv() {
        let a = UdpTransport::new(TransportKind::Udp4);
        let b = UdpTransport::new(TransportKind::Udp4);
        a.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        a.send_to(b"ping", b_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), b.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
