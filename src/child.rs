//! 하위 스트림
//!
//! 한 원격 피어에 고정된 가상 양방향 스트림. 자체 트랜스포트가 없고
//! 모든 송신은 루트 스트림을 통해 나감

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, PeerKey};
use crate::mode::{Datagram, DeliveryMode};
use crate::options::{BindOptions, ConnectOptions, ListenOptions};
use crate::root::{request, RootCmd, RootShared};
use crate::{Error, Result};

/// 스트림 식별자 (프로세스 내 유일)
pub type StreamId = u64;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// 루트에 대한 비소유 연결 정보
pub(crate) struct ParentLink {
    pub(crate) cmd_tx: mpsc::UnboundedSender<RootCmd>,
    pub(crate) shared: Weak<RootShared>,
    pub(crate) mode: DeliveryMode,
    pub(crate) close_transport: bool,
    pub(crate) read_queue_capacity: usize,
}

/// 루트와 하위 스트림이 공유하는 종료 플래그
struct ChildShared {
    writable_ended: AtomicBool,
}

impl ChildShared {
    fn writable_ended(&self) -> bool {
        self.writable_ended.load(Ordering::SeqCst)
    }

    fn end_writable(&self) -> bool {
        !self.writable_ended.swap(true, Ordering::SeqCst)
    }
}

/// 라우팅 테이블 항목 (루트 소유)
pub(crate) struct Route {
    id: StreamId,
    tx: mpsc::Sender<Datagram>,
    shared: Arc<ChildShared>,
}

impl Route {
    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    /// 하위 스트림이 읽기 측을 닫았는지
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 하위 스트림 읽기 큐에 전달
    pub(crate) fn deliver(&self, datagram: Datagram) {
        match self.tx.try_send(datagram) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("하위 스트림 {} 읽기 큐 가득 참, 데이터그램 버림", self.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("닫힌 하위 스트림 {} 으로 온 데이터그램 버림", self.id);
            }
        }
    }

    /// 루트 종료에 따른 하위 스트림 종료
    ///
    /// 쓰기 측을 끝내고 송신자를 버려 읽기 측 끝을 알림
    pub(crate) fn close(self) {
        self.shared.end_writable();
    }
}

/// 피어별 가상 스트림
///
/// 루트의 수락 경로에서만 생성됨. 드롭하면 닫힘
pub struct ChildStream {
    id: StreamId,
    remote: Endpoint,
    key: PeerKey,
    mode: DeliveryMode,
    close_transport: bool,
    root_tx: mpsc::UnboundedSender<RootCmd>,
    root: Weak<RootShared>,
    shared: Arc<ChildShared>,
    read_rx: mpsc::Receiver<Datagram>,
    closed: bool,
}

impl ChildStream {
    /// 하위 스트림과 라우팅 항목 생성
    pub(crate) fn new(
        link: ParentLink,
        remote: Endpoint,
        mode: DeliveryMode,
    ) -> Result<(Self, Route)> {
        if mode != link.mode {
            return Err(Error::ModeMismatch {
                root: link.mode,
                child: mode,
            });
        }
        if link.read_queue_capacity == 0 {
            return Err(Error::Configuration(
                "read_queue_capacity는 0보다 커야 함".into(),
            ));
        }

        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, read_rx) = mpsc::channel(link.read_queue_capacity);
        let shared = Arc::new(ChildShared {
            writable_ended: AtomicBool::new(false),
        });

        let child = Self {
            id,
            remote,
            key: remote.peer_key(),
            mode,
            close_transport: link.close_transport,
            root_tx: link.cmd_tx,
            root: link.shared,
            shared: shared.clone(),
            read_rx,
            closed: false,
        };
        let route = Route { id, tx, shared };

        Ok((child, route))
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// 고정된 원격 피어
    pub fn remote_endpoint(&self) -> Endpoint {
        self.remote
    }

    pub fn peer_key(&self) -> &PeerKey {
        &self.key
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// 루트에서 상속한 값. 하위 스트림은 트랜스포트를 닫지 않음
    pub fn close_transport(&self) -> bool {
        self.close_transport
    }

    /// 루트의 로컬 주소 (루트가 사라졌으면 None)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.root.upgrade().and_then(|root| root.local_addr())
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.shared.writable_ended()
    }

    /// 피어에게 송신
    ///
    /// 값에 포함된 엔드포인트는 무시하고 항상 이 스트림의 피어로 보냄
    pub async fn write(&self, data: impl Into<Datagram>) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::WriteAfterClose);
        }

        let datagram = data.into();
        let target = Some(self.remote);
        request(
            &self.root_tx,
            |reply| RootCmd::Write {
                datagram,
                target,
                reply,
            },
            || Error::WriteAfterClose,
        )
        .await
    }

    /// 다음 데이터 대기. 읽기 측이 끝나면 None
    pub async fn read(&mut self) -> Option<Datagram> {
        self.read_rx.recv().await
    }

    pub fn try_read(&mut self) -> Option<Datagram> {
        self.read_rx.try_recv().ok()
    }

    /// 하위 스트림 종료 (멱등)
    ///
    /// 라우팅 테이블에서 자신을 제거. 트랜스포트는 건드리지 않음
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.shared.end_writable();
        self.read_rx.close();

        let _ = self.root_tx.send(RootCmd::Deregister {
            key: self.key.clone(),
            id: self.id,
        });
        debug!("하위 스트림 종료: {}", self.key);
    }

    pub fn bind(&self, _opts: BindOptions) -> Result<SocketAddr> {
        Err(Error::Unsupported("bind"))
    }

    pub fn connect(&self, _opts: ConnectOptions) -> Result<Endpoint> {
        Err(Error::Unsupported("connect"))
    }

    pub fn listen(&self, _opts: ListenOptions) -> Result<SocketAddr> {
        Err(Error::Unsupported("listen"))
    }

    pub fn create_child(&self, _remote: Endpoint) -> Result<ChildStream> {
        Err(Error::Unsupported("create_child"))
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChildStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildStream")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn link(mode: DeliveryMode) -> (ParentLink, mpsc::UnboundedReceiver<RootCmd>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let link = ParentLink {
            cmd_tx,
            shared: Weak::new(),
            mode,
            close_transport: true,
            read_queue_capacity: 8,
        };
        (link, cmd_rx)
    }

    fn peer() -> Endpoint {
        Endpoint::parse("192.168.1.1", 8080).unwrap()
    }

    #[test]
    fn test_mode_must_match_root() {
        let (link, _rx) = link(DeliveryMode::RawBytes);
        let result = ChildStream::new(link, peer(), DeliveryMode::StructuredPacket);
        assert!(matches!(result, Err(Error::ModeMismatch { .. })));
    }

    #[test]
    fn test_unsupported_operations() {
        let (link, _rx) = link(DeliveryMode::RawBytes);
        let (child, _route) = ChildStream::new(link, peer(), DeliveryMode::RawBytes).unwrap();

        let errors = [
            child.bind(BindOptions::new()).unwrap_err(),
            child.connect(ConnectOptions::new(80).unwrap()).unwrap_err(),
            child.listen(ListenOptions::new()).unwrap_err(),
            child.create_child(peer()).unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_properties() {
        let (link, _rx) = link(DeliveryMode::TaggedBytes);
        let (child, route) = ChildStream::new(link, peer(), DeliveryMode::TaggedBytes).unwrap();

        assert_eq!(child.remote_endpoint(), peer());
        assert_eq!(child.peer_key().as_str(), "192.168.1.1:8080");
        assert_eq!(route.id(), child.id());
        assert!(child.close_transport());
        assert!(child.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_close_deregisters_once() {
        let (link, mut cmd_rx) = link(DeliveryMode::RawBytes);
        let (mut child, route) = ChildStream::new(link, peer(), DeliveryMode::RawBytes).unwrap();

        child.close();
        child.close();
        drop(child);

        assert!(route.is_closed());
        match cmd_rx.recv().await {
            Some(RootCmd::Deregister { key, id }) => {
                assert_eq!(key, peer().peer_key());
                assert_eq!(id, route.id());
            }
            _ => panic!("expected deregister"),
        }
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_delegates_with_own_endpoint() {
        let (link, mut cmd_rx) = link(DeliveryMode::StructuredPacket);
        let (child, _route) =
            ChildStream::new(link, peer(), DeliveryMode::StructuredPacket).unwrap();

        let other = Endpoint::parse("10.9.9.9", 1).unwrap();
        let packet = crate::packet::Packet::to(&b"data"[..], other);

        let root = tokio::spawn(async move {
            match cmd_rx.recv().await {
                Some(RootCmd::Write {
                    target, reply, ..
                }) => {
                    assert_eq!(target, Some(peer()));
                    let _ = reply.send(Ok(4));
                }
                _ => panic!("expected write"),
            }
        });

        assert_eq!(child.write(packet).await.unwrap(), 4);
        root.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_close() {
        let (link, mut cmd_rx) = link(DeliveryMode::RawBytes);
        let (mut child, _route) = ChildStream::new(link, peer(), DeliveryMode::RawBytes).unwrap();

        child.close();
        assert!(matches!(
            child.write("x").await,
            Err(Error::WriteAfterClose)
        ));

        // Deregister 외 다른 명령은 없어야 함
        assert!(matches!(
            cmd_rx.recv().await,
            Some(RootCmd::Deregister { .. })
        ));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_delivery_and_cascade() {
        let (link, _rx) = link(DeliveryMode::RawBytes);
        let (mut child, route) = ChildStream::new(link, peer(), DeliveryMode::RawBytes).unwrap();

        route.deliver(Datagram::from("one"));
        route.deliver(Datagram::from("two"));
        route.close();

        assert_eq!(child.read().await, Some(Datagram::from("one")));
        assert_eq!(child.read().await, Some(Datagram::from("two")));
        assert_eq!(child.read().await, None);
        assert!(child.is_closed());
    }
}
