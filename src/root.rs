//! 루트 스트림
//!
//! - 공유 트랜스포트 소유 (`close_transport`가 false면 빌려 쓰기만 함)
//! - bind / connect / listen 상태 머신
//! - 피어 키 기반 라우팅 테이블 + 수락 필터
//! - 모든 송신은 라우팅 태스크 하나에서 직렬화
//!
//! 라우팅 테이블과 상태 전이는 라우팅 태스크 안에서만 변경됨.
//! 핸들(`RootStream`)과 하위 스트림은 명령 채널로만 요청을 보냄

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::child::{ChildStream, ParentLink, Route, StreamId};
use crate::endpoint::{unspecified_for, Endpoint, PeerKey};
use crate::filter::{accept_all, AdmissionFilter};
use crate::mode::{Datagram, DeliveryMode};
use crate::options::{BindOptions, ConnectOptions, ListenOptions};
use crate::state::StreamState;
use crate::transport::{Transport, UdpTransport};
use crate::{Config, Error, Result};

/// 루트 스트림 알림
#[derive(Debug)]
pub enum RootEvent {
    /// 로컬 주소에 바인딩됨
    Bound(SocketAddr),

    /// 기본 목적지 설정됨
    Connected(Endpoint),

    /// 리스닝 시작
    Listening(SocketAddr),

    /// 새 피어에 대한 하위 스트림 생성
    Connection(ChildStream),

    /// 루트 스트림 종료
    Closed,
}

type Reply<T> = oneshot::Sender<Result<T>>;

/// 라우팅 태스크 명령
pub(crate) enum RootCmd {
    Bind {
        opts: BindOptions,
        reply: Reply<SocketAddr>,
    },
    Connect {
        opts: ConnectOptions,
        reply: Reply<Endpoint>,
    },
    Listen {
        opts: ListenOptions,
        reply: Reply<SocketAddr>,
    },
    Write {
        datagram: Datagram,
        target: Option<Endpoint>,
        reply: Reply<usize>,
    },
    Inbound {
        payload: Bytes,
        origin: SocketAddr,
    },
    Deregister {
        key: PeerKey,
        id: StreamId,
    },
    Close,
}

/// 명령 전송 후 응답 대기
///
/// 라우팅 태스크가 이미 끝났으면 `gone()` 에러
pub(crate) async fn request<R>(
    cmd_tx: &mpsc::UnboundedSender<RootCmd>,
    make: impl FnOnce(Reply<R>) -> RootCmd,
    gone: fn() -> Error,
) -> Result<R> {
    let (reply, rx) = oneshot::channel();
    cmd_tx.send(make(reply)).map_err(|_| gone())?;
    rx.await.map_err(|_| gone())?
}

/// 핸들, 라우팅 태스크, 하위 스트림이 함께 보는 상태
pub(crate) struct RootShared {
    mode: DeliveryMode,
    state: RwLock<StreamState>,
    local_addr: RwLock<Option<SocketAddr>>,
    default_peer: RwLock<Option<Endpoint>>,
    writable_ended: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl RootShared {
    pub(crate) fn state(&self) -> StreamState {
        *self.state.read()
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    fn default_peer(&self) -> Option<Endpoint> {
        *self.default_peer.read()
    }

    fn writable_ended(&self) -> bool {
        self.writable_ended.load(Ordering::SeqCst)
    }

    /// 쓰기 측 종료 (처음 한 번만 true)
    fn end_writable(&self) -> bool {
        !self.writable_ended.swap(true, Ordering::SeqCst)
    }
}

/// 라우팅 태스크 내부 상태 (단일 태스크에서만 접근)
struct RootInner<T: Transport> {
    config: Config,
    transport: Arc<T>,
    shared: Arc<RootShared>,
    cmd_tx: mpsc::UnboundedSender<RootCmd>,
    routes: HashMap<PeerKey, Route>,
    filter: AdmissionFilter,
    read_tx: Option<mpsc::Sender<Datagram>>,
    events_tx: mpsc::Sender<RootEvent>,
    recv_task: Option<JoinHandle<()>>,
    transport_released: bool,
}

impl<T: Transport> RootInner<T> {
    /// 명령 처리 루프
    ///
    /// 바인딩 여부와 관계없이 트랜스포트 닫힘을 감시함
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<RootCmd>) {
        let transport = self.transport.clone();

        loop {
            tokio::select! {
                biased;

                _ = transport.closed(), if !self.transport_released => {
                    info!("트랜스포트가 외부에서 닫힘");
                    self.transport_released = true;
                    self.shutdown();
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    self.handle(cmd).await;
                }
            }

            if self.shared.state() == StreamState::Closed {
                break;
            }
        }

        debug!("루트 라우팅 태스크 종료");
    }

    async fn handle(&mut self, cmd: RootCmd) {
        match cmd {
            RootCmd::Bind { opts, reply } => {
                let result = self.bind(opts.port, opts.address).await;
                let _ = reply.send(result);
            }
            RootCmd::Connect { opts, reply } => {
                let result = self.connect(opts).await;
                let _ = reply.send(result);
            }
            RootCmd::Listen { opts, reply } => {
                let result = self.listen(opts).await;
                let _ = reply.send(result);
            }
            RootCmd::Write {
                datagram,
                target,
                reply,
            } => {
                let result = self.write(datagram, target).await;
                if let Err(e) = &result {
                    debug!("송신 실패: {}", e);
                }
                let _ = reply.send(result);
            }
            RootCmd::Inbound { payload, origin } => {
                self.dispatch(payload, origin);
            }
            RootCmd::Deregister { key, id } => {
                self.deregister(&key, id);
            }
            RootCmd::Close => {
                self.shutdown();
            }
        }
    }

    fn set_state(&self, next: StreamState) -> Result<()> {
        let mut state = self.shared.state.write();
        *state = state.transition(next)?;
        Ok(())
    }

    /// 알림 전달. 큐가 가득 찼거나 수신자가 없으면 false
    fn emit(&self, event: RootEvent) -> bool {
        match self.events_tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("알림 큐 가득 참, 알림 버림: {:?}", event);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("이벤트 수신자 없음");
                false
            }
        }
    }

    /// 수신 루프 시작 (데이터 전용, 트랜스포트가 닫히면 끝남)
    fn spawn_recv_loop(&mut self) {
        let transport = self.transport.clone();
        let cmd_tx = self.cmd_tx.clone();
        let buf_size = self.config.recv_buffer_size;

        self.recv_task = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; buf_size];

            loop {
                tokio::select! {
                    biased;

                    _ = transport.closed() => break,
                    result = transport.recv_from(&mut buf) => {
                        match result {
                            Ok((len, origin)) => {
                                let payload = Bytes::copy_from_slice(&buf[..len]);
                                if cmd_tx.send(RootCmd::Inbound { payload, origin }).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                if transport.is_closed() {
                                    break;
                                }
                                warn!("수신 에러: {}", e);
                            }
                        }
                    }
                }
            }
        }));
    }

    async fn bind(&mut self, port: Option<u16>, address: Option<IpAddr>) -> Result<SocketAddr> {
        let state = self.shared.state();
        if state.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if state.is_bound() {
            return Err(Error::AlreadyBound);
        }

        let ip = address.unwrap_or_else(|| self.transport.kind().unspecified());
        let local = self
            .transport
            .bind(SocketAddr::new(ip, port.unwrap_or(0)))
            .await?;

        self.set_state(StreamState::Bound)?;
        *self.shared.local_addr.write() = Some(local);
        self.spawn_recv_loop();

        info!("루트 스트림 바인딩: {}", local);
        self.emit(RootEvent::Bound(local));
        Ok(local)
    }

    async fn connect(&mut self, opts: ConnectOptions) -> Result<Endpoint> {
        let state = self.shared.state();
        if state.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if state == StreamState::Listening {
            return Err(Error::InvalidState {
                from: state,
                to: StreamState::Connected,
            });
        }

        let kind = self.transport.kind();
        if let Some(address) = opts.address {
            kind.ensure_supports(address)?;
        }
        let remote = Endpoint::new(opts.address.unwrap_or_else(|| kind.loopback()), opts.port)?;

        if state == StreamState::Unbound {
            // 주소를 생략하면 루프백에만 바인딩
            let hint = match opts.address {
                Some(address) => unspecified_for(address),
                None => kind.loopback(),
            };
            self.bind(None, Some(hint)).await?;
        }

        self.set_state(StreamState::Connected)?;
        *self.shared.default_peer.write() = Some(remote);

        info!("기본 목적지 설정: {}", remote);
        self.emit(RootEvent::Connected(remote));
        Ok(remote)
    }

    async fn listen(&mut self, opts: ListenOptions) -> Result<SocketAddr> {
        let state = self.shared.state();
        match state {
            StreamState::Unbound => {
                self.bind(opts.bind.port, opts.bind.address).await?;
            }
            StreamState::Bound => {
                // 이미 바인딩된 주소와 다른 주소는 요청할 수 없음
                let local = self.shared.local_addr();
                let port_differs = opts
                    .bind
                    .port
                    .is_some_and(|port| local.map(|l| l.port()) != Some(port));
                let address_differs = opts
                    .bind
                    .address
                    .is_some_and(|address| local.map(|l| l.ip()) != Some(address));
                if port_differs || address_differs {
                    return Err(Error::AlreadyBound);
                }
            }
            StreamState::Closing | StreamState::Closed => return Err(Error::ConnectionClosed),
            StreamState::Connected | StreamState::Listening => {
                return Err(Error::InvalidState {
                    from: state,
                    to: StreamState::Listening,
                })
            }
        }

        if let Some(filter) = opts.filter {
            self.filter = filter;
        }
        self.set_state(StreamState::Listening)?;

        let local = self.transport.local_addr()?;
        info!("리스닝 시작: {}", local);
        self.emit(RootEvent::Listening(local));
        Ok(local)
    }

    async fn write(&mut self, datagram: Datagram, target: Option<Endpoint>) -> Result<usize> {
        if self.shared.writable_ended() || self.shared.state().is_closed() {
            return Err(Error::WriteAfterClose);
        }

        let (payload, dest) =
            self.shared
                .mode
                .resolve(datagram, target, self.shared.default_peer())?;

        if self.shared.state() == StreamState::Unbound {
            self.bind(None, Some(unspecified_for(dest.address())))
                .await?;
        }

        let sent = self
            .transport
            .send_to(&payload, dest.socket_addr())
            .await?;
        debug!("송신: {} bytes -> {}", sent, dest);
        Ok(sent)
    }

    /// 수신 데이터그램 라우팅
    fn dispatch(&mut self, payload: Bytes, origin: SocketAddr) {
        let state = self.shared.state();
        if state.is_closed() {
            return;
        }

        let origin = match Endpoint::try_from(origin) {
            Ok(origin) => origin,
            Err(_) => {
                debug!("유효하지 않은 출처, 무시: {}", origin);
                return;
            }
        };

        if state != StreamState::Listening {
            self.deliver_local(self.shared.mode.decode(payload, origin));
            return;
        }

        let key = origin.peer_key();

        // 닫혔지만 아직 등록 해제 전인 경로는 없는 것으로 취급
        if self.routes.get(&key).is_some_and(Route::is_closed) {
            self.routes.remove(&key);
        }

        if let Some(route) = self.routes.get(&key) {
            route.deliver(self.shared.mode.decode(payload, origin));
            return;
        }

        if !(self.filter)(&payload[..], &origin) {
            debug!("수락 필터가 거부: {}", key);
            return;
        }

        self.admit(key, origin, payload);
    }

    /// 새 하위 스트림 생성 및 등록
    ///
    /// 연결 알림을 먼저 보내고 첫 데이터그램은 그 뒤에 큐에 넣음
    fn admit(&mut self, key: PeerKey, origin: Endpoint, payload: Bytes) {
        let link = ParentLink {
            cmd_tx: self.cmd_tx.clone(),
            shared: Arc::downgrade(&self.shared),
            mode: self.shared.mode,
            close_transport: self.config.close_transport,
            read_queue_capacity: self.config.read_queue_capacity,
        };

        let (child, route) = match ChildStream::new(link, origin, self.shared.mode) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("하위 스트림 생성 실패: {}", e);
                return;
            }
        };

        // 알림을 못 보내면 하위 스트림은 버려지고 피어는 다음 데이터그램에서 다시 수락 대상이 됨
        if !self.emit(RootEvent::Connection(child)) {
            debug!("연결 알림 실패, 수락 취소: {}", key);
            return;
        }

        info!("새 연결: {}", key);
        route.deliver(self.shared.mode.decode(payload, origin));
        self.routes.insert(key, route);
    }

    fn deliver_local(&self, datagram: Datagram) {
        let Some(read_tx) = &self.read_tx else {
            return;
        };

        match read_tx.try_send(datagram) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("읽기 큐 가득 참, 데이터그램 버림");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn deregister(&mut self, key: &PeerKey, id: StreamId) {
        if self.routes.get(key).is_some_and(|route| route.id() == id) {
            self.routes.remove(key);
            debug!("라우팅 해제: {}", key);
        }
    }

    /// 종료 시퀀스 (한 번만 수행)
    fn shutdown(&mut self) {
        if self.shared.state() == StreamState::Closed {
            return;
        }
        let _ = self.set_state(StreamState::Closing);

        self.shared.end_writable();
        self.read_tx = None;

        for (key, route) in self.routes.drain() {
            debug!("하위 스트림 종료: {}", key);
            route.close();
        }

        if let Some(task) = self.recv_task.take() {
            task.abort();
        }

        if self.config.close_transport && !self.transport_released {
            self.transport.close();
        }
        self.transport_released = true;

        let _ = self.set_state(StreamState::Closed);
        self.shared.closed_tx.send_replace(true);

        info!("루트 스트림 종료");
        self.emit(RootEvent::Closed);
    }
}

/// 루트 스트림 핸들
///
/// tokio 런타임 안에서 생성해야 함. 드롭하면 종료 시퀀스가 요청됨
///
/// 알림 큐는 `Config::event_queue_capacity`로 제한됨. `next_event`/`accept`로
/// 비우지 않으면 큐가 가득 찬 동안 새 피어는 수락되지 않음
pub struct RootStream<T: Transport = UdpTransport> {
    cmd_tx: mpsc::UnboundedSender<RootCmd>,
    shared: Arc<RootShared>,
    transport: Arc<T>,
    read_rx: mpsc::Receiver<Datagram>,
    events_rx: mpsc::Receiver<RootEvent>,
}

impl RootStream<UdpTransport> {
    /// `config.transport_kind` 종류의 UDP 트랜스포트를 직접 열어 생성
    pub fn open(config: Config) -> Result<Self> {
        let transport = Arc::new(UdpTransport::new(config.transport_kind));
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> RootStream<T> {
    /// 외부 트랜스포트로 생성
    ///
    /// 이미 바인딩된 트랜스포트면 `Bound` 상태로 시작
    pub fn with_transport(transport: Arc<T>, config: Config) -> Result<Self> {
        config.validate()?;

        if transport.is_closed() {
            return Err(Error::Configuration("트랜스포트가 이미 닫혀 있음".into()));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Configuration("tokio 런타임 밖에서 생성할 수 없음".into()))?;

        let local = transport.local_addr().ok();
        let state = if local.is_some() {
            StreamState::Bound
        } else {
            StreamState::Unbound
        };

        let shared = Arc::new(RootShared {
            mode: config.delivery_mode,
            state: RwLock::new(state),
            local_addr: RwLock::new(local),
            default_peer: RwLock::new(config.remote),
            writable_ended: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (read_tx, read_rx) = mpsc::channel(config.read_queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);

        let mut inner = RootInner {
            filter: config.admission_filter.clone().unwrap_or_else(accept_all),
            config,
            transport: transport.clone(),
            shared: shared.clone(),
            cmd_tx: cmd_tx.clone(),
            routes: HashMap::new(),
            read_tx: Some(read_tx),
            events_tx,
            recv_task: None,
            transport_released: false,
        };

        let _guard = runtime.enter();
        if state.is_bound() {
            inner.spawn_recv_loop();
        }
        runtime.spawn(inner.run(cmd_rx));

        Ok(Self {
            cmd_tx,
            shared,
            transport,
            read_rx,
            events_rx,
        })
    }

    /// 로컬 주소에 바인딩 (포트 생략 시 임의 포트)
    pub async fn bind(&self, opts: BindOptions) -> Result<SocketAddr> {
        request(
            &self.cmd_tx,
            |reply| RootCmd::Bind { opts, reply },
            || Error::ConnectionClosed,
        )
        .await
    }

    /// 기본 목적지 설정 (필요하면 먼저 바인딩)
    pub async fn connect(&self, opts: ConnectOptions) -> Result<Endpoint> {
        request(
            &self.cmd_tx,
            |reply| RootCmd::Connect { opts, reply },
            || Error::ConnectionClosed,
        )
        .await
    }

    /// 리스닝 시작 (필요하면 먼저 바인딩)
    ///
    /// 이후 처음 보는 피어의 데이터그램은 수락 필터를 거쳐 하위 스트림이 됨
    pub async fn listen(&self, opts: ListenOptions) -> Result<SocketAddr> {
        request(
            &self.cmd_tx,
            |reply| RootCmd::Listen { opts, reply },
            || Error::ConnectionClosed,
        )
        .await
    }

    /// 데이터 송신. 목적지는 값의 메타데이터 또는 기본 피어
    pub async fn write(&self, data: impl Into<Datagram>) -> Result<usize> {
        self.send(data.into(), None).await
    }

    /// 목적지를 명시해 송신 (다른 모든 목적지 정보보다 우선)
    pub async fn write_to(&self, data: impl Into<Datagram>, endpoint: Endpoint) -> Result<usize> {
        self.send(data.into(), Some(endpoint)).await
    }

    async fn send(&self, datagram: Datagram, target: Option<Endpoint>) -> Result<usize> {
        if self.shared.writable_ended() {
            return Err(Error::WriteAfterClose);
        }
        request(
            &self.cmd_tx,
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

    /// 대기 없이 읽기
    pub fn try_read(&mut self) -> Option<Datagram> {
        self.read_rx.try_recv().ok()
    }

    /// 다음 알림 대기. 루트가 닫히고 남은 알림을 다 읽으면 None
    pub async fn next_event(&mut self) -> Option<RootEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<RootEvent> {
        self.events_rx.try_recv().ok()
    }

    /// 다음 새 연결 대기 (다른 알림은 버림)
    pub async fn accept(&mut self) -> Option<ChildStream> {
        while let Some(event) = self.events_rx.recv().await {
            if let RootEvent::Connection(child) = event {
                return Some(child);
            }
        }
        None
    }

    /// 종료 요청. 여러 번 호출해도 종료 시퀀스는 한 번만 수행됨
    pub fn close(&self) {
        if self.shared.end_writable() {
            debug!("루트 스트림 종료 요청");
        }
        let _ = self.cmd_tx.send(RootCmd::Close);
    }

    /// 종료 시퀀스 완료 대기
    pub async fn wait_closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().is_closed()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr()
    }

    /// 기본 원격 피어
    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.shared.default_peer()
    }

    /// 기본 원격 피어 변경 (트랜스포트와 주소 패밀리가 맞아야 함)
    pub fn set_remote_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        self.transport.kind().ensure_supports(endpoint.address())?;
        *self.shared.default_peer.write() = Some(endpoint);
        Ok(())
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.shared.mode
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T: Transport> Drop for RootStream<T> {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(RootCmd::Close);
    }
}

impl<T: Transport> fmt::Debug for RootStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootStream")
            .field("state", &self.shared.state())
            .field("mode", &self.shared.mode)
            .field("local_addr", &self.shared.local_addr())
            .field("remote", &self.shared.default_peer())
            .finish()
    }
}
