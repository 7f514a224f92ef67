//! # udpmux
//!
//! 하나의 UDP 소켓을 피어별 가상 양방향 스트림으로 나누는 역다중화 계층
//!
//! ## 핵심 특징
//! - **루트 스트림**: 트랜스포트 소유, bind / connect / listen 상태 머신
//! - **하위 스트림**: 피어 하나에 고정, 모든 I/O는 루트를 통해 위임
//! - **수락 필터**: 처음 보는 피어의 데이터그램으로 새 스트림을 만들지 결정
//! - **전송 모드**: RawBytes / TaggedBytes / StructuredPacket
//! - **계단식 종료**: 루트가 닫히면 모든 하위 스트림도 닫힘
//!
//! 재전송, 확인 응답, 순서 보정, 단편화는 하지 않음
//!
//! ```no_run
//! use udpmux::{Config, ListenOptions, RootStream};
//!
//! # async fn run() -> udpmux::Result<()> {
//! let mut server = RootStream::open(Config::default())?;
//! server.listen(ListenOptions::new().port(9000)?).await?;
//!
//! while let Some(mut peer) = server.accept().await {
//!     tokio::spawn(async move {
//!         while let Some(data) = peer.read().await {
//!             let _ = peer.write(data).await;
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod mode;
pub mod options;
pub mod packet;
pub mod root;
pub mod state;
pub mod transport;

pub use child::{ChildStream, StreamId};
pub use config::Config;
pub use endpoint::{is_valid_port, Endpoint, PeerKey};
pub use error::{Error, ErrorKind, Result};
pub use filter::{accept_all, only_peer, AdmissionFilter};
pub use mode::{Datagram, DeliveryMode, TaggedBytes};
pub use options::{BindOptions, ConnectOptions, ListenOptions};
pub use packet::{Packet, PacketBuilder};
pub use root::{RootEvent, RootStream};
pub use state::StreamState;
pub use transport::{Transport, TransportKind, UdpTransport};

/// UDP 데이터그램 최대 크기 (바이트)
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// 스트림별 기본 읽기 큐 크기 (데이터그램 수)
pub const DEFAULT_READ_QUEUE_CAPACITY: usize = 1024;

/// 루트 알림 큐 기본 크기 (수락 대기 연결 포함)
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 128;
