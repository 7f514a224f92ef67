//! udpmux 에코 데모
//!
//! 사용법:
//!   cargo run --bin udpmux-echo -- serve [OPTIONS]
//!   cargo run --bin udpmux-echo -- send [OPTIONS]
//!
//! 예시:
//!   # 9000번 포트에서 피어별 에코
//!   cargo run --bin udpmux-echo -- serve --port 9000
//!
//!   # 메시지 하나 보내고 응답 출력
//!   cargo run --bin udpmux-echo -- send --port 9000 --message hello

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use udpmux::{Config, ConnectOptions, ListenOptions, RootStream, TransportKind};

enum Command {
    Serve,
    Send,
}

/// 데모 설정
struct EchoConfig {
    command: Command,
    address: Option<String>,
    port: i64,
    message: String,
    kind: TransportKind,
    timeout: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            command: Command::Serve,
            address: None,
            port: 9000,
            message: "hello".to_string(),
            kind: TransportKind::Udp4,
            timeout: Duration::from_secs(3),
        }
    }
}

fn print_help() {
    println!(
        r#"udpmux-echo - 피어별 가상 스트림 에코 데모

사용법:
  udpmux-echo <serve|send> [OPTIONS]

옵션:
  -a, --address <ADDR>    serve: 바인드 주소 / send: 서버 주소 (기본: 루프백)
  -p, --port <PORT>       포트 (기본: 9000)
  -m, --message <TEXT>    send: 보낼 메시지 (기본: hello)
  -t, --type <KIND>       udp4 | udp6 (기본: udp4)
      --timeout <SECS>    send: 응답 대기 시간 (기본: 3)
  -h, --help              이 도움말 출력
"#
    );
}

fn parse_args() -> Result<EchoConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = EchoConfig::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "serve" => config.command = Command::Serve,
            "send" => config.command = Command::Send,
            "--address" | "-a" => {
                config.address = value;
                i += 1;
            }
            "--port" | "-p" => {
                config.port = value.ok_or("포트 값 필요")?.parse()?;
                i += 1;
            }
            "--message" | "-m" => {
                config.message = value.ok_or("메시지 값 필요")?;
                i += 1;
            }
            "--type" | "-t" => {
                config.kind = TransportKind::parse(&value.ok_or("트랜스포트 종류 필요")?)?;
                i += 1;
            }
            "--timeout" => {
                config.timeout = Duration::from_secs(value.ok_or("시간 값 필요")?.parse()?);
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => warn!("알 수 없는 인자 무시: {}", other),
        }
        i += 1;
    }

    Ok(config)
}

async fn serve(config: EchoConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut opts = ListenOptions::new().port(config.port)?;
    if let Some(address) = &config.address {
        opts = opts.parse_address(address)?;
    }

    let mut root = RootStream::open(Config::default().with_transport_kind(config.kind))?;
    let local = root.listen(opts).await?;
    info!("에코 서버 리스닝: {}", local);

    while let Some(mut peer) = root.accept().await {
        info!("새 피어: {}", peer.remote_endpoint());

        tokio::spawn(async move {
            while let Some(datagram) = peer.read().await {
                if let Err(e) = peer.write(datagram).await {
                    warn!("에코 실패 {}: {}", peer.remote_endpoint(), e);
                    break;
                }
            }
            info!("피어 종료: {}", peer.remote_endpoint());
        });
    }

    Ok(())
}

async fn send(config: EchoConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut root = RootStream::open(Config::default().with_transport_kind(config.kind))?;

    let mut opts = ConnectOptions::new(config.port)?;
    if let Some(address) = &config.address {
        opts = opts.parse_address(address)?;
    }
    let remote = root.connect(opts).await?;

    let sent = root.write(config.message.clone()).await?;
    info!("{} bytes 송신 -> {}", sent, remote);

    match tokio::time::timeout(config.timeout, root.read()).await {
        Ok(Some(datagram)) => {
            let payload = datagram.into_payload().unwrap_or_default();
            println!("{}", String::from_utf8_lossy(&payload));
        }
        Ok(None) => warn!("스트림 종료"),
        Err(_) => warn!("응답 없음 ({:?})", config.timeout),
    }

    root.close();
    root.wait_closed().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args()?;

    match config.command {
        Command::Serve => serve(config).await,
        Command::Send => send(config).await,
    }
}
