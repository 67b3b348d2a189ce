//! WSP 게스트 (팔로워) - Watch Sync Protocol
//!
//! 호스트가 스트리밍하는 파일을 재조립해 출력 파일에 쓰고,
//! 수신한 클록 샘플에 맞춰 시뮬레이션 재생 클록을 보정한다.
//!
//! 사용법:
//!   cargo run --release --bin wsp-guest -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin wsp-guest -- --server 127.0.0.1:7700 --output received.mp4

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use wsp::{
    Config, DecodeSink, Role, Session, SessionEvent, SimulatedPlayback, SinkError, TcpLineChannel,
};

/// 게스트 설정
struct GuestConfig {
    server_addr: SocketAddr,
    output_path: PathBuf,
    config: Config,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7700".parse().unwrap(),
            output_path: PathBuf::from("received.bin"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> GuestConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = GuestConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    config.output_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--buffer-threshold" => {
                if i + 1 < args.len() {
                    config.config.buffer_threshold = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--seek-tolerance" => {
                if i + 1 < args.len() {
                    config.config.seek_tolerance_secs =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"WSP Guest - Watch Sync Protocol 게스트 (팔로워)

호스트의 스트림을 재조립해 파일로 쓰고 재생 클록을 따라간다.

사용법:
  cargo run --release --bin wsp-guest -- [OPTIONS]

옵션:
  -s, --server <ADDR>        호스트 주소 (기본: 127.0.0.1:7700)
  -o, --output <PATH>        출력 파일 경로 (기본: received.bin)
  --buffer-threshold <R>     재생 시작 수신률 0.0~1.0 (기본: 0.1)
  --seek-tolerance <SECS>    시크 허용 오차 초 (기본: 1.0)
  -h, --help                 이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

/// 수신 바이트를 순서대로 출력 파일에 쓰는 싱크
///
/// 디코더 대신 파일이 연속 구간을 소비한다. write의 await 완료가
/// 백프레셔 신호 역할을 한다.
struct FileSink {
    file: File,
}

#[async_trait]
impl DecodeSink for FileSink {
    async fn append_range(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        self.file.write_all(&bytes).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let guest_config = parse_args();

    info!("WSP Guest starting...");
    info!("Server address: {}", guest_config.server_addr);
    info!("Output path: {:?}", guest_config.output_path);

    let stream = TcpStream::connect(guest_config.server_addr).await?;
    stream.set_nodelay(true)?;
    info!("호스트 연결: {}", guest_config.server_addr);

    let (channel, channel_events) = TcpLineChannel::from_stream(stream);

    let sink = FileSink {
        file: File::create(&guest_config.output_path).await?,
    };

    let (session, mut events) = Session::start(
        Role::Follower,
        channel,
        channel_events,
        Box::new(sink),
        Box::new(SimulatedPlayback::new()),
        guest_config.config,
    );

    let mut last_decile = -1i32;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Progress { percent, .. } => {
                let decile = (percent * 10.0) as i32;
                if decile > last_decile {
                    last_decile = decile;
                    info!("수신 진행률: {:.0}%", percent * 100.0);
                }
            }
            SessionEvent::Status(text) => info!("상태: {}", text),
            SessionEvent::Error(text) => {
                tracing::error!("세션 에러: {}", text);
                break;
            }
            SessionEvent::PlaybackReady => info!("재생 준비 완료 (버퍼링 임계값 도달)"),
            SessionEvent::Control(cmd) => info!("제어 명령 수신 (무시): {}", cmd),
        }
    }

    let stats = session.stats();
    info!("{}", stats.summary());
    info!(
        "수신 완료: {} bytes -> {:?}",
        stats.fed_bytes, guest_config.output_path
    );
    session.cleanup();
    Ok(())
}
