//! WSP 호스트 (마스터) - Watch Sync Protocol
//!
//! 미디어 파일을 청크로 스트리밍하고 재생 클록을 방송하는 쪽.
//! 데모용으로 TCP 줄 단위 채널을 쓴다. 실제 배포에서는 외부에서
//! 수립한 P2P 데이터 채널이 이 자리에 들어간다.
//!
//! 사용법:
//!   cargo run --release --bin wsp-host -- [OPTIONS]
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin wsp-host -- --bind 0.0.0.0:7700 --file movie.mp4
//!
//!   # 저대역폭 채널 프리셋
//!   cargo run --release --bin wsp-host -- -f movie.mp4 --slow

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use wsp::{
    Config, DecodeSink, Role, Session, SessionEvent, SimulatedPlayback, SinkError, TcpLineChannel,
};

/// 호스트 설정
struct HostConfig {
    bind_addr: SocketAddr,
    file_path: Option<PathBuf>,
    mime: String,
    config: Config,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7700".parse().unwrap(),
            file_path: None,
            mime: "video/mp4".to_string(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> HostConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = HostConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--mime" | "-m" => {
                if i + 1 < args.len() {
                    config.mime = args[i + 1].clone();
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.config.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--rate" => {
                if i + 1 < args.len() {
                    config.config.pacing_rate = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--slow" => {
                config.config = Config::slow_channel();
            }
            "--help" | "-h" => {
                println!(
                    r#"WSP Host - Watch Sync Protocol 호스트 (마스터)

파일을 청크로 스트리밍하고 재생 클록 샘플을 방송한다.

사용법:
  cargo run --release --bin wsp-host -- [OPTIONS]

옵션:
  -b, --bind <ADDR>     바인드 주소 (기본: 0.0.0.0:7700)
  -f, --file <PATH>     전송할 파일 경로
  -m, --mime <TYPE>     MIME 타입 (기본: video/mp4)
  --chunk-size <SIZE>   청크 크기 바이트 (기본: 16384)
  --rate <BPS>          pacing 기준 전송률 bytes/sec (기본: 2000000)
  --slow                저대역폭 채널 프리셋 사용
  -h, --help            이 도움말 출력

예시:
  # 파일 전송
  cargo run --release --bin wsp-host -- --file movie.mp4

  # 8KB 청크 + 512KB/s pacing
  cargo run --release --bin wsp-host -- -f movie.mp4 --chunk-size 8192 --rate 512000
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

/// 호스트는 수신하지 않으므로 버리는 싱크를 쓴다
struct NullSink;

#[async_trait]
impl DecodeSink for NullSink {
    async fn append_range(&mut self, _bytes: Bytes) -> Result<(), SinkError> {
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

    let host_config = parse_args();

    info!("WSP Host starting...");
    info!("Bind address: {}", host_config.bind_addr);
    info!("Chunk size: {} bytes", host_config.config.chunk_size);
    info!("Pacing rate: {:.0} bytes/sec", host_config.config.pacing_rate);

    // 전송할 데이터 준비
    let (file_name, data) = if let Some(path) = &host_config.file_path {
        info!("Loading file: {:?}", path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.bin".to_string());
        (name, std::fs::read(path)?)
    } else {
        // 테스트용 더미 데이터 (1MB)
        info!("Using test data (1MB)");
        ("test.bin".to_string(), vec![0xABu8; 1024 * 1024])
    };
    info!("Data size: {} bytes", data.len());

    // 게스트 한 명 대기
    let listener = TcpListener::bind(host_config.bind_addr).await?;
    info!("Waiting for guest on {}...", host_config.bind_addr);
    let (stream, peer_addr) = listener.accept().await?;
    info!("게스트 연결: {}", peer_addr);
    stream.set_nodelay(true)?;

    let (channel, channel_events) = TcpLineChannel::from_stream(stream);

    let (session, mut events) = Session::start(
        Role::Master,
        channel,
        channel_events,
        Box::new(NullSink),
        Box::new(SimulatedPlayback::new()),
        host_config.config,
    );

    session
        .send_file(&file_name, &host_config.mime, Bytes::from(data))
        .await?;

    // 알림 소비: 세션이 끝나면 스트림도 닫힌다
    let mut last_decile = -1i32;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Progress { percent, .. } => {
                let decile = (percent * 10.0) as i32;
                if decile > last_decile {
                    last_decile = decile;
                    info!("전송 진행률: {:.0}%", percent * 100.0);
                }
            }
            SessionEvent::Status(text) => info!("상태: {}", text),
            SessionEvent::Error(text) => {
                tracing::error!("세션 에러: {}", text);
                break;
            }
            SessionEvent::PlaybackReady => info!("재생 준비 완료"),
            SessionEvent::Control(cmd) => info!("제어 명령 수신 (무시): {}", cmd),
        }
    }

    info!("{}", session.stats().summary());
    session.cleanup();
    Ok(())
}
