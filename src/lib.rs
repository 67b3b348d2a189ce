//! # WSP (Watch Sync Protocol)
//!
//! P2P 메시지 채널 기반 미디어 전송 + 재생 동기화 프로토콜
//!
//! ## 핵심 특징
//! - **청크 전송**: 파일을 고정 크기 청크로 분할, 텍스트 안전 봉투로 전송
//! - **순서 무관 조립**: 도착 순서와 무관하게 인덱스 기반 재조립
//! - **갭 없는 공급**: 연속 구간만 디코드 싱크로 전달, 백프레셔 준수
//! - **버퍼링 임계값**: 수신률 기준 재생 시작 판정
//! - **마스터/팔로워 동기화**: 주기적 클록 샘플 방송 + 하드 시크 보정
//! - **적응형 pacing**: 청크 크기 비례 전송 간격 (min/max 클램프)
//! - **단일 제어 흐름**: 세션 상태는 한 태스크만 소유, 락 규율 불필요

pub mod channel;
pub mod chunk;
pub mod config;
pub mod envelope;
pub mod error;
pub mod feeder;
pub mod sender;
pub mod session;
pub mod stats;
pub mod sync;

pub use channel::{ChannelEvent, ChannelEvents, MemoryChannel, MessageChannel, TcpLineChannel};
pub use chunk::{ChunkIndex, ChunkSplitter, ReassemblyBuffer};
pub use config::Config;
pub use envelope::{Envelope, FileMetadata, SyncSample};
pub use error::{Error, Result};
pub use feeder::{CollectSink, DecodeFeeder, DecodeSink, SinkError};
pub use sender::Pacer;
pub use session::{Direction, Session, SessionEvent, SessionState};
pub use stats::TransferStats;
pub use sync::{PlaybackSurface, Role, SimulatedPlayback, Synchronizer};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024; // 16KB

/// 기본 재생 시작 버퍼링 임계값 (수신률)
pub const DEFAULT_BUFFER_THRESHOLD: f64 = 0.10;

/// 기본 동기화 방송 주기 (밀리초)
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 3000;

/// 기본 시크 허용 오차 (초)
pub const DEFAULT_SEEK_TOLERANCE_SECS: f64 = 1.0;
