//! 에러 타입 정의

use thiserror::Error;

/// WSP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("봉투 파싱 실패: {0}")]
    MalformedEnvelope(String),

    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    #[error("이미 전송 진행 중")]
    TransferBusy,

    #[error("채널 유실")]
    ChannelLost,

    #[error("채널 닫힘")]
    ChannelClosed,

    #[error("지원하지 않는 포맷: {mime}")]
    UnsupportedFormat { mime: String },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("세션 종료됨")]
    SessionClosed,

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
