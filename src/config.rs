//! 프로토콜 설정

use std::time::Duration;

use crate::{
    DEFAULT_BUFFER_THRESHOLD, DEFAULT_CHUNK_SIZE, DEFAULT_SEEK_TOLERANCE_SECS,
    DEFAULT_SYNC_INTERVAL_MS,
};

/// WSP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 재생 시작 버퍼링 임계값 (0.0 ~ 1.0)
    /// 예: 0.1 = 전체 청크의 10% 수신 시 재생 준비
    pub buffer_threshold: f64,

    /// 동기화 샘플 방송 주기 (밀리초)
    pub sync_interval_ms: u64,

    /// 시크 보정 허용 오차 (초)
    /// 드리프트가 이 값을 넘으면 하드 시크
    pub seek_tolerance_secs: f64,

    /// pacing 기준 전송률 (bytes/sec)
    pub pacing_rate: f64,

    /// 최소 pacing 간격 (마이크로초)
    pub min_pacing_delay_us: u64,

    /// 최대 pacing 간격 (마이크로초)
    pub max_pacing_delay_us: u64,

    /// 디코더에 한 번에 이어붙일 최대 연속 청크 수
    pub max_feed_run: usize,

    /// 마스터 재생 시작 전 정착 지연 (밀리초)
    pub settle_delay_ms: u64,

    /// 세션 명령 큐 깊이
    pub cmd_queue_depth: usize,

    /// 통계 윈도우 크기 (청크 수)
    pub stats_window_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            seek_tolerance_secs: DEFAULT_SEEK_TOLERANCE_SECS,
            pacing_rate: 2_000_000.0,    // 2MB/s 기준
            min_pacing_delay_us: 500,    // 0.5ms
            max_pacing_delay_us: 50_000, // 50ms
            max_feed_run: 5,
            settle_delay_ms: 500,
            cmd_queue_depth: 1024,
            stats_window_size: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 크기에 대한 총 청크 수 계산: ceil(size / chunk_size)
    pub fn total_chunks(&self, file_size: u64) -> u32 {
        crate::chunk::total_chunk_count(file_size, self.chunk_size)
    }

    /// 방송 주기
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// 정착 지연
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// 저대역폭 채널용 설정
    pub fn slow_channel() -> Self {
        Self {
            chunk_size: 8 * 1024,         // 8KB
            buffer_threshold: 0.15,       // 넉넉히 버퍼링
            sync_interval_ms: 2000,       // 자주 방송
            seek_tolerance_secs: 1.5,
            pacing_rate: 256_000.0,       // 256KB/s
            min_pacing_delay_us: 2_000,
            max_pacing_delay_us: 200_000, // 200ms
            max_feed_run: 3,
            settle_delay_ms: 1000,
            cmd_queue_depth: 512,
            stats_window_size: 50,
        }
    }

    /// 불안정한 채널용 설정
    pub fn unstable_channel() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_threshold: 0.20,  // 재생 전 더 많이 확보
            sync_interval_ms: 1500,
            seek_tolerance_secs: 2.0, // 잦은 시크 방지
            pacing_rate: 1_000_000.0,
            min_pacing_delay_us: 1_000,
            max_pacing_delay_us: 100_000,
            max_feed_run: 5,
            settle_delay_ms: 800,
            cmd_queue_depth: 1024,
            stats_window_size: 50,
        }
    }
}
