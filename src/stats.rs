//! 세션 통계

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 청크 도착 기록
#[derive(Debug, Clone, Copy)]
struct ChunkArrival {
    timestamp: Instant,
    size: usize,
}

/// 슬라이딩 윈도우 도착 추적
#[derive(Debug, Clone)]
pub struct ArrivalWindow {
    /// 최근 청크 도착 기록
    arrivals: VecDeque<ChunkArrival>,

    /// 윈도우 크기
    window_size: usize,
}

impl ArrivalWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            arrivals: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// 도착 기록
    pub fn record(&mut self, size: usize) {
        if self.arrivals.len() >= self.window_size {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(ChunkArrival {
            timestamp: Instant::now(),
            size,
        });
    }

    /// 청크 도착률 (chunks/sec)
    pub fn arrival_rate(&self) -> f64 {
        if self.arrivals.len() < 2 {
            return 0.0;
        }

        let first = self.arrivals.front().unwrap().timestamp;
        let last = self.arrivals.back().unwrap().timestamp;
        let duration = last.duration_since(first);

        if duration.is_zero() {
            return 0.0;
        }

        (self.arrivals.len() - 1) as f64 / duration.as_secs_f64()
    }

    /// 바이트 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        if self.arrivals.len() < 2 {
            return 0.0;
        }

        let first = self.arrivals.front().unwrap().timestamp;
        let last = self.arrivals.back().unwrap().timestamp;
        let duration = last.duration_since(first);

        if duration.is_zero() {
            return 0.0;
        }

        let total_size: usize = self.arrivals.iter().map(|a| a.size).sum();
        total_size as f64 / duration.as_secs_f64()
    }
}

/// 세션 전체 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신 청크 수
    pub sent_chunks: u64,

    /// 송신 바이트
    pub sent_bytes: u64,

    /// 수신 청크 수 (중복 제외)
    pub received_chunks: u64,

    /// 수신 바이트
    pub received_bytes: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 디코더로 공급된 바이트
    pub fed_bytes: u64,

    /// 공급 횟수
    pub fed_runs: u64,

    /// 폐기된 봉투 수 (파싱 불가)
    pub malformed_envelopes: u64,

    /// 프로토콜 위반 수 (필수 필드 누락, 메타데이터 이전 청크 등)
    pub protocol_violations: u64,

    /// 방송한 동기화 샘플 수
    pub sync_samples_sent: u64,

    /// 적용한 동기화 샘플 수
    pub sync_samples_applied: u64,

    /// 강제 시크 수
    pub forced_seeks: u64,

    /// 수신 도착 윈도우
    pub window: ArrivalWindow,
}

impl TransferStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            start_time: Instant::now(),
            sent_chunks: 0,
            sent_bytes: 0,
            received_chunks: 0,
            received_bytes: 0,
            duplicate_chunks: 0,
            fed_bytes: 0,
            fed_runs: 0,
            malformed_envelopes: 0,
            protocol_violations: 0,
            sync_samples_sent: 0,
            sync_samples_applied: 0,
            forced_seeks: 0,
            window: ArrivalWindow::new(window_size),
        }
    }

    /// 수신 청크 도착 기록
    pub fn record_arrival(&mut self, size: usize) {
        self.received_chunks += 1;
        self.received_bytes += size as u64;
        self.window.record(size);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 수신 처리율 (bytes/sec)
    pub fn overall_receive_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.received_bytes as f64 / elapsed
    }

    /// 전체 송신 처리율 (bytes/sec)
    pub fn overall_send_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.sent_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} chunks / {} bytes | Recv: {} chunks / {} bytes (dup {}) | Fed: {} bytes | Sync: {} sent / {} applied / {} seeks",
            self.elapsed().as_secs_f64(),
            self.sent_chunks,
            self.sent_bytes,
            self.received_chunks,
            self.received_bytes,
            self.duplicate_chunks,
            self.fed_bytes,
            self.sync_samples_sent,
            self.sync_samples_applied,
            self.forced_seeks,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrival_window_evicts_old_entries() {
        let mut window = ArrivalWindow::new(3);
        for _ in 0..5 {
            window.record(100);
        }
        assert_eq!(window.arrivals.len(), 3);
    }

    #[test]
    fn test_record_arrival_counts() {
        let mut stats = TransferStats::new(10);
        stats.record_arrival(1000);
        stats.record_arrival(500);

        assert_eq!(stats.received_chunks, 2);
        assert_eq!(stats.received_bytes, 1500);
        assert!(stats.summary().contains("Recv: 2 chunks"));
    }
}
