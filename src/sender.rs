//! 전송 송신자
//!
//! - 메타데이터 봉투 선행 송신
//! - 청크 크기 비례 적응형 pacing (min/max 클램프)
//! - 채널 유실 시 즉시 중단, 재시도 없음

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::chunk::ChunkIndex;
use crate::config::Config;
use crate::envelope::{Envelope, FileMetadata};
use crate::error::Error;
use crate::stats::TransferStats;

/// 청크 크기 비례 pacing
///
/// delay = clamp(len / rate, min, max). 아웃바운드 버퍼 포화를 막는
/// 정도면 충분하므로 RTT 피드백 없이 고정 기준률을 쓴다.
#[derive(Debug, Clone)]
pub struct Pacer {
    rate: f64,
    min_delay: Duration,
    max_delay: Duration,
}

impl Pacer {
    pub fn new(rate_bytes_per_sec: f64, min_delay_us: u64, max_delay_us: u64) -> Self {
        Self {
            rate: rate_bytes_per_sec,
            min_delay: Duration::from_micros(min_delay_us),
            max_delay: Duration::from_micros(max_delay_us),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pacing_rate,
            config.min_pacing_delay_us,
            config.max_pacing_delay_us,
        )
    }

    /// 전송 간격 계산
    pub fn delay_for(&self, len: usize) -> Duration {
        let secs = len as f64 / self.rate.max(1.0);
        Duration::from_secs_f64(secs).clamp(self.min_delay, self.max_delay)
    }
}

/// 송신 태스크 → 세션 보고
#[derive(Debug)]
pub(crate) enum SenderEvent {
    /// 진행률 (0.0 ~ 1.0)
    Progress(f64),

    /// 모든 청크 송신 완료
    Complete,

    /// 송신 중단 (터미널)
    Failed(Error),
}

/// 전송 태스크 시작
///
/// 메타데이터 한 건 후 청크를 인덱스 오름차순으로 pacing하며 보낸다.
/// running 플래그가 내려가면 즉시 중단한다 (부분 취소 없음).
pub(crate) fn spawn_transfer(
    channel: Arc<dyn MessageChannel>,
    meta: FileMetadata,
    chunks: Vec<Bytes>,
    pacer: Pacer,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<TransferStats>>,
    events: mpsc::UnboundedSender<SenderEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let total = chunks.len();
        info!(
            "전송 시작: {} ({} bytes, {} chunks)",
            meta.file_name, meta.file_size, total
        );

        // 메타데이터는 모든 청크보다 먼저 정확히 한 번
        if channel.send_text(&Envelope::metadata(meta).encode()).is_err() {
            warn!("메타데이터 송신 실패, 전송 중단");
            let _ = events.send(SenderEvent::Failed(Error::ChannelLost));
            return;
        }

        for (index, chunk) in chunks.iter().enumerate() {
            // 세션 정리 시 즉시 중단
            if !running.load(Ordering::SeqCst) {
                debug!("전송 중단 (세션 종료): {}/{}", index, total);
                return;
            }
            if !channel.is_open() {
                warn!("채널 유실: chunk {}/{} 에서 중단", index, total);
                let _ = events.send(SenderEvent::Failed(Error::ChannelLost));
                return;
            }

            let envelope = Envelope::chunk(index as ChunkIndex, chunk);
            if channel.send_text(&envelope.encode()).is_err() {
                warn!("채널 유실: chunk {}/{} 송신 실패", index, total);
                let _ = events.send(SenderEvent::Failed(Error::ChannelLost));
                return;
            }

            {
                let mut stats = stats.write();
                stats.sent_chunks += 1;
                stats.sent_bytes += chunk.len() as u64;
            }

            let _ = events.send(SenderEvent::Progress((index + 1) as f64 / total as f64));

            // 청크 크기 비례 전송 간격
            tokio::time::sleep(pacer.delay_for(chunk.len())).await;
        }

        info!("전송 완료: {} chunks", total);
        let _ = events.send(SenderEvent::Complete);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_proportional_to_length() {
        let pacer = Pacer::new(1_000_000.0, 0, 1_000_000);

        // 1MB/s 기준: 16KB -> 16ms, 8KB -> 8ms
        assert_eq!(pacer.delay_for(16 * 1024), Duration::from_secs_f64(16384.0 / 1e6));
        assert!(pacer.delay_for(16 * 1024) > pacer.delay_for(8 * 1024));
    }

    #[test]
    fn test_pacer_clamps_to_bounds() {
        let pacer = Pacer::new(1_000_000.0, 1_000, 10_000);

        // 아주 작은 청크도 최소 간격 밑으로 내려가지 않는다
        assert_eq!(pacer.delay_for(1), Duration::from_micros(1_000));
        // 아주 큰 청크도 최대 간격을 넘지 않는다
        assert_eq!(pacer.delay_for(10 * 1024 * 1024), Duration::from_micros(10_000));
    }
}
