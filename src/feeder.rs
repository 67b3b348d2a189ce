//! 디코드 공급기
//!
//! 재조립 버퍼의 연속 구간을 외부 디코드 싱크로 넘긴다.
//! append의 await 완료가 싱크의 updateComplete 신호에 해당하며,
//! 완료 전에는 다음 append를 내지 않는다 (백프레셔).

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::chunk::ReassemblyBuffer;

/// 디코드 싱크 에러
#[derive(Debug, Error)]
pub enum SinkError {
    /// 구조적 실패: 지원하지 않는 코덱/컨테이너. 재시도 의미 없음.
    #[error("포맷 미지원")]
    FormatUnsupported,

    /// 싱크 내부 IO 실패
    #[error("싱크 IO 에러: {0}")]
    Io(#[from] std::io::Error),
}

/// 외부 디코드 버퍼 표면
#[async_trait]
pub trait DecodeSink: Send {
    /// 연속 바이트 구간을 디코드 버퍼에 덧붙인다.
    /// 반환(await 완료) 전까지 호출자는 다음 구간을 보내면 안 된다.
    async fn append_range(&mut self, bytes: Bytes) -> std::result::Result<(), SinkError>;
}

/// 공급 커서
///
/// busy 플래그는 세션 태스크가 소유한다. 싱크가 처리 중이면 새 스캔
/// 결과는 다음 완료 시점으로 미뤄진다.
#[derive(Debug, Default)]
pub struct DecodeFeeder {
    busy: bool,
}

impl DecodeFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 싱크 처리 중 여부
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// 공급 시작 시도: 연속 구간이 있으면 꺼내 반환하고 busy 마킹.
    /// 싱크가 처리 중이거나 커서 앞에 갭이 있으면 None.
    pub fn begin_feed(&mut self, buffer: &mut ReassemblyBuffer, max_run: usize) -> Option<Bytes> {
        if self.busy {
            return None;
        }
        let run = buffer.take_contiguous_run(max_run)?;
        self.busy = true;
        debug!(
            "디코더 공급: {} bytes, cursor={}",
            run.len(),
            buffer.next_contiguous()
        );
        Some(run)
    }

    /// 싱크 완료 시 호출. 이후 재스캔 가능.
    pub fn finish_feed(&mut self) {
        self.busy = false;
    }
}

/// 수집 싱크 (테스트/데모용)
///
/// 공급된 바이트를 공유 버퍼에 쌓기만 한다.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 수집 버퍼 핸들 (싱크를 세션에 넘긴 뒤에도 내용 확인용)
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        self.data.clone()
    }
}

#[async_trait]
impl DecodeSink for CollectSink {
    async fn append_range(&mut self, bytes: Bytes) -> std::result::Result<(), SinkError> {
        self.data.lock().extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::total_chunk_count;
    use crate::envelope::FileMetadata;

    fn buffer_with(indices: &[u32], chunk_size: usize, file_size: usize) -> ReassemblyBuffer {
        let mut buffer = ReassemblyBuffer::new();
        buffer.reset(&FileMetadata {
            file_name: "t".into(),
            file_size: file_size as u64,
            file_type: "video/mp4".into(),
            total_chunks: total_chunk_count(file_size as u64, chunk_size),
        });
        for &i in indices {
            buffer.insert(i, Bytes::from(vec![i as u8; chunk_size]));
        }
        buffer
    }

    #[test]
    fn test_feed_bounded_run() {
        let mut buffer = buffer_with(&[0, 1, 2, 3, 4, 5, 6], 10, 100);
        let mut feeder = DecodeFeeder::new();

        // max_run만큼만 한 번에 나간다
        let run = feeder.begin_feed(&mut buffer, 5).unwrap();
        assert_eq!(run.len(), 50);
        assert!(feeder.is_busy());

        // 싱크 처리 중에는 추가 공급 없음
        assert!(feeder.begin_feed(&mut buffer, 5).is_none());

        feeder.finish_feed();
        let run = feeder.begin_feed(&mut buffer, 5).unwrap();
        assert_eq!(run.len(), 20);
    }

    #[test]
    fn test_feed_stops_at_gap() {
        let mut buffer = buffer_with(&[0, 1, 3], 10, 100);
        let mut feeder = DecodeFeeder::new();

        let run = feeder.begin_feed(&mut buffer, 5).unwrap();
        assert_eq!(run.len(), 20);
        feeder.finish_feed();

        // 2가 없으므로 3은 나가지 않는다
        assert!(feeder.begin_feed(&mut buffer, 5).is_none());
    }

    #[tokio::test]
    async fn test_collect_sink_accumulates() {
        let sink = CollectSink::new();
        let handle = sink.buffer();
        let mut sink = sink;

        sink.append_range(Bytes::from_static(b"abc")).await.unwrap();
        sink.append_range(Bytes::from_static(b"def")).await.unwrap();
        assert_eq!(handle.lock().as_slice(), b"abcdef");
    }
}
