//! 채널 어댑터
//!
//! 연결 수립/NAT 통과는 외부 협력자 소관이다. 이 모듈은 이미 수립된
//! 순서 보장 메시지 채널을 감싼다: 아웃바운드는 MessageChannel 트레이트,
//! 인바운드는 단일 순서 이벤트 스트림.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// 채널 이벤트
///
/// open/message/close/error가 하나의 순서 스트림으로 세션에 전달된다.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// 채널 열림
    Open,

    /// 텍스트 메시지 수신 (봉투 한 건)
    Message(String),

    /// 채널 닫힘
    Closed,

    /// 전송 계층 에러
    Error(String),
}

/// 채널 이벤트 수신기 타입
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// 아웃바운드 전송 표면
pub trait MessageChannel: Send + Sync {
    /// 텍스트 한 건 전송. 닫힌 채널이면 실패한다.
    fn send_text(&self, text: &str) -> Result<()>;

    /// 채널이 열려 있는지
    fn is_open(&self) -> bool;

    /// 채널 닫기 (멱등)
    fn close(&self);
}

/// 인메모리 루프백 채널 (테스트/데모용)
///
/// 한쪽의 send_text가 상대 이벤트 스트림의 Message로 나타난다.
pub struct MemoryChannel {
    to_peer: mpsc::UnboundedSender<ChannelEvent>,
    to_self: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    /// 연결된 채널 쌍 생성. 각 측은 (전송 핸들, 이벤트 스트림)을 받는다.
    pub fn pair() -> (
        (Arc<MemoryChannel>, ChannelEvents),
        (Arc<MemoryChannel>, ChannelEvents),
    ) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        // 양측 모두 Open부터 본다
        let _ = a_tx.send(ChannelEvent::Open);
        let _ = b_tx.send(ChannelEvent::Open);

        let a = Arc::new(MemoryChannel {
            to_peer: b_tx.clone(),
            to_self: a_tx.clone(),
            open: open.clone(),
        });
        let b = Arc::new(MemoryChannel {
            to_peer: a_tx,
            to_self: b_tx,
            open,
        });
        ((a, a_rx), (b, b_rx))
    }
}

impl MessageChannel for MemoryChannel {
    fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed);
        }
        self.to_peer
            .send(ChannelEvent::Message(text.to_string()))
            .map_err(|_| Error::ChannelLost)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.to_self.send(ChannelEvent::Closed);
            let _ = self.to_peer.send(ChannelEvent::Closed);
        }
    }
}

/// TCP 줄 단위 채널 어댑터 (데모 바이너리용)
///
/// 봉투 한 건 = 한 줄. 실제 배포에서는 외부에서 수립한 데이터 채널을
/// 감싸는 어댑터가 이 자리에 들어간다.
pub struct TcpLineChannel {
    out_tx: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

impl TcpLineChannel {
    /// 수립된 스트림을 감싸고 읽기/쓰기 태스크를 띄운다.
    pub fn from_stream(stream: TcpStream) -> (Arc<Self>, ChannelEvents) {
        let (read_half, mut write_half) = stream.into_split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let open = Arc::new(AtomicBool::new(true));

        let _ = event_tx.send(ChannelEvent::Open);

        // 쓰기 태스크
        let open_w = open.clone();
        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if !open_w.load(Ordering::SeqCst) {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    warn!("TCP 쓰기 실패, 채널 닫음");
                    open_w.store(false, Ordering::SeqCst);
                    break;
                }
            }
            // write half가 drop되면 상대는 EOF를 본다
            debug!("TCP 쓰기 태스크 종료");
        });

        // 읽기 태스크
        let open_r = open.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let _ = event_tx.send(ChannelEvent::Message(line));
                    }
                    Ok(None) => {
                        open_r.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ChannelEvent::Closed);
                        break;
                    }
                    Err(e) => {
                        open_r.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            debug!("TCP 읽기 태스크 종료");
        });

        (Arc::new(Self { out_tx, open }), event_rx)
    }
}

impl MessageChannel for TcpLineChannel {
    fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed);
        }
        self.out_tx
            .send(text.to_string())
            .map_err(|_| Error::ChannelLost)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            // 쓰기 태스크를 깨워 루프를 빠져나오게 한다
            let _ = self.out_tx.send(String::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_delivers_messages() {
        let ((a, _a_rx), (_b, mut b_rx)) = MemoryChannel::pair();

        assert!(matches!(b_rx.recv().await, Some(ChannelEvent::Open)));

        a.send_text("hello").unwrap();
        match b_rx.recv().await {
            Some(ChannelEvent::Message(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_close_reaches_both_sides() {
        let ((a, mut a_rx), (b, mut b_rx)) = MemoryChannel::pair();

        assert!(matches!(a_rx.recv().await, Some(ChannelEvent::Open)));
        assert!(matches!(b_rx.recv().await, Some(ChannelEvent::Open)));

        a.close();
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert!(matches!(a_rx.recv().await, Some(ChannelEvent::Closed)));
        assert!(matches!(b_rx.recv().await, Some(ChannelEvent::Closed)));

        // 닫힌 뒤 전송은 실패
        assert!(a.send_text("late").is_err());

        // close는 멱등
        a.close();
        b.close();
    }
}
