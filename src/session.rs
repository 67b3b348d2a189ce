//! 세션 컨트롤러
//!
//! 역할 배정, 상태 머신, 구성 요소 배선을 담당하는 유일한 공개 표면.
//! 세션의 모든 가변 상태는 단일 태스크가 소유한다. 채널 펌프, 송신
//! 태스크, 정착/방송 타이머, 공급 태스크는 같은 명령 큐로만 상태에
//! 닿는다. 두 세션(두 피어)은 봉투 교환 외에 아무것도 공유하지 않는다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelEvents, MessageChannel};
use crate::chunk::{total_chunk_count, ChunkSplitter, ReassemblyBuffer};
use crate::config::Config;
use crate::envelope::{Envelope, FileMetadata, SyncSample};
use crate::error::{Error, Result};
use crate::feeder::{DecodeFeeder, DecodeSink, SinkError};
use crate::sender::{self, Pacer, SenderEvent};
use crate::stats::TransferStats;
use crate::sync::{wall_clock_ms, PlaybackSurface, ReconcileOutcome, Role, Synchronizer};

/// 진행률 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 초기 상태 (채널 Open 대기)
    Idle,

    /// 수신측: 메타데이터 대기
    AwaitingMetadata,

    /// 수신측: 임계값까지 버퍼링 중
    Buffering,

    /// 재생 준비 완료
    Ready,

    /// 재생 중
    Playing,

    /// 송신측: 청크 전송 중
    Sending,

    /// 송신 완료 (마스터는 이후 방송 지속)
    Complete,

    /// 터미널: 복구 불가 에러
    Error,

    /// 터미널: 채널/세션 종료
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error | SessionState::Closed)
    }
}

/// 임베더에게 전달되는 알림
#[derive(Debug)]
pub enum SessionEvent {
    /// 진행률 (0.0 ~ 1.0)
    Progress { percent: f64, direction: Direction },

    /// 상태 텍스트
    Status(String),

    /// 치명 에러 (세션 터미널, 세션당 한 번)
    Error(String),

    /// 재생 준비 완료 (세션당 한 번)
    PlaybackReady,

    /// 수신된 제어 명령 (예약 태그, 처리할지는 임베더 몫)
    Control(String),
}

/// 내부 명령 (단일 소유 태스크로 집결)
enum SessionCmd {
    SendFile {
        meta: FileMetadata,
        chunks: Vec<Bytes>,
    },
    SettleElapsed,
    BroadcastTick,
    FeedFinished {
        sink: Box<dyn DecodeSink>,
        result: std::result::Result<(), SinkError>,
    },
    Cleanup,
}

/// 세션 핸들 (임베더 공개 표면)
pub struct Session {
    cmd_tx: mpsc::Sender<SessionCmd>,
    channel: Arc<dyn MessageChannel>,
    running: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
    stats: Arc<RwLock<TransferStats>>,
    state: Arc<RwLock<SessionState>>,
    config: Config,
}

impl Session {
    /// 세션 시작: 역할 배정 + 구성 요소 배선
    ///
    /// 채널 이벤트 스트림, 디코드 싱크, 재생 표면은 외부 협력자에게서
    /// 받는다. 반환된 이벤트 수신기로 진행률/상태/에러/재생 준비 알림이
    /// 흐른다.
    pub fn start(
        role: Role,
        channel: Arc<dyn MessageChannel>,
        channel_events: ChannelEvents,
        sink: Box<dyn DecodeSink>,
        surface: Box<dyn PlaybackSurface>,
        config: Config,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.cmd_queue_depth);
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();

        let running = Arc::new(AtomicBool::new(true));
        let sending = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(RwLock::new(TransferStats::new(config.stats_window_size)));
        let shared_state = Arc::new(RwLock::new(SessionState::Idle));

        let inner = SessionInner {
            config: config.clone(),
            state: SessionState::Idle,
            channel: channel.clone(),
            reassembly: ReassemblyBuffer::new(),
            feeder: DecodeFeeder::new(),
            sync: Synchronizer::new(role, config.buffer_threshold, config.seek_tolerance_secs),
            sink: Some(sink),
            surface,
            metadata: None,
            broadcasting: false,
            events: event_tx,
            cmd_tx: cmd_tx.clone(),
            sender_tx,
            running: running.clone(),
            sending: sending.clone(),
            stats: stats.clone(),
            shared_state: shared_state.clone(),
        };

        tokio::spawn(run_session(inner, cmd_rx, channel_events, sender_rx));

        (
            Self {
                cmd_tx,
                channel,
                running,
                sending,
                stats,
                state: shared_state,
                config,
            },
            event_rx,
        )
    }

    /// 파일 전송 시작
    ///
    /// 선결 조건: 채널 열림 + 진행 중인 전송 없음. 이미 전송 중이면
    /// 상태 변화 없이 TransferBusy로 즉시 거절한다.
    pub async fn send_file(&self, file_name: &str, file_type: &str, data: Bytes) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        if !self.channel.is_open() {
            return Err(Error::ChannelClosed);
        }
        if self.sending.swap(true, Ordering::SeqCst) {
            return Err(Error::TransferBusy);
        }

        let meta = FileMetadata {
            file_name: file_name.to_string(),
            file_size: data.len() as u64,
            file_type: file_type.to_string(),
            total_chunks: total_chunk_count(data.len() as u64, self.config.chunk_size),
        };
        let chunks = ChunkSplitter::new(self.config.chunk_size).split(&data);

        self.cmd_tx
            .send(SessionCmd::SendFile { meta, chunks })
            .await
            .map_err(|_| {
                self.sending.store(false, Ordering::SeqCst);
                Error::SessionClosed
            })
    }

    /// 세션 정리 (멱등)
    ///
    /// 진행 중인 pacing 루프, 방송 주기, 공급 스캔을 즉시 중단하고
    /// 채널이 열려 있으면 닫는다. 부분 취소는 없다.
    pub fn cleanup(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.try_send(SessionCmd::Cleanup);
    }

    /// 현재 세션 상태
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// 세션 내부 상태 (단일 태스크에서만 접근)
struct SessionInner {
    config: Config,
    state: SessionState,
    channel: Arc<dyn MessageChannel>,
    reassembly: ReassemblyBuffer,
    feeder: DecodeFeeder,
    sync: Synchronizer,
    /// 공급 태스크가 잠시 가져간다 (FeedFinished로 반환).
    /// busy 동안 None이라는 불변식을 feeder와 함께 유지한다.
    sink: Option<Box<dyn DecodeSink>>,
    surface: Box<dyn PlaybackSurface>,
    metadata: Option<FileMetadata>,
    broadcasting: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    cmd_tx: mpsc::Sender<SessionCmd>,
    sender_tx: mpsc::UnboundedSender<SenderEvent>,
    running: Arc<AtomicBool>,
    sending: Arc<AtomicBool>,
    stats: Arc<RwLock<TransferStats>>,
    shared_state: Arc<RwLock<SessionState>>,
}

/// 메인 이벤트 루프
async fn run_session(
    mut inner: SessionInner,
    mut cmd_rx: mpsc::Receiver<SessionCmd>,
    mut channel_events: ChannelEvents,
    mut sender_rx: mpsc::UnboundedReceiver<SenderEvent>,
) {
    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => inner.handle_cmd(cmd),
            Some(event) = channel_events.recv() => inner.handle_channel_event(event),
            Some(event) = sender_rx.recv() => inner.handle_sender_event(event),
            else => break,
        }

        if inner.state.is_terminal() {
            break;
        }
    }
    debug!("세션 태스크 종료");
}

impl SessionInner {
    fn handle_cmd(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::SendFile { meta, chunks } => self.on_send_file(meta, chunks),
            SessionCmd::SettleElapsed => self.on_settle_elapsed(),
            SessionCmd::BroadcastTick => self.on_broadcast_tick(),
            SessionCmd::FeedFinished { sink, result } => self.on_feed_finished(sink, result),
            SessionCmd::Cleanup => self.close("명시적 정리"),
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                if self.state == SessionState::Idle {
                    self.set_state(SessionState::AwaitingMetadata);
                    self.status(format!("채널 열림 (role={:?})", self.sync.role()));
                }
            }
            ChannelEvent::Message(text) => self.handle_message(&text),
            ChannelEvent::Closed => self.close("채널 닫힘"),
            ChannelEvent::Error(detail) => {
                self.fail(Error::ChannelLost, &format!("채널 에러: {detail}"));
            }
        }
    }

    /// 수신 봉투 한 건 처리
    ///
    /// 파싱 실패는 해당 봉투만 버리고 세션은 계속 간다. 치명적인 것은
    /// 전송/포맷 장애뿐이다.
    fn handle_message(&mut self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(Error::ProtocolViolation(detail)) => {
                warn!("프로토콜 위반 봉투 폐기: {}", detail);
                self.stats.write().protocol_violations += 1;
                return;
            }
            Err(e) => {
                warn!("봉투 폐기: {}", e);
                self.stats.write().malformed_envelopes += 1;
                return;
            }
        };

        match envelope {
            Envelope::Metadata { metadata } => self.on_metadata(metadata),
            chunk @ Envelope::Chunk { .. } => self.on_chunk(chunk),
            Envelope::Sync { sync_data } => self.on_sync(sync_data),
            Envelope::Control { control } => {
                // 예약 태그: 로깅 외 동작은 임베더 몫
                debug!("제어 명령 수신: {}", control);
                let _ = self.events.send(SessionEvent::Control(control));
            }
        }
    }

    fn on_metadata(&mut self, meta: FileMetadata) {
        info!(
            "메타데이터 수신: {} ({} bytes, {} chunks, {})",
            meta.file_name, meta.file_size, meta.total_chunks, meta.file_type
        );
        // 겹치는 두 번째 전송 대비: 수신 상태 전부 리셋
        self.reassembly.reset(&meta);
        self.metadata = Some(meta);
        self.set_state(SessionState::Buffering);
        self.status("버퍼링 시작".into());
    }

    fn on_chunk(&mut self, envelope: Envelope) {
        if self.metadata.is_none() {
            // 메타데이터보다 먼저 온 청크: 경고 후 폐기, 세션은 계속
            warn!("메타데이터 이전 청크 수신, 폐기");
            self.stats.write().protocol_violations += 1;
            return;
        }

        let (index, payload) = match envelope.chunk_payload() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("청크 페이로드 폐기: {}", e);
                self.stats.write().malformed_envelopes += 1;
                return;
            }
        };

        let len = payload.len();
        let newly = self.reassembly.insert(index, payload);
        {
            let mut stats = self.stats.write();
            if newly {
                stats.record_arrival(len);
            } else {
                stats.duplicate_chunks += 1;
            }
        }
        if !newly {
            debug!("중복/범위 밖 청크: {}", index);
            return;
        }

        let ratio = self.reassembly.receive_ratio();
        let _ = self.events.send(SessionEvent::Progress {
            percent: ratio,
            direction: Direction::Recv,
        });

        // 연속 구간이 생겼으면 디코더로
        self.try_feed();

        // 임계값 최초 도달 시 한 번만 재생 준비
        if self.sync.check_ready(ratio) {
            self.on_ready();
        }
    }

    fn on_ready(&mut self) {
        self.set_state(SessionState::Ready);
        info!(
            "버퍼링 임계값 도달 ({:.0}%), 재생 준비",
            self.config.buffer_threshold * 100.0
        );
        let _ = self.events.send(SessionEvent::PlaybackReady);

        match self.sync.role() {
            Role::Master => {
                // 정착 지연 후 로컬 재생 시작 + 방송 개시
                self.schedule_settle();
            }
            Role::Follower => {
                // 마스터의 첫 샘플을 수동적으로 기다린다
                self.status("동기화 샘플 대기".into());
            }
        }
    }

    fn on_sync(&mut self, sample: SyncSample) {
        let outcome = self
            .sync
            .reconcile(self.surface.as_mut(), &sample, wall_clock_ms());
        if outcome == ReconcileOutcome::Ignored {
            return;
        }

        {
            let mut stats = self.stats.write();
            stats.sync_samples_applied += 1;
            if matches!(outcome, ReconcileOutcome::Seeked(_)) {
                stats.forced_seeks += 1;
            }
        }

        // 첫 샘플 도착 = 마스터가 재생을 시작했다는 신호
        if self.state == SessionState::Ready {
            self.set_state(SessionState::Playing);
            self.status("재생 시작 (팔로워)".into());
        }
    }

    fn on_send_file(&mut self, meta: FileMetadata, chunks: Vec<Bytes>) {
        if self.state.is_terminal() {
            self.sending.store(false, Ordering::SeqCst);
            return;
        }
        self.set_state(SessionState::Sending);
        self.status(format!("전송 시작: {}", meta.file_name));

        sender::spawn_transfer(
            self.channel.clone(),
            meta,
            chunks,
            Pacer::from_config(&self.config),
            self.running.clone(),
            self.stats.clone(),
            self.sender_tx.clone(),
        );
    }

    fn handle_sender_event(&mut self, event: SenderEvent) {
        match event {
            SenderEvent::Progress(percent) => {
                let _ = self.events.send(SessionEvent::Progress {
                    percent,
                    direction: Direction::Send,
                });
            }
            SenderEvent::Complete => {
                self.sending.store(false, Ordering::SeqCst);
                self.set_state(SessionState::Complete);
                self.status("전송 완료".into());
                // 마스터는 전송을 마친 뒤 방송을 시작한다
                if self.sync.role() == Role::Master {
                    self.schedule_settle();
                }
            }
            SenderEvent::Failed(e) => {
                self.sending.store(false, Ordering::SeqCst);
                self.fail(e, "전송 중단");
            }
        }
    }

    /// 정착 지연 후 SettleElapsed 명령 예약 (마스터 전용 경로)
    fn schedule_settle(&self) {
        let cmd_tx = self.cmd_tx.clone();
        let running = self.running.clone();
        let delay = self.config.settle_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if running.load(Ordering::SeqCst) {
                let _ = cmd_tx.send(SessionCmd::SettleElapsed).await;
            }
        });
    }

    fn on_settle_elapsed(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.surface.play();
        if self.state == SessionState::Ready {
            self.set_state(SessionState::Playing);
        }
        self.status("재생 시작 (마스터)".into());
        self.start_broadcast();
    }

    /// 방송 타이머 시작 (마스터 전용, 한 번만)
    fn start_broadcast(&mut self) {
        if self.broadcasting || self.sync.role() != Role::Master {
            return;
        }
        self.broadcasting = true;

        let cmd_tx = self.cmd_tx.clone();
        let running = self.running.clone();
        let interval = self.config.sync_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                // 첫 tick은 즉시 발화하므로 첫 샘플도 바로 나간다
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if cmd_tx.send(SessionCmd::BroadcastTick).await.is_err() {
                    break;
                }
            }
        });
    }

    fn on_broadcast_tick(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let sample = self.sync.make_sample(self.surface.as_ref(), wall_clock_ms());
        match self.channel.send_text(&Envelope::sync(sample).encode()) {
            Ok(()) => {
                self.stats.write().sync_samples_sent += 1;
                debug!(
                    "샘플 방송: t={:.2}s paused={}",
                    sample.current_time, sample.paused
                );
            }
            Err(_) => self.fail(Error::ChannelLost, "샘플 방송 실패"),
        }
    }

    /// 커서부터 연속 구간을 싱크로 보낸다.
    ///
    /// 싱크 처리 중이면 아무것도 하지 않는다. 완료는 FeedFinished로
    /// 돌아오고, 그때 재스캔한다.
    fn try_feed(&mut self) {
        if self.state.is_terminal() || self.feeder.is_busy() {
            return;
        }
        let Some(run) = self
            .feeder
            .begin_feed(&mut self.reassembly, self.config.max_feed_run)
        else {
            return;
        };
        let Some(mut sink) = self.sink.take() else {
            // busy가 아니면 sink는 반드시 제자리에 있다
            self.feeder.finish_feed();
            return;
        };

        {
            let mut stats = self.stats.write();
            stats.fed_bytes += run.len() as u64;
            stats.fed_runs += 1;
        }

        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = sink.append_range(run).await;
            let _ = cmd_tx.send(SessionCmd::FeedFinished { sink, result }).await;
        });
    }

    fn on_feed_finished(
        &mut self,
        sink: Box<dyn DecodeSink>,
        result: std::result::Result<(), SinkError>,
    ) {
        self.sink = Some(sink);
        self.feeder.finish_feed();

        match result {
            Ok(()) => {
                // 완료 신호 후 새로 연속된 구간 재스캔
                self.try_feed();
                if self.reassembly.is_complete()
                    && self.reassembly.fully_drained()
                    && !self.feeder.is_busy()
                {
                    self.status("수신 및 디코더 공급 완료".into());
                }
            }
            Err(SinkError::FormatUnsupported) => {
                // 구조적 실패: 재시도하지 않는다
                let mime = self
                    .metadata
                    .as_ref()
                    .map(|m| m.file_type.clone())
                    .unwrap_or_else(|| "unknown".into());
                self.fail(Error::UnsupportedFormat { mime }, "디코드 실패");
            }
            Err(SinkError::Io(e)) => {
                self.fail(Error::Io(e), "싱크 IO 실패");
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        debug!("상태 전이: {:?} -> {:?}", self.state, next);
        self.state = next;
        *self.shared_state.write() = next;
    }

    fn status(&self, text: String) {
        let _ = self.events.send(SessionEvent::Status(text));
    }

    /// 치명 에러: Error 상태로 전이하고 한 번만 표면화
    fn fail(&mut self, err: Error, context: &str) {
        if self.state.is_terminal() {
            return;
        }
        warn!("세션 에러: {} ({})", err, context);
        let _ = self.events.send(SessionEvent::Error(err.to_string()));
        self.set_state(SessionState::Error);
        self.teardown();
    }

    fn close(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        info!("세션 종료: {}", reason);
        self.set_state(SessionState::Closed);
        self.teardown();
    }

    /// 터미널 진입 공통 처리: 버퍼/청크 목록/타이머 해제, 채널 닫기. 멱등.
    fn teardown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.sending.store(false, Ordering::SeqCst);
        self.reassembly.release();
        self.sink = None;
        self.broadcasting = false;
        if self.channel.is_open() {
            self.channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::feeder::CollectSink;
    use crate::sync::SimulatedPlayback;

    fn test_config() -> Config {
        Config {
            chunk_size: 1024,
            min_pacing_delay_us: 0,
            max_pacing_delay_us: 1_000,
            settle_delay_ms: 10,
            sync_interval_ms: 50,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_second_send_rejected_with_busy() {
        let ((channel_a, events_a), (_b, _events_b)) = MemoryChannel::pair();
        let (session, _rx) = Session::start(
            Role::Master,
            channel_a,
            events_a,
            Box::new(CollectSink::new()),
            Box::new(SimulatedPlayback::new()),
            test_config(),
        );

        let data = Bytes::from(vec![0u8; 64 * 1024]);
        session.send_file("a.bin", "video/mp4", data.clone()).await.unwrap();

        // 진행 중 재호출은 상태 변화 없이 즉시 거절
        let err = session.send_file("b.bin", "video/mp4", data).await;
        assert!(matches!(err, Err(Error::TransferBusy)));

        session.cleanup();
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_rejected() {
        let ((channel_a, events_a), (channel_b, _events_b)) = MemoryChannel::pair();
        channel_b.close();

        let (session, _rx) = Session::start(
            Role::Master,
            channel_a,
            events_a,
            Box::new(CollectSink::new()),
            Box::new(SimulatedPlayback::new()),
            test_config(),
        );

        // 세션 태스크가 Closed 이벤트를 먼저 봤는지에 따라 둘 중 하나
        let err = session
            .send_file("a.bin", "video/mp4", Bytes::from_static(b"xx"))
            .await;
        assert!(matches!(
            err,
            Err(Error::ChannelClosed) | Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let ((channel_a, events_a), _peer) = MemoryChannel::pair();
        let (session, _rx) = Session::start(
            Role::Follower,
            channel_a,
            events_a,
            Box::new(CollectSink::new()),
            Box::new(SimulatedPlayback::new()),
            test_config(),
        );

        session.cleanup();
        session.cleanup();
        assert!(!session.is_running());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}
