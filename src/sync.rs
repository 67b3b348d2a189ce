//! 재생 동기화
//!
//! 마스터는 주기적으로 클록 샘플을 방송하고, 팔로워는 수신 샘플에
//! 추정 전파 지연을 더한 목표 위치로 로컬 재생을 보정한다.
//!
//! 양측 벽시계가 대략 맞다고 가정하고 단방향 지연을 timestamp 차이로
//! 추정한다. 클록 오프셋 보정은 하지 않는다 (의도된 근사).

use std::time::Instant;

use tracing::{debug, info};

use crate::envelope::SyncSample;

/// 세션 역할. 세션 수명 동안 고정.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 권위 클록 소유. 샘플을 방송하고 수신 샘플은 무시한다.
    Master,

    /// 수신 샘플에 맞춰 로컬 재생을 보정한다.
    Follower,
}

/// 외부 재생 표면
pub trait PlaybackSurface: Send {
    /// 현재 재생 위치 (초)
    fn current_time(&self) -> f64;

    /// 일시정지 여부
    fn is_paused(&self) -> bool;

    /// 하드 시크
    fn seek(&mut self, position_secs: f64);

    /// 재생 시작/재개
    fn play(&mut self);

    /// 일시정지
    fn pause(&mut self);
}

/// 샘플 적용 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// 허용 오차 이내
    InSync,

    /// 하드 시크 수행 (목표 위치)
    Seeked(f64),

    /// 마스터는 샘플에 반응하지 않는다
    Ignored,
}

/// 역할 인지 동기화기
#[derive(Debug)]
pub struct Synchronizer {
    role: Role,
    buffer_threshold: f64,
    seek_tolerance_secs: f64,

    /// 재생 준비가 이미 발화했는지 (세션당 정확히 한 번)
    ready_fired: bool,
}

impl Synchronizer {
    pub fn new(role: Role, buffer_threshold: f64, seek_tolerance_secs: f64) -> Self {
        Self {
            role,
            buffer_threshold,
            seek_tolerance_secs,
            ready_fired: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_ready(&self) -> bool {
        self.ready_fired
    }

    /// 버퍼링 임계값 판정
    ///
    /// 수신률이 임계값을 처음 넘는 순간 한 번만 true. 같은 스캔에서
    /// 여러 청크가 도착해도 재발화하지 않는다.
    pub fn check_ready(&mut self, receive_ratio: f64) -> bool {
        if self.ready_fired || receive_ratio < self.buffer_threshold {
            return false;
        }
        self.ready_fired = true;
        true
    }

    /// 현재 재생 상태에서 샘플 생성 (마스터 전용, 호출 시점 라이브 값)
    pub fn make_sample(&self, surface: &dyn PlaybackSurface, now_ms: u64) -> SyncSample {
        SyncSample {
            current_time: surface.current_time(),
            paused: surface.is_paused(),
            timestamp: now_ms,
        }
    }

    /// 수신 샘플 적용 (팔로워 전용)
    ///
    /// target = sample.current_time + (now - sample.timestamp).
    /// |local - target| > tolerance 이면 하드 시크. 점진 보정 없음 —
    /// 매끄러움 대신 드리프트 상한을 택한다. 일시정지 상태는 위치와
    /// 독립적으로 맞춘다.
    pub fn reconcile(
        &mut self,
        surface: &mut dyn PlaybackSurface,
        sample: &SyncSample,
        now_ms: u64,
    ) -> ReconcileOutcome {
        if self.role == Role::Master {
            // 권위 클록은 세션에 하나뿐
            return ReconcileOutcome::Ignored;
        }

        // 벽시계 차이로 단방향 지연 추정 (시계가 뒤집히면 0으로 클램프)
        let network_delay_secs = now_ms.saturating_sub(sample.timestamp) as f64 / 1000.0;
        let target = sample.current_time + network_delay_secs;
        let drift = (surface.current_time() - target).abs();

        let outcome = if drift > self.seek_tolerance_secs {
            surface.seek(target);
            info!(
                "드리프트 {:.2}s > 허용 {:.2}s, {:.2}s로 시크",
                drift, self.seek_tolerance_secs, target
            );
            ReconcileOutcome::Seeked(target)
        } else {
            debug!("드리프트 {:.2}s, 허용 범위", drift);
            ReconcileOutcome::InSync
        };

        // 일시정지 상태 보정 (위치 보정과 독립)
        if sample.paused && !surface.is_paused() {
            surface.pause();
            debug!("샘플에 맞춰 일시정지");
        } else if !sample.paused && surface.is_paused() {
            surface.play();
            debug!("샘플에 맞춰 재생 재개");
        }

        outcome
    }
}

/// epoch 기준 현재 시각 (밀리초)
pub fn wall_clock_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 시뮬레이션 재생 표면 (데모/테스트용)
///
/// 실제 디코더 없이 벽시계 기반으로 재생 위치를 흉내낸다.
#[derive(Debug, Default)]
pub struct SimulatedPlayback {
    position: f64,
    playing_since: Option<Instant>,
}

impl SimulatedPlayback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackSurface for SimulatedPlayback {
    fn current_time(&self) -> f64 {
        match self.playing_since {
            Some(since) => self.position + since.elapsed().as_secs_f64(),
            None => self.position,
        }
    }

    fn is_paused(&self) -> bool {
        self.playing_since.is_none()
    }

    fn seek(&mut self, position_secs: f64) {
        self.position = position_secs;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn play(&mut self) {
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.position = self.current_time();
        self.playing_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 고정 클록 목업 (벽시계 경과 없이 검증)
    struct MockSurface {
        time: f64,
        paused: bool,
        seeks: Vec<f64>,
    }

    impl MockSurface {
        fn at(time: f64, paused: bool) -> Self {
            Self {
                time,
                paused,
                seeks: Vec::new(),
            }
        }
    }

    impl PlaybackSurface for MockSurface {
        fn current_time(&self) -> f64 {
            self.time
        }
        fn is_paused(&self) -> bool {
            self.paused
        }
        fn seek(&mut self, position_secs: f64) {
            self.time = position_secs;
            self.seeks.push(position_secs);
        }
        fn play(&mut self) {
            self.paused = false;
        }
        fn pause(&mut self) {
            self.paused = true;
        }
    }

    #[test]
    fn test_ready_fires_exactly_once() {
        let mut sync = Synchronizer::new(Role::Follower, 0.10, 1.0);

        assert!(!sync.check_ready(0.05));
        assert!(sync.check_ready(0.109));
        // 같은 스캔에서 청크가 더 도착해도 재발화 없음
        assert!(!sync.check_ready(0.125));
        assert!(!sync.check_ready(1.0));
        assert!(sync.is_ready());
    }

    #[test]
    fn test_ready_boundary_64_chunks() {
        // 64 chunks, 임계값 10%: 6개(9.4%)는 부족, 7개(10.9%)에서 발화
        let mut sync = Synchronizer::new(Role::Follower, 0.10, 1.0);
        assert!(!sync.check_ready(6.0 / 64.0));
        assert!(sync.check_ready(7.0 / 64.0));
    }

    #[test]
    fn test_follower_seeks_past_tolerance() {
        // sample: currentTime=100.0s, emitted at t0; now = t0 + 0.4s
        // local 98.0s -> target 100.4s, drift 2.4s > 1.0s -> 시크
        let mut sync = Synchronizer::new(Role::Follower, 0.10, 1.0);
        let mut surface = MockSurface::at(98.0, false);
        let t0 = 1_700_000_000_000u64;
        let sample = SyncSample {
            current_time: 100.0,
            paused: false,
            timestamp: t0,
        };

        let outcome = sync.reconcile(&mut surface, &sample, t0 + 400);
        match outcome {
            ReconcileOutcome::Seeked(target) => assert!((target - 100.4).abs() < 1e-9),
            other => panic!("expected seek, got {other:?}"),
        }
        assert_eq!(surface.seeks.len(), 1);
        assert!((surface.current_time() - 100.4).abs() < 1e-9);
    }

    #[test]
    fn test_follower_in_sync_within_tolerance() {
        // local 100.0s -> drift 0.4s <= 1.0s -> 시크 없음
        let mut sync = Synchronizer::new(Role::Follower, 0.10, 1.0);
        let mut surface = MockSurface::at(100.0, false);
        let t0 = 1_700_000_000_000u64;
        let sample = SyncSample {
            current_time: 100.0,
            paused: false,
            timestamp: t0,
        };

        let outcome = sync.reconcile(&mut surface, &sample, t0 + 400);
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert!(surface.seeks.is_empty());
    }

    #[test]
    fn test_pause_state_reconciled_independently() {
        let mut sync = Synchronizer::new(Role::Follower, 0.10, 1.0);
        let t0 = 1_700_000_000_000u64;

        // 샘플이 일시정지인데 로컬이 재생 중이면 멈춘다
        let mut surface = MockSurface::at(50.0, false);
        let paused_sample = SyncSample {
            current_time: 50.0,
            paused: true,
            timestamp: t0,
        };
        sync.reconcile(&mut surface, &paused_sample, t0);
        assert!(surface.is_paused());

        // 샘플이 재생 중인데 로컬이 멈춰 있으면 재개한다
        let playing_sample = SyncSample {
            current_time: 50.0,
            paused: false,
            timestamp: t0,
        };
        sync.reconcile(&mut surface, &playing_sample, t0);
        assert!(!surface.is_paused());
    }

    #[test]
    fn test_master_ignores_samples() {
        let mut sync = Synchronizer::new(Role::Master, 0.10, 1.0);
        let mut surface = MockSurface::at(10.0, false);
        let sample = SyncSample {
            current_time: 500.0,
            paused: true,
            timestamp: 0,
        };

        let outcome = sync.reconcile(&mut surface, &sample, 1_000_000);
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(surface.seeks.is_empty());
        assert!(!surface.is_paused());
    }

    #[test]
    fn test_sample_reads_live_surface_state() {
        let sync = Synchronizer::new(Role::Master, 0.10, 1.0);
        let surface = MockSurface::at(42.0, true);

        let sample = sync.make_sample(&surface, 777);
        assert_eq!(sample.current_time, 42.0);
        assert!(sample.paused);
        assert_eq!(sample.timestamp, 777);
    }

    #[test]
    fn test_simulated_playback_clock() {
        let mut playback = SimulatedPlayback::new();
        assert!(playback.is_paused());
        assert_eq!(playback.current_time(), 0.0);

        playback.seek(30.0);
        assert_eq!(playback.current_time(), 30.0);

        playback.play();
        assert!(!playback.is_paused());
        playback.pause();
        assert!(playback.current_time() >= 30.0);
    }
}
