/// 实时定位会话
///
/// 会话拥有完整生命周期（Idle → Scanning → Fixed → Stopped），周期性地：
/// 1. 从 ScanIngestor 换出当前窗口的观测
/// 2. 调用估计器求解位置
/// 3. 根据结果切换状态并通知订阅者
///
/// 同一时刻最多只有一次估计在进行；上一周期未结束时到期的 tick 直接跳过。
/// `stop()` 返回后不会再有任何回调被调用。

use crate::algorithms::{
    EstimateOutcome, Estimator, PositionEstimate, PositionEstimator, PositionSmoother,
};
use crate::config::SessionConfig;
use crate::error::{PositioningError, Result};
use crate::ingest::{Observation, ScanIngestor};
use crate::location::Location;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Scanning,
    Fixed,
    Stopped,
}

impl SessionState {
    /// 是否处于定位周期中（只有这两个状态会向订阅者发送估计）
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Scanning | SessionState::Fixed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Fixed => "fixed",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// 位置订阅者
pub trait PositionListener: Send + Sync {
    /// 得到区域内的新位置
    fn on_position_update(&self, estimate: &PositionEstimate);

    /// 之前的 fix 丢失或位置移出已知区域（每次丢失只通知一次）
    fn on_position_outside_location(&self);
}

/// 单个估计周期的结果
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// 发出了 `on_position_update`
    Updated(PositionEstimate),
    /// 发出了 `on_position_outside_location`
    OutsideLocation,
    /// 没有 fix，也没有需要通知的状态变化
    NoFix,
    /// 另一个周期的估计尚未结束，本次未做任何事
    Skipped,
    /// 会话未运行或周期已失效，未做任何事
    Inactive,
}

#[derive(Debug)]
struct StateCell {
    state: SessionState,
    /// 每次 start/stop 递增，旧的周期据此失效
    run: u64,
}

struct SessionShared {
    config: SessionConfig,
    location: Arc<Location>,
    ingestor: Arc<ScanIngestor>,
    estimator: Arc<dyn Estimator>,
    listener: Arc<dyn PositionListener>,
    state: Mutex<StateCell>,
    /// 回调闸门：状态切换和回调都在持有期间完成，stop() 借它等待进行中的回调。
    /// 可重入，允许订阅者在回调里调用 stop()。
    dispatch: ReentrantMutex<()>,
    smoother: Mutex<Option<PositionSmoother>>,
    /// 周期互斥：定时器和 run_cycle() 同一时刻只有一个在估计
    in_flight: Mutex<()>,
}

impl SessionShared {
    fn cycle(&self, run: u64) -> CycleOutcome {
        let Some(_in_flight) = self.in_flight.try_lock() else {
            debug!("上一周期仍在估计，跳过本次");
            return CycleOutcome::Skipped;
        };

        // 换出和运行代检查在同一把状态锁内，重启后的观测不会被旧周期取走
        let batch = {
            let cell = self.state.lock();
            if cell.run != run || !cell.state.is_active() {
                return CycleOutcome::Inactive;
            }
            self.ingestor.drain()
        };
        let outcome = self.estimator.estimate(&batch, &self.location);

        let _gate = self.dispatch.lock();
        let (previous, fix) = {
            let mut cell = self.state.lock();
            if cell.run != run || !cell.state.is_active() {
                return CycleOutcome::Inactive;
            }
            let mut smoother = self.smoother.lock();
            let fix = match &outcome {
                EstimateOutcome::Fix(estimate) if estimate.inside => {
                    let mut smoothed = match smoother.as_mut() {
                        Some(smoother) => smoother.smooth(estimate.clone()),
                        None => estimate.clone(),
                    };
                    // 平滑后的点可能落在凹形边界之外
                    smoothed.inside = self.location.contains(smoothed.x, smoothed.y);
                    Some(smoothed).filter(|e| e.inside)
                }
                _ => None,
            };
            if fix.is_none() {
                if let Some(smoother) = smoother.as_mut() {
                    smoother.reset();
                }
            }
            let next = if fix.is_some() {
                SessionState::Fixed
            } else {
                SessionState::Scanning
            };
            (std::mem::replace(&mut cell.state, next), fix)
        };

        if let Some(estimate) = fix {
            if previous != SessionState::Fixed {
                info!(
                    location = %self.location.identifier,
                    x = estimate.x,
                    y = estimate.y,
                    "获得定位"
                );
            }
            self.listener.on_position_update(&estimate);
            return CycleOutcome::Updated(estimate);
        }

        match &outcome {
            EstimateOutcome::Fix(estimate) => {
                debug!(x = estimate.x, y = estimate.y, "位置在区域外")
            }
            EstimateOutcome::NoFix(reason) => {
                debug!(%reason, observations = batch.len(), "本周期无法定位")
            }
        }
        if previous == SessionState::Fixed {
            info!(location = %self.location.identifier, "定位丢失");
            self.listener.on_position_outside_location();
            CycleOutcome::OutsideLocation
        } else {
            CycleOutcome::NoFix
        }
    }

    /// 标记为 Stopped，返回调用前是否处于非 Stopped 状态
    fn halt(&self) -> bool {
        let mut cell = self.state.lock();
        if cell.state == SessionState::Stopped {
            return false;
        }
        cell.state = SessionState::Stopped;
        cell.run += 1;
        true
    }
}

/// 定位会话
pub struct PositioningSession {
    shared: Arc<SessionShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PositioningSession {
    /// 使用默认的加权最小二乘估计器创建会话
    pub fn new(
        config: SessionConfig,
        location: Arc<Location>,
        listener: Arc<dyn PositionListener>,
    ) -> Self {
        let estimator = Arc::new(PositionEstimator::new(config.estimator.clone()));
        Self::with_estimator(config, location, listener, estimator)
    }

    /// 使用自定义估计器创建会话
    pub fn with_estimator(
        config: SessionConfig,
        location: Arc<Location>,
        listener: Arc<dyn PositionListener>,
        estimator: Arc<dyn Estimator>,
    ) -> Self {
        let ingestor = Arc::new(ScanIngestor::for_anchors(&location.anchors, config.window_ms));
        let smoother = config.smoothing.clone().map(PositionSmoother::new);
        PositioningSession {
            shared: Arc::new(SessionShared {
                config,
                location,
                ingestor,
                estimator,
                listener,
                state: Mutex::new(StateCell {
                    state: SessionState::Idle,
                    run: 0,
                }),
                dispatch: ReentrantMutex::new(()),
                smoother: Mutex::new(smoother),
                in_flight: Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// 启动定位周期
    ///
    /// 已在运行时为空操作。位置没有锚点或配置不合法时立即失败，状态不变。
    /// 必须在 tokio 运行时内调用。
    pub fn start(&self) -> Result<()> {
        let mut cell = self.shared.state.lock();
        if cell.state.is_active() {
            return Ok(());
        }
        self.shared.config.validate()?;
        self.shared.location.validate()?;
        let handle = Handle::try_current().map_err(|_| PositioningError::NoRuntime)?;

        cell.run += 1;
        cell.state = SessionState::Scanning;
        let run = cell.run;

        // 丢弃启动前残留的观测；持有状态锁，上一轮遗留的周期无法与之交错
        let stale = self.shared.ingestor.drain();
        if !stale.is_empty() {
            debug!(discarded = stale.len(), "丢弃启动前的观测");
        }
        if let Some(smoother) = self.shared.smoother.lock().as_mut() {
            smoother.reset();
        }
        drop(cell);

        let shared = Arc::clone(&self.shared);
        let period = self.shared.config.cycle_interval();
        let task = handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let worker = Arc::clone(&shared);
                match tokio::task::spawn_blocking(move || worker.cycle(run)).await {
                    Ok(CycleOutcome::Inactive) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "定位周期异常退出");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }

        info!(
            location = %self.shared.location.identifier,
            anchors = self.shared.location.anchors.len(),
            interval_ms = self.shared.config.cycle_interval_ms,
            "定位会话已启动"
        );
        Ok(())
    }

    /// 停止定位
    ///
    /// 可在任意上下文调用（包括订阅者回调内部）。返回前会等待进行中的回调结束，
    /// 返回后不会再有新的回调。
    pub fn stop(&self) {
        if !self.shared.halt() {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let _wait = self.shared.dispatch.lock();
        info!(location = %self.shared.location.identifier, "定位会话已停止");
    }

    /// 立即执行一次估计周期（与定时器使用相同的逻辑）
    ///
    /// 定时器的估计尚在进行时返回 `Skipped`，观测留给下一个周期。
    pub fn run_cycle(&self) -> CycleOutcome {
        let run = self.shared.state.lock().run;
        self.shared.cycle(run)
    }

    /// 接收一条扫描观测
    pub fn ingest(&self, observation: Observation) -> bool {
        self.shared.ingestor.ingest(observation)
    }

    /// 供扫描源持有的接入器
    pub fn ingestor(&self) -> Arc<ScanIngestor> {
        Arc::clone(&self.shared.ingestor)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn location(&self) -> &Arc<Location> {
        &self.shared.location
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for PositioningSession {
    fn drop(&mut self) {
        self.shared.halt();
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl fmt::Debug for PositioningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositioningSession")
            .field("location", &self.shared.location.identifier)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{AnchorMap, BeaconAnchor, BoundaryPolygon, RSSIModel};
    use crate::config::SmoothingConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        updates: AtomicUsize,
        outside: AtomicUsize,
    }

    impl PositionListener for CountingListener {
        fn on_position_update(&self, _estimate: &PositionEstimate) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn on_position_outside_location(&self) {
            self.outside.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn location() -> Arc<Location> {
        let anchors = AnchorMap::from_vec(vec![
            BeaconAnchor::new("B1", 0.0, 0.0),
            BeaconAnchor::new("B2", 10.0, 0.0),
            BeaconAnchor::new("B3", 0.0, 10.0),
        ])
        .unwrap();
        Arc::new(
            Location::new("test", "Test", anchors)
                .with_boundary(BoundaryPolygon::rectangle(0.0, 0.0, 10.0, 10.0)),
        )
    }

    fn slow_config() -> SessionConfig {
        SessionConfig {
            cycle_interval_ms: 3_600_000,
            ..SessionConfig::default()
        }
    }

    fn feed(session: &PositioningSession, point: (f64, f64)) {
        let model = RSSIModel::default();
        for anchor in session.location().anchors.iter() {
            let d = anchor.distance_to_point(point.0, point.1);
            session.ingest(Observation::new(anchor.id.clone(), model.distance_to_rssi(d), 500));
        }
    }

    #[test]
    fn test_start_outside_runtime() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener);
        assert!(matches!(session.start(), Err(PositioningError::NoRuntime)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_idle_cycle_is_inactive() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener.clone());
        feed(&session, (3.0, 4.0));
        assert_eq!(session.run_cycle(), CycleOutcome::Inactive);
        assert_eq!(listener.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener.clone());

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(session.run_cycle(), CycleOutcome::NoFix);

        feed(&session, (3.0, 4.0));
        assert!(matches!(session.run_cycle(), CycleOutcome::Updated(_)));
        assert_eq!(session.state(), SessionState::Fixed);

        assert_eq!(session.run_cycle(), CycleOutcome::OutsideLocation);
        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(session.run_cycle(), CycleOutcome::NoFix);

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(listener.updates.load(Ordering::SeqCst), 1);
        assert_eq!(listener.outside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outside_boundary_counts_as_lost() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener.clone());
        session.start().unwrap();

        feed(&session, (3.0, 4.0));
        assert!(matches!(session.run_cycle(), CycleOutcome::Updated(_)));

        // 真实位置在边界外
        feed(&session, (14.0, 4.0));
        assert_eq!(session.run_cycle(), CycleOutcome::OutsideLocation);
        assert_eq!(listener.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_without_anchors_fails() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(
            slow_config(),
            Arc::new(Location::empty("nowhere")),
            listener,
        );
        assert!(session.start().unwrap_err().is_configuration());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop_idempotent() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener);
        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Scanning);

        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.run_cycle(), CycleOutcome::Inactive);

        // 停止后可以重新启动
        session.start().unwrap();
        assert!(session.is_running());
    }

    #[tokio::test]
    async fn test_busy_cycle_is_skipped() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener.clone());
        session.start().unwrap();
        feed(&session, (3.0, 4.0));

        {
            let _busy = session.shared.in_flight.lock();
            assert_eq!(session.run_cycle(), CycleOutcome::Skipped);
        }
        // 跳过的周期不换出观测
        assert_eq!(session.ingestor().len(), 3);
        assert!(matches!(session.run_cycle(), CycleOutcome::Updated(_)));
        assert_eq!(listener.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cycle_keeps_new_run_observations() {
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(slow_config(), location(), listener.clone());
        session.start().unwrap();
        let old_run = session.shared.state.lock().run;

        session.stop();
        session.start().unwrap();
        feed(&session, (3.0, 4.0));

        // 上一轮遗留的周期既不回调，也不取走新一轮的观测
        assert_eq!(session.shared.cycle(old_run), CycleOutcome::Inactive);
        assert_eq!(session.ingestor().len(), 3);
        assert!(matches!(session.run_cycle(), CycleOutcome::Updated(_)));
    }

    #[tokio::test]
    async fn test_smoothed_point_outside_concave_boundary() {
        // L 形区域，(5, 5) 位于缺角内
        let l_shape = BoundaryPolygon::new(vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 4.0),
            (4.0, 4.0),
            (4.0, 10.0),
            (0.0, 10.0),
        ]);
        let location = Arc::new(
            Location::new("l-shape", "L", location().anchors.clone()).with_boundary(l_shape),
        );
        let config = SessionConfig {
            smoothing: Some(SmoothingConfig {
                process_noise: 0.0,
                measurement_noise: 1.0,
            }),
            ..slow_config()
        };
        let listener = Arc::new(CountingListener::default());
        let session = PositioningSession::new(config, location, listener.clone());
        session.start().unwrap();

        feed(&session, (8.0, 2.0));
        assert!(matches!(session.run_cycle(), CycleOutcome::Updated(_)));

        // 原始估计 (2, 8) 在区域内，平滑后落到 (5, 5)
        feed(&session, (2.0, 8.0));
        assert_eq!(session.run_cycle(), CycleOutcome::OutsideLocation);
        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(listener.updates.load(Ordering::SeqCst), 1);
        assert_eq!(listener.outside.load(Ordering::SeqCst), 1);

        // 平滑器已重置，下一个区域内的 fix 直接采用
        feed(&session, (2.0, 8.0));
        match session.run_cycle() {
            CycleOutcome::Updated(estimate) => {
                assert!((estimate.x - 2.0).abs() < 1e-3);
                assert!((estimate.y - 8.0).abs() < 1e-3);
                assert!(estimate.inside);
            }
            other => panic!("预期位置更新，实际 {:?}", other),
        }
    }
}
