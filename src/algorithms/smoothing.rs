/// 卡尔曼平滑
///
/// 会话可选地对输出的 fix 做平滑，降低坐标抖动。丢失 fix 后重置。

use crate::algorithms::PositionEstimate;
use crate::config::SmoothingConfig;

/// 简单的 1D 卡尔曼滤波器
#[derive(Clone, Debug)]
pub struct KalmanFilter1D {
    /// 过程噪声协方差
    pub q: f64,
    /// 测量噪声协方差
    pub r: f64,
    /// 状态估计协方差
    pub p: f64,
    /// 当前估计值
    pub value: f64,
}

impl KalmanFilter1D {
    pub fn new(q: f64, r: f64, initial_value: f64) -> Self {
        KalmanFilter1D {
            q,
            r,
            p: 1.0,
            value: initial_value,
        }
    }

    /// 用一次测量更新，`dt` 为距上次更新的秒数
    pub fn update(&mut self, measurement: f64, dt: f64) -> f64 {
        // 预测
        self.p += self.q * dt.max(0.0);

        // 卡尔曼增益
        let k = self.p / (self.p + self.r);

        self.value += k * (measurement - self.value);
        self.p *= 1.0 - k;

        self.value
    }
}

/// 2D 位置平滑器
#[derive(Clone, Debug)]
pub struct PositionSmoother {
    config: SmoothingConfig,
    state: Option<SmootherState>,
}

#[derive(Clone, Debug)]
struct SmootherState {
    x: KalmanFilter1D,
    y: KalmanFilter1D,
    last_timestamp_ms: u64,
}

impl PositionSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        PositionSmoother { config, state: None }
    }

    /// 平滑一次估计；第一次调用直接采用测量值
    pub fn smooth(&mut self, estimate: PositionEstimate) -> PositionEstimate {
        let Some(state) = self.state.as_mut() else {
            self.state = Some(SmootherState {
                x: KalmanFilter1D::new(
                    self.config.process_noise,
                    self.config.measurement_noise,
                    estimate.x,
                ),
                y: KalmanFilter1D::new(
                    self.config.process_noise,
                    self.config.measurement_noise,
                    estimate.y,
                ),
                last_timestamp_ms: estimate.timestamp_ms,
            });
            return estimate;
        };

        let dt = estimate.timestamp_ms.saturating_sub(state.last_timestamp_ms) as f64 / 1000.0;
        state.last_timestamp_ms = estimate.timestamp_ms;

        PositionEstimate {
            x: state.x.update(estimate.x, dt),
            y: state.y.update(estimate.y, dt),
            ..estimate
        }
    }

    /// 丢失 fix 时重置
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn is_primed(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(x: f64, y: f64, timestamp_ms: u64) -> PositionEstimate {
        PositionEstimate {
            x,
            y,
            error_radius: 0.2,
            confidence: 0.9,
            timestamp_ms,
            inside: true,
            anchor_count: 3,
            floor: None,
        }
    }

    #[test]
    fn test_kalman_filter_1d() {
        let mut filter = KalmanFilter1D::new(0.001, 0.1, 0.0);
        let v1 = filter.update(10.0, 1.0);
        let v2 = filter.update(10.1, 1.0);
        assert!(v1 > 0.0 && v1 < 10.0);
        assert!(v2 > v1 && v2 < 10.1);
    }

    #[test]
    fn test_smoother_damps_jump() {
        let mut smoother = PositionSmoother::new(SmoothingConfig::default());
        let first = smoother.smooth(estimate(1.0, 1.0, 0));
        assert_eq!(first.xy(), (1.0, 1.0));

        let second = smoother.smooth(estimate(5.0, 1.0, 1000));
        assert!(second.x > 1.0 && second.x < 5.0);
        assert_eq!(second.error_radius, 0.2);
    }

    #[test]
    fn test_smoother_reset() {
        let mut smoother = PositionSmoother::new(SmoothingConfig::default());
        smoother.smooth(estimate(1.0, 1.0, 0));
        assert!(smoother.is_primed());
        smoother.reset();
        assert!(!smoother.is_primed());
        assert_eq!(smoother.smooth(estimate(5.0, 5.0, 100)).xy(), (5.0, 5.0));
    }
}
