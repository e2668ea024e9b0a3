/// 定位会话配置
///
/// 取代 SDK 的 builder/manager 层级：构造会话时传入一个显式的配置结构体。
/// 所有字段都有默认值，可以从 JSON 中只覆盖需要的部分。

use crate::algorithms::RSSIModel;
use crate::error::{PositioningError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 三边定位至少需要的锚点数量
pub const MIN_ANCHORS_FOR_FIX: usize = 3;

/// 估计器参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// 尝试定位所需的最少不同锚点数（不小于 3）
    pub min_anchors: usize,
    /// RSSI 转距离模型
    pub rssi_model: RSSIModel,
    /// 高斯-牛顿迭代次数上限
    pub max_iterations: usize,
    /// 收敛阈值（坐标单位）
    pub convergence_tolerance: f64,
    /// 共线判定阈值：锚点分布协方差矩阵最小/最大特征值之比
    pub collinearity_tolerance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            min_anchors: MIN_ANCHORS_FOR_FIX,
            rssi_model: RSSIModel::default(),
            max_iterations: 20,
            convergence_tolerance: 1e-6,
            collinearity_tolerance: 1e-3,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_anchors < MIN_ANCHORS_FOR_FIX {
            return Err(PositioningError::configuration(format!(
                "min_anchors 不能小于 {}",
                MIN_ANCHORS_FOR_FIX
            )));
        }
        if !(self.convergence_tolerance > 0.0) {
            return Err(PositioningError::configuration("convergence_tolerance 必须为正数"));
        }
        if !(self.collinearity_tolerance > 0.0 && self.collinearity_tolerance < 1.0) {
            return Err(PositioningError::configuration(
                "collinearity_tolerance 必须位于 (0, 1) 区间",
            ));
        }
        self.rssi_model.validate()
    }
}

/// 卡尔曼平滑参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// 过程噪声
    pub process_noise: f64,
    /// 测量噪声
    pub measurement_noise: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig {
            process_noise: 0.05,
            measurement_noise: 0.5,
        }
    }
}

/// 会话配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 估计周期（毫秒）
    pub cycle_interval_ms: u64,
    /// 观测窗口长度（毫秒）
    pub window_ms: u64,
    pub estimator: EstimatorConfig,
    /// 为 None 时不做平滑，直接输出估计结果
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            cycle_interval_ms: 1000,
            window_ms: 1000,
            estimator: EstimatorConfig::default(),
            smoothing: None,
        }
    }
}

impl SessionConfig {
    /// 从 JSON 字符串加载（缺失字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_ms == 0 {
            return Err(PositioningError::configuration("cycle_interval_ms 必须大于 0"));
        }
        if let Some(smoothing) = &self.smoothing {
            if !(smoothing.process_noise >= 0.0 && smoothing.measurement_noise > 0.0) {
                return Err(PositioningError::configuration("平滑噪声参数不合法"));
            }
        }
        self.estimator.validate()
    }
}
