/// 定位结果数据结构
///
/// 每个估计周期生成一个新的结果，创建后不再修改。

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 定位结果（一次成功的 fix）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    /// X 坐标
    pub x: f64,
    /// Y 坐标
    pub y: f64,
    /// 误差半径（>= 0，单位与锚点坐标一致）
    pub error_radius: f64,
    /// 定位置信度 (0.0 ~ 1.0)
    pub confidence: f64,
    /// 批次中最新观测的时间戳（毫秒）
    pub timestamp_ms: u64,
    /// 是否位于位置边界内
    pub inside: bool,
    /// 参与定位的锚点数量
    pub anchor_count: usize,
    /// 楼层（取信号最强锚点的楼层标记）
    pub floor: Option<String>,
}

impl PositionEstimate {
    /// 获取 2D 坐标
    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 与另一结果的 2D 距离
    pub fn distance_to(&self, other: &PositionEstimate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// 时间戳转换为 UTC 时间
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.timestamp_ms).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// 是否在已知区域外
    pub fn is_outside(&self) -> bool {
        !self.inside
    }
}

impl fmt::Display for PositionEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.2}, {:.2}) ±{:.2} [{:.1}%]{}",
            self.x,
            self.y,
            self.error_radius,
            self.confidence * 100.0,
            if self.inside { "" } else { " outside" }
        )
    }
}

/// 无法定位的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoFixReason {
    /// 批次中可识别的锚点不足
    InsufficientAnchors { seen: usize, required: usize },
    /// 锚点共线或重合，几何不可解
    DegenerateGeometry,
    /// 迭代结果不是有限数值
    Diverged,
}

impl fmt::Display for NoFixReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoFixReason::InsufficientAnchors { seen, required } => {
                write!(f, "锚点不足 ({}/{})", seen, required)
            }
            NoFixReason::DegenerateGeometry => write!(f, "锚点几何退化"),
            NoFixReason::Diverged => write!(f, "迭代发散"),
        }
    }
}

/// 一次估计的结果：fix 或 no-fix
#[derive(Clone, Debug, PartialEq)]
pub enum EstimateOutcome {
    Fix(PositionEstimate),
    NoFix(NoFixReason),
}

impl EstimateOutcome {
    pub fn is_fix(&self) -> bool {
        matches!(self, EstimateOutcome::Fix(_))
    }

    pub fn estimate(&self) -> Option<&PositionEstimate> {
        match self {
            EstimateOutcome::Fix(estimate) => Some(estimate),
            EstimateOutcome::NoFix(_) => None,
        }
    }

    pub fn into_estimate(self) -> Option<PositionEstimate> {
        match self {
            EstimateOutcome::Fix(estimate) => Some(estimate),
            EstimateOutcome::NoFix(_) => None,
        }
    }
}
