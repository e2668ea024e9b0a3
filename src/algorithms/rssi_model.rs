/// RSSI 到距离转换模型
///
/// 对数距离模型 `RSSI(d) = A + B * log10(d)`，要求 B < 0，
/// 因此反解出的距离随 RSSI 增大而单调递减。具体标定参数是可调配置。

use crate::error::PositioningError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 定位计量单位
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    Centimeter,
    #[default]
    Meter,
    Millimeter,
}

impl DistanceUnit {
    /// 1 米对应的该单位数值
    fn per_meter(self) -> f64 {
        match self {
            DistanceUnit::Meter => 1.0,
            DistanceUnit::Centimeter => 100.0,
            DistanceUnit::Millimeter => 1000.0,
        }
    }
}

/// 模型类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    LogDistance,
    FreeSpace,
    LogNormalShadow,
}

/// RSSI 转距离模型
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RSSIModel {
    /// 截距 A (dBm) - 1 米处的参考功率
    pub a: f64,
    /// 斜率 B - 衰减速率，必须为负
    pub b: f64,
    /// 距离单位（与锚点坐标单位一致）
    pub unit: DistanceUnit,
    pub kind: ModelKind,
}

impl RSSIModel {
    /// 对数路径损耗模型
    ///
    /// 公式: RSSI(d) = A + B * log10(d)
    pub fn log_distance(a: f64, b: f64, unit: DistanceUnit) -> Self {
        RSSIModel {
            a,
            b,
            unit,
            kind: ModelKind::LogDistance,
        }
    }

    /// 自由空间路径损耗模型（B = -20）
    pub fn free_space(a: f64, unit: DistanceUnit) -> Self {
        RSSIModel {
            a,
            b: -20.0,
            unit,
            kind: ModelKind::FreeSpace,
        }
    }

    /// 对数正态阴影模型，路径损耗指数 n 折算为 B = -10n
    pub fn log_normal_shadow(a: f64, n: f64, unit: DistanceUnit) -> Self {
        RSSIModel {
            a,
            b: -10.0 * n,
            unit,
            kind: ModelKind::LogNormalShadow,
        }
    }

    /// 路径损耗指数 n
    pub fn path_loss_exponent(&self) -> f64 {
        -self.b / 10.0
    }

    /// 根据 RSSI 计算距离（模型单位）
    ///
    /// 反解对数距离模型: d = 10^((RSSI - A) / B)
    pub fn rssi_to_distance(&self, rssi: f64) -> f64 {
        let exponent = (rssi - self.a) / self.b;
        10_f64.powf(exponent) * self.unit.per_meter()
    }

    /// 根据距离（模型单位）计算 RSSI
    pub fn distance_to_rssi(&self, distance: f64) -> f64 {
        let meters = distance / self.unit.per_meter();
        if meters <= 0.0 {
            return f64::INFINITY;
        }
        self.a + self.b * meters.log10()
    }

    /// 将模型单位下的距离换算到目标单位
    pub fn convert_to_unit(&self, distance: f64, target_unit: DistanceUnit) -> f64 {
        let meters = distance / self.unit.per_meter();
        (meters * target_unit.per_meter()).max(0.0)
    }

    /// 验证 RSSI 模型的合理性
    pub fn validate(&self) -> Result<(), PositioningError> {
        if !self.a.is_finite() || !self.b.is_finite() {
            return Err(PositioningError::configuration("RSSI 模型参数必须为有限数值"));
        }
        if self.b >= 0.0 {
            return Err(PositioningError::configuration(
                "斜率 B 应为负数（RSSI 随距离增加而减小）",
            ));
        }
        if self.a > 0.0 {
            return Err(PositioningError::configuration(
                "截距 A 通常为负（功率以 dBm 表示）",
            ));
        }
        Ok(())
    }

    /// 获取模型描述
    pub fn description(&self) -> String {
        format!(
            "RSSI模型 [{:?}] - A={:.2} dBm, B={:.2}, n={:.2}, 单位: {:?}",
            self.kind,
            self.a,
            self.b,
            self.path_loss_exponent(),
            self.unit
        )
    }
}

impl Default for RSSIModel {
    fn default() -> Self {
        // 常见 BLE 信标：1 米处约 -59 dBm，室内近似自由空间衰减
        RSSIModel::log_distance(-59.0, -20.0, DistanceUnit::Meter)
    }
}

impl fmt::Display for RSSIModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
