/// 定位算法实现
///
/// 加权最小二乘三边定位：
/// - 按锚点聚合窗口内 RSSI，经 RSSI 模型换算为距离
/// - 线性化解作为初值，再做高斯-牛顿迭代最小化距离残差
/// - 锚点共线/重合时直接返回 no-fix，不输出不稳定的估计
///
/// 相同的批次和锚点集合总是得到完全相同的结果。

use crate::algorithms::{
    AnchorMap, BoundaryPolygon, DistanceUnit, EstimateOutcome, NoFixReason, PositionEstimate,
};
use crate::config::EstimatorConfig;
use crate::ingest::ObservationBatch;
use crate::location::Location;
use tracing::debug;

/// 距离下限，避免权重发散
const MIN_RANGE: f64 = 1e-3;

/// 回溯步长减半次数
const MAX_BACKTRACK: usize = 8;

/// 估计器接口 - 会话通过它调用定位算法，测试可替换实现
pub trait Estimator: Send + Sync {
    /// 根据观测批次和位置数据计算位置，锚点不足或几何退化时返回 no-fix
    fn estimate(&self, batch: &ObservationBatch, location: &Location) -> EstimateOutcome;
}

/// 单个锚点的测距
#[derive(Clone, Debug)]
struct RangeMeasurement<'a> {
    x: f64,
    y: f64,
    distance: f64,
    weight: f64,
    mean_rssi: f64,
    floor: Option<&'a str>,
}

/// 加权最小二乘定位器
#[derive(Clone, Debug, Default)]
pub struct PositionEstimator {
    config: EstimatorConfig,
}

impl PositionEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        PositionEstimator { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// 对一个批次求解位置
    ///
    /// `boundary` 为 None 时所有坐标都视为在区域内。
    pub fn solve(
        &self,
        batch: &ObservationBatch,
        anchors: &AnchorMap,
        boundary: Option<&BoundaryPolygon>,
    ) -> EstimateOutcome {
        let measurements = self.collect_measurements(batch, anchors);
        let required = self.config.min_anchors.max(3);
        if measurements.len() < required {
            debug!(seen = measurements.len(), required, "锚点不足，无法定位");
            return EstimateOutcome::NoFix(NoFixReason::InsufficientAnchors {
                seen: measurements.len(),
                required,
            });
        }

        if self.is_degenerate(&measurements) {
            debug!(anchors = measurements.len(), "锚点共线或重合");
            return EstimateOutcome::NoFix(NoFixReason::DegenerateGeometry);
        }

        let initial = linearized_solution(&measurements)
            .unwrap_or_else(|| weighted_centroid(&measurements));
        let (x, y) = self.refine(&measurements, initial);
        if !x.is_finite() || !y.is_finite() {
            return EstimateOutcome::NoFix(NoFixReason::Diverged);
        }

        let error_radius = weighted_rms_residual(&measurements, x, y);
        if !error_radius.is_finite() {
            return EstimateOutcome::NoFix(NoFixReason::Diverged);
        }
        let error_m = self
            .config
            .rssi_model
            .convert_to_unit(error_radius, DistanceUnit::Meter);
        let confidence = (1.0 / (1.0 + error_m)).clamp(0.0, 1.0);

        // 取信号最强锚点的楼层，RSSI 相同时按标识符顺序取第一个
        let floor = measurements
            .iter()
            .fold(None::<&RangeMeasurement>, |best, m| match best {
                Some(b) if b.mean_rssi >= m.mean_rssi => Some(b),
                _ => Some(m),
            })
            .and_then(|m| m.floor.map(str::to_string));

        EstimateOutcome::Fix(PositionEstimate {
            x,
            y,
            error_radius,
            confidence,
            timestamp_ms: batch.newest_timestamp().unwrap_or_default(),
            inside: boundary.is_none_or(|b| b.contains(x, y)),
            anchor_count: measurements.len(),
            floor,
        })
    }

    fn collect_measurements<'a>(
        &self,
        batch: &ObservationBatch,
        anchors: &'a AnchorMap,
    ) -> Vec<RangeMeasurement<'a>> {
        let model = &self.config.rssi_model;
        batch
            .aggregate()
            .into_iter()
            .filter_map(|(id, signal)| {
                let anchor = anchors.get(id)?;
                let distance = model.rssi_to_distance(signal.mean_rssi).max(MIN_RANGE);
                if !distance.is_finite() {
                    return None;
                }
                // 远距离测距误差更大，按距离平方反比加权，样本越多越可信
                let weight = signal.samples as f64 / (distance * distance);
                Some(RangeMeasurement {
                    x: anchor.x,
                    y: anchor.y,
                    distance,
                    weight,
                    mean_rssi: signal.mean_rssi,
                    floor: anchor.floor.as_deref(),
                })
            })
            .collect()
    }

    /// 锚点分布协方差矩阵的最小/最大特征值之比过小即视为共线
    fn is_degenerate(&self, measurements: &[RangeMeasurement<'_>]) -> bool {
        let n = measurements.len() as f64;
        let cx = measurements.iter().map(|m| m.x).sum::<f64>() / n;
        let cy = measurements.iter().map(|m| m.y).sum::<f64>() / n;

        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for m in measurements {
            let dx = m.x - cx;
            let dy = m.y - cy;
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }

        let half_trace = (sxx + syy) / 2.0;
        let det = sxx * syy - sxy * sxy;
        let spread = (half_trace * half_trace - det).max(0.0).sqrt();
        let lambda_max = half_trace + spread;
        let lambda_min = half_trace - spread;

        if lambda_max <= f64::EPSILON {
            return true;
        }
        lambda_min / lambda_max < self.config.collinearity_tolerance
    }

    /// 高斯-牛顿迭代，带回溯保证代价不增
    fn refine(&self, measurements: &[RangeMeasurement<'_>], start: (f64, f64)) -> (f64, f64) {
        let (mut x, mut y) = start;
        let mut cost = weighted_cost(measurements, x, y);

        for _ in 0..self.config.max_iterations {
            let (mut a11, mut a12, mut a22) = (0.0, 0.0, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);

            for m in measurements {
                let dx = x - m.x;
                let dy = y - m.y;
                let range = (dx * dx + dy * dy).sqrt();
                if range < 1e-9 {
                    continue;
                }
                let jx = dx / range;
                let jy = dy / range;
                let residual = range - m.distance;
                a11 += m.weight * jx * jx;
                a12 += m.weight * jx * jy;
                a22 += m.weight * jy * jy;
                g1 += m.weight * jx * residual;
                g2 += m.weight * jy * residual;
            }

            let Some((step_x, step_y)) = solve_2x2(a11, a12, a22, -g1, -g2) else {
                break;
            };

            let mut scale = 1.0;
            let mut accepted = false;
            for _ in 0..MAX_BACKTRACK {
                let nx = x + scale * step_x;
                let ny = y + scale * step_y;
                let new_cost = weighted_cost(measurements, nx, ny);
                if new_cost <= cost {
                    x = nx;
                    y = ny;
                    cost = new_cost;
                    accepted = true;
                    break;
                }
                scale /= 2.0;
            }

            let step_norm = scale * (step_x * step_x + step_y * step_y).sqrt();
            if !accepted || step_norm < self.config.convergence_tolerance {
                break;
            }
        }

        (x, y)
    }
}

impl Estimator for PositionEstimator {
    fn estimate(&self, batch: &ObservationBatch, location: &Location) -> EstimateOutcome {
        self.solve(batch, &location.anchors, location.boundary.as_ref())
    }
}

/// 对称 2x2 方程组求解，奇异时返回 None
fn solve_2x2(a11: f64, a12: f64, a22: f64, b1: f64, b2: f64) -> Option<(f64, f64)> {
    let det = a11 * a22 - a12 * a12;
    let scale = (a11.abs() + a22.abs()).max(f64::MIN_POSITIVE);
    if det.abs() <= 1e-12 * scale * scale {
        return None;
    }
    Some(((b1 * a22 - b2 * a12) / det, (a11 * b2 - a12 * b1) / det))
}

/// 以权重最大的锚点为参考做线性化的加权最小二乘
fn linearized_solution(measurements: &[RangeMeasurement<'_>]) -> Option<(f64, f64)> {
    let reference = measurements
        .iter()
        .enumerate()
        .fold(0, |best, (i, m)| {
            if m.weight > measurements[best].weight { i } else { best }
        });
    let r = &measurements[reference];

    let (mut a11, mut a12, mut a22) = (0.0, 0.0, 0.0);
    let (mut b1, mut b2) = (0.0, 0.0);
    for (i, m) in measurements.iter().enumerate() {
        if i == reference {
            continue;
        }
        let ax = 2.0 * (m.x - r.x);
        let ay = 2.0 * (m.y - r.y);
        let rhs = r.distance * r.distance - m.distance * m.distance + m.x * m.x - r.x * r.x
            + m.y * m.y
            - r.y * r.y;
        a11 += m.weight * ax * ax;
        a12 += m.weight * ax * ay;
        a22 += m.weight * ay * ay;
        b1 += m.weight * ax * rhs;
        b2 += m.weight * ay * rhs;
    }

    solve_2x2(a11, a12, a22, b1, b2)
}

fn weighted_centroid(measurements: &[RangeMeasurement<'_>]) -> (f64, f64) {
    let total: f64 = measurements.iter().map(|m| m.weight).sum();
    let x = measurements.iter().map(|m| m.x * m.weight).sum::<f64>() / total;
    let y = measurements.iter().map(|m| m.y * m.weight).sum::<f64>() / total;
    (x, y)
}

fn weighted_cost(measurements: &[RangeMeasurement<'_>], x: f64, y: f64) -> f64 {
    measurements
        .iter()
        .map(|m| {
            let residual = ((x - m.x).powi(2) + (y - m.y).powi(2)).sqrt() - m.distance;
            m.weight * residual * residual
        })
        .sum()
}

fn weighted_rms_residual(measurements: &[RangeMeasurement<'_>], x: f64, y: f64) -> f64 {
    let total: f64 = measurements.iter().map(|m| m.weight).sum();
    if total <= 0.0 {
        return f64::INFINITY;
    }
    (weighted_cost(measurements, x, y) / total).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{BeaconAnchor, RSSIModel};
    use crate::ingest::Observation;

    fn anchors() -> AnchorMap {
        AnchorMap::from_vec(vec![
            BeaconAnchor::new("B1", 0.0, 0.0),
            BeaconAnchor::new("B2", 10.0, 0.0),
            BeaconAnchor::new("B3", 0.0, 10.0),
            BeaconAnchor::new("B4", 10.0, 10.0).with_floor("2"),
        ])
        .unwrap()
    }

    fn batch_for(point: (f64, f64), ids: &[&str]) -> ObservationBatch {
        let model = RSSIModel::default();
        let map = anchors();
        let observations = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let anchor = map.get(id).unwrap();
                let d = anchor.distance_to_point(point.0, point.1);
                Observation::new(*id, model.distance_to_rssi(d), 1000 + i as u64)
            })
            .collect();
        ObservationBatch::new(observations, 1000)
    }

    #[test]
    fn test_exact_ranges_recover_position() {
        let estimator = PositionEstimator::default();
        let outcome = estimator.solve(&batch_for((3.0, 4.0), &["B1", "B2", "B3"]), &anchors(), None);
        let estimate = outcome.into_estimate().unwrap();
        assert!((estimate.x - 3.0).abs() < 1e-4, "x = {}", estimate.x);
        assert!((estimate.y - 4.0).abs() < 1e-4, "y = {}", estimate.y);
        assert!(estimate.error_radius < 1e-4);
        assert_eq!(estimate.anchor_count, 3);
        assert_eq!(estimate.timestamp_ms, 1002);
        assert!(estimate.inside);
    }

    #[test]
    fn test_two_anchors_no_fix() {
        let estimator = PositionEstimator::default();
        let outcome = estimator.solve(&batch_for((3.0, 4.0), &["B1", "B2"]), &anchors(), None);
        assert_eq!(
            outcome,
            EstimateOutcome::NoFix(NoFixReason::InsufficientAnchors { seen: 2, required: 3 })
        );
    }

    #[test]
    fn test_collinear_anchors_no_fix() {
        let line = AnchorMap::from_vec(vec![
            BeaconAnchor::new("B1", 0.0, 0.0),
            BeaconAnchor::new("B2", 5.0, 0.0),
            BeaconAnchor::new("B3", 10.0, 0.0),
        ])
        .unwrap();
        let batch = ObservationBatch::new(
            vec![
                Observation::new("B1", -60.0, 1),
                Observation::new("B2", -65.0, 1),
                Observation::new("B3", -70.0, 1),
            ],
            1000,
        );
        let outcome = PositionEstimator::default().solve(&batch, &line, None);
        assert_eq!(outcome, EstimateOutcome::NoFix(NoFixReason::DegenerateGeometry));
    }

    #[test]
    fn test_floor_from_strongest_anchor() {
        let estimator = PositionEstimator::default();
        let outcome = estimator.solve(
            &batch_for((9.0, 9.0), &["B1", "B2", "B3", "B4"]),
            &anchors(),
            None,
        );
        assert_eq!(outcome.into_estimate().unwrap().floor.as_deref(), Some("2"));
    }

    #[test]
    fn test_boundary_marks_outside() {
        let boundary = BoundaryPolygon::rectangle(0.0, 0.0, 2.0, 2.0);
        let outcome = PositionEstimator::default().solve(
            &batch_for((3.0, 4.0), &["B1", "B2", "B3"]),
            &anchors(),
            Some(&boundary),
        );
        assert!(outcome.into_estimate().unwrap().is_outside());
    }

    #[test]
    fn test_solve_2x2_singular() {
        assert!(solve_2x2(1.0, 1.0, 1.0, 1.0, 1.0).is_none());
        assert_eq!(solve_2x2(2.0, 0.0, 4.0, 2.0, 4.0), Some((1.0, 1.0)));
    }
}
