/// 位置边界多边形
///
/// 判断估计坐标是否位于已知区域内。这是几何判定，不是错误条件。

use serde::{Deserialize, Serialize};

/// 边界多边形，顶点按顺序首尾相连（不需要重复首点）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundaryPolygon {
    vertices: Vec<(f64, f64)>,
}

impl BoundaryPolygon {
    pub fn new(vertices: Vec<(f64, f64)>) -> Self {
        BoundaryPolygon { vertices }
    }

    /// 轴对齐矩形
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundaryPolygon::new(vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
        ])
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// 顶点不足 3 个的多边形不围成任何区域
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3
    }

    /// 射线法判定点是否在多边形内
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !self.is_valid() || !x.is_finite() || !y.is_finite() {
            return false;
        }
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// 多边形面积（鞋带公式）
    pub fn area(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        let n = self.vertices.len();
        let twice: f64 = (0..n)
            .map(|i| {
                let (x1, y1) = self.vertices[i];
                let (x2, y2) = self.vertices[(i + 1) % n];
                x1 * y2 - x2 * y1
            })
            .sum();
        twice.abs() / 2.0
    }
}
