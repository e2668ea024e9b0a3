/// 信标锚点定义和相关数据结构
///
/// 锚点在位置数据加载后即不可变，由所属位置（Location）持有。

use crate::error::PositioningError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个信标锚点 - 已知固定坐标的参考信标
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconAnchor {
    /// 信标 MAC 地址或唯一标识符（在同一位置内唯一）
    pub id: String,
    /// 信标友好名称
    #[serde(default)]
    pub name: String,
    /// X 坐标（米）
    pub x: f64,
    /// Y 坐标（米）
    pub y: f64,
    /// 楼层标记（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
}

impl BeaconAnchor {
    /// 创建新的锚点
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        BeaconAnchor {
            id: id.into(),
            name: String::new(),
            x,
            y,
            floor: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_floor(mut self, floor: impl Into<String>) -> Self {
        self.floor = Some(floor.into());
        self
    }

    /// 获取锚点的 2D 坐标
    pub fn coordinates(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// 到平面上某点的欧几里得距离
    pub fn distance_to_point(&self, x: f64, y: f64) -> f64 {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx * dx + dy * dy).sqrt()
    }

    /// 与另一锚点的距离
    pub fn distance_to(&self, other: &BeaconAnchor) -> f64 {
        self.distance_to_point(other.x, other.y)
    }
}

/// 锚点集合 - 按标识符有序存储，保证遍历顺序确定
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BeaconAnchor>", into = "Vec<BeaconAnchor>")]
pub struct AnchorMap {
    anchors: BTreeMap<String, BeaconAnchor>,
}

impl AnchorMap {
    /// 创建空的锚点集合
    pub fn new() -> Self {
        AnchorMap {
            anchors: BTreeMap::new(),
        }
    }

    /// 从锚点向量创建集合，标识符重复视为配置错误
    pub fn from_vec(anchors: Vec<BeaconAnchor>) -> Result<Self, PositioningError> {
        let mut map = AnchorMap::new();
        for anchor in anchors {
            if map.anchors.contains_key(&anchor.id) {
                return Err(PositioningError::configuration(format!(
                    "信标标识符重复: {}",
                    anchor.id
                )));
            }
            map.anchors.insert(anchor.id.clone(), anchor);
        }
        Ok(map)
    }

    /// 添加锚点（同标识符覆盖）
    pub fn insert(&mut self, anchor: BeaconAnchor) -> Option<BeaconAnchor> {
        self.anchors.insert(anchor.id.clone(), anchor)
    }

    /// 获取锚点
    pub fn get(&self, id: &str) -> Option<&BeaconAnchor> {
        self.anchors.get(id)
    }

    /// 是否包含该标识符
    pub fn contains(&self, id: &str) -> bool {
        self.anchors.contains_key(id)
    }

    /// 按标识符顺序迭代锚点
    pub fn iter(&self) -> impl Iterator<Item = &BeaconAnchor> {
        self.anchors.values()
    }

    /// 全部锚点标识符
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.anchors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl TryFrom<Vec<BeaconAnchor>> for AnchorMap {
    type Error = PositioningError;

    fn try_from(anchors: Vec<BeaconAnchor>) -> Result<Self, Self::Error> {
        AnchorMap::from_vec(anchors)
    }
}

impl From<AnchorMap> for Vec<BeaconAnchor> {
    fn from(map: AnchorMap) -> Self {
        map.anchors.into_values().collect()
    }
}
