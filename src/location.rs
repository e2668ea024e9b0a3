/// 位置数据加载
///
/// 位置（锚点集合 + 边界多边形）通过显式加载得到不可变的目录，
/// 再以 `Arc<Location>` 传入定位会话，不使用全局可变存储。
///
/// JSON 格式：
///
/// ```json
/// [
///   {
///     "identifier": "office-3f",
///     "name": "三楼办公区",
///     "anchors": [{"id": "20:A7:16:5E:C5:D6", "x": 7.64, "y": 2.16, "floor": "3"}],
///     "boundary": [[0.0, 0.0], [12.0, 0.0], [12.0, 9.0], [0.0, 9.0]]
///   }
/// ]
/// ```

use crate::algorithms::{AnchorMap, BoundaryPolygon};
use crate::error::{PositioningError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// 一个室内位置：锚点和可选的边界
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub anchors: AnchorMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<BoundaryPolygon>,
}

impl Location {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>, anchors: AnchorMap) -> Self {
        Location {
            identifier: identifier.into(),
            name: name.into(),
            anchors,
            boundary: None,
        }
    }

    pub fn with_boundary(mut self, boundary: BoundaryPolygon) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// 没有任何数据的位置，在其上启动会话会得到配置错误
    pub fn empty(identifier: impl Into<String>) -> Self {
        Location::new(identifier, "", AnchorMap::new())
    }

    /// 坐标是否在边界内；未配置边界时总是 true
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.boundary.as_ref().is_none_or(|b| b.contains(x, y))
    }

    /// 启动定位前的检查：必须有锚点，边界（如果有）至少 3 个顶点
    pub fn validate(&self) -> Result<()> {
        if self.anchors.is_empty() {
            return Err(PositioningError::configuration(format!(
                "位置 '{}' 没有任何信标锚点",
                self.identifier
            )));
        }
        if let Some(anchor) = self
            .anchors
            .iter()
            .find(|a| !a.x.is_finite() || !a.y.is_finite())
        {
            return Err(PositioningError::configuration(format!(
                "信标 '{}' 坐标不是有限数值",
                anchor.id
            )));
        }
        if let Some(boundary) = &self.boundary {
            if !boundary.is_valid() {
                return Err(PositioningError::configuration(format!(
                    "位置 '{}' 的边界多边形顶点不足",
                    self.identifier
                )));
            }
        }
        Ok(())
    }
}

/// 位置目录 - 按标识符索引，加载后不可变
#[derive(Clone, Debug, Default)]
pub struct LocationCatalog {
    locations: HashMap<String, Arc<Location>>,
}

impl LocationCatalog {
    pub fn from_locations(locations: Vec<Location>) -> Result<Self> {
        let mut map = HashMap::with_capacity(locations.len());
        for location in locations {
            if map.contains_key(&location.identifier) {
                return Err(PositioningError::configuration(format!(
                    "位置标识符重复: {}",
                    location.identifier
                )));
            }
            map.insert(location.identifier.clone(), Arc::new(location));
        }
        Ok(LocationCatalog { locations: map })
    }

    /// 从 JSON 字符串加载
    pub fn from_json_str(json: &str) -> Result<Self> {
        let locations: Vec<Location> = serde_json::from_str(json)?;
        Self::from_locations(locations)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let locations: Vec<Location> = serde_json::from_reader(reader)?;
        Self::from_locations(locations)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let catalog = Self::from_reader(BufReader::new(file))?;
        info!(path = %path.display(), locations = catalog.len(), "位置数据加载完成");
        Ok(catalog)
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Location>> {
        self.locations.get(identifier).cloned()
    }

    /// 获取位置，不存在时返回错误
    pub fn require(&self, identifier: &str) -> Result<Arc<Location>> {
        self.get(identifier)
            .ok_or_else(|| PositioningError::LocationNotFound(identifier.to_string()))
    }

    /// 按名称（其次标识符）排序的位置列表
    pub fn list(&self) -> Vec<Arc<Location>> {
        let mut all: Vec<_> = self.locations.values().cloned().collect();
        all.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
