/// 错误类型定义
///
/// 只有配置类问题会作为硬错误上报；无法定位（no-fix）和被丢弃的观测属于
/// 正常运行状态，不会出现在这里。

use thiserror::Error;

/// 定位核心的统一错误类型
#[derive(Debug, Error)]
pub enum PositioningError {
    /// 配置错误（信标为空、参数不合法等）
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 在 tokio 运行时之外启动会话
    #[error("未找到 tokio 运行时，无法启动定位周期")]
    NoRuntime,

    /// 位置目录中不存在该位置
    #[error("未找到位置: {0}")]
    LocationNotFound(String),

    /// 位置数据无法解析
    #[error("位置数据格式错误: {0}")]
    InvalidLocationData(#[from] serde_json::Error),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 蓝牙平台错误
    #[error("蓝牙错误: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// 设备名称过滤表达式无效
    #[error("设备名称过滤表达式无效: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl PositioningError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PositioningError::Configuration(message.into())
    }

    /// 是否为配置类错误
    pub fn is_configuration(&self) -> bool {
        matches!(self, PositioningError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, PositioningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = PositioningError::configuration("信标列表为空");
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "配置错误: 信标列表为空");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: PositioningError = parse.unwrap_err().into();
        assert!(matches!(err, PositioningError::InvalidLocationData(_)));
        assert!(!err.is_configuration());
    }
}
