/// 定位前置条件检查
///
/// 统一的三态结果：全部满足 / 缺少某些条件 / 检查本身出错。
/// 权限弹窗等平台交互不在这里处理。

use btleplug::api::Manager as _;
use btleplug::platform::Manager as PlatformManager;
use std::fmt;
use tracing::warn;

/// 定位所需的前置条件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// 至少一个可用的蓝牙适配器
    BluetoothAdapter,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::BluetoothAdapter => f.write_str("bluetooth adapter"),
        }
    }
}

/// 检查结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequirementsOutcome {
    Fulfilled,
    Missing(Vec<Requirement>),
    Error(String),
}

impl RequirementsOutcome {
    /// 由缺失列表构造结果
    pub fn from_missing(missing: Vec<Requirement>) -> Self {
        if missing.is_empty() {
            RequirementsOutcome::Fulfilled
        } else {
            RequirementsOutcome::Missing(missing)
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, RequirementsOutcome::Fulfilled)
    }

    /// 面向用户的描述
    pub fn describe(&self) -> String {
        match self {
            RequirementsOutcome::Fulfilled => "所有条件已满足".to_string(),
            RequirementsOutcome::Missing(missing) => {
                let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                format!("无法扫描信标，缺少条件: {}", names.join(", "))
            }
            RequirementsOutcome::Error(cause) => format!("无法扫描信标，错误: {}", cause),
        }
    }
}

/// 检查平台蓝牙是否可用
pub async fn check_bluetooth() -> RequirementsOutcome {
    let manager = match PlatformManager::new().await {
        Ok(manager) => manager,
        Err(e) => {
            warn!(error = %e, "蓝牙管理器初始化失败");
            return RequirementsOutcome::Error(e.to_string());
        }
    };
    match manager.adapters().await {
        Ok(adapters) if adapters.is_empty() => {
            RequirementsOutcome::from_missing(vec![Requirement::BluetoothAdapter])
        }
        Ok(_) => RequirementsOutcome::Fulfilled,
        Err(e) => RequirementsOutcome::Error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_missing() {
        assert!(RequirementsOutcome::from_missing(vec![]).is_fulfilled());
        let missing = RequirementsOutcome::from_missing(vec![Requirement::BluetoothAdapter]);
        assert_eq!(missing, RequirementsOutcome::Missing(vec![Requirement::BluetoothAdapter]));
        assert_eq!(missing.describe(), "无法扫描信标，缺少条件: bluetooth adapter");
    }

    #[test]
    fn test_error_description() {
        let outcome = RequirementsOutcome::Error("adapter busy".to_string());
        assert!(!outcome.is_fulfilled());
        assert!(outcome.describe().ends_with("adapter busy"));
    }
}
