/// 蓝牙扫描源
///
/// 轮询平台蓝牙适配器的外设列表，把名称匹配的设备信号作为观测交给
/// ScanIngestor。设备地址即信标标识符，未知信标由接入器自行丢弃。

use crate::error::{PositioningError, Result};
use crate::ingest::{Observation, ScanIngestor};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager as PlatformManager;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// 扫描配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// 设备名称过滤正则，例如 "^RFstar"；为 None 时接收所有设备
    pub name_pattern: Option<String>,
    /// 外设列表轮询间隔（毫秒）
    pub poll_interval_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            name_pattern: None,
            poll_interval_ms: 500,
        }
    }
}

/// 基于 btleplug 的扫描源
#[derive(Clone, Debug)]
pub struct BleScanner {
    pattern: Option<Regex>,
    poll_interval: Duration,
}

impl BleScanner {
    pub fn new(config: &ScannerConfig) -> Result<Self> {
        let pattern = config
            .name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        if config.poll_interval_ms == 0 {
            return Err(PositioningError::configuration("poll_interval_ms 必须大于 0"));
        }
        Ok(BleScanner {
            pattern,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// 设备名称是否通过过滤；配置了过滤表达式时未命名设备一律不通过
    pub fn matches(&self, local_name: Option<&str>) -> bool {
        match (&self.pattern, local_name) {
            (None, _) => true,
            (Some(pattern), Some(name)) => pattern.is_match(name),
            (Some(_), None) => false,
        }
    }

    /// 把一次外设属性读取转换为观测
    pub fn observation_for(
        &self,
        address: &str,
        local_name: Option<&str>,
        rssi: Option<i16>,
        timestamp_ms: u64,
    ) -> Option<Observation> {
        if !self.matches(local_name) {
            return None;
        }
        let rssi = rssi?;
        Some(Observation::new(address, f64::from(rssi), timestamp_ms))
    }

    /// 在第一个适配器上扫描 `duration` 时长，返回被接入器接受的观测数量
    pub async fn run(&self, ingestor: &ScanIngestor, duration: Duration) -> Result<usize> {
        let manager = PlatformManager::new().await?;
        let adapters = manager.adapters().await?;
        let Some(adapter) = adapters.into_iter().next() else {
            return Err(PositioningError::configuration("未找到蓝牙适配器"));
        };

        adapter.start_scan(ScanFilter::default()).await?;
        info!(duration_ms = duration.as_millis() as u64, "蓝牙扫描已启动");

        let started = Instant::now();
        let mut accepted = 0;
        while started.elapsed() < duration {
            for peripheral in adapter.peripherals().await? {
                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(error = %e, "读取外设属性失败");
                        continue;
                    }
                };
                let address = peripheral.address().to_string();
                let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
                if let Some(observation) = self.observation_for(
                    &address,
                    properties.local_name.as_deref(),
                    properties.rssi,
                    now_ms,
                ) {
                    if ingestor.ingest(observation) {
                        accepted += 1;
                    }
                }
            }
            sleep(self.poll_interval).await;
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!(error = %e, "停止蓝牙扫描失败");
        }
        info!(accepted, "蓝牙扫描结束");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(pattern: Option<&str>) -> BleScanner {
        BleScanner::new(&ScannerConfig {
            name_pattern: pattern.map(str::to_string),
            ..ScannerConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_name_filter() {
        let rfstar = scanner(Some("^RFstar"));
        assert!(rfstar.matches(Some("RFstar_C5D6")));
        assert!(!rfstar.matches(Some("Phone")));
        assert!(!rfstar.matches(None));
        assert!(scanner(None).matches(None));
    }

    #[test]
    fn test_observation_for() {
        let rfstar = scanner(Some("^RFstar"));
        let obs = rfstar
            .observation_for("20:A7:16:5E:C5:D6", Some("RFstar_C5D6"), Some(-52), 42)
            .unwrap();
        assert_eq!(obs, Observation::new("20:A7:16:5E:C5:D6", -52.0, 42));

        // 没有 RSSI 的广播不产生观测
        assert!(rfstar
            .observation_for("20:A7:16:5E:C5:D6", Some("RFstar_C5D6"), None, 42)
            .is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = BleScanner::new(&ScannerConfig {
            name_pattern: Some("(".to_string()),
            ..ScannerConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, PositioningError::InvalidPattern(_)));
    }
}
