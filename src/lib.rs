//! 蓝牙信标室内定位核心
//!
//! 数据流：扫描观测 → ScanIngestor → 估计器 → PositioningSession → 订阅者回调

pub mod algorithms;
pub mod config;
pub mod error;
pub mod ingest;
pub mod location;
pub mod positioning;
pub mod requirements;
pub mod scanner;

pub use config::{EstimatorConfig, SessionConfig, SmoothingConfig};
pub use error::{PositioningError, Result};
pub use ingest::{Observation, ObservationBatch, ScanIngestor};
pub use location::{Location, LocationCatalog};
pub use positioning::{CycleOutcome, PositionListener, PositioningSession, SessionState};
