/// 定位算法模块
///
/// 该模块提供室内定位的纯计算部分：
/// - 信标锚点与边界多边形
/// - RSSI 转距离模型（可配置标定参数）
/// - 加权最小二乘三边定位
/// - 输出平滑

pub mod beacon;
pub mod boundary;
pub mod location_algorithms;
pub mod results;
pub mod rssi_model;
pub mod smoothing;

pub use beacon::*;
pub use boundary::*;
pub use location_algorithms::*;
pub use results::*;
pub use rssi_model::*;
pub use smoothing::*;
