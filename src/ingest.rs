/// 扫描观测接入
///
/// 扫描回调线程调用 `ingest` 追加观测，估计周期调用 `drain` 原子地换出整个
/// 缓冲区。`drain` 期间的并发 `ingest` 只会落入换出后的新缓冲区。

use crate::algorithms::AnchorMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// 可接受的 RSSI 范围 (dBm)
pub const MIN_VALID_RSSI: f64 = -130.0;
pub const MAX_VALID_RSSI: f64 = 0.0;

/// 单次扫描观测
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// 信标标识符
    pub beacon_id: String,
    /// RSSI 值 (dBm)
    pub rssi: f64,
    /// 时间戳（毫秒）
    pub timestamp_ms: u64,
}

impl Observation {
    pub fn new(beacon_id: impl Into<String>, rssi: f64, timestamp_ms: u64) -> Self {
        Observation {
            beacon_id: beacon_id.into(),
            rssi,
            timestamp_ms,
        }
    }

    /// RSSI 是否为合理数值
    pub fn is_well_formed(&self) -> bool {
        self.rssi.is_finite()
            && (MIN_VALID_RSSI..=MAX_VALID_RSSI).contains(&self.rssi)
            && !self.beacon_id.is_empty()
    }
}

/// 单个锚点在批次中的聚合信号
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregatedSignal {
    pub mean_rssi: f64,
    pub samples: usize,
}

/// 一个时间窗口内收集的观测序列，只被估计器消费一次
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservationBatch {
    observations: Vec<Observation>,
    window_ms: u64,
}

impl ObservationBatch {
    pub fn new(observations: Vec<Observation>, window_ms: u64) -> Self {
        ObservationBatch {
            observations,
            window_ms,
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// 批次中最新观测的时间戳
    pub fn newest_timestamp(&self) -> Option<u64> {
        self.observations.iter().map(|o| o.timestamp_ms).max()
    }

    /// 按锚点聚合窗口内的观测（取 RSSI 平均值）
    ///
    /// 只统计时间戳不早于 `newest - window_ms` 的观测；window_ms 为 0 时不过滤。
    /// 结果按标识符排序。
    pub fn aggregate(&self) -> BTreeMap<&str, AggregatedSignal> {
        let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        let Some(newest) = self.newest_timestamp() else {
            return BTreeMap::new();
        };
        let cutoff = if self.window_ms == 0 {
            0
        } else {
            newest.saturating_sub(self.window_ms)
        };

        for obs in self.observations.iter().filter(|o| o.timestamp_ms >= cutoff) {
            let entry = sums.entry(obs.beacon_id.as_str()).or_insert((0.0, 0));
            entry.0 += obs.rssi;
            entry.1 += 1;
        }

        sums.into_iter()
            .map(|(id, (sum, samples))| {
                (
                    id,
                    AggregatedSignal {
                        mean_rssi: sum / samples as f64,
                        samples,
                    },
                )
            })
            .collect()
    }

    /// 批次中出现的不同锚点数量
    pub fn distinct_anchors(&self) -> usize {
        self.observations
            .iter()
            .map(|o| o.beacon_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// 扫描接入器 - 线程安全的观测缓冲区
#[derive(Debug)]
pub struct ScanIngestor {
    /// 已知锚点标识符，其他信标被静默丢弃
    known: HashSet<String>,
    window_ms: u64,
    /// 只有 ingest/drain 持锁，且持锁期间只做一次 push 或一次换出
    buffer: Mutex<Vec<Observation>>,
    /// 缓冲区长度的镜像，查询时不争用缓冲区锁
    buffered: AtomicUsize,
    dropped: AtomicU64,
}

impl ScanIngestor {
    pub fn new<I, S>(known_ids: I, window_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScanIngestor {
            known: known_ids.into_iter().map(Into::into).collect(),
            window_ms,
            buffer: Mutex::new(Vec::new()),
            buffered: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 以锚点集合中的标识符构造
    pub fn for_anchors(anchors: &AnchorMap, window_ms: u64) -> Self {
        ScanIngestor::new(anchors.ids(), window_ms)
    }

    /// 接收一条观测，返回是否被接受
    ///
    /// 未知信标和异常 RSSI 不是错误，直接丢弃。
    pub fn ingest(&self, observation: Observation) -> bool {
        if !observation.is_well_formed() || !self.known.contains(&observation.beacon_id) {
            trace!(
                beacon_id = %observation.beacon_id,
                rssi = observation.rssi,
                "丢弃观测"
            );
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let mut buffer = self.buffer.lock();
        buffer.push(observation);
        self.buffered.store(buffer.len(), Ordering::Release);
        true
    }

    /// 换出当前窗口内的全部观测并清空缓冲区
    pub fn drain(&self) -> ObservationBatch {
        let observations = {
            let mut buffer = self.buffer.lock();
            self.buffered.store(0, Ordering::Release);
            mem::take(&mut *buffer)
        };
        ObservationBatch::new(observations, self.window_ms)
    }

    /// 当前缓冲的观测数量
    pub fn len(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 累计丢弃的观测数量
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn is_known(&self, beacon_id: &str) -> bool {
        self.known.contains(beacon_id)
    }
}
