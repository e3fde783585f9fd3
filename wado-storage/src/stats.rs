//! 导入统计
//!
//! 按名称计数，每累计 `log_every` 次输出一行日志；子统计同时累加到父统计。

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// 命名计数器集合
#[derive(Debug)]
pub struct Stats {
    name: String,
    parent: Option<Arc<Stats>>,
    counts: Mutex<BTreeMap<String, u64>>,
}

impl Stats {
    /// 创建顶层统计
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: None,
            counts: Mutex::new(BTreeMap::new()),
        })
    }

    /// 创建累加到 `self` 的子统计
    pub fn child(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: Some(Arc::clone(self)),
            counts: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 计数加一，返回当前值
    ///
    /// `log_every` 为 0 时不输出日志；父统计只计数不输出。
    pub fn add(&self, key: &str, log_every: u64, description: impl Display) -> u64 {
        self.add_dyn(key, log_every, &description)
    }

    fn add_dyn(&self, key: &str, log_every: u64, description: &dyn Display) -> u64 {
        let current = {
            let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            let entry = counts.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if log_every > 0 && current % log_every == 0 {
            warn!("[{}] {} {} {}", self.name, key, current, description);
        }
        if let Some(parent) = &self.parent {
            parent.add_dyn(key, 0, description);
        }
        current
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// 输出全部计数并清零
    pub fn summarize(&self) -> BTreeMap<String, u64> {
        let counts = std::mem::take(&mut *self.counts.lock().unwrap_or_else(|e| e.into_inner()));
        warn!("[{}] 统计汇总", self.name);
        for (key, count) in &counts {
            warn!("[{}] {} {}", self.name, key, count);
        }
        counts
    }
}
