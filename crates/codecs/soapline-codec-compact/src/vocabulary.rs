//! 词表：限定名表与值表。
//!
//! # 设计要点（How）
//! - 两张表都只追加，条目下标即线格式中的引用；
//! - 每张表受 `max_entries` 与 `memory_limit` 约束，达到上限后停止增长但仍可查询；
//! - [`Vocabulary::checkpoint`]/[`Vocabulary::rollback`] 让一条消息的编解码对词表保持原子性。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use soapline_core::{CompactConfig, QName};
use tracing::debug;

/// 词表上限。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VocabularyLimits {
    /// 每张表的最大条目数。
    pub max_entries: usize,
    /// 每张表的最大累计字节数。
    pub memory_limit: usize,
    /// 可进入值表的单个值的最大字节数，仅约束编码端的插入策略。
    pub value_size_limit: usize,
}

impl Default for VocabularyLimits {
    fn default() -> Self {
        Self::from(&CompactConfig::default())
    }
}

impl From<&CompactConfig> for VocabularyLimits {
    fn from(config: &CompactConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            memory_limit: config.memory_limit,
            value_size_limit: config.value_size_limit,
        }
    }
}

/// 词表条目的字节开销。
pub(crate) trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for QName {
    fn weight(&self) -> usize {
        self.namespace().len() + self.local_name().len()
    }
}

impl Weighted for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

struct Table<T> {
    label: &'static str,
    entries: Vec<T>,
    index: HashMap<T, usize>,
    memory: usize,
    saturated: bool,
}

impl<T: Clone + Eq + Hash + Weighted> Table<T> {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
            index: HashMap::new(),
            memory: 0,
            saturated: false,
        }
    }

    fn lookup(&self, value: &T) -> Option<usize> {
        self.index.get(value).copied()
    }

    fn get(&self, idx: usize) -> Option<&T> {
        self.entries.get(idx)
    }

    fn admits(&self, weight: usize, limits: &VocabularyLimits) -> bool {
        self.entries.len() < limits.max_entries && self.memory + weight <= limits.memory_limit
    }

    /// 尝试插入；达到上限时返回 `false`，首次拒绝时记录一条调试日志。
    fn insert(&mut self, value: T, limits: &VocabularyLimits) -> bool {
        let weight = value.weight();
        if !self.admits(weight, limits) {
            if !self.saturated {
                self.saturated = true;
                debug!(
                    table = self.label,
                    entries = self.entries.len(),
                    memory = self.memory,
                    "vocabulary table stopped growing"
                );
            }
            return false;
        }
        // 重复插入仍占用新下标以与对端保持同步，查找沿用最早的下标。
        self.index.entry(value.clone()).or_insert(self.entries.len());
        self.entries.push(value);
        self.memory += weight;
        true
    }

    fn truncate(&mut self, len: usize, memory: usize) {
        let len = len.min(self.entries.len());
        for value in self.entries.drain(len..) {
            if self.index.get(&value).is_some_and(|idx| *idx >= len) {
                self.index.remove(&value);
            }
        }
        self.memory = memory;
        self.saturated = false;
    }
}

/// 回滚点。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    names: (usize, usize),
    values: (usize, usize),
}

/// 词表统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VocabularyStats {
    pub names: usize,
    pub values: usize,
    /// 两张表的累计字节数。
    pub memory: usize,
}

/// 单方向（编码或解码）的词表。
pub struct Vocabulary {
    limits: VocabularyLimits,
    names: Table<QName>,
    values: Table<String>,
}

impl Vocabulary {
    pub fn new(limits: VocabularyLimits) -> Self {
        Self {
            limits,
            names: Table::new("names"),
            values: Table::new("values"),
        }
    }

    pub fn limits(&self) -> VocabularyLimits {
        self.limits
    }

    pub fn stats(&self) -> VocabularyStats {
        VocabularyStats {
            names: self.names.entries.len(),
            values: self.values.entries.len(),
            memory: self.names.memory + self.values.memory,
        }
    }

    pub(crate) fn lookup_name(&self, name: &QName) -> Option<usize> {
        self.names.lookup(name)
    }

    pub(crate) fn name(&self, idx: usize) -> Option<&QName> {
        self.names.get(idx)
    }

    pub(crate) fn insert_name(&mut self, name: QName) -> bool {
        self.names.insert(name, &self.limits)
    }

    pub(crate) fn lookup_value(&self, value: &str) -> Option<usize> {
        self.values.index.get(value).copied()
    }

    pub(crate) fn value(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).map(String::as_str)
    }

    /// 编码端策略：超过 `value_size_limit` 的值不进入值表。
    pub(crate) fn value_eligible(&self, value: &str) -> bool {
        value.len() <= self.limits.value_size_limit
    }

    pub(crate) fn insert_value(&mut self, value: String) -> bool {
        self.values.insert(value, &self.limits)
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            names: (self.names.entries.len(), self.names.memory),
            values: (self.values.entries.len(), self.values.memory),
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.names.truncate(checkpoint.names.0, checkpoint.names.1);
        self.values.truncate(checkpoint.values.0, checkpoint.values.1);
    }

    pub(crate) fn clear(&mut self) {
        self.rollback(Checkpoint {
            names: (0, 0),
            values: (0, 0),
        });
    }
}

/// 词表的持有方式：独占，或经 `copy()` 与其他实例共享。
pub(crate) enum VocabularyHandle {
    Owned(Box<Vocabulary>),
    Shared(Arc<spin::Mutex<Vocabulary>>),
}

impl VocabularyHandle {
    pub(crate) fn new(limits: VocabularyLimits, shared: bool) -> Self {
        if shared {
            Self::Shared(Arc::new(spin::Mutex::new(Vocabulary::new(limits))))
        } else {
            Self::Owned(Box::new(Vocabulary::new(limits)))
        }
    }

    /// `copy()` 用：共享句柄复用同一词表，独占句柄得到同样上限的空词表。
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Owned(vocabulary) => Self::Owned(Box::new(Vocabulary::new(vocabulary.limits()))),
            Self::Shared(shared) => Self::Shared(Arc::clone(shared)),
        }
    }

    pub(crate) fn with<R>(&mut self, f: impl FnOnce(&mut Vocabulary) -> R) -> R {
        match self {
            Self::Owned(vocabulary) => f(vocabulary.as_mut()),
            Self::Shared(shared) => f(&mut *shared.lock()),
        }
    }

    pub(crate) fn stats(&self) -> VocabularyStats {
        match self {
            Self::Owned(vocabulary) => vocabulary.stats(),
            Self::Shared(shared) => shared.lock().stats(),
        }
    }
}
