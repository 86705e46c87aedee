use std::fmt;
use std::ops::{Deref, DerefMut};

use tracing::trace;

/// 池条目的实现族标签。
///
/// # 契约说明（What）
/// - 标签为稳定的 `'static` 字符串，建议使用 `<codec>.<role>` 命名，例如 `xml.parser`；
/// - 同一 [`ResourcePool`] 内的所有条目必须来自同一实现族。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolFamily(&'static str);

impl PoolFamily {
    /// 构造实现族标签。
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// 返回标签字符串。
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PoolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// 条目重置结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    /// 已恢复为空白的解析/序列化状态，可以放回空闲列表。
    Ready,
    /// 实现不具备重置能力；池随即降级为总是新建。
    Unsupported,
    /// 本次重置失败，仅丢弃该条目。
    Failed,
}

/// 可被 [`ResourcePool`] 管理的昂贵实例。
///
/// # 契约说明（What）
/// - `FAMILY`：实例所属实现族；
/// - `create`：构造一个全新的实例，不得失败；
/// - `reset`：把实例恢复到可直接开始下一次解析/序列化的状态。
///   默认实现返回 [`ResetOutcome::Unsupported`]。
pub trait Poolable: Sized + Send + 'static {
    /// 实例所属实现族。
    const FAMILY: PoolFamily;

    /// 构造全新实例。
    fn create() -> Self;

    /// 重置实例以便复用。
    fn reset(&mut self) -> ResetOutcome {
        ResetOutcome::Unsupported
    }
}

/// 单个池的统计快照。
///
/// 与缓冲池的 `PoolStats` 类似，只记录计数，不含容量信息。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 新建实例次数。
    pub created: u64,
    /// 命中空闲实例的租借次数。
    pub reused: u64,
    /// 成功放回空闲列表的次数。
    pub returned: u64,
    /// 因重置失败、降级或超出空闲上限而被丢弃的次数。
    pub discarded: u64,
    /// 被调用方带走、从未归还的次数。
    pub detached: u64,
    /// 当前空闲实例数。
    pub idle: usize,
}

/// 默认的空闲上限。
pub(crate) const DEFAULT_MAX_IDLE: usize = 8;

/// `ResourcePool` 缓存同一实现族的空闲实例，供单个工作线程反复租借。
///
/// # 核心机制（How）
/// - 空闲实例保存在 `Vec` 中，`acquire` 优先弹出末尾实例（最近归还、缓存最热）；
/// - 归还时先调用 [`Poolable::reset`]，仅 `Ready` 的实例会回到空闲列表；
/// - 一旦出现 `Unsupported`，池进入降级模式：此后的归还全部丢弃，租借总是新建。
///
/// # 契约说明（What）
/// - 所有方法都要求 `&mut self`，池本身只能被拥有它的工作线程访问；
/// - `max_idle` 为 0 时池不保留任何实例，行为等价于无池化。
pub struct ResourcePool<R: Poolable> {
    idle: Vec<R>,
    max_idle: usize,
    degraded: bool,
    stats: PoolStats,
}

impl<R: Poolable> Default for ResourcePool<R> {
    fn default() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }
}

impl<R: Poolable> ResourcePool<R> {
    /// 以默认空闲上限创建池。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定空闲上限创建池。
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Vec::new(),
            max_idle,
            degraded: false,
            stats: PoolStats::default(),
        }
    }

    /// 返回实现族标签。
    pub fn family(&self) -> PoolFamily {
        R::FAMILY
    }

    /// 租借一个实例。
    ///
    /// 空闲列表为空时新建；返回的 [`Lease`] 通过 [`Lease::reused`] 报告是否命中缓存。
    pub fn acquire(&mut self) -> Lease<'_, R> {
        let (entry, reused) = match self.idle.pop() {
            Some(entry) => {
                self.stats.reused += 1;
                (entry, true)
            }
            None => {
                self.stats.created += 1;
                (R::create(), false)
            }
        };
        trace!(family = %R::FAMILY, reused, "pool lease acquired");
        Lease {
            pool: self,
            entry: Some(entry),
            reused,
        }
    }

    /// 池是否已降级为总是新建。
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// 返回统计快照。
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.len(),
            ..self.stats
        }
    }

    /// 清空空闲列表，返回被释放的实例数。
    pub fn shrink(&mut self) -> usize {
        let released = self.idle.len();
        self.idle.clear();
        released
    }

    fn give_back(&mut self, mut entry: R) {
        if self.degraded {
            self.stats.discarded += 1;
            return;
        }
        match entry.reset() {
            ResetOutcome::Ready if self.idle.len() < self.max_idle => {
                self.idle.push(entry);
                self.stats.returned += 1;
            }
            ResetOutcome::Ready => {
                self.stats.discarded += 1;
            }
            ResetOutcome::Unsupported => {
                trace!(family = %R::FAMILY, "reset unsupported, pool degrades to fresh construction");
                self.degraded = true;
                self.idle.clear();
                self.stats.discarded += 1;
            }
            ResetOutcome::Failed => {
                trace!(family = %R::FAMILY, "reset failed, entry discarded");
                self.stats.discarded += 1;
            }
        }
    }
}

/// 一次租借。
///
/// # 契约说明（What）
/// - 通过 `Deref`/`DerefMut` 访问实例；
/// - `Drop` 或 [`Lease::release`] 把实例交还给池；
/// - [`Lease::detach`] 取走实例且不归还。
pub struct Lease<'p, R: Poolable> {
    pool: &'p mut ResourcePool<R>,
    entry: Option<R>,
    reused: bool,
}

impl<R: Poolable> Lease<'_, R> {
    /// 本次租借是否复用了空闲实例。
    pub fn reused(&self) -> bool {
        self.reused
    }

    /// 显式归还。
    pub fn release(self) {
        drop(self);
    }

    /// 取走实例，池不再追踪它。
    pub fn detach(mut self) -> R {
        self.pool.stats.detached += 1;
        match self.entry.take() {
            Some(entry) => entry,
            None => R::create(),
        }
    }
}

impl<R: Poolable> Deref for Lease<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        match &self.entry {
            Some(entry) => entry,
            None => unreachable!("lease entry is only taken by detach or drop"),
        }
    }
}

impl<R: Poolable> DerefMut for Lease<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        match &mut self.entry {
            Some(entry) => entry,
            None => unreachable!("lease entry is only taken by detach or drop"),
        }
    }
}

impl<R: Poolable> Drop for Lease<'_, R> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.give_back(entry);
        }
    }
}
