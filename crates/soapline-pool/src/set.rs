use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::pool::{DEFAULT_MAX_IDLE, PoolFamily, PoolStats, Poolable, ResourcePool};

/// 类型擦除后的池，便于 [`PoolSet`] 统一统计。
trait ErasedPool: Any + Send {
    fn family(&self) -> PoolFamily;
    fn stats(&self) -> PoolStats;
    fn shrink(&mut self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<R: Poolable> ErasedPool for ResourcePool<R> {
    fn family(&self) -> PoolFamily {
        ResourcePool::family(self)
    }

    fn stats(&self) -> PoolStats {
        ResourcePool::stats(self)
    }

    fn shrink(&mut self) -> usize {
        ResourcePool::shrink(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// `PoolSet` 是单个工作线程持有的全部资源池。
///
/// # 设计动机（Why）
/// - 不使用线程局部存储：池以显式参数传入编解码上下文，拥有关系一目了然；
/// - 按条目类型（即实现族）分桶，不同实现族永不混放。
///
/// # 使用方式（How）
/// ```
/// use soapline_pool::{PoolFamily, PoolSet, Poolable, ResetOutcome};
///
/// struct Buf(Vec<u8>);
///
/// impl Poolable for Buf {
///     const FAMILY: PoolFamily = PoolFamily::new("doc.buf");
///     fn create() -> Self { Buf(Vec::new()) }
///     fn reset(&mut self) -> ResetOutcome { self.0.clear(); ResetOutcome::Ready }
/// }
///
/// let mut pools = PoolSet::new();
/// pools.pool::<Buf>().acquire().0.push(1);
/// assert!(pools.pool::<Buf>().acquire().reused());
/// ```
pub struct PoolSet {
    pools: HashMap<TypeId, Box<dyn ErasedPool>>,
    max_idle: usize,
}

impl Default for PoolSet {
    fn default() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }
}

impl PoolSet {
    /// 以默认空闲上限创建。
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建的每个池都使用给定空闲上限。
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            pools: HashMap::new(),
            max_idle,
        }
    }

    /// 获取（必要时创建）`R` 对应的池。
    pub fn pool<R: Poolable>(&mut self) -> &mut ResourcePool<R> {
        let max_idle = self.max_idle;
        let erased = self
            .pools
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(ResourcePool::<R>::with_max_idle(max_idle)));
        match erased.as_any_mut().downcast_mut::<ResourcePool<R>>() {
            Some(pool) => pool,
            None => unreachable!("pool set is keyed by the entry type id"),
        }
    }

    /// 按实现族列出统计快照，顺序按族名排序。
    pub fn stats(&self) -> Vec<(PoolFamily, PoolStats)> {
        let mut all: Vec<_> = self
            .pools
            .values()
            .map(|pool| (pool.family(), pool.stats()))
            .collect();
        all.sort_by_key(|(family, _)| family.as_str());
        all
    }

    /// 清空所有池的空闲实例。
    pub fn shrink(&mut self) -> usize {
        self.pools.values_mut().map(|pool| pool.shrink()).sum()
    }
}
