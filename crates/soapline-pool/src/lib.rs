#![deny(unsafe_code)]

//! `soapline-pool` 为编解码器提供解析器/序列化器实例的复用池。
//!
//! # 模块定位（Why）
//! - 解析器与序列化器携带可观的内部缓冲（命名空间栈、输出缓冲、字符串暂存区），
//!   每条消息重新构造会在高并发下放大分配压力；
//! - 池按工作线程隔离：每个 worker 持有自己的 [`PoolSet`] 并以参数形式传给编解码上下文，
//!   不存在跨线程共享状态，也就不需要任何同步原语。
//!
//! # 设计概要（How）
//! - [`ResourcePool`] 管理单一实现族（[`PoolFamily`]）的空闲实例，租借返回 [`Lease`]；
//! - [`Lease`] 在 `Drop` 时自动归还，调用被取消或提前以 `?` 返回时同样不会泄漏条目；
//! - 归还前调用 [`Poolable::reset`]，实现若报告 [`ResetOutcome::Unsupported`]，
//!   该池降级为“总是新建”，不会向调用方报错。
//!
//! # 契约说明（What）
//! - 同一条目在任意时刻只属于一个租借者；
//! - 不同实现族的条目永不混放；
//! - 省略归还（[`Lease::detach`]）只影响性能，不影响正确性。

mod pool;
mod set;

pub use pool::{Lease, PoolFamily, PoolStats, Poolable, ResetOutcome, ResourcePool};
pub use set::PoolSet;
