//! 日志约定。
//!
//! 所有模块通过 `tracing` 输出：
//! - `soapline.call` span 覆盖一次管线执行，字段 `call_id`、`stages`；
//! - 每个阶段步骤输出一条 `debug` 事件，字段 `stage`；
//! - must-understand Fault 以 `warn` 输出，字段 `not_understood`；
//! - 资源池复用与降级以 `trace` 输出。
//!
//! 库本身不安装全局订阅者；可执行程序可启用 `subscriber` feature 使用
//! [`install_fmt_subscriber`]。

/// 未设置 `RUST_LOG` 时采用的过滤指令。
pub const DEFAULT_FILTER: &str = "soapline_core=info,soapline_codec_xml=info,soapline_codec_compact=info";

/// 安装 fmt 订阅者，过滤规则取自 `RUST_LOG`，缺省为 [`DEFAULT_FILTER`]。
///
/// 已安装过订阅者时返回 `false`。
#[cfg(feature = "subscriber")]
pub fn install_fmt_subscriber() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
