//! 日志初始化
//!
//! 默认 info 级别，可用 RUST_LOG 环境变量覆盖，
//! 例如 `RUST_LOG=imagecast=debug`。

use tracing_subscriber::EnvFilter;

/// 初始化全局 tracing 订阅器
///
/// 重复调用（比如测试里）静默忽略。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
