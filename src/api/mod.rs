//! API 模块
//!
//! 对外提供的运行时接口。
//!
//! - `runtime`: [`ForgeRuntime`] 编排器，启动 / 停止 / 热插拔 / 查询
//! - `global`: 命令行等单进程入口使用的进程级持有者

pub mod global;
pub mod runtime;

// 重导出主要类型
pub use runtime::{
    ForgeRuntime, HealthInfo, LoadReport, RuntimeState, ValidationReport, ADMIN_OWNER,
};
