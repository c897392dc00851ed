//! 进程级运行时持有者
//!
//! 供单进程的命令行入口使用：安装一次，随处取用。库代码应当显式接收
//! `Arc<ForgeRuntime>`，不要依赖这里。

use std::sync::{Arc, OnceLock};

use crate::api::runtime::ForgeRuntime;
use crate::utils::{CoreError, Result};

static RUNTIME: OnceLock<Arc<ForgeRuntime>> = OnceLock::new();

/// 安装进程级运行时
///
/// # Errors
///
/// 已经安装过时返回 `InitFailed`
pub fn install(runtime: Arc<ForgeRuntime>) -> Result<Arc<ForgeRuntime>> {
    RUNTIME
        .set(runtime.clone())
        .map_err(|_| CoreError::InitFailed("进程级运行时已安装".to_string()))?;
    Ok(runtime)
}

/// 已安装的运行时
pub fn get() -> Option<Arc<ForgeRuntime>> {
    RUNTIME.get().cloned()
}

/// 已安装的运行时，未安装时返回 `RuntimeNotRunning`
pub fn require() -> Result<Arc<ForgeRuntime>> {
    get().ok_or(CoreError::RuntimeNotRunning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;
    use crate::module::StaticBinder;

    #[test]
    fn test_install_once() {
        let runtime = Arc::new(ForgeRuntime::new(
            RuntimeConfig::default(),
            Arc::new(StaticBinder::new()),
        ));
        install(runtime.clone()).unwrap();
        assert!(Arc::ptr_eq(&require().unwrap(), &runtime));

        let other = Arc::new(ForgeRuntime::new(
            RuntimeConfig::default(),
            Arc::new(StaticBinder::new()),
        ));
        assert!(install(other).is_err());
    }
}
