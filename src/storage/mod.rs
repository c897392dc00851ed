//! 模块存储
//!
//! 按模块划分命名空间的持久化键值存储，值为任意可 JSON 序列化的数据。
//!
//! # 磁盘布局
//!
//! ```text
//! <storage_dir>/
//!   <module>/
//!     <key>.json
//! ```
//!
//! 每次写入都先写临时文件并 `fsync`，再原子重命名覆盖目标文件，最后同步目录，
//! 保证 `save` 返回后进程崩溃也不会丢失或写坏数据。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::module::parser::is_valid_module_name;
use crate::utils::{CoreError, Result};

const VALUE_EXTENSION: &str = "json";

/// 最大键长度
pub const MAX_KEY_LEN: usize = 200;

/// 存储管理器
///
/// 所有操作都以模块名限定作用域，不同模块的同名键互不可见。
#[derive(Debug, Clone)]
pub struct StorageManager {
    base_dir: PathBuf,
    fsync: bool,
}

impl StorageManager {
    /// 创建存储管理器
    ///
    /// # Arguments
    ///
    /// * `base_dir` - 存储根目录，不存在时在首次写入时创建
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            fsync: true,
        }
    }

    /// 设置是否在写入后同步到磁盘
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// 存储根目录
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 保存值
    ///
    /// 返回前数据已落盘（`fsync` 开启时）。
    ///
    /// # Errors
    ///
    /// - 模块名或键不合法
    /// - 序列化失败或文件写入失败
    pub async fn save<T: Serialize + ?Sized>(&self, module: &str, key: &str, value: &T) -> Result<()> {
        let target = self.value_path(module, key)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CoreError::Storage(format!("序列化 {}/{} 失败: {}", module, key, e)))?;

        let dir = self.module_dir(module);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_io("创建目录", &dir, e))?;

        let tmp = dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        if let Err(e) = self.write_file(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(storage_io("重命名", &target, e));
        }
        if self.fsync {
            sync_dir(&dir).await?;
        }

        trace!(module = %module, key = %key, bytes = bytes.len(), "保存存储值");
        Ok(())
    }

    /// 读取值，键不存在时返回 `default`
    pub async fn load<T: DeserializeOwned>(&self, module: &str, key: &str, default: T) -> Result<T> {
        match self.get(module, key).await? {
            Some(value) => Ok(value),
            None => Ok(default),
        }
    }

    /// 读取值，键不存在时返回 `None`
    pub async fn get<T: DeserializeOwned>(&self, module: &str, key: &str) -> Result<Option<T>> {
        let path = self.value_path(module, key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_io("读取", &path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CoreError::Storage(format!("解析 {} 失败: {}", path.display(), e)))
    }

    /// 删除键
    ///
    /// # Returns
    ///
    /// 键是否存在
    pub async fn delete(&self, module: &str, key: &str) -> Result<bool> {
        let path = self.value_path(module, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                if self.fsync {
                    sync_dir(&self.module_dir(module)).await?;
                }
                debug!(module = %module, key = %key, "删除存储值");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_io("删除", &path, e)),
        }
    }

    /// 列出模块的全部键（排序）
    pub async fn list_keys(&self, module: &str) -> Result<Vec<String>> {
        validate_module(module)?;
        let dir = self.module_dir(module);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_io("读取目录", &dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_io("读取目录", &dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// 获取某个模块的作用域句柄
    pub fn scoped(&self, module: impl Into<String>) -> ScopedStorage {
        ScopedStorage {
            module: module.into(),
            manager: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn module_dir(&self, module: &str) -> PathBuf {
        self.base_dir.join(module)
    }

    fn value_path(&self, module: &str, key: &str) -> Result<PathBuf> {
        validate_module(module)?;
        validate_key(key)?;
        Ok(self
            .module_dir(module)
            .join(format!("{}.{}", key, VALUE_EXTENSION)))
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| storage_io("创建", path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| storage_io("写入", path, e))?;
        if self.fsync {
            file.sync_all()
                .await
                .map_err(|e| storage_io("同步", path, e))?;
        } else {
            file.flush().await.map_err(|e| storage_io("写入", path, e))?;
        }
        Ok(())
    }
}

/// 校验存储键
///
/// 键不能为空、不能以 `.` 开头、不能包含路径分隔符或控制字符。
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("键不能为空")
    } else if key.len() > MAX_KEY_LEN {
        Some("键过长")
    } else if key.starts_with('.') {
        Some("键不能以 '.' 开头")
    } else if key
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
    {
        Some("键不能包含路径分隔符或控制字符")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::Storage(format!("无效的存储键 '{}': {}", key, reason))),
        None => Ok(()),
    }
}

fn validate_module(module: &str) -> Result<()> {
    if is_valid_module_name(module) {
        Ok(())
    } else {
        Err(CoreError::Storage(format!("无效的模块名 '{}'", module)))
    }
}

fn storage_io(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Storage(format!("{} {} 失败: {}", action, path.display(), err))
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = fs::File::open(dir)
        .await
        .map_err(|e| storage_io("打开目录", dir, e))?;
    handle
        .sync_all()
        .await
        .map_err(|e| storage_io("同步目录", dir, e))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// 模块作用域的存储句柄
///
/// 交给模块钩子使用；模块卸载时句柄被关闭，之后的调用返回 `StorageClosed`，
/// 已持久化的数据保留。
#[derive(Debug, Clone)]
pub struct ScopedStorage {
    module: String,
    manager: StorageManager,
    closed: Arc<AtomicBool>,
}

impl ScopedStorage {
    /// 所属模块
    pub fn module(&self) -> &str {
        &self.module
    }

    /// 关闭句柄（所有克隆同时失效）
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(module = %self.module, "关闭模块存储句柄");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CoreError::StorageClosed(self.module.clone()))
        } else {
            Ok(())
        }
    }

    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.ensure_open()?;
        self.manager.save(&self.module, key, value).await
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        self.ensure_open()?;
        self.manager.load(&self.module, key, default).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_open()?;
        self.manager.get(&self.module, key).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        self.manager.delete(&self.module, key).await
    }

    pub async fn list_keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.manager.list_keys(&self.module).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn manager() -> (TempDir, StorageManager) {
        let dir = TempDir::new().unwrap();
        let manager = StorageManager::new(dir.path());
        (dir, manager)
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let (_dir, storage) = manager();
        let value = json!({"items": ["sword", "shield"], "gold": 12, "ok": true, "none": null});
        storage.save("inventory", "state", &value).await.unwrap();

        let loaded: Value = storage.load("inventory", "state", Value::Null).await.unwrap();
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let (_dir, storage) = manager();
        storage.save("module_a", "k", &json!(1)).await.unwrap();

        let other: Value = storage.load("module_b", "k", json!("default")).await.unwrap();
        assert_eq!(other, json!("default"));
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let (dir, storage) = manager();
        storage.save("m", "counter", &41u32).await.unwrap();
        drop(storage);

        let reopened = StorageManager::new(dir.path());
        let counter: u32 = reopened.load("m", "counter", 0).await.unwrap();
        assert_eq!(counter, 41);
    }

    #[tokio::test]
    async fn test_delete_and_list_keys() {
        let (_dir, storage) = manager();
        assert!(storage.list_keys("m").await.unwrap().is_empty());

        storage.save("m", "b", &json!(2)).await.unwrap();
        storage.save("m", "a", &json!(1)).await.unwrap();
        storage.save("m", "a", &json!(3)).await.unwrap();
        assert_eq!(storage.list_keys("m").await.unwrap(), vec!["a", "b"]);

        assert!(storage.delete("m", "a").await.unwrap());
        assert!(!storage.delete("m", "a").await.unwrap());
        assert_eq!(storage.list_keys("m").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, storage) = manager();
        for key in ["", "../x", "a/b", ".hidden", "c:\\x"] {
            assert!(storage.save("m", key, &json!(1)).await.is_err(), "{key}");
        }
        assert!(storage.save("../m", "k", &json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let (dir, storage) = manager();
        std::fs::create_dir_all(dir.path().join("m")).unwrap();
        std::fs::write(dir.path().join("m").join("bad.json"), b"{ nope").unwrap();
        let err = storage.get::<Value>("m", "bad").await.unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[tokio::test]
    async fn test_scoped_handle_closes() {
        let (_dir, storage) = manager();
        let scoped = storage.scoped("m");
        scoped.save("k", "v").await.unwrap();
        let clone = scoped.clone();
        scoped.close();

        assert!(matches!(clone.load("k", String::new()).await, Err(CoreError::StorageClosed(_))));
        // 数据保留
        let value: String = storage.load("m", "k", String::new()).await.unwrap();
        assert_eq!(value, "v");
    }
}
