//! 模块加载器
//!
//! 负责把模块目录树变为经过校验、排好序、可绑定的模块序列：
//!
//! 1. `discover` 扫描根目录的直接子目录，解析其中的清单文件
//! 2. `resolve_order` / `plan` 依据依赖关系计算加载顺序
//! 3. `bind` 通过 [`ModuleBinder`] 创建模块实例
//!
//! 单个目录的清单错误只影响该目录，不会中断整个扫描。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::module::binding::{ModuleBinder, ModuleHooks};
use crate::module::dependency::{ActiveSet, LoadPlan, LoadPlanner};
use crate::module::manifest::Manifest;
use crate::module::parser::ManifestParser;
use crate::utils::{CoreError, Result};

/// 默认的清单文件名（按优先级）
pub const DEFAULT_MANIFEST_FILES: &[&str] = &["module.json", "module.yaml", "module.yml"];

/// 已发现的模块
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub manifest: Manifest,
    /// 模块目录
    pub path: PathBuf,
}

/// 扫描失败的目录
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: CoreError,
}

/// 扫描结果
#[derive(Debug, Default)]
pub struct Discovery {
    /// 成功解析的模块，按目录名排序
    pub modules: Vec<DiscoveredModule>,
    /// 清单无效的目录
    pub failures: Vec<DiscoveryFailure>,
}

impl Discovery {
    pub fn manifests(&self) -> Vec<Manifest> {
        self.modules.iter().map(|m| m.manifest.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&DiscoveredModule> {
        self.modules.iter().find(|m| m.manifest.name == name)
    }
}

/// 模块加载器
pub struct ModuleLoader {
    manifest_files: Vec<String>,
    binder: Arc<dyn ModuleBinder>,
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("manifest_files", &self.manifest_files)
            .finish_non_exhaustive()
    }
}

impl ModuleLoader {
    /// 创建模块加载器
    pub fn new(binder: Arc<dyn ModuleBinder>) -> Self {
        Self {
            manifest_files: DEFAULT_MANIFEST_FILES.iter().map(|s| s.to_string()).collect(),
            binder,
        }
    }

    /// 设置清单文件名列表（第一个存在的文件生效）
    pub fn with_manifest_files(mut self, files: Vec<String>) -> Self {
        if !files.is_empty() {
            self.manifest_files = files;
        }
        self
    }

    /// 扫描根目录下的模块
    ///
    /// # Arguments
    ///
    /// * `root` - 模块根目录，只检查其直接子目录
    ///
    /// # Returns
    ///
    /// 解析成功的模块与失败的目录。根目录不存在时返回空结果。
    ///
    /// # Errors
    ///
    /// 根目录存在但无法读取时返回 IO 错误
    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn discover(&self, root: &Path) -> Result<Discovery> {
        let mut discovery = Discovery::default();

        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("模块目录不存在，跳过扫描");
                return Ok(discovery);
            }
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut seen = BTreeSet::new();
        for dir in dirs {
            match self.discover_dir(&dir).await {
                Ok(Some(module)) => {
                    if !seen.insert(module.manifest.name.clone()) {
                        let error = CoreError::Manifest {
                            path: dir.display().to_string(),
                            reason: format!("模块名 '{}' 与其他目录重复", module.manifest.name),
                        };
                        warn!(path = %dir.display(), error = %error, "跳过重复模块");
                        discovery.failures.push(DiscoveryFailure { path: dir, error });
                        continue;
                    }
                    debug!(module = %module.manifest.name, path = %dir.display(), "发现模块");
                    discovery.modules.push(module);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(path = %dir.display(), error = %error, "清单无效，跳过目录");
                    discovery.failures.push(DiscoveryFailure { path: dir, error });
                }
            }
        }

        info!(
            modules = discovery.modules.len(),
            failures = discovery.failures.len(),
            "模块扫描完成"
        );
        Ok(discovery)
    }

    /// 解析单个模块目录
    ///
    /// # Returns
    ///
    /// 目录中没有清单文件时返回 `Ok(None)`
    pub async fn discover_dir(&self, dir: &Path) -> Result<Option<DiscoveredModule>> {
        let Some(manifest_path) = self.find_manifest(dir).await else {
            let hidden = dir
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.') || n.starts_with('_'));
            if hidden {
                debug!(path = %dir.display(), "目录中没有清单文件");
            } else {
                warn!(path = %dir.display(), "目录中没有清单文件，跳过");
            }
            return Ok(None);
        };

        let manifest = ManifestParser::parse_file(&manifest_path).await?;
        Ok(Some(DiscoveredModule {
            manifest,
            path: dir.to_path_buf(),
        }))
    }

    /// 查找目录中的清单文件
    pub async fn find_manifest(&self, dir: &Path) -> Option<PathBuf> {
        for name in &self.manifest_files {
            let candidate = dir.join(name);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        None
    }

    /// 严格计算加载顺序
    ///
    /// 依赖总在依赖者之前，同级按模块名字典序。
    ///
    /// # Errors
    ///
    /// - 存在环时返回 `CyclicDependency`，列出环上全部模块
    /// - `depends` 指向不存在的模块时返回 `MissingDependency`
    pub fn resolve_order(manifests: &[Manifest]) -> Result<Vec<String>> {
        LoadPlanner::plan(manifests, &ActiveSet::default()).into_strict()
    }

    /// 计算加载计划，失败被隔离到相关模块
    pub fn plan(manifests: &[Manifest], active: &ActiveSet) -> LoadPlan {
        LoadPlanner::plan(manifests, active)
    }

    /// 绑定模块代码
    pub fn bind(&self, manifest: &Manifest, path: &Path) -> Result<Box<dyn ModuleHooks>> {
        match self.binder.bind(manifest, path) {
            Ok(hooks) => {
                debug!(module = %manifest.name, entry = %manifest.binding_key(), "模块绑定成功");
                Ok(hooks)
            }
            Err(e) => {
                warn!(module = %manifest.name, error = %e, "模块绑定失败");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::binding::StaticBinder;
    use tempfile::TempDir;

    fn write(root: &Path, dir: &str, file: &str, content: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(file), content).unwrap();
    }

    fn loader() -> ModuleLoader {
        ModuleLoader::new(Arc::new(StaticBinder::new()))
    }

    #[tokio::test]
    async fn test_discover_skips_invalid_directories() {
        let root = TempDir::new().unwrap();
        write(root.path(), "alpha", "module.json", r#"{"name": "alpha", "version": "1.0.0"}"#);
        write(root.path(), "beta", "module.yaml", "name: beta\nversion: 0.2.0\ndepends: [alpha]\n");
        write(root.path(), "broken", "module.json", "{ oops");
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let discovery = loader().discover(root.path()).await.unwrap();
        let names: Vec<&str> = discovery.modules.iter().map(|m| m.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(discovery.failures.len(), 1);
        assert!(discovery.failures[0].path.ends_with("broken"));
    }

    #[tokio::test]
    async fn test_manifest_priority() {
        let root = TempDir::new().unwrap();
        write(root.path(), "m", "module.json", r#"{"name": "from_json", "version": "1.0.0"}"#);
        write(root.path(), "m", "module.yaml", "name: from_yaml\nversion: 1.0.0\n");

        let module = loader().discover_dir(&root.path().join("m")).await.unwrap().unwrap();
        assert_eq!(module.manifest.name, "from_json");
    }

    #[tokio::test]
    async fn test_duplicate_names_reported() {
        let root = TempDir::new().unwrap();
        write(root.path(), "a1", "module.json", r#"{"name": "same", "version": "1.0.0"}"#);
        write(root.path(), "a2", "module.json", r#"{"name": "same", "version": "2.0.0"}"#);

        let discovery = loader().discover(root.path()).await.unwrap();
        assert_eq!(discovery.modules.len(), 1);
        assert!(discovery.modules[0].path.ends_with("a1"));
        assert_eq!(discovery.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let root = TempDir::new().unwrap();
        let discovery = loader().discover(&root.path().join("nope")).await.unwrap();
        assert!(discovery.modules.is_empty());
    }

    #[test]
    fn test_resolve_order_missing_dependency() {
        let manifests = vec![Manifest::new("b", semver::Version::new(1, 0, 0)).depends_on("a")];
        match ModuleLoader::resolve_order(&manifests) {
            Err(CoreError::MissingDependency { module, dependency }) => {
                assert_eq!(module, "b");
                assert_eq!(dependency, "a");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
