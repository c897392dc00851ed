//! 模块清单解析器
//!
//! 负责从 module.json / module.yaml 解析并校验模块清单。
//! 清单先反序列化为宽松的原始结构，再统一校验并转换为 [`Manifest`]，
//! 所有校验错误会合并为一条 `Manifest` 错误返回。

use std::path::Path;

use semver::Version;
use serde::Deserialize;

use crate::module::manifest::{CapabilitySpec, Manifest};
use crate::module::version::{is_valid_capability_name, CapabilityConstraint};
use crate::utils::{CoreError, Result};

/// 清单文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    /// 根据文件扩展名推断格式，未知扩展名按 YAML 处理（YAML 是 JSON 的超集）
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ManifestFormat::Json,
            _ => ManifestFormat::Yaml,
        }
    }
}

/// 能力声明的两种写法：`"name@1.0.0"` 或对象
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCapability {
    Short(String),
    Full {
        name: String,
        version: String,
        #[serde(default)]
        description: String,
    },
}

/// 未经校验的清单
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    description: String,
    entry: Option<String>,
    depends: Vec<String>,
    capabilities: Vec<RawCapability>,
    #[serde(alias = "requires")]
    requires_capabilities: Vec<String>,
    provides: Vec<RawCapability>,
    hot_reload: Option<bool>,
    auto_enable: Option<bool>,
    config_schema: Option<serde_json::Value>,
}

/// 模块清单解析器
#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析清单
    ///
    /// # Arguments
    ///
    /// * `path` - 清单文件路径，格式由扩展名决定
    ///
    /// # Errors
    ///
    /// - 文件无法读取时返回 IO 错误
    /// - 内容格式错误或校验失败时返回 `Manifest` 错误（携带文件路径）
    pub async fn parse_file(path: &Path) -> Result<Manifest> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_str(&content, ManifestFormat::from_path(path)).map_err(|e| match e {
            CoreError::Manifest { reason, .. } => CoreError::Manifest {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// 从字符串解析清单
    pub fn parse_str(content: &str, format: ManifestFormat) -> Result<Manifest> {
        let raw: RawManifest = match format {
            ManifestFormat::Json => serde_json::from_str(content).map_err(manifest_error)?,
            ManifestFormat::Yaml => serde_yaml::from_str(content).map_err(manifest_error)?,
        };
        Self::validate(raw)
    }

    /// 校验并转换原始清单
    ///
    /// 执行以下校验：
    /// - 必填字段 `name`、`version`
    /// - 模块名格式（字母、数字、下划线、连字符）
    /// - 版本号为合法的三段式语义版本
    /// - 依赖名格式、不得依赖自身
    /// - 能力声明与能力约束语法
    fn validate(raw: RawManifest) -> Result<Manifest> {
        let mut errors: Vec<String> = Vec::new();

        // 1. 模块名
        let name = raw.name.unwrap_or_default().trim().to_string();
        if name.is_empty() {
            errors.push("缺少必填字段 'name'".to_string());
        } else if !is_valid_module_name(&name) {
            errors.push(format!(
                "模块名 '{}' 格式无效，只允许字母、数字、下划线和连字符",
                name
            ));
        }

        // 2. 版本号
        let version = match raw.version.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("缺少必填字段 'version'".to_string());
                None
            }
            Some(text) => match Version::parse(text) {
                Ok(version) => Some(version),
                Err(_) => {
                    errors.push(format!(
                        "无效的版本号 '{}', 请使用 major.minor.patch 格式",
                        text
                    ));
                    None
                }
            },
        };

        // 3. 依赖（保持声明顺序并去重）
        let mut depends: Vec<String> = Vec::new();
        for dep in raw.depends {
            let dep = dep.trim().to_string();
            if !is_valid_module_name(&dep) {
                errors.push(format!("依赖名 '{}' 格式无效", dep));
            } else if dep == name {
                errors.push(format!("模块 '{}' 不能依赖自身", name));
            } else if !depends.contains(&dep) {
                depends.push(dep);
            }
        }

        // 4. 提供的能力（capabilities 与 provides 合并）
        let mut capabilities: Vec<CapabilitySpec> = Vec::new();
        for cap in raw.capabilities.into_iter().chain(raw.provides) {
            match parse_capability(cap) {
                Ok(spec) => {
                    capabilities.retain(|c| c.name != spec.name);
                    capabilities.push(spec);
                }
                Err(reason) => errors.push(reason),
            }
        }

        // 5. 能力约束
        let mut requires_capabilities = Vec::new();
        for text in &raw.requires_capabilities {
            match CapabilityConstraint::parse(text) {
                Ok(constraint) => requires_capabilities.push(constraint),
                Err(e) => errors.push(e.to_string()),
            }
        }

        if let Some(entry) = &raw.entry {
            if entry.trim().is_empty() {
                errors.push("入口 'entry' 不能为空字符串".to_string());
            }
        }

        match (errors.is_empty(), version) {
            (true, Some(version)) => Ok(Manifest {
                name,
                version,
                description: raw.description,
                entry: raw.entry.map(|e| e.trim().to_string()),
                depends,
                capabilities,
                requires_capabilities,
                hot_reload: raw.hot_reload.unwrap_or(true),
                auto_enable: raw.auto_enable.unwrap_or(true),
                config_schema: raw.config_schema,
            }),
            _ => Err(CoreError::Manifest {
                path: String::new(),
                reason: errors.join("; "),
            }),
        }
    }
}

/// 检查模块名格式
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_capability(raw: RawCapability) -> std::result::Result<CapabilitySpec, String> {
    let (name, version, description) = match raw {
        RawCapability::Short(text) => match text.split_once('@') {
            Some((name, version)) => (name.trim().to_string(), version.trim().to_string(), String::new()),
            None => return Err(format!("能力声明 '{}' 缺少版本，应为 name@x.y.z", text)),
        },
        RawCapability::Full {
            name,
            version,
            description,
        } => (name.trim().to_string(), version.trim().to_string(), description),
    };

    if !is_valid_capability_name(&name) {
        return Err(format!("能力名 '{}' 格式无效", name));
    }
    let version = Version::parse(&version)
        .map_err(|_| format!("能力 '{}' 的版本 '{}' 不是合法的语义版本", name, version))?;
    Ok(CapabilitySpec::new(name, version).with_description(description))
}

fn manifest_error(err: impl std::fmt::Display) -> CoreError {
    CoreError::Manifest {
        path: String::new(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_yaml() {
        let yaml = r#"
name: inventory
version: "1.2.3"
description: "RPG 背包"
entry: "entry:Inventory"
depends: [basic, basic]
capabilities:
  - name: inventory.api
    version: "1.0.0"
    description: "背包接口"
requires_capabilities:
  - "basic.service>=1.0.0"
auto_enable: false
"#;
        let manifest = ManifestParser::parse_str(yaml, ManifestFormat::Yaml).unwrap();
        assert_eq!(manifest.name, "inventory");
        assert_eq!(manifest.version, Version::new(1, 2, 3));
        assert_eq!(manifest.depends, vec!["basic".to_string()]);
        assert_eq!(manifest.capabilities[0].description, "背包接口");
        assert_eq!(manifest.requires_capabilities[0].name, "basic.service");
        assert!(!manifest.auto_enable);
        assert!(manifest.hot_reload);
        assert_eq!(manifest.binding_key(), "entry:Inventory");
    }

    #[test]
    fn test_parse_short_json_form() {
        let json = r#"{
            "name": "rpg_inventory",
            "version": "1.0.0",
            "entry": "entry:RPGInventory",
            "provides": ["rpg.inventory@1.0.0"],
            "requires": ["basic.service@^1.0"]
        }"#;
        let manifest = ManifestParser::parse_str(json, ManifestFormat::Json).unwrap();
        assert_eq!(manifest.capabilities.len(), 1);
        assert_eq!(manifest.capabilities[0].name, "rpg.inventory");
        assert_eq!(manifest.requires_capabilities[0].to_string(), "basic.service@^1.0");
    }

    #[test]
    fn test_missing_fields_reported_together() {
        let err = ManifestParser::parse_str("description: x", ManifestFormat::Yaml).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'name'"));
        assert!(text.contains("'version'"));
    }

    #[test]
    fn test_rejects_two_component_version() {
        let err = ManifestParser::parse_str("name: a\nversion: \"1.0\"", ManifestFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, CoreError::Manifest { .. }));
    }

    #[test]
    fn test_rejects_self_dependency_and_bad_constraint() {
        let yaml = "name: a\nversion: 1.0.0\ndepends: [a]\nrequires_capabilities: ['svc>=x']";
        let err = ManifestParser::parse_str(yaml, ManifestFormat::Yaml).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("依赖自身"));
        assert!(text.contains("svc>=x"));
    }

    #[test]
    fn test_malformed_json() {
        let err = ManifestParser::parse_str("{ not json", ManifestFormat::Json).unwrap_err();
        assert!(matches!(err, CoreError::Manifest { .. }));
    }

    #[tokio::test]
    async fn test_parse_file_attaches_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.json");
        tokio::fs::write(&path, r#"{"name": "a"}"#).await.unwrap();

        let err = ManifestParser::parse_file(&path).await.unwrap_err();
        match err {
            CoreError::Manifest { path: p, .. } => assert!(p.ends_with("module.json")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
