//! 版本约束
//!
//! 解析并匹配能力版本约束，例如 `svc>=1.2.0`、`svc@^1.0`、
//! `svc>=1.2.0,<2.0.0`。
//!
//! # 支持的运算符
//!
//! | 运算符 | 含义 |
//! |--------|------|
//! | `==` / `=` | 精确匹配 |
//! | `!=` | 不等于 |
//! | `>` `>=` `<` `<=` | 比较 |
//! | `~=` | 兼容版本：`~=1.4` 等价于 `>=1.4.0,<2.0.0`；`~=1.4.2` 等价于 `>=1.4.2,<1.5.0` |
//! | `^` | `>=v,<major+1.0.0` |
//! | `~` | `>=v,<major.minor+1.0` |
//!
//! 比较采用语义版本优先级（major、minor、patch 数值比较），构建元数据被忽略。
//! 带预发布标签的版本默认不参与匹配，除非约束中同一 `major.minor.patch`
//! 的比较项本身带预发布标签。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Prerelease, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{CoreError, Result};

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    NotEqual,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Compatible,
    Caret,
    Tilde,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Exact => "==",
            Op::NotEqual => "!=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
            Op::Compatible => "~=",
            Op::Caret => "^",
            Op::Tilde => "~",
        }
    }
}

/// 单个比较项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
    /// 书写时给出的版本分量个数（1..=3）
    precision: u8,
}

impl Comparator {
    fn matches(&self, candidate: &Version) -> bool {
        let ord = precedence(candidate, &self.version);
        match self.op {
            Op::Exact => ord == Ordering::Equal,
            Op::NotEqual => ord != Ordering::Equal,
            Op::Greater => ord == Ordering::Greater,
            Op::GreaterEq => ord != Ordering::Less,
            Op::Less => ord == Ordering::Less,
            Op::LessEq => ord != Ordering::Greater,
            Op::Compatible => {
                let upper = if self.precision >= 3 {
                    Version::new(self.version.major, self.version.minor + 1, 0)
                } else {
                    Version::new(self.version.major + 1, 0, 0)
                };
                ord != Ordering::Less && precedence(candidate, &upper) == Ordering::Less
            }
            Op::Caret => {
                let upper = Version::new(self.version.major + 1, 0, 0);
                ord != Ordering::Less && precedence(candidate, &upper) == Ordering::Less
            }
            Op::Tilde => {
                let upper = if self.precision == 1 {
                    Version::new(self.version.major + 1, 0, 0)
                } else {
                    Version::new(self.version.major, self.version.minor + 1, 0)
                };
                ord != Ordering::Less && precedence(candidate, &upper) == Ordering::Less
            }
        }
    }

    fn allows_prerelease_of(&self, candidate: &Version) -> bool {
        !self.version.pre.is_empty()
            && self.version.major == candidate.major
            && self.version.minor == candidate.minor
            && self.version.patch == candidate.patch
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)
    }
}

/// 版本约束：多个比较项的合取，空约束匹配任意版本
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionConstraint {
    comparators: Vec<Comparator>,
}

impl VersionConstraint {
    /// 匹配任意版本的约束
    pub fn any() -> Self {
        Self::default()
    }

    /// 解析约束字符串（不含能力名），如 `>=1.2.0,<2.0.0`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() || input == "*" {
            return Ok(Self::any());
        }

        let mut comparators = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid(input, "存在空的比较项"));
            }
            comparators.push(parse_comparator(part).map_err(|reason| invalid(input, &reason))?);
        }
        Ok(Self { comparators })
    }

    /// 是否为任意版本约束
    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }

    /// 比较项列表
    pub fn comparators(&self) -> &[Comparator] {
        &self.comparators
    }

    /// 检查版本是否满足约束
    pub fn matches(&self, candidate: &Version) -> bool {
        if !candidate.pre.is_empty()
            && !self
                .comparators
                .iter()
                .any(|c| c.allows_prerelease_of(candidate))
        {
            return false;
        }
        self.comparators.iter().all(|c| c.matches(candidate))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comparators.is_empty() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self.comparators.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// 能力约束：能力名 + 版本约束
///
/// 书写形式为 `name>=1.2.0`、`name@^1.0` 或仅 `name`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityConstraint {
    pub name: String,
    pub version: VersionConstraint,
    raw: String,
}

impl CapabilityConstraint {
    /// 解析能力约束
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        let split = raw
            .find(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~' | '^' | '@'))
            .unwrap_or(raw.len());
        let (name, rest) = raw.split_at(split);
        let name = name.trim();

        if name.is_empty() {
            return Err(invalid(raw, "缺少能力名"));
        }
        if !is_valid_capability_name(name) {
            return Err(invalid(raw, "能力名只允许字母、数字、点、下划线和连字符"));
        }

        let spec = rest.strip_prefix('@').unwrap_or(rest);
        // 错误信息带上完整约束，便于定位是哪个能力
        let version = VersionConstraint::parse(spec).map_err(|e| match e {
            CoreError::InvalidConstraint { reason, .. } => invalid(raw, &reason),
            other => other,
        })?;
        Ok(Self {
            name: name.to_string(),
            version,
            raw: raw.to_string(),
        })
    }

    /// 原始约束字符串
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 检查某个提供者是否满足约束
    pub fn matches(&self, name: &str, version: &Version) -> bool {
        self.name == name && self.version.matches(version)
    }
}

impl fmt::Display for CapabilityConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for CapabilityConstraint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CapabilityConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for CapabilityConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 解析可能省略分量的版本号（`1`、`1.4`、`1.4.2`、`1.4.2-beta.1`）
///
/// 返回版本和书写的分量个数。
pub fn parse_partial_version(input: &str) -> std::result::Result<(Version, u8), String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("缺少版本号".to_string());
    }
    if input.contains('-') || input.contains('+') {
        let version = Version::parse(input).map_err(|e| e.to_string())?;
        return Ok((version, 3));
    }

    let parts: Vec<&str> = input.split('.').collect();
    if parts.len() > 3 {
        return Err(format!("版本号 '{}' 分量过多", input));
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
        *slot = part
            .parse::<u64>()
            .map_err(|_| format!("版本分量 '{}' 不是非负整数", part))?;
    }
    Ok((
        Version::new(numbers[0], numbers[1], numbers[2]),
        parts.len() as u8,
    ))
}

/// 能力名格式校验
pub fn is_valid_capability_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// 语义版本优先级比较（忽略构建元数据）
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
}

fn parse_comparator(part: &str) -> std::result::Result<Comparator, String> {
    let (op, rest) = if let Some(rest) = part.strip_prefix("==") {
        (Op::Exact, rest)
    } else if let Some(rest) = part.strip_prefix("!=") {
        (Op::NotEqual, rest)
    } else if let Some(rest) = part.strip_prefix("~=") {
        (Op::Compatible, rest)
    } else if let Some(rest) = part.strip_prefix(">=") {
        (Op::GreaterEq, rest)
    } else if let Some(rest) = part.strip_prefix("<=") {
        (Op::LessEq, rest)
    } else if let Some(rest) = part.strip_prefix('>') {
        (Op::Greater, rest)
    } else if let Some(rest) = part.strip_prefix('<') {
        (Op::Less, rest)
    } else if let Some(rest) = part.strip_prefix('=') {
        (Op::Exact, rest)
    } else if let Some(rest) = part.strip_prefix('^') {
        (Op::Caret, rest)
    } else if let Some(rest) = part.strip_prefix('~') {
        (Op::Tilde, rest)
    } else {
        // 裸版本号视为精确匹配
        (Op::Exact, part)
    };

    let (version, precision) = parse_partial_version(rest)?;
    if op == Op::Compatible && precision < 2 {
        return Err("~= 至少需要 major.minor 两个分量".to_string());
    }
    Ok(Comparator {
        op,
        version,
        precision,
    })
}

fn invalid(constraint: &str, reason: &str) -> CoreError {
    CoreError::InvalidConstraint {
        constraint: constraint.to_string(),
        reason: reason.to_string(),
    }
}

/// 移除预发布标签后的版本（仅用于展示）
pub fn release_of(version: &Version) -> Version {
    let mut v = version.clone();
    v.pre = Prerelease::EMPTY;
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_name_and_operator() {
        let c = CapabilityConstraint::parse("basic.service>=1.2.0").unwrap();
        assert_eq!(c.name, "basic.service");
        assert!(c.version.matches(&v("1.2.0")));
        assert!(c.version.matches(&v("3.0.0")));
        assert!(!c.version.matches(&v("1.1.9")));
        assert_eq!(c.to_string(), "basic.service>=1.2.0");
    }

    #[test]
    fn test_at_separator_and_caret() {
        let c = CapabilityConstraint::parse("basic.service@^1.0").unwrap();
        assert!(c.version.matches(&v("1.0.0")));
        assert!(c.version.matches(&v("1.9.3")));
        assert!(!c.version.matches(&v("2.0.0")));
    }

    #[test]
    fn test_bare_name_matches_anything() {
        let c = CapabilityConstraint::parse("svc").unwrap();
        assert!(c.version.is_any());
        assert!(c.version.matches(&v("0.0.1")));
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        let c = VersionConstraint::parse(">1.9.0").unwrap();
        assert!(c.matches(&v("1.10.0")));
        assert!(!c.matches(&v("1.2.0")));
    }

    #[test]
    fn test_conjunction() {
        let c = VersionConstraint::parse(">=1.2.0, <2.0.0").unwrap();
        assert!(c.matches(&v("1.3.0")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("1.1.0")));
    }

    #[test]
    fn test_exact_partial_and_not_equal() {
        let c = VersionConstraint::parse("==1.0").unwrap();
        assert!(c.matches(&v("1.0.0")));
        assert!(!c.matches(&v("1.0.1")));

        let c = VersionConstraint::parse("!=1.0.0").unwrap();
        assert!(!c.matches(&v("1.0.0")));
        assert!(c.matches(&v("1.0.1")));
    }

    #[test]
    fn test_compatible_release() {
        let two = VersionConstraint::parse("~=1.4").unwrap();
        assert!(two.matches(&v("1.4.0")));
        assert!(two.matches(&v("1.9.0")));
        assert!(!two.matches(&v("2.0.0")));
        assert!(!two.matches(&v("1.3.9")));

        let three = VersionConstraint::parse("~=1.4.2").unwrap();
        assert!(three.matches(&v("1.4.7")));
        assert!(!three.matches(&v("1.5.0")));

        assert!(VersionConstraint::parse("~=1").is_err());
    }

    #[test]
    fn test_tilde() {
        let c = VersionConstraint::parse("~1.4.2").unwrap();
        assert!(c.matches(&v("1.4.9")));
        assert!(!c.matches(&v("1.5.0")));
    }

    #[test]
    fn test_prerelease_excluded_by_default() {
        let c = VersionConstraint::parse(">=1.0.0").unwrap();
        assert!(!c.matches(&v("2.0.0-beta.1")));

        let c = VersionConstraint::parse(">=2.0.0-alpha").unwrap();
        assert!(c.matches(&v("2.0.0-beta.1")));
        assert!(!c.matches(&v("2.1.0-beta.1")));
    }

    #[test]
    fn test_build_metadata_ignored() {
        let c = VersionConstraint::parse("==1.2.3").unwrap();
        assert!(c.matches(&v("1.2.3+build.5")));
    }

    #[test]
    fn test_invalid_constraints() {
        assert!(CapabilityConstraint::parse(">=1.0.0").is_err());
        assert!(CapabilityConstraint::parse("svc>=abc").is_err());
        assert!(CapabilityConstraint::parse("svc>=1.0.0,").is_err());
        assert!(CapabilityConstraint::parse("sv c>=1.0").is_err());
        assert!(VersionConstraint::parse(">=1.2.3.4").is_err());
    }

    #[test]
    fn test_invalid_version_names_capability() {
        match CapabilityConstraint::parse("svc>=x").unwrap_err() {
            CoreError::InvalidConstraint { constraint, .. } => assert_eq!(constraint, "svc>=x"),
            other => panic!("unexpected error: {other}"),
        }
        let err = CapabilityConstraint::parse("store@^1.0,").unwrap_err();
        assert!(err.to_string().contains("store@^1.0,"));
    }

    #[test]
    fn test_serde_roundtrip_uses_raw_string() {
        let c: CapabilityConstraint = serde_json::from_str("\"svc>=1.0.0\"").unwrap();
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"svc>=1.0.0\"");
    }
}
