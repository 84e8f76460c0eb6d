//! `.env` 文件读写
//!
//! 支持读取、保留无关行的增量更新，以及敏感值脱敏导出。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

/// 脱敏占位符，提交回来的值若包含它则视为未修改
pub const MASK: &str = "****";

/// `.env` 文件句柄
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部键值，文件不存在时返回空表
    pub fn read(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(parse_env(&content))
    }

    /// 读取并对敏感字段脱敏
    pub fn read_masked(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        Ok(self
            .read()?
            .into_iter()
            .map(|(key, value)| {
                let value = if is_secret_key(&key) {
                    mask_value(&value)
                } else {
                    value
                };
                (key, value)
            })
            .collect())
    }

    /// 更新或追加键值，返回实际写入的键数量
    ///
    /// 注释行、空行和未涉及的键保持原样；包含 `****` 的值被忽略。
    pub fn upsert(&self, updates: &BTreeMap<String, String>) -> Result<usize, ConfigError> {
        for key in updates.keys() {
            if !is_valid_key(key) {
                return Err(ConfigError::Invalid(format!("非法的配置键: {key}")));
            }
        }

        let content = if self.path.exists() {
            fs::read_to_string(&self.path)?
        } else {
            String::new()
        };
        let mut lines: Vec<String> = content.lines().map(ToString::to_string).collect();
        let mut written = 0;

        for (key, value) in updates {
            if value.contains(MASK) {
                continue;
            }
            let rendered = format!("{key}={}", value.trim());
            let prefix = format!("{key}=");
            match lines
                .iter()
                .position(|line| line.trim_start().starts_with(&prefix))
            {
                Some(index) => lines[index] = rendered,
                None => lines.push(rendered),
            }
            written += 1;
        }

        if written == 0 {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut output = lines.join("\n");
        output.push('\n');
        fs::write(&self.path, output)?;
        Ok(written)
    }
}

/// 解析 `.env` 内容
///
/// 只按第一个 `=` 切分，去掉成对的单/双引号，跳过注释与空行。
pub fn parse_env(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }
    vars
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// 是否为敏感键
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["KEY", "TOKEN", "PASSWORD", "SECRET"]
        .iter()
        .any(|marker| upper.contains(marker))
}

/// 脱敏：保留首尾各 4 个字符
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return MASK.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{MASK}{tail}")
}
