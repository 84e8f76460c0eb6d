//! 提示词与技能文件
//!
//! 技能文件位于 `<agent_dir>/skills/<name>/SKILL.md`，
//! 其余提示词位于 `<agent_dir>/prompts/*.md`。

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wordcast_core::errors::PromptError;
use wordcast_core::ConfigManager;

pub const ARTICLE_SKILL: &str = "article-generator";
pub const VOCABULARY_SKILL: &str = "vocabulary-production-expert";
pub const PODCAST_SKILL: &str = "podcast-script-expert";

/// 可编辑的提示词
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKey {
    ArticleSystem,
    ResearchTemplate,
    VocabularySystem,
    StyleOldEditor,
    StyleShowOff,
}

impl PromptKey {
    pub const ALL: [PromptKey; 5] = [
        Self::ArticleSystem,
        Self::ResearchTemplate,
        Self::VocabularySystem,
        Self::StyleOldEditor,
        Self::StyleShowOff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArticleSystem => "article-system",
            Self::ResearchTemplate => "research-template",
            Self::VocabularySystem => "vocabulary-system",
            Self::StyleOldEditor => "style-old-editor",
            Self::StyleShowOff => "style-show-off",
        }
    }
}

impl FromStr for PromptKey {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| PromptError::UnknownKey(s.to_string()))
    }
}

/// 技能列表项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub name: String,
    pub content: String,
}

/// 提示词文件存取
#[derive(Clone)]
pub struct PromptStore {
    config: Arc<ConfigManager>,
}

impl PromptStore {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self { config }
    }

    fn skill_path(&self, name: &str) -> PathBuf {
        self.config.paths().skills_dir().join(name).join("SKILL.md")
    }

    pub fn path_of(&self, key: PromptKey) -> PathBuf {
        let paths = self.config.paths();
        match key {
            PromptKey::ArticleSystem => self.skill_path(ARTICLE_SKILL),
            PromptKey::VocabularySystem => self.skill_path(VOCABULARY_SKILL),
            PromptKey::ResearchTemplate => paths.prompts_dir().join("research.md"),
            PromptKey::StyleOldEditor => paths.prompts_dir().join("style_old_editor.md"),
            PromptKey::StyleShowOff => paths.prompts_dir().join("style_show_off.md"),
        }
    }

    /// 读取提示词，文件不存在时返回空字符串
    pub async fn read(&self, key: PromptKey) -> Result<String, PromptError> {
        read_optional(self.path_of(key)).await.map(Option::unwrap_or_default)
    }

    /// 读取提示词，文件不存在或为空时使用内置版本
    pub async fn read_or(&self, key: PromptKey, fallback: &str) -> Result<String, PromptError> {
        match read_optional(self.path_of(key)).await? {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => {
                debug!("提示词 {} 不存在，使用内置版本", key.as_str());
                Ok(fallback.to_string())
            }
        }
    }

    pub async fn write(&self, key: PromptKey, content: &str) -> Result<(), PromptError> {
        write_file(self.path_of(key), content).await?;
        info!("已更新提示词: {}", key.as_str());
        Ok(())
    }

    /// 读取技能，不存在或为空时使用内置版本
    pub async fn skill_or(&self, name: &str, fallback: &str) -> Result<String, PromptError> {
        validate_skill_name(name)?;
        match read_optional(self.skill_path(name)).await? {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => {
                debug!("技能 {} 不存在，使用内置提示词", name);
                Ok(fallback.to_string())
            }
        }
    }

    /// 所有技能目录（按名称排序）
    pub async fn list_skills(&self) -> Result<Vec<Skill>, PromptError> {
        let dir = self.config.paths().skills_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut skills = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let content = read_optional(entry.path().join("SKILL.md"))
                .await?
                .unwrap_or_default();
            skills.push(Skill { name, content });
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }

    pub async fn update_skill(&self, name: &str, content: &str) -> Result<(), PromptError> {
        validate_skill_name(name)?;
        if content.is_empty() {
            return Err(PromptError::MissingContent);
        }
        write_file(self.skill_path(name), content).await?;
        info!("已更新技能: {}", name);
        Ok(())
    }
}

fn validate_skill_name(name: &str) -> Result<(), PromptError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(PromptError::InvalidName(name.to_string()));
    }
    Ok(())
}

async fn read_optional(path: PathBuf) -> Result<Option<String>, PromptError> {
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_file(path: PathBuf, content: &str) -> Result<(), PromptError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wordcast_core::AppConfig;

    fn store(dir: &TempDir) -> PromptStore {
        let config = ConfigManager::new(dir.path(), AppConfig::with_root(dir.path()));
        PromptStore::new(Arc::new(config))
    }

    #[test]
    fn test_prompt_key_parse() {
        assert_eq!("style-show-off".parse::<PromptKey>().unwrap(), PromptKey::StyleShowOff);
        assert!(matches!(
            "system".parse::<PromptKey>(),
            Err(PromptError::UnknownKey(_))
        ));
    }

    #[tokio::test]
    async fn test_read_write_prompt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert_eq!(store.read(PromptKey::ResearchTemplate).await.unwrap(), "");
        store
            .write(PromptKey::ResearchTemplate, "Research {{topic}}")
            .await
            .unwrap();
        assert_eq!(
            store.read(PromptKey::ResearchTemplate).await.unwrap(),
            "Research {{topic}}"
        );
        assert!(dir.path().join(".agent/prompts/research.md").exists());

        store.write(PromptKey::ArticleSystem, "system").await.unwrap();
        assert!(dir
            .path()
            .join(".agent/skills/article-generator/SKILL.md")
            .exists());
    }

    #[tokio::test]
    async fn test_skills_listing_and_validation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.list_skills().await.unwrap().is_empty());

        store.update_skill("podcast-script-expert", "podcast").await.unwrap();
        store.update_skill("article-generator", "article").await.unwrap();
        let names: Vec<String> = store
            .list_skills()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["article-generator", "podcast-script-expert"]);

        assert!(matches!(
            store.update_skill("../etc", "x").await,
            Err(PromptError::InvalidName(_))
        ));
        assert!(matches!(
            store.update_skill("article-generator", "").await,
            Err(PromptError::MissingContent)
        ));
        assert_eq!(store.skill_or("missing", "fallback").await.unwrap(), "fallback");
    }
}
