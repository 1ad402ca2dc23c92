//! # Export Projector
//!
//! Turns a finished meeting into deliverable documents:
//! - plain text, markup stripped, one numbered section per stage
//! - Markdown, with stage names as headers
//!
//! Export needs a target: the meeting summary, or failing that the latest
//! settled agent or system output. Without one nothing is produced and
//! nothing is written.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::agents::AgentRegistry;
use crate::error::{Error, Result};
use crate::state::{io, Message, Sender};

pub const EXPORT_TITLE: &str = "项目会议记录";

/// Runtime subdirectory export files land in
pub const EXPORT_DIR: &str = "exports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Markdown => "md",
        }
    }
}

/// A rendered export, not yet written anywhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub format: ExportFormat,
    pub file_name: String,
    pub content: String,
}

/// `2024-05-01T08:30:00.123Z` → `2024-05-01T08-30-00-123Z`
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

pub struct ExportProjector<'a> {
    registry: &'a AgentRegistry,
}

impl<'a> ExportProjector<'a> {
    pub fn new(registry: &'a AgentRegistry) -> Self {
        Self { registry }
    }

    /// The message an export is anchored on.
    ///
    /// Fails with [`Error::EmptyExportTarget`] when there is none or its text
    /// is blank.
    pub fn target<'m>(&self, messages: &'m [Message]) -> Result<&'m Message> {
        let summary = messages.iter().rev().find(|m| m.is_summary && is_settled(m));
        let target = summary.or_else(|| {
            messages
                .iter()
                .rev()
                .find(|m| m.sender != Sender::User && is_settled(m) && !m.is_control())
        });

        match target {
            Some(m) if !m.text.trim().is_empty() => Ok(m),
            _ => Err(Error::EmptyExportTarget),
        }
    }

    /// Render `messages` in `format`, stamped with `at`
    pub fn project(
        &self,
        messages: &[Message],
        format: ExportFormat,
        at: DateTime<Utc>,
    ) -> Result<ExportDocument> {
        let target = self.target(messages)?;
        let lead = (target.sender == Sender::System).then_some(target);
        let stages = self.stage_outputs(messages);
        let stamp = timestamp_slug(at);

        let content = match format {
            ExportFormat::Text => self.render_text(lead, &stages, at),
            ExportFormat::Markdown => self.render_markdown(lead, &stages, &stamp),
        };

        Ok(ExportDocument {
            format,
            file_name: format!("{}_{}.{}", EXPORT_TITLE, stamp, format.extension()),
            content,
        })
    }

    /// Latest settled output of each stage that spoke, in pipeline order
    fn stage_outputs<'m>(&self, messages: &'m [Message]) -> Vec<(String, &'m Message)> {
        self.registry
            .pipeline()
            .iter()
            .filter_map(|agent| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m.sender.is_agent(&agent.id) && is_settled(m))
                    .map(|m| (agent.display_name.clone(), m))
            })
            .collect()
    }

    fn render_text(
        &self,
        lead: Option<&Message>,
        stages: &[(String, &Message)],
        at: DateTime<Utc>,
    ) -> String {
        let mut out = format!(
            "{}\n导出时间：{}\n",
            EXPORT_TITLE,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if let Some(lead) = lead {
            out.push_str(&format!("\n{}\n{}\n", lead_title(lead), strip_markup(&lead.text)));
        }

        for (i, (name, message)) in stages.iter().enumerate() {
            out.push_str(&format!("\n{}. {}\n{}\n", i + 1, name, strip_markup(&message.text)));
        }
        out
    }

    fn render_markdown(
        &self,
        lead: Option<&Message>,
        stages: &[(String, &Message)],
        stamp: &str,
    ) -> String {
        let mut out = format!("# {} ({})\n\n", EXPORT_TITLE, stamp);

        if let Some(lead) = lead {
            out.push_str(&format!("## {}\n\n{}\n\n", lead_title(lead), lead.text.trim()));
        }

        for (name, message) in stages {
            out.push_str(&format!("### {}\n\n{}\n\n", name, message.text.trim()));
        }
        out
    }
}

fn is_settled(m: &Message) -> bool {
    !m.is_in_flight() && !m.is_error && !m.from_previous_stage
}

fn lead_title(m: &Message) -> &'static str {
    if m.is_summary {
        "会议总结"
    } else {
        "会议记录"
    }
}

fn markup_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"<[^>]*>", ""),
            (r"(?m)^[ \t]*#{1,6}[ \t]*", ""),
            (r"(?m)^([ \t]*)[-*+][ \t]+", "$1"),
            (r"(?m)^[ \t]*>[ \t]?", ""),
            (r"[*_`~|]", ""),
            (r"\n{3,}", "\n\n"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Remove Markdown and HTML syntax, keeping text and line breaks
pub fn strip_markup(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in markup_rules() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_string()
}

/// Write rendered documents under the runtime export directory
pub async fn write_exports(documents: &[ExportDocument]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(documents.len());
    for doc in documents {
        let path = io::write_runtime_file(
            PathBuf::from(EXPORT_DIR).join(&doc.file_name),
            &doc.content,
        )
        .await?;
        tracing::info!(path = %path.display(), "Export written");
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    fn meeting() -> Vec<Message> {
        vec![
            Message::user("图书管理系统"),
            Message::new(Sender::agent("analyst"), "## 需求\n- **借阅**管理"),
            Message::new(Sender::agent("architect"), "<b>分层</b>架构"),
            Message::error(Sender::agent("developer"), "⚠️ 抱歉，我在处理时遇到了问题。"),
            Message::new(Sender::agent("tester"), "`pytest` 用例"),
            Message::prompt("所有角色均已发言"),
        ]
    }

    #[test]
    fn test_timestamp_slug() {
        assert_eq!(timestamp_slug(at()), "2024-05-01T08-30-00-000Z");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("# 标题\n\n\n\n* 项目 `a`\n<br/>"), "标题\n\n项目 a");
        assert_eq!(strip_markup("  - item\n> quote"), "item\nquote");
    }

    #[test]
    fn test_target_prefers_summary() {
        let registry = AgentRegistry::default();
        let projector = ExportProjector::new(&registry);
        let mut messages = meeting();
        let mut summary = Message::system("1. 项目概述");
        summary.is_summary = true;
        messages.push(summary);
        messages.push(Message::export_options("可导出"));

        assert!(projector.target(&messages).unwrap().is_summary);
    }

    #[test]
    fn test_target_falls_back_to_latest_output() {
        let registry = AgentRegistry::default();
        let projector = ExportProjector::new(&registry);
        let messages = meeting();
        let target = projector.target(&messages).unwrap();
        assert_eq!(target.text, "`pytest` 用例");
    }

    #[test]
    fn test_empty_target() {
        let registry = AgentRegistry::default();
        let projector = ExportProjector::new(&registry);

        let only_user = vec![Message::user("topic"), Message::prompt("请输入")];
        assert!(matches!(
            projector.project(&only_user, ExportFormat::Markdown, at()),
            Err(Error::EmptyExportTarget)
        ));

        let mut blank = Message::system("   \n");
        blank.is_summary = true;
        assert!(matches!(
            projector.target(&[blank]),
            Err(Error::EmptyExportTarget)
        ));
    }

    #[test]
    fn test_markdown_sections_in_stage_order() {
        let registry = AgentRegistry::default();
        let projector = ExportProjector::new(&registry);
        let mut messages = meeting();
        messages.swap(1, 4);

        let doc = projector.project(&messages, ExportFormat::Markdown, at()).unwrap();
        assert_eq!(doc.file_name, "项目会议记录_2024-05-01T08-30-00-000Z.md");
        assert!(doc.content.starts_with("# 项目会议记录 (2024-05-01T08-30-00-000Z)"));

        let analyst = doc.content.find("### 需求分析师").unwrap();
        let architect = doc.content.find("### 系统架构师").unwrap();
        let tester = doc.content.find("### 测试工程师").unwrap();
        assert!(analyst < architect && architect < tester);
        assert!(!doc.content.contains("### 开发工程师"));
        assert!(!doc.content.contains("## 会议总结"));
    }

    #[test]
    fn test_text_document_is_stripped() {
        let registry = AgentRegistry::default();
        let projector = ExportProjector::new(&registry);
        let mut messages = meeting();
        let mut summary = Message::system("**最终方案**");
        summary.is_summary = true;
        messages.push(summary);

        let doc = projector.project(&messages, ExportFormat::Text, at()).unwrap();
        assert!(doc.file_name.ends_with(".txt"));
        assert!(doc.content.starts_with("项目会议记录\n"));
        assert!(doc.content.contains("会议总结\n最终方案"));
        assert!(doc.content.contains("1. 需求分析师\n需求\n借阅管理"));
        assert!(doc.content.contains("2. 系统架构师\n分层架构"));
        assert!(doc.content.contains("3. 测试工程师\npytest 用例"));
        assert!(!doc.content.contains('<'));
    }

    #[tokio::test]
    async fn test_write_exports_under_runtime_dir() {
        let doc = ExportDocument {
            format: ExportFormat::Markdown,
            file_name: "test_write_exports.md".into(),
            content: "# 项目会议记录".into(),
        };

        let paths = tokio_test::assert_ok!(write_exports(&[doc]).await);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].parent().unwrap().ends_with(EXPORT_DIR));

        let _ = tokio::fs::remove_file(&paths[0]).await;
    }
}
