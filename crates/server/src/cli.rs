//! Terminal front end: run a meeting, export it, clear it

use chrono::Utc;
use clap::ValueEnum;
use roundtable_core::export::write_exports;
use roundtable_core::meeting::orchestrator::ERROR_TEXT;
use roundtable_core::meeting::MeetingEventKind;
use roundtable_core::state::SessionKey;
use roundtable_core::{
    AgentRegistry, ConversationStore, ExportFormat, ExportProjector, MeetingConfig, MeetingEvent,
    TurnOrchestrator,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Text,
    Markdown,
    Both,
}

impl FormatArg {
    pub fn formats(self) -> Vec<ExportFormat> {
        match self {
            Self::Text => vec![ExportFormat::Text],
            Self::Markdown => vec![ExportFormat::Markdown],
            Self::Both => vec![ExportFormat::Text, ExportFormat::Markdown],
        }
    }
}

/// Run a meeting on `topic` in the terminal.
///
/// After the first pass, lines read from stdin go to the meeting as
/// feedback or advance words. `/summary`, `/export` and `/quit` are
/// handled locally.
pub async fn run_meeting(
    topic: String,
    config: MeetingConfig,
    store: Arc<dyn ConversationStore>,
) -> anyhow::Result<()> {
    let registry = AgentRegistry::new(&config.api_base);
    let transport = Arc::new(roundtable_core::HttpTransport::new(&config)?);
    let (event_tx, event_rx) = mpsc::channel::<MeetingEvent>(256);

    let mut meeting = TurnOrchestrator::new(registry.clone(), transport, store, config)?
        .with_event_channel(event_tx);

    let printer = tokio::spawn(print_events(event_rx, registry.clone()));

    let canceller = meeting.canceller();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !canceller.cancel() {
                println!();
                std::process::exit(130);
            }
        }
    });

    println!("📋 议题: {}", topic);
    meeting.handle_send(&topic).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/summary" => {
                meeting.summarize().await?;
            }
            "/export" => {
                let paths = export_messages(meeting.messages(), &registry, FormatArg::Both).await;
                match paths {
                    Ok(paths) => {
                        for path in paths {
                            println!("✅ 已导出: {}", path);
                        }
                    }
                    Err(e) => eprintln!("❌ {}", e),
                }
            }
            input => {
                meeting.handle_send(input).await?;
            }
        }
    }

    drop(meeting);
    let _ = printer.await;
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<MeetingEvent>, registry: AgentRegistry) {
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event.kind {
            MeetingEventKind::TurnStarted => {
                let name = registry
                    .lookup(&event.agent)
                    .map(|a| format!("{} {}", a.avatar, a.display_name))
                    .unwrap_or_else(|_| event.agent.clone());
                println!("\n── {} ──", name);
            }
            MeetingEventKind::Fragment => {
                if let Some(text) = event.data.as_ref().and_then(|d| d["text"].as_str()) {
                    print!("{}", text);
                    let _ = stdout.flush();
                }
            }
            MeetingEventKind::TurnCompleted | MeetingEventKind::SummaryCompleted => println!(),
            MeetingEventKind::TurnFailed => println!("\n{}", ERROR_TEXT),
            MeetingEventKind::TurnCancelled => println!("\n⏹ 已取消"),
            MeetingEventKind::Parked => {
                println!("\n💬 输入反馈让当前角色修改，或输入 next 请下一位发言：")
            }
            MeetingEventKind::PipelineCompleted => {
                println!("\n🏁 所有角色均已发言。输入 /summary 生成会议总结，/quit 退出。")
            }
            MeetingEventKind::SessionCleared => println!("🧹 会议已清空"),
        }
    }
}

/// Render the meeting record and write it under the runtime directory
pub async fn export_messages(
    messages: &[roundtable_core::Message],
    registry: &AgentRegistry,
    format: FormatArg,
) -> anyhow::Result<Vec<String>> {
    let projector = ExportProjector::new(registry);
    let at = Utc::now();

    let documents = format
        .formats()
        .into_iter()
        .map(|f| projector.project(messages, f, at))
        .collect::<Result<Vec<_>, _>>()?;
    let paths = write_exports(&documents).await?;

    Ok(paths.iter().map(|p| p.display().to_string()).collect())
}

/// Export the stored meeting session
pub async fn export_stored(
    config: &MeetingConfig,
    store: &dyn ConversationStore,
    format: FormatArg,
) -> anyhow::Result<()> {
    let registry = AgentRegistry::new(&config.api_base);
    let messages = store.load(&SessionKey::Meeting)?;

    for path in export_messages(&messages, &registry, format).await? {
        println!("✅ 已导出: {}", path);
    }
    Ok(())
}

/// Clear the stored meeting, and every direct chat when `all` is set
pub fn clear_stored(config: &MeetingConfig, store: &dyn ConversationStore, all: bool) -> anyhow::Result<()> {
    store.clear(&SessionKey::Meeting)?;
    if all {
        for agent in AgentRegistry::new(&config.api_base).pipeline() {
            store.clear(&SessionKey::chat(&agent.id))?;
        }
    }
    println!("🧹 已清空{}", if all { "会议与所有单聊记录" } else { "会议记录" });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::state::MemoryConversationStore;
    use roundtable_core::Message;

    #[test]
    fn test_format_arg_expands() {
        assert_eq!(FormatArg::Both.formats().len(), 2);
        assert_eq!(FormatArg::Markdown.formats(), vec![ExportFormat::Markdown]);
    }

    #[test]
    fn test_clear_all_sessions() {
        let store = MemoryConversationStore::new();
        let config = MeetingConfig::default();
        store.save(&SessionKey::Meeting, &[Message::user("topic")]).unwrap();
        store.save(&SessionKey::chat("tester"), &[Message::user("hi")]).unwrap();

        clear_stored(&config, &store, false).unwrap();
        assert!(store.load(&SessionKey::Meeting).unwrap().is_empty());
        assert_eq!(store.load(&SessionKey::chat("tester")).unwrap().len(), 1);

        clear_stored(&config, &store, true).unwrap();
        assert!(store.load(&SessionKey::chat("tester")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_without_output_fails() {
        let registry = AgentRegistry::default();
        let result = export_messages(&[Message::user("topic")], &registry, FormatArg::Both).await;
        assert!(result.is_err());
    }
}
