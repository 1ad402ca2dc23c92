//! # Context Builder
//!
//! Renders conversation state into the single string sent to an agent.
//!
//! - **Cumulative**: the whole meeting transcript, used by the pipeline.
//! - **Chained**: the last few turns of the previous stage plus the new input,
//!   used by one-on-one chat.
//!
//! Cumulative context is never truncated. Long meetings send long requests.

use crate::agents::AgentRegistry;
use crate::error::Result;
use crate::state::{Message, Sender};

const SUMMARY_REQUEST: &str = "请根据以下会议内容，生成一份完整的会议总结，包括最终确定的需求、架构、开发计划和测试方案。\n\
不要简单复制对话内容，而是提炼出最终达成一致的方案，并按照以下结构组织：\n\n\
1. 项目概述\n2. 需求分析结果\n3. 架构设计方案\n4. 开发计划\n5. 测试策略\n6. 下一步行动计划\n\n\
会议内容：\n";

pub struct ContextBuilder<'a> {
    registry: &'a AgentRegistry,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(registry: &'a AgentRegistry) -> Self {
        Self { registry }
    }

    /// Every settled message as `label: text`, separated by blank lines
    pub fn cumulative(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .filter(|m| !m.is_in_flight())
            .map(|m| format!("{}: {}", self.registry.label_for(&m.sender), m.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Transcript wrapped in the meeting-summary request
    pub fn summary(&self, messages: &[Message]) -> String {
        format!("{}{}", SUMMARY_REQUEST, self.cumulative(messages))
    }

    /// Context for a one-on-one turn with `agent_id`.
    ///
    /// `previous_session` is the previous stage's chat. Only its user turns
    /// and the previous agent's own replies count; the last `window` of
    /// those are quoted under a header, then the new input follows. The
    /// first stage, or an empty previous session, gets the input alone.
    pub fn chained(
        &self,
        agent_id: &str,
        previous_session: &[Message],
        input: &str,
        window: usize,
    ) -> Result<String> {
        let previous = match self.registry.previous(agent_id)? {
            Some(agent) => agent,
            None => return Ok(input.to_string()),
        };

        let relevant: Vec<&Message> = previous_session
            .iter()
            .filter(|m| !m.from_previous_stage && !m.is_in_flight() && !m.is_control())
            .filter(|m| m.sender == Sender::User || m.sender.is_agent(&previous.id))
            .collect();

        if relevant.is_empty() {
            return Ok(input.to_string());
        }

        let quoted = relevant[relevant.len().saturating_sub(window)..]
            .iter()
            .map(|m| format!("{}：{}", self.registry.label_for(&m.sender), m.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(format!(
            "{}\n{}\n\n当前输入：{}",
            chained_header(&previous.display_name),
            quoted,
            input
        ))
    }
}

/// Header line introducing the imported turns
pub fn chained_header(previous_name: &str) -> String {
    format!("# 上一个角色 ({}) 对话摘要：", previous_name)
}
