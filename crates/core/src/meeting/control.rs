//! # Turn Control
//!
//! Classifies user input sent while the meeting is parked.

/// Inputs that move the meeting to the next stage
const ADVANCE_TOKENS: [&str; 6] = ["next", "next agent", "下一位", "下一个", "下一步", "继续"];

/// Trailing punctuation ignored when matching
const TRAILING_PUNCT: &[char] = &['.', '!', '?', '。', '！', '？', '~', '～', '…'];

/// What a line of user input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// Hand over to the next stage
    Advance,
    /// Text for the current stage's agent
    Feedback(String),
}

impl TurnInput {
    pub fn parse(input: &str) -> Self {
        let normalized = input
            .trim()
            .trim_end_matches(TRAILING_PUNCT)
            .trim()
            .to_lowercase();

        if ADVANCE_TOKENS.contains(&normalized.as_str()) {
            Self::Advance
        } else {
            Self::Feedback(input.trim().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_tokens() {
        for token in ["next", "NEXT", "Next Agent", " 下一位 ", "下一个。", "继续！", "下一步"] {
            assert_eq!(TurnInput::parse(token), TurnInput::Advance, "{}", token);
        }
    }

    #[test]
    fn test_feedback_is_not_substring_matched() {
        assert_eq!(
            TurnInput::parse("请继续完善接口设计"),
            TurnInput::Feedback("请继续完善接口设计".to_string())
        );
        assert_eq!(
            TurnInput::parse("  what comes next?  "),
            TurnInput::Feedback("what comes next?".to_string())
        );
    }
}
