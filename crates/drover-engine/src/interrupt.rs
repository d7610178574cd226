//! Human interrupts: suspending a run and applying the eventual reply

use serde::{Deserialize, Serialize};

use drover_model::{Content, Message, MessageStatus};

use crate::error::{Error, Result};
use crate::state::ThreadState;

/// Prefix marking a reply as a structured callback payload
pub const CALLBACK_TAG: &str = "callback:";

/// The question a paused run is waiting on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuestion {
    /// Id of the ask-human tool call being answered
    pub tool_call_id: String,
    /// The arguments of the triggering tool call (question text, choices)
    pub payload: serde_json::Value,
}

/// A parsed human reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    /// A tagged wrapper containing JSON
    Structured(serde_json::Value),
    /// Free-form text
    Text(String),
}

/// Parse a reply string. Replies carrying the callback tag must contain
/// valid JSON; everything else is plain text.
pub fn parse_reply(reply: &str) -> std::result::Result<ReplyPayload, String> {
    match reply.trim_start().strip_prefix(CALLBACK_TAG) {
        Some(raw) => serde_json::from_str(raw)
            .map(ReplyPayload::Structured)
            .map_err(|e| format!("Failed to parse callback payload: {}", e)),
        None => Ok(ReplyPayload::Text(reply.to_string())),
    }
}

/// Apply a human reply to the pending placeholder message.
///
/// A parse failure is recorded as an error status rather than raised: the
/// model sees the failure and reacts. Returns the finalized message for
/// lifecycle emission.
pub(crate) fn apply_reply(
    state: &mut ThreadState,
    thread_id: &str,
    reply: &str,
) -> Result<Message> {
    let Some(question) = state.pending_question.take() else {
        return Err(Error::NoPendingQuestion(thread_id.to_string()));
    };

    let placeholder = state
        .transcript
        .iter_mut()
        .find(|m| {
            m.tool_call_id.as_deref() == Some(question.tool_call_id.as_str())
                && m.status == MessageStatus::Running
        })
        .ok_or_else(|| Error::NoPendingQuestion(thread_id.to_string()))?;

    match parse_reply(reply) {
        Ok(ReplyPayload::Structured(value)) => {
            placeholder.finish_success(vec![Content::text(value.to_string())]);
            placeholder.details = Some(value);
        }
        Ok(ReplyPayload::Text(text)) => {
            placeholder.finish_success(vec![Content::text(text)]);
        }
        Err(parse_error) => {
            placeholder.finish_error(parse_error);
        }
    }

    Ok(placeholder.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_model::Role;

    fn paused_state() -> ThreadState {
        let mut state = ThreadState::with_transcript(vec![
            Message::user("deploy the service"),
            Message::assistant(vec![Content::tool_call(
                "call_q",
                crate::reserved::ASK_HUMAN_TOOL,
                serde_json::json!({"question": "Which region?"}),
            )]),
            Message::tool_running("call_q", crate::reserved::ASK_HUMAN_TOOL),
        ]);
        state.pending_question = Some(PendingQuestion {
            tool_call_id: "call_q".into(),
            payload: serde_json::json!({"question": "Which region?"}),
        });
        state
    }

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(
            parse_reply("use us-east-1").unwrap(),
            ReplyPayload::Text("use us-east-1".into())
        );
    }

    #[test]
    fn test_parse_callback_json() {
        let payload = parse_reply("callback:{\"region\":\"eu-west-1\"}").unwrap();
        match payload {
            ReplyPayload::Structured(v) => assert_eq!(v["region"], "eu-west-1"),
            other => panic!("expected structured payload, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_callback_invalid_json_is_err() {
        let err = parse_reply("callback:{region").unwrap_err();
        assert!(err.contains("Failed to parse callback payload"));
    }

    #[test]
    fn test_apply_text_reply_marks_success() {
        let mut state = paused_state();
        let msg = apply_reply(&mut state, "t1", "us-east-1").unwrap();
        assert_eq!(msg.status, MessageStatus::Success);
        assert_eq!(msg.text(), "us-east-1");
        assert!(state.pending_question.is_none());
    }

    #[test]
    fn test_apply_structured_reply_attaches_details() {
        let mut state = paused_state();
        let msg = apply_reply(&mut state, "t1", "callback:{\"choice\": 2}").unwrap();
        assert_eq!(msg.status, MessageStatus::Success);
        assert_eq!(msg.details.as_ref().unwrap()["choice"], 2);
    }

    #[test]
    fn test_apply_malformed_callback_records_error_status() {
        let mut state = paused_state();
        let msg = apply_reply(&mut state, "t1", "callback:{broken").unwrap();
        assert_eq!(msg.status, MessageStatus::Error);
        assert!(msg.error.as_ref().unwrap().contains("parse"));
        // The placeholder is frozen either way; the run can re-enter Respond
        assert_eq!(state.transcript.last().unwrap().role, Role::Tool);
        assert!(state.pending_question.is_none());
    }

    #[test]
    fn test_apply_without_pending_question_is_error() {
        let mut state = ThreadState::default();
        let err = apply_reply(&mut state, "t1", "hello").unwrap_err();
        assert!(matches!(err, Error::NoPendingQuestion(_)));
    }
}
