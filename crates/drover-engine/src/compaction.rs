//! Context compaction for long conversations
//!
//! When a transcript approaches the model's context window, the oldest
//! portion is summarized and replaced with a single synthetic user message
//! so the run can continue within budget.

use tokio_util::sync::CancellationToken;

use drover_model::{
    Content, Message, MessageStatus, ModelEvent, ModelRequest, ModelSpec, Role, SharedModelClient,
};

/// Transcripts shorter than this are never compacted
pub const MIN_COMPACTION_MESSAGES: usize = 5;

/// Context window assumed when the model does not report one
pub const DEFAULT_CONTEXT_WINDOW: u32 = 64_000;

/// Preamble of the synthetic message that replaces the summarized head
pub const SUMMARY_PREAMBLE: &str = "This session is being continued from a previous conversation \
that ran out of context. The conversation is summarized below:";

/// Configuration for context compaction
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Whether compaction is enabled
    pub enabled: bool,
    /// Compact once the estimate exceeds this fraction of the context window
    pub threshold: f32,
    /// Fraction of the message count marking where the preserved tail begins
    pub preserve_fraction: f32,
    /// Model used for summarization; falls back to the run's model
    pub model: Option<ModelSpec>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.7,
            preserve_fraction: 0.3,
            model: None,
        }
    }
}

/// Result of a compaction check
#[derive(Debug, Clone)]
pub enum CompactionOutcome {
    /// Transcript was within budget (or too short); nothing changed
    Unchanged,
    /// The head was summarized and replaced
    Compacted {
        transcript: Vec<Message>,
        summary: String,
        tokens_before: u32,
        tokens_after: u32,
    },
}

impl CompactionOutcome {
    pub fn was_compacted(&self) -> bool {
        matches!(self, CompactionOutcome::Compacted { .. })
    }
}

// --- Token Estimation ---

/// Estimate token count for a single message (chars/4 heuristic)
pub fn estimate_tokens(message: &Message) -> u32 {
    let char_count: usize = message
        .content
        .iter()
        .map(|c| match c {
            Content::Text { text } => text.len(),
            Content::Thinking { thinking } => thinking.len(),
            Content::ToolCall {
                name, arguments, ..
            } => name.len() + serde_json::to_string(arguments).unwrap_or_default().len(),
        })
        .sum();
    (char_count / 4) as u32
}

/// Estimate total tokens for a slice of messages
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_tokens).sum()
}

// --- Cut Point ---

/// Index where the preserved tail begins.
///
/// The initial cut is `ceil(len × preserve_fraction)`; from there the cut
/// moves forward past tool-result messages, because a tool result must
/// always follow its originating tool call and can never open the tail.
pub fn find_cut_index(messages: &[Message], preserve_fraction: f32) -> usize {
    let mut cut = (messages.len() as f32 * preserve_fraction).ceil() as usize;
    while cut < messages.len() && messages[cut].role == Role::Tool {
        cut += 1;
    }
    cut
}

// --- Message Serialization ---

/// Serialize messages to plain text for the summarization prompt.
/// Uses a human-readable format to prevent the model from trying to
/// "continue" the conversation.
fn serialize_messages_for_summary(messages: &[Message]) -> String {
    let mut out = String::new();

    for msg in messages {
        match msg.role {
            Role::User => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push_str("[User]: ");
                    out.push_str(&text);
                    out.push('\n');
                }
            }
            Role::System => {
                let text = msg.text();
                if !text.is_empty() {
                    out.push_str("[System]: ");
                    out.push_str(&text);
                    out.push('\n');
                }
            }
            Role::Assistant => {
                let mut thinking_parts = Vec::new();
                let mut text_parts = Vec::new();
                let mut tool_calls = Vec::new();

                for c in &msg.content {
                    match c {
                        Content::Thinking { thinking } => thinking_parts.push(thinking.as_str()),
                        Content::Text { text } => text_parts.push(text.as_str()),
                        Content::ToolCall {
                            name, arguments, ..
                        } => {
                            tool_calls.push(format!("{}({})", name, format_tool_args(arguments)));
                        }
                    }
                }

                if !thinking_parts.is_empty() {
                    out.push_str("[Assistant thinking]: ");
                    out.push_str(&thinking_parts.join(" "));
                    out.push('\n');
                }
                if !text_parts.is_empty() {
                    out.push_str("[Assistant]: ");
                    out.push_str(&text_parts.join(""));
                    out.push('\n');
                }
                if !tool_calls.is_empty() {
                    out.push_str("[Assistant tool calls]: ");
                    out.push_str(&tool_calls.join("; "));
                    out.push('\n');
                }
            }
            Role::Tool => {
                let name = msg.tool_name.as_deref().unwrap_or("unknown");
                let label = if msg.status == MessageStatus::Error {
                    format!("[Tool error ({})]: ", name)
                } else {
                    format!("[Tool result ({})]: ", name)
                };
                out.push_str(&label);
                let text = msg.text();
                // Truncate very long tool results
                if text.len() > 2000 {
                    out.push_str(&text[..2000]);
                    out.push_str("...(truncated)");
                } else {
                    out.push_str(&text);
                }
                out.push('\n');
            }
        }
    }

    out
}

fn format_tool_args(args: &serde_json::Value) -> String {
    match args {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let val = match v {
                    serde_json::Value::String(s) => {
                        if s.len() > 100 {
                            format!("\"{}...\"", &s[..100])
                        } else {
                            format!("\"{}\"", s)
                        }
                    }
                    other => {
                        let s = other.to_string();
                        if s.len() > 100 {
                            format!("{}...", &s[..100])
                        } else {
                            s
                        }
                    }
                };
                format!("{}={}", k, val)
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => args.to_string(),
    }
}

// --- Summarization Prompts ---

const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a specialized summarization model. Your task is to create a comprehensive \
yet concise continuation summary of a conversation. This summary will replace the \
original messages in the conversation context, so it must capture all essential \
information needed to continue the conversation effectively.";

const SUMMARIZATION_PROMPT: &str = "\
Please provide a detailed summary of this conversation so far. The summary should:

1. **Goal**: What is the user's primary objective?
2. **Progress**: What has been accomplished so far?
3. **Key Decisions**: What important decisions were made and why?
4. **Next Steps**: What was the user about to do or ask about next?
5. **Critical Context**: Any important constraints, preferences, or context that would be lost.

Format your response as a structured summary using the headers above. Be thorough but concise. \
Focus on information that would be needed to continue the conversation seamlessly.

<conversation>
{conversation}
</conversation>";

const UPDATE_SUMMARIZATION_PROMPT: &str = "\
Below is an existing summary of an earlier portion of this conversation, followed by \
new messages that occurred after that summary. Please create an updated, comprehensive \
summary that integrates both.

<previous-summary>
{previous_summary}
</previous-summary>

Please provide an updated summary that incorporates the new messages below. The summary should:

1. **Goal**: What is the user's primary objective? (update if it has evolved)
2. **Progress**: What has been accomplished so far? Include both previous and new progress.
3. **Key Decisions**: What important decisions were made and why?
4. **Next Steps**: What was about to happen next?
5. **Critical Context**: Any important constraints, preferences, or context.

<new-messages>
{conversation}
</new-messages>";

// --- Main Compaction Function ---

/// Whether the transcript is over the message floor and the token budget
/// threshold. `maybe_compact` performs the same check; this exists so a
/// caller can avoid announcing a compaction that will not happen.
pub fn needs_compaction(
    messages: &[Message],
    config: &CompactionConfig,
    budget_model: &ModelSpec,
) -> bool {
    if !config.enabled || messages.len() < MIN_COMPACTION_MESSAGES {
        return false;
    }
    let max = if budget_model.context_window > 0 {
        budget_model.context_window
    } else {
        DEFAULT_CONTEXT_WINDOW
    };
    let threshold_tokens = (config.threshold * max as f32) as u32;
    estimate_total_tokens(messages) >= threshold_tokens
}

/// Check the token budget and compact if necessary.
///
/// Returns `Ok(Unchanged)` when the transcript is short or within budget.
/// A summarization failure is an `Err` the caller treats as recoverable:
/// the step proceeds with the uncompacted transcript.
pub async fn maybe_compact(
    messages: &[Message],
    config: &CompactionConfig,
    budget_model: &ModelSpec,
    client: &SharedModelClient,
    previous_summary: Option<&str>,
    cancel: &CancellationToken,
) -> std::result::Result<CompactionOutcome, String> {
    if !needs_compaction(messages, config, budget_model) {
        return Ok(CompactionOutcome::Unchanged);
    }
    let tokens_before = estimate_total_tokens(messages);

    let cut = find_cut_index(messages, config.preserve_fraction);
    if cut == 0 {
        return Ok(CompactionOutcome::Unchanged);
    }
    let head = &messages[..cut];

    let conversation_text = serialize_messages_for_summary(head);
    let prompt = match previous_summary {
        Some(prev) => UPDATE_SUMMARIZATION_PROMPT
            .replace("{previous_summary}", prev)
            .replace("{conversation}", &conversation_text),
        None => SUMMARIZATION_PROMPT.replace("{conversation}", &conversation_text),
    };

    let model = config.model.as_ref().unwrap_or(budget_model);
    let summary = call_summarization_model(&prompt, model, client, cancel).await?;

    let mut transcript = Vec::with_capacity(messages.len() - cut + 1);
    transcript.push(Message::user(format!("{}\n\n{}", SUMMARY_PREAMBLE, summary)));
    transcript.extend_from_slice(&messages[cut..]);
    let tokens_after = estimate_total_tokens(&transcript);

    Ok(CompactionOutcome::Compacted {
        transcript,
        summary,
        tokens_before,
        tokens_after,
    })
}

/// Make a model call for summarization through the narrow client interface
async fn call_summarization_model(
    prompt: &str,
    model: &ModelSpec,
    client: &SharedModelClient,
    cancel: &CancellationToken,
) -> std::result::Result<String, String> {
    use futures::StreamExt;

    let request = ModelRequest {
        system_prompt: Some(SUMMARIZATION_SYSTEM_PROMPT.to_string()),
        messages: vec![Message::user(prompt)],
        tools: vec![],
        model: Some(model.clone()),
        max_tokens: Some(4096),
        temperature: None,
    };

    let mut event_stream = client
        .stream(request, cancel.child_token())
        .await
        .map_err(|e| format!("Compaction model call failed: {}", e))?;

    let mut result_text = String::new();

    while let Some(event) = event_stream.next().await {
        match event {
            ModelEvent::Done { message, .. } => {
                result_text = message.text();
            }
            ModelEvent::Error { message } => {
                return Err(format!("Compaction model error: {}", message));
            }
            _ => {}
        }
    }

    if result_text.is_empty() {
        return Err("Compaction model returned empty response".to_string());
    }

    Ok(result_text)
}
