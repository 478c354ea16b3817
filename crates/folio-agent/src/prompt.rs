//! Prompt templates.

use crate::conversation::MemoryEntry;
use folio_core::message::render_transcript;
use folio_core::ChatMessage;
use folio_memory::DocumentChunk;

/// Context text used when retrieval found nothing.
pub const NO_CONTEXT_PLACEHOLDER: &str = "No relevant information was found in the profile documents.";

/// Answer used when the model returns nothing.
pub const NO_INFORMATION_ANSWER: &str =
    "I don't have that information in my profile documents, so I can't answer that reliably.";

/// Question sent through the pipeline to produce the profile summary.
pub const PROFILE_SUMMARY_QUESTION: &str = "Summarize the professional profile of this candidate in 3-4 concise sentences, highlighting key skills and roles. Write it in the first person (e.g., 'I am a...').";

const PERSONA: &str = "You are a professional, friendly, and helpful AI assistant representing the portfolio owner.
Your goal is to answer questions about the owner's skills, experience, and projects based ONLY on the provided context.

Rules:
1. Answer in the first person (e.g., \"I have experience in...\", \"My project involves...\").
2. Be concise but comprehensive. Prioritize specific details like technologies used, dates, and outcomes.
3. If the answer is not in the context, politely say you don't have that information. Do NOT hallucinate.
4. Maintain a professional and engaging tone.";

/// Chunks joined by blank lines, or the placeholder when there are none.
pub fn format_context(chunks: &[DocumentChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_PLACEHOLDER.to_string();
    }
    chunks
        .iter()
        .map(|c| c.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Bulleted history from stored summaries and the latest turns.
/// Empty when there is no history at all.
pub fn format_history(summaries: &[MemoryEntry], recent: &[ChatMessage]) -> String {
    let mut bullets: Vec<String> = summaries
        .iter()
        .map(|entry| format!("- {}", entry.summary))
        .collect();
    bullets.extend(recent.iter().map(|m| format!("- {}: {}", m.role, m.content)));
    bullets.join("\n")
}

/// Full generation prompt.
pub fn answer_prompt(
    question: &str,
    chunks: &[DocumentChunk],
    summaries: &[MemoryEntry],
    recent: &[ChatMessage],
) -> String {
    let mut prompt = format!("{PERSONA}\n\nContext:\n{}\n", format_context(chunks));
    let history = format_history(summaries, recent);
    if !history.is_empty() {
        prompt.push_str("\nConversation history:\n");
        prompt.push_str(&history);
        prompt.push('\n');
    }
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question);
    prompt.push('\n');
    prompt
}

/// Prompt asking for a short third-person summary of a conversation.
pub fn summary_prompt(messages: &[ChatMessage]) -> String {
    format!(
        "Summarize the following conversation exchange concisely.
Focus on:
- Key topics discussed
- Questions asked by the user
- Important information shared by the assistant

Keep the summary under 100 words and write in third person.

Conversation:
{}

Summary:",
        render_transcript(messages)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_memory::DocumentMetadata;

    fn chunk(text: &str) -> DocumentChunk {
        DocumentChunk::new(text, DocumentMetadata::for_source("cv.md"))
    }

    fn memory(summary: &str) -> MemoryEntry {
        MemoryEntry {
            id: 1,
            summary: summary.to_string(),
            session_id: "s".to_string(),
            timestamp_ms: 0,
            message_count: 4,
            topics: Vec::new(),
        }
    }

    #[test]
    fn test_context_joined_by_blank_lines() {
        let text = format_context(&[chunk("one"), chunk("two")]);
        assert_eq!(text, "one\n\ntwo");
    }

    #[test]
    fn test_empty_context_uses_placeholder() {
        assert_eq!(format_context(&[]), NO_CONTEXT_PLACEHOLDER);
    }

    #[test]
    fn test_prompt_without_history_omits_section() {
        let prompt = answer_prompt("What do you do?", &[chunk("I build APIs")], &[], &[]);
        assert!(prompt.contains("Context:\nI build APIs"));
        assert!(prompt.contains("Question: What do you do?"));
        assert!(!prompt.contains("Conversation history"));
        assert!(prompt.contains("Do NOT hallucinate"));
    }

    #[test]
    fn test_prompt_with_history_lists_bullets() {
        let prompt = answer_prompt(
            "And Docker?",
            &[],
            &[memory("The user asked about Python.")],
            &[ChatMessage::user("Python?"), ChatMessage::assistant("Five years.")],
        );
        assert!(prompt.contains(NO_CONTEXT_PLACEHOLDER));
        assert!(prompt.contains(
            "Conversation history:\n- The user asked about Python.\n- User: Python?\n- Assistant: Five years."
        ));
    }

    #[test]
    fn test_summary_prompt_renders_transcript() {
        let prompt = summary_prompt(&[ChatMessage::user("Hi"), ChatMessage::assistant("Hello")]);
        assert!(prompt.contains("Conversation:\nUser: Hi\nAssistant: Hello\n\nSummary:"));
        assert!(prompt.contains("under 100 words"));
    }
}
