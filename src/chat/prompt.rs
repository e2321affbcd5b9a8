// Prompt composition for one chat turn

use itertools::Itertools;

use crate::memory::MemoryContext;
use crate::retrieval::RetrievalResult;

const SYSTEM_RULES: &str = "You are an AI assistant with access to context retrieved from a knowledge base. Follow these rules:

1. Use the provided context to answer the user's question as precisely as possible.
2. If you must infer anything not in the context, preface your answer with: \"Based on inference:\".
3. Never fabricate information. If context is insufficient, provide a general but truthful answer.
4. Structure your responses with bullet points or short, clear paragraphs.
5. Remain concise, helpful, and professional.";

/// Build the prompt for `question`. The separator is removed from every
/// interpolated field so the final line is its only occurrence.
#[inline]
pub fn build_prompt(
    separator: &str,
    results: &[RetrievalResult],
    memory: &MemoryContext,
    question: &str,
) -> String {
    let context = if results.is_empty() {
        "(no relevant passages found)".to_string()
    } else {
        results
            .iter()
            .map(|result| {
                let heading = [
                    result.metadata.section.as_deref(),
                    result.metadata.subsection.as_deref(),
                ]
                .into_iter()
                .flatten()
                .join(" > ");
                format!("[{}]\n{}", scrub(&heading, separator), scrub(&result.text, separator))
            })
            .join("\n\n")
    };

    let summary = if memory.summary.trim().is_empty() {
        "(none)".to_string()
    } else {
        scrub(&memory.summary, separator)
    };

    let history = if memory.recent_exchanges.is_empty() {
        "(none)".to_string()
    } else {
        memory
            .recent_exchanges
            .iter()
            .map(|m| format!("{}: {}", m.role, scrub(&m.content, separator)))
            .join("\n")
    };

    format!(
        "{SYSTEM_RULES}\n\n--- Knowledge Base Context ---\n{context}\n\n--- Conversation Summary ---\n{summary}\n\n--- Recent Exchanges ---\n{history}\n\n--- Question ---\n{question}\n\n{separator}",
        question = scrub(question, separator),
    )
}

fn scrub(text: &str, separator: &str) -> String {
    if separator.is_empty() {
        return text.to_string();
    }

    let mut scrubbed = text.replace(separator, "");
    while scrubbed.contains(separator) {
        scrubbed = scrubbed.replace(separator, "");
    }
    scrubbed
}
