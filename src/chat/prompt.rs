//! Prompt construction for the generation stage.

use super::floor_char_boundary;
use super::pipeline::ChatTurn;

/// Most context characters carried into the prompt body.
const PROMPT_CONTEXT_CHARS: usize = 800;

/// History turns included, counted from the end of the conversation.
const HISTORY_TURNS: usize = 5;

/// Build the user prompt from the bounded context, the question, and
/// the tail of the conversation history (oldest included turn first).
pub fn build_prompt(question: &str, context: &str, history: &[ChatTurn]) -> String {
    let cut = floor_char_boundary(context, PROMPT_CONTEXT_CHARS);

    let mut prompt = format!(
        "Answer this question about test automation tools (Selenium, Playwright, Testim, Mabl) \
         using the context below. Keep your answer concise (2-3 sentences max).\n\n\
         Context: {}\n\nQuestion: {}\n\nAnswer:",
        &context[..cut],
        question
    );

    if !history.is_empty() {
        let tail_start = history.len().saturating_sub(HISTORY_TURNS);
        let mut header = String::from("Previous conversation:\n");
        for turn in &history[tail_start..] {
            header.push_str(&format!("- {}: {}\n", turn.role, turn.content));
        }
        prompt = format!("{}\n\n{}", header, prompt);
    }

    prompt
}
