//! Prompt shape and answer extraction for the Q/A completion format.
//!
//! The model is prompted with `Q: <question> A: ` and echoes the prompt back
//! in its output, so the generated answer is whatever follows the first
//! `A: ` marker.

/// Literal delimiter between the echoed prompt and the generated answer.
pub const ANSWER_MARKER: &str = "A: ";

/// Stop sequence handed to the completion model so it does not start
/// inventing follow-up questions.
pub const STOP_SEQUENCE: &str = "Q:";

/// Join CLI words into the raw query string. No validation; an empty
/// argument list yields an empty query.
pub fn assemble_input(words: &[String]) -> String {
    words.join(" ")
}

/// Build the completion prompt. The trailing space after the marker is part
/// of the format the extractor relies on.
pub fn build_prompt(question: &str) -> String {
    format!("Q: {question} {ANSWER_MARKER}")
}

/// Extract the answer from a raw completion.
///
/// Returns the trimmed substring after the first occurrence of [`ANSWER_MARKER`];
/// when the marker is absent the whole trimmed completion is returned. Later
/// occurrences of the marker are left inside the answer untouched.
pub fn extract_answer(completion: &str) -> &str {
    match completion.find(ANSWER_MARKER) {
        Some(idx) => completion[idx + ANSWER_MARKER.len()..].trim(),
        None => completion.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_words_with_single_spaces() {
        let words: Vec<String> = ["Jaka", "jest", "stolica", "Francji?"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(assemble_input(&words), "Jaka jest stolica Francji?");
    }

    #[test]
    fn assembles_empty_args_to_empty_string() {
        assert_eq!(assemble_input(&[]), "");
    }

    #[test]
    fn prompt_has_trailing_space_after_marker() {
        assert_eq!(
            build_prompt("What is the capital of France?"),
            "Q: What is the capital of France? A: "
        );
    }

    #[test]
    fn extracts_after_first_marker() {
        let raw = "Q: What is the capital of France? A: Paris.";
        assert_eq!(extract_answer(raw), "Paris.");
    }

    #[test]
    fn first_marker_wins_when_repeated() {
        let raw = "Q: x A: first A: second";
        assert_eq!(extract_answer(raw), "first A: second");
    }

    #[test]
    fn marker_at_end_yields_empty_answer() {
        assert_eq!(extract_answer("Q: anything A: "), "");
    }

    #[test]
    fn missing_marker_returns_whole_trimmed_text() {
        assert_eq!(extract_answer("  I am not sure.  \n"), "I am not sure.");
    }

    #[test]
    fn extraction_is_idempotent_on_marker_free_text() {
        let once = extract_answer("Q: q A: It depends.");
        assert_eq!(once, "It depends.");
        assert_eq!(extract_answer(once), once);
    }

    #[test]
    fn handles_completion_shorter_than_prompt_echo() {
        assert_eq!(extract_answer("Q: trunc"), "Q: trunc");
    }
}
