//! Speech synthesis over the Google Translate TTS endpoint.
//!
//! The endpoint only accepts short inputs, so text is split into chunks of at
//! most [`MAX_CHUNK_CHARS`] characters, preferring punctuation boundaries,
//! and the returned MP3 bodies are concatenated in order.

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;

pub const MAX_CHUNK_CHARS: usize = 100;

static BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.,:;!?¡¿\n]*[.,:;!?¡¿\n]+|[^.,:;!?¡¿\n]+$").expect("boundary"));

/// Split `text` into synthesizable chunks of at most `max` characters.
///
/// Sentences (punctuation-terminated stretches) are kept whole when they fit;
/// anything longer is re-split at whitespace, and only a pathological
/// unbroken run of `max` non-space characters is cut mid-word.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    for m in BOUNDARY_RE.find_iter(text) {
        let piece = m.as_str().trim();
        if piece.is_empty() {
            continue;
        }
        if piece.chars().count() <= max {
            chunks.push(piece.to_string());
            continue;
        }
        // Sentence too long for the endpoint: pack words up to the limit.
        let mut current = String::new();
        let mut current_len = 0usize;
        for word in piece.split_whitespace() {
            let word_len = word.chars().count();
            if word_len > max {
                // No boundary to cut at; hard-split the run.
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let cs: Vec<char> = word.chars().collect();
                for part in cs.chunks(max) {
                    chunks.push(part.iter().collect());
                }
                continue;
            }
            let sep = usize::from(!current.is_empty());
            if current_len + sep + word_len > max {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }
    chunks
}

pub struct GoogleSpeech {
    client: Client,
    endpoint: String,
}

impl GoogleSpeech {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Synthesize `text` in language `lang` and return the MP3 bytes.
    pub fn synthesize(&self, text: &str, lang: &str) -> anyhow::Result<Vec<u8>> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(anyhow!("nothing to synthesize: text is empty"));
        }

        let total = chunks.len();
        let mut audio: Vec<u8> = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let resp = self
                .client
                .get(&self.endpoint)
                .query(&[
                    ("ie", "UTF-8"),
                    ("q", chunk.as_str()),
                    ("tl", lang),
                    ("client", "tw-ob"),
                    ("total", &total.to_string()),
                    ("idx", &idx.to_string()),
                    ("textlen", &chunk.chars().count().to_string()),
                ])
                .send()
                .with_context(|| format!("tts request (chunk {}/{total})", idx + 1))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(anyhow!(
                    "tts request failed (chunk {}/{total}): status {status}",
                    idx + 1
                ));
            }
            let bytes = resp
                .bytes()
                .with_context(|| format!("tts body (chunk {}/{total})", idx + 1))?;
            audio.extend_from_slice(&bytes);
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("Paryż.", MAX_CHUNK_CHARS), vec!["Paryż."]);
    }

    #[test]
    fn splits_at_sentence_punctuation() {
        let text = "Pierwsze zdanie. Drugie zdanie! Trzecie?";
        let chunks = chunk_text(text, 20);
        assert_eq!(
            chunks,
            vec!["Pierwsze zdanie.", "Drugie zdanie!", "Trzecie?"]
        );
    }

    #[test]
    fn every_chunk_respects_the_limit() {
        let text = "to jest bardzo długie zdanie bez żadnej interpunkcji które trzeba pociąć na kawałki przy spacjach żeby się zmieściło";
        let chunks = chunk_text(text, 30);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 30, "chunk over limit: {c:?}");
        }
        // Nothing lost: words survive the re-split.
        let rejoined = chunks.join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn unbroken_run_is_hard_split() {
        let text = "a".repeat(25);
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
    }

    #[test]
    fn whitespace_only_text_yields_no_chunks() {
        assert!(chunk_text("   \n ", MAX_CHUNK_CHARS).is_empty());
    }
}
