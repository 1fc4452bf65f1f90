//! The ask pipeline: assemble → translate → complete → extract → translate
//! back → print → debug file → speech.
//!
//! Strictly sequential, single pass, no retries. All text transformations
//! finish before the first side effect; side effects run in a fixed order so
//! a synthesis failure still leaves the printed answer and the debug file
//! behind.

use anyhow::Context;

use crate::config::RunConfig;
use crate::progress::ConsoleProgress;
use crate::qa::{assemble_input, build_prompt, extract_answer};
use crate::translate::HttpTranslator;
use crate::tts::GoogleSpeech;

pub trait Translator {
    fn translate(&mut self, text: &str, source: &str, target: &str) -> anyhow::Result<String>;
}

pub trait Completer {
    fn complete(&mut self, prompt: &str) -> anyhow::Result<String>;
}

pub trait SpeechSynthesizer {
    fn synthesize(&mut self, text: &str, lang: &str) -> anyhow::Result<Vec<u8>>;
}

impl Translator for HttpTranslator {
    fn translate(&mut self, text: &str, source: &str, target: &str) -> anyhow::Result<String> {
        Ok(HttpTranslator::translate(self, text, source, target)?)
    }
}

impl Completer for crate::models::NativeCompletionModel {
    fn complete(&mut self, prompt: &str) -> anyhow::Result<String> {
        crate::models::NativeCompletionModel::complete(self, prompt)
    }
}

impl SpeechSynthesizer for GoogleSpeech {
    fn synthesize(&mut self, text: &str, lang: &str) -> anyhow::Result<Vec<u8>> {
        GoogleSpeech::synthesize(self, text, lang)
    }
}

pub struct AskPipeline {
    cfg: RunConfig,
    progress: ConsoleProgress,
}

impl AskPipeline {
    pub fn new(cfg: RunConfig, progress: ConsoleProgress) -> Self {
        Self { cfg, progress }
    }

    /// Run the whole pipeline for one query and return the final answer.
    pub fn run(
        &self,
        words: &[String],
        translator: &mut dyn Translator,
        completer: &mut dyn Completer,
        speech: &mut dyn SpeechSynthesizer,
    ) -> anyhow::Result<String> {
        let source = self.cfg.source_lang.as_str();
        let target = self.cfg.target_lang.as_str();

        let raw_input = assemble_input(words);

        self.progress.info(format!("Translate {source} -> {target}"));
        let question = translator
            .translate(&raw_input, source, target)
            .context("translate query")?;

        let prompt = build_prompt(&question);
        self.progress.info(format!(
            "Completion: {}",
            self.cfg.model_path.display()
        ));
        let completion = completer.complete(&prompt).context("model completion")?;
        let answer = extract_answer(&completion);

        self.progress.info(format!("Translate {target} -> {source}"));
        let final_answer = translator
            .translate(answer, target, source)
            .context("translate answer")?;

        println!("{final_answer}");

        // fs::write closes the handle before synthesis starts.
        std::fs::write(&self.cfg.debug_path, &final_answer)
            .with_context(|| format!("write debug file: {}", self.cfg.debug_path.display()))?;

        if self.cfg.speech_enabled {
            self.progress
                .info(format!("Speech synthesis ({})", self.cfg.speech_lang));
            let audio = speech
                .synthesize(&final_answer, &self.cfg.speech_lang)
                .context("speech synthesis")?;
            std::fs::write(&self.cfg.audio_path, audio)
                .with_context(|| format!("write audio file: {}", self.cfg.audio_path.display()))?;
            self.progress
                .info(format!("Saved {}", self.cfg.audio_path.display()));
        }

        Ok(final_answer)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use super::*;
    use crate::config::RunConfig;

    fn test_cfg(dir: &std::path::Path) -> RunConfig {
        RunConfig {
            config_path: None,
            model_path: PathBuf::from("model.gguf"),
            ctx_size: 2048,
            threads: -1,
            gpu_layers: -1,
            batch_size: None,
            max_tokens: 64,
            temperature: 0.8,
            top_p: 0.95,
            top_k: Some(40),
            repeat_penalty: Some(1.1),
            seed: 1234,
            stop: vec!["Q:".to_string()],
            translate_endpoint: "http://localhost".to_string(),
            api_key: None,
            source_lang: "pl".to_string(),
            target_lang: "en".to_string(),
            speech_endpoint: "http://localhost".to_string(),
            speech_lang: "pl".to_string(),
            audio_path: dir.join("file.mp3"),
            speech_enabled: true,
            debug_path: dir.join("debug.txt"),
        }
    }

    /// Stub translator: fixed pl->en and en->pl mappings, records inputs.
    struct StubTranslator {
        forward: Vec<(String, String)>,
        backward: Vec<(String, String)>,
        calls: Vec<(String, String, String)>,
    }

    impl StubTranslator {
        fn new() -> Self {
            Self {
                forward: Vec::new(),
                backward: Vec::new(),
                calls: Vec::new(),
            }
        }

        fn map(mut self, dir: &str, from: &str, to: &str) -> Self {
            let entry = (from.to_string(), to.to_string());
            match dir {
                "pl-en" => self.forward.push(entry),
                _ => self.backward.push(entry),
            }
            self
        }
    }

    impl Translator for StubTranslator {
        fn translate(&mut self, text: &str, source: &str, target: &str) -> anyhow::Result<String> {
            self.calls
                .push((text.to_string(), source.to_string(), target.to_string()));
            let table = if source == "pl" {
                &self.forward
            } else {
                &self.backward
            };
            Ok(table
                .iter()
                .find(|(from, _)| from == text)
                .map(|(_, to)| to.clone())
                .unwrap_or_else(|| text.to_string()))
        }
    }

    struct StubCompleter {
        completion: String,
        prompts: Vec<String>,
    }

    impl Completer for StubCompleter {
        fn complete(&mut self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.push(prompt.to_string());
            Ok(self.completion.clone())
        }
    }

    #[derive(Clone, Default)]
    struct SynthLog {
        calls: Rc<RefCell<Vec<(String, String)>>>,
        fail: bool,
    }

    impl SpeechSynthesizer for SynthLog {
        fn synthesize(&mut self, text: &str, lang: &str) -> anyhow::Result<Vec<u8>> {
            self.calls
                .borrow_mut()
                .push((text.to_string(), lang.to_string()));
            if self.fail {
                anyhow::bail!("synth down");
            }
            Ok(vec![0xff, 0xf3])
        }
    }

    fn words(ws: &[&str]) -> Vec<String> {
        ws.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn end_to_end_capital_of_france() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = test_cfg(tmp.path());
        let pipeline = AskPipeline::new(cfg, ConsoleProgress::new(false));

        let mut translator = StubTranslator::new()
            .map(
                "pl-en",
                "Jaka jest stolica Francji?",
                "What is the capital of France?",
            )
            .map("en-pl", "Paris.", "Paryż.");
        let mut completer = StubCompleter {
            completion: "Q: What is the capital of France? A: Paris.".to_string(),
            prompts: Vec::new(),
        };
        let mut synth = SynthLog::default();

        let answer = pipeline
            .run(
                &words(&["Jaka", "jest", "stolica", "Francji?"]),
                &mut translator,
                &mut completer,
                &mut synth,
            )
            .expect("pipeline run");

        assert_eq!(answer, "Paryż.");
        assert_eq!(
            completer.prompts,
            vec!["Q: What is the capital of France? A: ".to_string()]
        );
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("debug.txt")).expect("debug.txt"),
            "Paryż."
        );
        assert_eq!(
            synth.calls.borrow().as_slice(),
            &[("Paryż.".to_string(), "pl".to_string())]
        );
        assert!(tmp.path().join("file.mp3").exists());
    }

    #[test]
    fn completion_without_marker_is_passed_through() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pipeline = AskPipeline::new(test_cfg(tmp.path()), ConsoleProgress::new(false));

        let mut translator = StubTranslator::new();
        let mut completer = StubCompleter {
            completion: "I am not sure.".to_string(),
            prompts: Vec::new(),
        };
        let mut synth = SynthLog::default();

        let answer = pipeline
            .run(
                &words(&["Czy", "wiesz?"]),
                &mut translator,
                &mut completer,
                &mut synth,
            )
            .expect("pipeline run");

        assert_eq!(answer, "I am not sure.");
        // Back-translation saw the untouched completion.
        let back = translator.calls.last().expect("back-translate call");
        assert_eq!(back.0, "I am not sure.");
        assert_eq!((back.1.as_str(), back.2.as_str()), ("en", "pl"));
    }

    #[test]
    fn empty_cli_input_reaches_translator_unchanged() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pipeline = AskPipeline::new(test_cfg(tmp.path()), ConsoleProgress::new(false));

        let mut translator = StubTranslator::new();
        let mut completer = StubCompleter {
            completion: "A: ".to_string(),
            prompts: Vec::new(),
        };
        let mut synth = SynthLog::default();

        pipeline
            .run(&[], &mut translator, &mut completer, &mut synth)
            .expect("pipeline run");

        assert_eq!(
            translator.calls.first().map(|c| c.0.as_str()),
            Some(""),
            "raw input is passed through without validation"
        );
    }

    #[test]
    fn synthesis_failure_still_leaves_debug_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pipeline = AskPipeline::new(test_cfg(tmp.path()), ConsoleProgress::new(false));

        let mut translator = StubTranslator::new();
        let mut completer = StubCompleter {
            completion: "Q: q A: fine".to_string(),
            prompts: Vec::new(),
        };
        let mut synth = SynthLog {
            fail: true,
            ..SynthLog::default()
        };

        let err = pipeline
            .run(&words(&["pytanie"]), &mut translator, &mut completer, &mut synth)
            .expect_err("synthesis should fail");
        assert!(err.to_string().contains("speech synthesis"));

        assert_eq!(
            std::fs::read_to_string(tmp.path().join("debug.txt")).expect("debug.txt"),
            "fine"
        );
        assert!(!tmp.path().join("file.mp3").exists());
    }

    #[test]
    fn speech_can_be_disabled() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cfg = test_cfg(tmp.path());
        cfg.speech_enabled = false;
        let pipeline = AskPipeline::new(cfg, ConsoleProgress::new(false));

        let mut translator = StubTranslator::new();
        let mut completer = StubCompleter {
            completion: "Q: q A: ok".to_string(),
            prompts: Vec::new(),
        };
        let mut synth = SynthLog::default();

        pipeline
            .run(&words(&["pytanie"]), &mut translator, &mut completer, &mut synth)
            .expect("pipeline run");

        assert!(synth.calls.borrow().is_empty());
        assert!(!tmp.path().join("file.mp3").exists());
    }
}
