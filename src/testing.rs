//! Call-counting capability doubles shared by the unit tests.

use crate::error::Capability;
use crate::registry::ModelRegistry;
use crate::synthesis::{VoiceProfile, VoiceSynthesizer};
use crate::transcription::{ModelSize, Transcriber};
use crate::translation::Translator;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Create a small placeholder file and return its path.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"RIFF").unwrap();
    path
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct MockTranscriber {
    default: String,
    by_file: HashMap<String, String>,
    fail_files: Vec<String>,
    failure: Option<String>,
    load_delay: Duration,
    loads: AtomicUsize,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl MockTranscriber {
    pub fn with_default(text: &str) -> Self {
        Self {
            default: text.to_string(),
            by_file: HashMap::new(),
            fail_files: Vec::new(),
            failure: None,
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut mock = Self::with_default("");
        mock.failure = Some(message.to_string());
        mock
    }

    /// Return `text` for files named `name`.
    pub fn with_response(mut self, name: &str, text: &str) -> Self {
        self.by_file.insert(name.to_string(), text.to_string());
        self
    }

    /// Fail only for files named `name`.
    pub fn failing_for(mut self, name: &str) -> Self {
        self.fail_files.push(name.to_string());
        self
    }

    pub fn registry(self: &Arc<Self>) -> ModelRegistry<ModelSize, dyn Transcriber> {
        let mock = self.clone();
        ModelRegistry::with_loader(Capability::Transcription, move |_size: &ModelSize| {
            std::thread::sleep(mock.load_delay);
            mock.loads.fetch_add(1, Ordering::SeqCst);
            Ok(mock.clone() as Arc<dyn Transcriber>)
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// File names transcribed so far, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio_path: &Path) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = file_name(audio_path);
        self.seen.lock().unwrap().push(name.clone());

        if let Some(message) = &self.failure {
            anyhow::bail!("{}", message);
        }
        if self.fail_files.contains(&name) {
            anyhow::bail!("could not decode {}", name);
        }
        Ok(self.by_file.get(&name).cloned().unwrap_or_else(|| self.default.clone()))
    }
}

/// Translates "hola mundo" es→en to "hello world"; everything else is tagged.
pub struct MockTranslator {
    failure: Option<String>,
    fail_loads: bool,
    loads: AtomicUsize,
    calls: AtomicUsize,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self {
            failure: None,
            fail_loads: false,
            loads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut mock = Self::new();
        mock.failure = Some(message.to_string());
        mock
    }

    pub fn failing_loads(mut self) -> Self {
        self.fail_loads = true;
        self
    }

    pub fn registry(self: &Arc<Self>) -> ModelRegistry<String, dyn Translator> {
        let mock = self.clone();
        ModelRegistry::with_loader(Capability::Translation, move |key: &String| {
            mock.loads.fetch_add(1, Ordering::SeqCst);
            if mock.fail_loads {
                anyhow::bail!("weights for {} not found", key);
            }
            Ok(mock.clone() as Arc<dyn Translator>)
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for MockTranslator {
    fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            anyhow::bail!("{}", message);
        }
        match (text, source_lang, target_lang) {
            ("hola mundo", "es", "en") => Ok("hello world".to_string()),
            _ => Ok(format!("[{}->{}] {}", source_lang, target_lang, text)),
        }
    }
}

/// Writes a tiny file to the requested output path, or fails on demand.
pub struct MockSynthesizer {
    infer_failure: Option<String>,
    fail_loads: bool,
    load_delay: Duration,
    loads: Mutex<HashMap<VoiceProfile, usize>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            infer_failure: None,
            fail_loads: false,
            load_delay: Duration::ZERO,
            loads: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_infer(mut self, message: &str) -> Self {
        self.infer_failure = Some(message.to_string());
        self
    }

    pub fn failing_loads(mut self) -> Self {
        self.fail_loads = true;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn registry(self: &Arc<Self>) -> ModelRegistry<VoiceProfile, dyn VoiceSynthesizer> {
        let mock = self.clone();
        ModelRegistry::with_loader(Capability::Synthesis, move |profile: &VoiceProfile| {
            std::thread::sleep(mock.load_delay);
            *mock.loads.lock().unwrap().entry(*profile).or_insert(0) += 1;
            if mock.fail_loads {
                anyhow::bail!("checkpoint for {} missing", profile);
            }
            Ok(mock.clone() as Arc<dyn VoiceSynthesizer>)
        })
    }

    pub fn loads_for(&self, profile: VoiceProfile) -> usize {
        self.loads.lock().unwrap().get(&profile).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(reference_text, generated_text)` per call.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

impl VoiceSynthesizer for MockSynthesizer {
    fn infer(&self, _ref_audio: &Path, ref_text: &str, gen_text: &str, output_path: &Path) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((ref_text.to_string(), gen_text.to_string()));
        if let Some(message) = &self.infer_failure {
            anyhow::bail!("{}", message);
        }
        std::fs::write(output_path, gen_text.as_bytes())?;
        Ok(())
    }
}
