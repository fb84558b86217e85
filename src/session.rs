//! # Session
//!
//! One user action is one pass through `Session::run`: the current inputs are
//! frozen into a `SessionConfig`, validated into a request, resolved to a model
//! handle, generated and classified. Nothing in the chain panics on bad input;
//! every failure ends up in the returned `ActionReport`.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{BackendSpec, ModelChoice};
use crate::config::StudioConfig;
use crate::error::ActionError;
use crate::invoker;
use crate::presenter::{self, GenerationResult, RenderMode, Surface};
use crate::provider::LocalModelProvider;
use crate::request::{self, GenerationParameters};
use crate::resolver::ModelResolver;
use crate::system_resources::{DeviceMemory, MemorySnapshot};

pub const DEFAULT_PROMPT: &str = "AI:";
pub const PROMPT_PLACEHOLDER: &str = "Python function to calculate Fibonacci...\nMovie script about time travel...";
pub const CLEARED_MESSAGE: &str = "Memory cleared!";

pub const HELP_TEXT: &str = "\
Choose a model, tune the generation settings and enter a prompt.

- Fast: a small model that runs on any computer.
- High Quality: a much larger model loaded with 8-bit weights. Falls back to Fast if it cannot be loaded.
- Max Length counts the prompt and the continuation, in tokens.
- Temperature: lower is more focused, higher is more surprising.
- Top-K: only the K most likely tokens are considered at each step.
- The same seed with the same settings gives the same text.

Prompts mentioning python/function are shown as code, script/INT. as a script, \
haiku/sonnet as prose and song/[chords] as raw text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Poetry,
    Code,
    Script,
    Song,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::Poetry, Preset::Code, Preset::Script, Preset::Song];

    pub fn label(&self) -> &'static str {
        match self {
            Preset::Poetry => "Poetry",
            Preset::Code => "Code",
            Preset::Script => "Script",
            Preset::Song => "Song",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Preset::Poetry => "poetry",
            Preset::Code => "code",
            Preset::Script => "script",
            Preset::Song => "song",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Preset::Poetry => "Write a Shakespearean sonnet about space exploration:",
            Preset::Code => "Python function to reverse a string without using built-in functions:",
            Preset::Script => "INT. SPACESHIP COCKPIT - DAY\nCaptain stares at an alien planet on the viewscreen:",
            Preset::Song => "[G]Rock ballad about lost love\n[D]Verse 1:",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequirementRow {
    pub model: &'static str,
    pub ram: &'static str,
    pub accelerator: &'static str,
    pub recommendation: &'static str,
}

pub const REQUIREMENTS: [RequirementRow; 2] = [
    RequirementRow {
        model: "Fast",
        ram: "2GB+",
        accelerator: "Not required",
        recommendation: "Any computer",
    },
    RequirementRow {
        model: "High Quality",
        ram: "8GB+",
        accelerator: "Not required",
        recommendation: "16GB RAM workstation",
    },
];

/// The requirement table as aligned plain text.
pub fn requirements_table() -> String {
    let header = ["Model", "RAM", "Accelerator", "Recommendation"];
    let rows: Vec<[&str; 4]> = REQUIREMENTS
        .iter()
        .map(|r| [r.model, r.ram, r.accelerator, r.recommendation])
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: &[&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };
    let mut out = vec![line(&header)];
    out.push(widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-|-"));
    out.extend(rows.iter().map(line));
    out.join("\n")
}

/// The inputs of one action, frozen when the action starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub choice: ModelChoice,
    pub parameters: GenerationParameters,
    pub prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            choice: ModelChoice::Fast,
            parameters: GenerationParameters::default(),
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.prompt = preset.prompt().to_string();
        self
    }
}

/// A successful action.
#[derive(Debug, Clone)]
pub struct Generation {
    pub choice: ModelChoice,
    pub served_by: BackendSpec,
    /// True when `served_by` is not the backend configured for `choice`.
    pub fell_back: bool,
    pub parameters: GenerationParameters,
    pub mode: RenderMode,
    pub result: GenerationResult,
}

impl Generation {
    pub fn model_label(&self) -> String {
        if self.fell_back {
            format!("{} (served by {})", self.choice.label(), self.served_by.model_id)
        } else {
            self.choice.label().to_string()
        }
    }

    pub fn render(&self, surface: Surface) -> String {
        presenter::present(&self.result, self.mode, surface)
    }

    pub fn timing_caption(&self) -> String {
        presenter::timing_caption(self.result.elapsed, &self.model_label())
    }

    pub fn parameters_caption(&self) -> String {
        presenter::parameters_caption(&self.parameters)
    }
}

#[derive(Debug)]
pub struct ActionReport {
    pub request_id: Uuid,
    pub warnings: Vec<String>,
    /// Success messages, such as a completed high-quality load.
    pub info: Vec<String>,
    pub outcome: Result<Generation, ActionError>,
}

impl ActionReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearReport {
    pub released: usize,
    pub memory: MemorySnapshot,
}

impl ClearReport {
    pub fn message(&self) -> &'static str {
        CLEARED_MESSAGE
    }
}

#[derive(Clone)]
pub struct Session {
    resolver: Arc<ModelResolver>,
    memory: Arc<dyn DeviceMemory>,
}

impl Session {
    pub fn new(resolver: Arc<ModelResolver>, memory: Arc<dyn DeviceMemory>) -> Self {
        Self { resolver, memory }
    }

    /// A session over the local GPT-2 provider described by `config`.
    pub fn from_config(config: &StudioConfig, memory: Arc<dyn DeviceMemory>) -> Self {
        let provider = LocalModelProvider::new(config.models_dir.clone(), Arc::clone(&memory));
        let resolver = ModelResolver::new(Arc::new(provider), config.catalog());
        Self::new(Arc::new(resolver), memory)
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    /// Runs one action. Input is validated before any model is loaded.
    pub fn run(&self, config: &SessionConfig) -> ActionReport {
        let request_id = Uuid::new_v4();
        log::info!("[{}] {} action, prompt of {} chars", request_id, config.choice, config.prompt.len());

        let mut warnings = Vec::new();
        let mut info = Vec::new();
        let outcome = self.execute(config, &mut warnings, &mut info);
        match &outcome {
            Ok(generation) => log::info!("[{}] rendered as {}", request_id, generation.mode),
            Err(e) if e.is_user_error() => log::warn!("[{}] rejected: {}", request_id, e),
            Err(e) => log::error!("[{}] {}", request_id, e),
        }

        ActionReport {
            request_id,
            warnings,
            info,
            outcome,
        }
    }

    fn execute(
        &self,
        config: &SessionConfig,
        warnings: &mut Vec<String>,
        info: &mut Vec<String>,
    ) -> Result<Generation, ActionError> {
        let request = request::build(&config.prompt, config.parameters)?;

        let resolved = self.resolver.resolve(config.choice)?;
        warnings.extend(resolved.warnings);
        info.extend(resolved.info);
        let handle = resolved.handle;

        let result = invoker::generate(&handle, &request)?;
        let fell_back = handle.spec() != self.resolver.catalog().spec_for(config.choice);

        Ok(Generation {
            choice: config.choice,
            served_by: handle.spec().clone(),
            fell_back,
            parameters: request.parameters,
            mode: presenter::classify(request.prompt.as_str()),
            result,
        })
    }

    /// Drops every cached model and reports the memory state afterwards.
    pub fn clear_memory(&self) -> ClearReport {
        let released = self.resolver.clear();
        let memory = self.memory.release_cache();
        ClearReport { released, memory }
    }

    pub fn memory_snapshot(&self) -> MemorySnapshot {
        self.memory.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_prompts_classify_as_intended() {
        use crate::presenter::{classify, CodeLanguage};
        assert_eq!(classify(Preset::Poetry.prompt()), RenderMode::Prose);
        assert_eq!(classify(Preset::Code.prompt()), RenderMode::CodeBlock(CodeLanguage::Python));
        assert_eq!(classify(Preset::Script.prompt()), RenderMode::CodeBlock(CodeLanguage::PlainText));
        assert_eq!(classify(Preset::Song.prompt()), RenderMode::RawText);
    }

    #[test]
    fn test_preset_serde_names() {
        let preset: Preset = serde_json::from_str("\"song\"").unwrap();
        assert_eq!(preset, Preset::Song);
        for preset in Preset::ALL {
            assert_eq!(serde_json::to_string(&preset).unwrap(), format!("\"{}\"", preset.key()));
        }
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.prompt, "AI:");
        assert_eq!(config.choice, ModelChoice::Fast);
        assert_eq!(config.with_preset(Preset::Code).prompt, Preset::Code.prompt());
    }

    #[test]
    fn test_requirements_table() {
        let table = requirements_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Model"));
        assert!(lines[2].contains("2GB+") && lines[2].contains("Any computer"));
        assert!(lines[3].contains("High Quality") && lines[3].contains("16GB RAM workstation"));
    }
}
