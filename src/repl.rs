//! Interactive terminal loop over a `Session`.
//!
//! Plain lines are prompts and generate at once. Lines starting with `:` are
//! commands: `:preset <name>` loads a canned prompt without generating,
//! `:go` generates the current prompt, and `:model`, `:set`, `:clear`,
//! `:help` and `:quit` do what they say.

use std::io::{self, BufRead, Write};

use clap::ValueEnum;

use crate::backend::ModelChoice;
use crate::presenter::Surface;
use crate::session::{requirements_table, ActionReport, Preset, Session, SessionConfig, HELP_TEXT};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Generate(String),
    GenerateCurrent,
    Preset(Preset),
    Model(ModelChoice),
    Set(Setting),
    Clear,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    MaxLength(usize),
    Temperature(f32),
    TopK(usize),
    Seed(i64),
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("'{}' is not a valid value for {}", value, name))
}

impl ReplCommand {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Result<ReplCommand, String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let Some(command) = trimmed.strip_prefix(':') else {
            return Some(Ok(ReplCommand::Generate(line.trim_end_matches(['\r', '\n']).to_string())));
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();
        let parsed = match (name, arg) {
            ("quit" | "q" | "exit", _) => Ok(ReplCommand::Quit),
            ("clear", _) => Ok(ReplCommand::Clear),
            ("go" | "generate", _) => Ok(ReplCommand::GenerateCurrent),
            ("help", _) => Ok(ReplCommand::Help),
            ("preset", Some(arg)) => Preset::from_str(arg, true).map(ReplCommand::Preset),
            ("model", Some(arg)) => ModelChoice::from_str(arg, true).map(ReplCommand::Model),
            ("set", Some(param)) => {
                let value = parts.next().unwrap_or_default();
                let setting = match param {
                    "max_length" | "max-length" => parse_value("max_length", value).map(Setting::MaxLength),
                    "temperature" => parse_value("temperature", value).map(Setting::Temperature),
                    "top_k" | "top-k" => parse_value("top_k", value).map(Setting::TopK),
                    "seed" => parse_value("seed", value).map(Setting::Seed),
                    other => Err(format!("Unknown setting '{}'", other)),
                };
                setting.map(ReplCommand::Set)
            }
            (other, _) => Err(format!("Unknown command ':{}'. Type :help for the list.", other)),
        };
        Some(parsed)
    }
}

/// Prints notices, the rendered output and the captions of one action.
pub fn write_report<W: Write>(out: &mut W, report: &ActionReport) -> io::Result<()> {
    for info in &report.info {
        writeln!(out, "{}", info)?;
    }
    for warning in &report.warnings {
        writeln!(out, "Warning: {}", warning)?;
    }
    match &report.outcome {
        Ok(generation) => {
            writeln!(out, "{}", generation.render(Surface::Terminal))?;
            writeln!(out)?;
            writeln!(out, "{}", generation.timing_caption())?;
            writeln!(out, "{}", generation.parameters_caption())?;
        }
        Err(e) if e.is_user_error() => writeln!(out, "Warning: {}", e)?,
        Err(e) => writeln!(out, "Error: {}", e)?,
    }
    Ok(())
}

fn apply(config: &mut SessionConfig, setting: Setting) {
    let params = &mut config.parameters;
    match setting {
        Setting::MaxLength(v) => params.max_length = v,
        Setting::Temperature(v) => params.temperature = v,
        Setting::TopK(v) => params.top_k = v,
        Setting::Seed(v) => params.seed = v,
    }
}

pub fn run<R: BufRead, W: Write>(
    session: &Session,
    mut config: SessionConfig,
    input: R,
    mut out: W,
) -> io::Result<()> {
    writeln!(out, "Creative Text Studio ({} model). Type :help for commands.", config.choice)?;
    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;

        let command = match ReplCommand::parse(&line) {
            None => continue,
            Some(Err(msg)) => {
                writeln!(out, "{}", msg)?;
                continue;
            }
            Some(Ok(command)) => command,
        };

        match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                writeln!(out, "{}\n\n{}", HELP_TEXT, requirements_table())?;
                writeln!(
                    out,
                    "\nCommands: :preset <poetry|code|script|song>, :go, :model <fast|high-quality>, \
                     :set <max_length|temperature|top_k|seed> <value>, :clear, :quit"
                )?;
            }
            ReplCommand::Clear => {
                let report = session.clear_memory();
                writeln!(
                    out,
                    "{} ({} model(s) released, {:.1} GB available)",
                    report.message(),
                    report.released,
                    report.memory.available_gb()
                )?;
            }
            ReplCommand::Model(choice) => {
                config.choice = choice;
                writeln!(out, "Model set to {}", choice)?;
            }
            ReplCommand::Set(setting) => {
                apply(&mut config, setting);
                // checked here so a bad value is reported before the next prompt
                match config.parameters.validate() {
                    Ok(()) => writeln!(out, "Updated: {:?}", setting)?,
                    Err(e) => writeln!(out, "Warning: {}", e)?,
                }
            }
            ReplCommand::Preset(preset) => {
                config = config.with_preset(preset);
                writeln!(out, "Prompt set to:\n{}", config.prompt)?;
            }
            ReplCommand::GenerateCurrent => {
                write_report(&mut out, &session.run(&config))?;
            }
            ReplCommand::Generate(prompt) => {
                config.prompt = prompt;
                write_report(&mut out, &session.run(&config))?;
            }
        }
    }
    writeln!(out, "Bye.")?;
    Ok(())
}
