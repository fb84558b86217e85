use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use creative_text_studio::backend::ModelChoice;
use creative_text_studio::config::StudioConfig;
use creative_text_studio::repl;
use creative_text_studio::request::{
    GenerationParameters, DEFAULT_MAX_LENGTH, DEFAULT_SEED, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};
use creative_text_studio::session::{requirements_table, Preset, Session, SessionConfig, HELP_TEXT};
use creative_text_studio::system_resources::SystemResources;
use creative_text_studio::ui::routes::run_server;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Prompt-driven text generation with local GPT-2 models", long_about = None)]
struct Cli {
    /// Studio configuration file (JSON). Defaults apply when omitted.
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding one sub-directory per model id.
    #[clap(long, global = true)]
    models_dir: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the web UI.
    Serve {
        #[clap(long)]
        host: Option<String>,
        #[clap(long)]
        port: Option<u16>,
    },
    /// Generate once and print the result.
    Generate {
        #[clap(long, conflicts_with = "preset", required_unless_present = "preset")]
        prompt: Option<String>,
        #[clap(long, value_enum)]
        preset: Option<Preset>,
        #[clap(flatten)]
        settings: SettingsArgs,
    },
    /// Interactive prompt loop.
    Repl {
        #[clap(flatten)]
        settings: SettingsArgs,
    },
    /// Print the help text and the hardware requirements.
    Requirements,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[clap(long, value_enum, default_value_t = ModelChoice::Fast)]
    model: ModelChoice,
    #[clap(long, default_value_t = DEFAULT_MAX_LENGTH)]
    max_length: usize,
    #[clap(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,
    #[clap(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
    #[clap(long, default_value_t = DEFAULT_SEED, allow_hyphen_values = true)]
    seed: i64,
}

impl SettingsArgs {
    fn session_config(&self, prompt: String) -> SessionConfig {
        SessionConfig {
            choice: self.model,
            parameters: GenerationParameters {
                max_length: self.max_length,
                temperature: self.temperature,
                top_k: self.top_k,
                seed: self.seed,
            },
            prompt,
        }
    }
}

fn build_session(config: &StudioConfig) -> Session {
    let resources = SystemResources::new();
    let memory = resources.refresh();
    log::info!(
        "Host: {} cores, {:.1} GB available of {:.1} GB",
        resources.cpu_core_count,
        memory.available_gb(),
        memory.total_gb()
    );
    Session::from_config(config, Arc::new(resources))
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = StudioConfig::load_or_default(cli.config.as_deref())?;
    if let Some(models_dir) = cli.models_dir {
        config.models_dir = models_dir;
    }

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let session = build_session(&config);
            actix_web::rt::System::new().block_on(run_server(session, &config.server))?;
        }
        Command::Generate { prompt, preset, settings } => {
            let prompt = match (prompt, preset) {
                (_, Some(preset)) => preset.prompt().to_string(),
                (Some(prompt), None) => prompt,
                (None, None) => return Err("either --prompt or --preset is required".into()),
            };
            let session = build_session(&config);
            let report = session.run(&settings.session_config(prompt));
            repl::write_report(&mut io::stdout().lock(), &report)?;
            if let Err(e) = report.outcome {
                return Err(Box::new(e));
            }
        }
        Command::Repl { settings } => {
            let session = build_session(&config);
            let initial = settings.session_config(String::new());
            repl::run(&session, initial, io::stdin().lock(), io::stdout().lock())?;
        }
        Command::Requirements => {
            println!("{}\n\n{}", HELP_TEXT, requirements_table());
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Application error: {}", e);
        let mut current_err: Option<&(dyn Error + 'static)> = e.source();
        while let Some(source) = current_err {
            eprintln!("Caused by: {}", source);
            current_err = source.source();
        }
        std::process::exit(1);
    }
}
