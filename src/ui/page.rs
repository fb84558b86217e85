//! # Studio Page
//!
//! Renders the single studio page: the sidebar with model and generation
//! settings, the prompt area with presets, notices, the output and the
//! captions. All user text goes through `html_escape`.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::backend::ModelChoice;
use crate::presenter::Surface;
use crate::request::{MAX_LENGTH_RANGE, TEMPERATURE_RANGE, TOP_K_RANGE};
use crate::session::{Generation, Preset, SessionConfig, HELP_TEXT, PROMPT_PLACEHOLDER, REQUIREMENTS};
use crate::system_resources::MemorySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

impl NoticeLevel {
    fn class(&self) -> &'static str {
        match self {
            NoticeLevel::Success => "notice success",
            NoticeLevel::Warning => "notice warning",
            NoticeLevel::Error => "notice error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, text: text.into() }
    }
}

/// Everything one render of the page shows.
#[derive(Debug, Clone, Default)]
pub struct PageView<'a> {
    pub form: SessionConfig,
    pub notices: Vec<Notice>,
    pub generation: Option<&'a Generation>,
    pub memory: Option<MemorySnapshot>,
}

fn render_model_options(selected: ModelChoice) -> String {
    let mut html = String::new();
    for choice in ModelChoice::ALL {
        let checked = if choice == selected { " checked" } else { "" };
        html.push_str(&format!(
            "<label class=\"radio\"><input type=\"radio\" name=\"model\" value=\"{}\"{}> {}</label>",
            choice.key(),
            checked,
            choice.label()
        ));
    }
    html
}

fn render_settings(form: &SessionConfig) -> String {
    let p = &form.parameters;
    format!(
        "<aside class=\"sidebar\">\
         <h2>Model</h2>{models}\
         <h2>Settings</h2>\
         <label>Max Length <input type=\"number\" name=\"max_length\" min=\"{ml_min}\" max=\"{ml_max}\" value=\"{ml}\"></label>\
         <label>Temperature <input type=\"number\" name=\"temperature\" step=\"0.1\" min=\"{t_min}\" max=\"{t_max}\" value=\"{t}\"></label>\
         <label>Top-K <input type=\"number\" name=\"top_k\" min=\"{k_min}\" max=\"{k_max}\" value=\"{k}\"></label>\
         <label>Seed <input type=\"number\" name=\"seed\" value=\"{seed}\"></label>\
         <button type=\"submit\" formaction=\"/clear-cache\" class=\"secondary\">Clear Memory Cache</button>\
         </aside>",
        models = render_model_options(form.choice),
        ml_min = MAX_LENGTH_RANGE.start(),
        ml_max = MAX_LENGTH_RANGE.end(),
        ml = p.max_length,
        t_min = TEMPERATURE_RANGE.start(),
        t_max = TEMPERATURE_RANGE.end(),
        t = p.temperature,
        k_min = TOP_K_RANGE.start(),
        k_max = TOP_K_RANGE.end(),
        k = p.top_k,
        seed = p.seed,
    )
}

fn render_presets() -> String {
    let mut html = String::from("<div class=\"presets\">");
    for preset in Preset::ALL {
        html.push_str(&format!(
            "<button type=\"submit\" formaction=\"/preset/{}\" class=\"preset\">{}</button>",
            preset.key(),
            preset.label()
        ));
    }
    html.push_str("</div>");
    html
}

fn render_notices(notices: &[Notice]) -> String {
    notices
        .iter()
        .map(|n| format!("<div class=\"{}\">{}</div>", n.level.class(), encode_text(&n.text)))
        .collect()
}

fn render_generation(generation: &Generation) -> String {
    format!(
        "<section class=\"output\">{}<p class=\"caption\">{}</p><p class=\"caption\">{}</p></section>",
        generation.render(Surface::Html),
        encode_text(&generation.timing_caption()),
        encode_text(&generation.parameters_caption())
    )
}

fn render_help(memory: Option<MemorySnapshot>) -> String {
    let mut html = String::from("<details class=\"help\"><summary>Help</summary>");
    for paragraph in HELP_TEXT.split("\n\n") {
        html.push_str(&format!("<p>{}</p>", encode_text(paragraph).replace('\n', "<br>")));
    }
    html.push_str("<table class=\"requirements\"><thead><tr><th>Model</th><th>RAM</th><th>Accelerator</th><th>Recommendation</th></tr></thead><tbody>");
    for row in REQUIREMENTS.iter() {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.model, row.ram, row.accelerator, row.recommendation
        ));
    }
    html.push_str("</tbody></table>");
    if let Some(memory) = memory {
        html.push_str(&format!(
            "<p class=\"caption\">Host memory: {:.1} GB available of {:.1} GB</p>",
            memory.available_gb(),
            memory.total_gb()
        ));
    }
    html.push_str("</details>");
    html
}

pub fn render(view: &PageView) -> String {
    let body = format!(
        "<form method=\"post\" action=\"/generate\" class=\"studio\">\
         {settings}\
         <main>\
         <h1>Creative Text Studio</h1>\
         {notices}\
         <label for=\"prompt\">Prompt</label>\
         <textarea id=\"prompt\" name=\"prompt\" rows=\"6\" placeholder=\"{placeholder}\">{prompt}</textarea>\
         {presets}\
         <button type=\"submit\" class=\"primary\">Generate</button>\
         {output}\
         {help}\
         </main>\
         </form>",
        settings = render_settings(&view.form),
        notices = render_notices(&view.notices),
        placeholder = encode_double_quoted_attribute(PROMPT_PLACEHOLDER),
        prompt = encode_text(&view.form.prompt),
        presets = render_presets(),
        output = view.generation.map(render_generation).unwrap_or_default(),
        help = render_help(view.memory),
    );

    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>Creative Text Studio</title>\
         <link rel=\"stylesheet\" href=\"/static/style.css\"></head>\
         <body>{}</body></html>",
        body
    )
}
