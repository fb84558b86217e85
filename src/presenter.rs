//! # Output Classifier/Presenter
//!
//! Picks a rendering mode from keywords in the prompt and renders a
//! `GenerationResult` with it. The keyword rules are an ordered substring
//! match and the first rule that matches wins, so a prompt that merely
//! mentions "function" is shown as code.

use std::fmt;
use std::time::Duration;

use crate::request::GenerationParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Python,
    PlainText,
}

impl CodeLanguage {
    pub fn tag(&self) -> &'static str {
        match self {
            CodeLanguage::Python => "python",
            CodeLanguage::PlainText => "plaintext",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    CodeBlock(CodeLanguage),
    Prose,
    RawText,
    GenericTextArea,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub generated_text: String,
    pub elapsed: Duration,
}

/// Where rendered output ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Html,
    Terminal,
}

pub fn classify(prompt: &str) -> RenderMode {
    let lower = prompt.to_lowercase();
    if lower.contains("python") || lower.contains("function") {
        RenderMode::CodeBlock(CodeLanguage::Python)
    } else if lower.contains("script") || prompt.contains("INT.") {
        RenderMode::CodeBlock(CodeLanguage::PlainText)
    } else if lower.contains("haiku") || lower.contains("sonnet") {
        RenderMode::Prose
    } else if lower.contains("song") || prompt.contains('[') {
        RenderMode::RawText
    } else {
        RenderMode::GenericTextArea
    }
}

pub fn present(result: &GenerationResult, mode: RenderMode, surface: Surface) -> String {
    match surface {
        Surface::Html => render_html(&result.generated_text, mode),
        Surface::Terminal => render_terminal(&result.generated_text, mode),
    }
}

fn render_html(text: &str, mode: RenderMode) -> String {
    match mode {
        RenderMode::CodeBlock(language) => format!(
            "<pre class=\"code-block\"><code class=\"language-{}\">{}</code></pre>",
            language.tag(),
            html_escape::encode_text(text)
        ),
        RenderMode::Prose => {
            let mut html = String::from("<div class=\"prose\">");
            for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
                let escaped = html_escape::encode_text(paragraph.trim());
                html.push_str(&format!("<p>{}</p>", escaped.replace('\n', "<br>")));
            }
            html.push_str("</div>");
            html
        }
        RenderMode::RawText => format!("<pre class=\"raw-text\">{}</pre>", html_escape::encode_text(text)),
        RenderMode::GenericTextArea => format!(
            "<label for=\"output\">Output</label>\
             <textarea id=\"output\" class=\"output-area\" style=\"height: 300px\" readonly>{}</textarea>",
            html_escape::encode_text(text)
        ),
    }
}

fn render_terminal(text: &str, mode: RenderMode) -> String {
    match mode {
        RenderMode::CodeBlock(language) => format!("```{}\n{}\n```", language.tag(), text),
        RenderMode::Prose | RenderMode::RawText => text.to_string(),
        RenderMode::GenericTextArea => format!("Output\n------\n{}", text),
    }
}

pub fn timing_caption(elapsed: Duration, model_label: &str) -> String {
    format!("Generated in {:.2} seconds | Model: {}", elapsed.as_secs_f64(), model_label)
}

pub fn parameters_caption(params: &GenerationParameters) -> String {
    format!(
        "Parameters: Temp={}, Top-K={}, Seed={}",
        params.temperature, params.top_k, params.seed
    )
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::CodeBlock(language) => write!(f, "code ({})", language.tag()),
            RenderMode::Prose => f.write_str("prose"),
            RenderMode::RawText => f.write_str("raw text"),
            RenderMode::GenericTextArea => f.write_str("text area"),
        }
    }
}
