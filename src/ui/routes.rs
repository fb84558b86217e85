//! # Web Server Routes for the Studio UI
//!
//! Every form on the page posts the full set of settings, so each handler
//! rebuilds the page from the submitted values. Generation and cache clearing
//! block, so they run on actix's blocking pool.

use actix_files::Files;
use actix_web::http::StatusCode;
use actix_web::{error, web, App, Error, HttpRequest, HttpResponse, HttpServer, Responder};
use serde::Deserialize;

use crate::backend::ModelChoice;
use crate::config::ServerConfig;
use crate::request::GenerationParameters;
use crate::session::{Preset, Session, SessionConfig};
use crate::ui::page::{self, Notice, PageView};

pub struct AppState {
    pub session: Session,
}

/// The settings every form on the page submits.
#[derive(Debug, Clone, Deserialize)]
pub struct StudioForm {
    pub model: ModelChoice,
    pub max_length: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub seed: i64,
    #[serde(default)]
    pub prompt: String,
}

impl From<StudioForm> for SessionConfig {
    fn from(form: StudioForm) -> Self {
        SessionConfig {
            choice: form.model,
            parameters: GenerationParameters {
                max_length: form.max_length,
                temperature: form.temperature,
                top_k: form.top_k,
                seed: form.seed,
            },
            prompt: form.prompt,
        }
    }
}

fn html(status: StatusCode, view: &PageView) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(page::render(view))
}

pub async fn index() -> impl Responder {
    html(StatusCode::OK, &PageView::default())
}

/// Runs one generation. 200 on success, 400 when the input was rejected and
/// 500 when a model could not be loaded or generation failed.
pub async fn generate(state: web::Data<AppState>, form: web::Form<StudioForm>) -> Result<HttpResponse, Error> {
    let config = SessionConfig::from(form.into_inner());
    let session = state.session.clone();
    let action_config = config.clone();
    let report = web::block(move || session.run(&action_config))
        .await
        .map_err(error::ErrorInternalServerError)?;

    let mut notices: Vec<Notice> = report.info.iter().map(Notice::success).collect();
    notices.extend(report.warnings.iter().map(Notice::warning));
    let (status, generation) = match &report.outcome {
        Ok(generation) => (StatusCode::OK, Some(generation)),
        Err(e) if e.is_user_error() => {
            notices.push(Notice::warning(e.to_string()));
            (StatusCode::BAD_REQUEST, None)
        }
        Err(e) => {
            notices.push(Notice::error(e.to_string()));
            (StatusCode::INTERNAL_SERVER_ERROR, None)
        }
    };

    Ok(html(
        status,
        &PageView {
            form: config,
            notices,
            generation,
            memory: None,
        },
    ))
}

/// Replaces the prompt with a preset and re-renders; nothing is generated.
pub async fn preset(path: web::Path<Preset>, form: web::Form<StudioForm>) -> impl Responder {
    let config = SessionConfig::from(form.into_inner()).with_preset(path.into_inner());
    html(
        StatusCode::OK,
        &PageView {
            form: config,
            ..PageView::default()
        },
    )
}

pub async fn clear_cache(state: web::Data<AppState>, form: web::Form<StudioForm>) -> Result<HttpResponse, Error> {
    let session = state.session.clone();
    let report = web::block(move || session.clear_memory())
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(html(
        StatusCode::OK,
        &PageView {
            form: SessionConfig::from(form.into_inner()),
            notices: vec![Notice::success(report.message())],
            generation: None,
            memory: Some(report.memory),
        },
    ))
}

/// A form that does not parse (say `max_length=-5`) aborts the action but
/// still answers with the page and a warning.
fn form_error(err: error::UrlencodedError, _req: &HttpRequest) -> Error {
    let message = format!("Invalid settings: {}", err);
    log::warn!("{}", message);
    let response = html(
        StatusCode::BAD_REQUEST,
        &PageView {
            notices: vec![Notice::warning(message)],
            ..PageView::default()
        },
    );
    error::InternalError::from_response(err, response).into()
}

/// Registers the page routes. Static files are mounted by `run_server`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::FormConfig::default().error_handler(form_error))
        .route("/", web::get().to(index))
        .route("/generate", web::post().to(generate))
        .route("/preset/{preset}", web::post().to(preset))
        .route("/clear-cache", web::post().to(clear_cache));
}

pub async fn run_server(session: Session, server: &ServerConfig) -> std::io::Result<()> {
    let state = web::Data::new(AppState { session });
    let static_dir = server.static_dir.clone();
    log::info!("Starting server at http://{}:{}/", server.host, server.port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure)
            .service(Files::new("/static", static_dir.clone()))
    })
    .bind((server.host.as_str(), server.port))?
    .run()
    .await
}
