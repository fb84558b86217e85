//! Creative Text Studio: pick a model, tune sampling, enter a prompt and get
//! generated text rendered according to what the prompt asks for.

pub mod backend;
pub mod config;
pub mod error;
pub mod invoker;
pub mod presenter;
pub mod provider;
pub mod repl;
pub mod request;
pub mod resolver;
pub mod session;
pub mod system_resources;
pub mod ui;

pub mod attention;
pub mod common;
pub mod linear;
pub mod mlp;
pub mod model;
pub mod sampling;
pub mod text_generator;
pub mod tokenizer;
