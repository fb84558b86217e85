//! # User Interface Module
//!
//! The web front end: `page` renders the studio page and `routes` wires it
//! into an actix-web server.

pub mod page;
pub mod routes;
