//! Game administration
//!
//! `POST /modify` patches the metadata of one yearly game.

pub mod commands;
pub mod routes;

pub use routes::games_routes;
