pub mod update;

pub use update::{UpdateGameCommand, UpdateGameError, UpdateGameResponse};
