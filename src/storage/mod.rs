mod assets;
mod boards;
pub mod db;
pub mod models;
mod tables;

pub use assets::Admission;
pub use db::{Database, DatabaseError};
pub use tables::*;
