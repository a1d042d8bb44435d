pub mod config;
pub mod deploy;
pub mod error;
pub mod race;
pub mod store;
pub mod track;
