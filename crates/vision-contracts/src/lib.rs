pub mod events;
pub mod models;
pub mod samples;
pub mod session;
pub mod settings;
