pub mod api;
pub mod backend;
pub mod events;
pub mod models;
