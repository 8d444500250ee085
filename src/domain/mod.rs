pub mod error;
pub mod models;
pub mod parameters;
pub mod registry;
pub mod settings;
pub mod smoothing;
