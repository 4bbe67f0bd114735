pub mod configuration;
pub mod dal;
pub mod domain;
pub mod queue;
pub mod services;
