pub mod host;
pub mod service;
pub mod status;
pub mod upgrade;
