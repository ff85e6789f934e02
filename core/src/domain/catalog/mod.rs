pub mod entities;
pub mod models;
pub mod ports;
pub mod services;
