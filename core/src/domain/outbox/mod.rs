pub mod dispatcher;
pub mod entities;
pub mod observer;
pub mod policy;
pub mod ports;
pub mod services;
