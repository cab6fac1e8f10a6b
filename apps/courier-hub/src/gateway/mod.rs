pub mod hub;
pub mod recent;
pub mod server;
pub mod session;
