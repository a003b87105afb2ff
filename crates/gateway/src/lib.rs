pub mod api;
pub mod bootstrap;
pub mod channel;
pub mod cli;
pub mod state;
