mod config;
mod error;
mod state;
