pub mod config;
pub mod error;
pub mod game;
pub mod monster;
pub mod network;
pub mod protocol;
