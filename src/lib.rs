// src/lib.rs

pub mod api;
pub mod chat;
pub mod config;
pub mod llm;
pub mod server;
pub mod stream;
pub mod tools;
