// src/handlers/mod.rs
pub mod photo;
pub mod serve;
