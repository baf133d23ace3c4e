//! Library crate for wordmatch-back, exposing the match engine and its
//! collaborators for the console host and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
