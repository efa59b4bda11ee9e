//! Library crate for bagtoss-back, exposing modules for binaries and tests.

pub mod capture;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod inference;
pub mod routes;
pub mod services;
pub mod state;
