// ABOUTME: Library module for schema-zip-exporter
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod archive;
pub mod commands;
pub mod config;
pub mod export;
pub mod postgres;
pub mod server;
pub mod source;
pub mod upload;
pub mod utils;
