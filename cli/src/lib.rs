//! A3S Mirror CLI - mirror release, operator and additional images.

pub mod commands;
