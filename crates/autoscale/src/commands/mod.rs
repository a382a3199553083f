//! Command implementations

pub mod service;
