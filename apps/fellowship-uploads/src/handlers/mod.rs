//! Request handlers

pub mod upload;
