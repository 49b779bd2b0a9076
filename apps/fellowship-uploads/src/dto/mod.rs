//! Request and response bodies

pub mod upload;
