//! Rust client for the tool gateway.

pub mod client;

pub use client::{
    ActionsClient, AddNote, CallOptions, CreateCase, EscalateCase, SdkError, ToolResult, UpdateCase,
};
