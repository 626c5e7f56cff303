//! # Aetherium
//!
//! Backend for an AI-assisted writing editor.
//!
//! Authenticated clients send a fragment of their document together with a
//! task name. A router dispatches the task: either to a persona-scoped
//! language model, or through a vector memory of earlier passages so that
//! suggestions stay consistent with the rest of the book.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │   HTTP   │──▶│   Auth   │──▶│ Task Router │
//! │  (axum)  │   │  (JWT)   │   └──┬───────┬──┘
//! └──────────┘   └──────────┘      │       │
//!                                  ▼       ▼
//!                           ┌─────────┐ ┌─────┐
//!                           │ Memory  │ │ LLM │
//!                           │ SQLite  │ └─────┘
//!                           └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! aetherium init                              # create database
//! aetherium task save_to_memory "The sky is blue."
//! aetherium memory query "What color is the sky?"
//! aetherium serve                             # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`auth`] | Password hashing, bearer tokens, request extractor |
//! | [`users`] | Registration and credential checks |
//! | [`logs`] | Client event log |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`memory`] | Vector memory over SQLite |
//! | [`llm`] | Chat model clients |
//! | [`router`] | Task dispatch |
//! | [`task_cmd`] | One-shot CLI commands |
//! | [`server`] | HTTP server |

pub mod auth;
pub mod config;
pub mod db;
pub mod embedding;
pub mod llm;
pub mod logs;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod router;
pub mod server;
pub mod task_cmd;
pub mod users;
