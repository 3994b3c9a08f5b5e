//! Visual block programs for robots.
//!
//! This crate turns per-model robot catalogs into palette blocks, compiles
//! block diagrams into executable scripts, runs them in an isolated
//! sandbox, and sends single actions to many selected robots at once.
//!
//! The binary `blocklink` lists palettes, compiles diagrams and previews
//! their execution from the command line.

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod model;
pub mod notice;
pub mod sandbox;
pub mod selection;
pub mod store;
pub mod studio;
