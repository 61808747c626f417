//! Monitor scheduling and check execution engine.

pub mod checkers;
pub mod conditions;
pub mod config;
pub mod database;
pub mod maintenance;
pub mod monitoring;
pub mod notification;
pub mod pool;
