pub mod cascade;
pub mod clients;
pub mod collectors;
pub mod commands;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod host_log;
pub mod orchestrator;
