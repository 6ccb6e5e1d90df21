//! Background jobs for the league app: player rating aggregation and live game night reconciliation.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
