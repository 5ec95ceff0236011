//! Module for database repositories.
//!
//! Repositories encapsulate all persistence operations and keep SQL out of
//! the business-logic services.

pub mod user_repository;
