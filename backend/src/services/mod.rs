//! Module for core business logic services.
//!
//! This module encapsulates services that perform specific business
//! operations and orchestrate interactions between repositories and the
//! credential/token utilities.

pub mod user_service;
