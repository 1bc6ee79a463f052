//! # InSAR Common Library
//!
//! Shared code for the InSAR run engine:
//! - Error type
//! - Configuration loading
//! - Database bootstrap and schema
//! - Geometry primitives (projection, distances, envelope index)
//! - Point and building input records

pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod models;

pub use error::{Error, Result};
pub use models::{BuildingKey, BuildingRecord, BuildingSource, PointRecord};
