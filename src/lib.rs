//! Bulk importer for AIS vessel track files
//!
//! Reads directories of delimited position reports (timestamp, longitude,
//! latitude, vessel id, vessel name) and loads them into Postgres/PostGIS
//! as tracks and vessels.

pub mod config;
pub mod database;
pub mod errors;
pub mod gate;
pub mod models;
pub mod pipeline;
