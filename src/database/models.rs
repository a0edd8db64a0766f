// src/database/models.rs
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct VesselRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrackRow {
    pub vessel_id: i64,
    pub time: DateTime<Utc>,
    pub lon: f64,
    pub lat: f64,
}
