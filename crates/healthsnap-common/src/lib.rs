//! Data model and pure helpers shared by the healthsnap crates: instance
//! records and snapshots, the aggregation reducer, the CSV encoder, and AWS
//! request signing.

pub mod aggregation;
pub mod credentials;
pub mod csv;
pub mod sigv4;
pub mod types;
