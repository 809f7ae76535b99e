//! Core library modules for butterfly-access
//!
//! Leaf-first: `grid` and `search` are pure geometry, `routing` and `osrm`
//! talk to the routing engine, `worker` and `scheduler` run tiles, and
//! `aggregate` merges their rows. `engine` ties them together.

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod geojson;
pub mod grid;
pub mod model;
pub mod osrm;
pub mod routing;
pub mod scheduler;
pub mod search;
pub mod worker;
