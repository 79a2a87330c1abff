pub mod common;
pub mod composite;
pub mod config;
pub mod dataset;
pub mod illumination;
pub mod model;
pub mod objective;
pub mod params;
pub mod transform;
pub mod utils;
