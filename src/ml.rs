pub mod clustering;
pub mod correlation;
pub mod crs;
pub mod features;
pub mod linalg;
pub mod mixture;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod regression;
pub mod stats;
