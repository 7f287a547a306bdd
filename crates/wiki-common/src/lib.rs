pub mod completion;
pub mod error;
pub mod model;
pub mod scoring;
pub mod usage;
pub mod wikipedia;
