pub mod config;
pub mod dependencies;
pub mod error;
pub mod imports;
pub mod inspector;
pub mod logging;
pub mod mapper;
pub mod model;
pub mod project;
pub mod slicer;
pub mod text;
