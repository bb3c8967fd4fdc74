pub mod actions;
pub mod artifact;
pub mod build_info;
pub mod id;
pub mod resources;
