pub mod client;
pub mod guest;
pub mod model;
