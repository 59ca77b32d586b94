pub mod flush;
pub mod get;
pub mod refresh;
pub mod store;
