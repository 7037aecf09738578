pub mod kalshi;
pub mod store;
pub mod types;
pub mod yahoo;
