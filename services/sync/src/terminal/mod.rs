pub mod driver;
pub mod fetcher;
pub mod http;
pub mod models;
