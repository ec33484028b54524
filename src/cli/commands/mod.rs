pub mod admin;
pub mod automation;
pub mod migrate;
pub mod serve;
pub mod token;
