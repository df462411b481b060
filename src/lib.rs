pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod metric;
pub mod poller;
pub mod services;
pub mod sink;
pub mod supervisor;
pub mod units;

#[cfg(test)]
pub mod test_support;
