// Library for tests to access modules

pub mod aggregation;
pub mod config;
pub mod differ;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod report;
pub mod rollup;
pub mod routes;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod whitelist;
