pub mod insecure;
pub mod metrics;
