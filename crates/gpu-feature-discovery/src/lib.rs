pub mod config;
pub mod daemon;
pub mod lm;
pub mod mig;
pub mod nvml;
pub mod output;
