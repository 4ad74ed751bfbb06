// Observability: metrics

pub mod metrics;

pub use metrics::init as init_metrics;
