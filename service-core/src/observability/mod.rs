pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::render_metrics;
