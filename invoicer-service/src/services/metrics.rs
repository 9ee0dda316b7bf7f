//! Prometheus metrics for invoicer-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec,
};

/// Documents created by type (conversions included).
pub static DOCUMENTS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicer_documents_created_total",
        "Total number of documents created by type",
        &["document_type"]
    )
    .expect("Failed to register documents_created_total")
});

/// PDFs rendered by document type.
pub static PDF_RENDERED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicer_pdf_rendered_total",
        "Total number of rendered PDF documents",
        &["document_type"]
    )
    .expect("Failed to register pdf_rendered_total")
});

/// PDF render time.
pub static PDF_RENDER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicer_pdf_render_duration_seconds",
        "PDF render duration in seconds",
        &["document_type"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register pdf_render_duration")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicer_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicer_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DOCUMENTS_CREATED_TOTAL);
    Lazy::force(&PDF_RENDERED_TOTAL);
    Lazy::force(&PDF_RENDER_DURATION);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
///
/// HTTP metrics from service-core live in the same default registry.
pub fn get_metrics() -> String {
    service_core::observability::render_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_includes_service_metrics() {
        init_metrics();
        DOCUMENTS_CREATED_TOTAL
            .with_label_values(&["QUOTE"])
            .inc();

        let text = get_metrics();
        assert!(text.contains("invoicer_documents_created_total"));
    }
}
