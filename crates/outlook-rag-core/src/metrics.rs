use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};

struct RagMetrics {
    graph_runs: Counter<u64>,
    graph_duration_ms: Histogram<f64>,
    retrievals: Counter<u64>,
    retrieved_documents: Histogram<u64>,
}

static METRICS: OnceCell<RagMetrics> = OnceCell::new();

fn handles() -> &'static RagMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("outlook_rag");
        RagMetrics {
            graph_runs: meter
                .u64_counter("graph_runs_total")
                .with_description("Graph invocations by graph name and status")
                .init(),
            graph_duration_ms: meter
                .f64_histogram("graph_run_duration_ms")
                .with_description("Graph invocation latency in milliseconds")
                .init(),
            retrievals: meter
                .u64_counter("retrievals_total")
                .with_description("Vector searches by document type")
                .init(),
            retrieved_documents: meter
                .u64_histogram("retrieved_documents")
                .with_description("Documents returned per vector search")
                .init(),
        }
    })
}

/// Record a completed graph run (no-op if no provider installed).
pub fn record_graph_run(graph: &str, status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("graph", graph.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    metrics.graph_runs.add(1, &attrs);
    metrics.graph_duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_retrieval(doc_type: &str, documents: usize) {
    let metrics = handles();
    let attrs = [KeyValue::new("doc_type", doc_type.to_string())];
    metrics.retrievals.add(1, &attrs);
    metrics.retrieved_documents.record(documents as u64, &attrs);
}
