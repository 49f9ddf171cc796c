//! OTel-native metrics instruments.
//!
//! Instruments are lazily initialized and only exist with the `otel`
//! feature. The `record_*` helpers compile to nothing without it.
//!
//! Naming follows OTel semantic conventions (dot-separated).

#[cfg(feature = "otel")]
mod instruments {
    use std::sync::LazyLock;

    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};

    static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("user_service"));

    /// Fan-out publish attempts, per target queue and outcome.
    pub static FANOUT_PUBLISH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("user_service.fanout.publish.total")
            .with_description("Total fan-out publish attempts")
            .build()
    });

    /// Reply fragments dropped, per reason.
    pub static FRAGMENT_DISCARDED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("user_service.fragment.discarded.total")
            .with_description("Total reply fragments discarded")
            .build()
    });

    /// Correlations reaching a terminal status, per status.
    pub static CORRELATION_TERMINAL_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("user_service.correlation.terminal.total")
            .with_description("Total correlations settled")
            .build()
    });
}

#[cfg(feature = "otel")]
pub use instruments::*;

#[cfg(feature = "otel")]
fn attr(key: &'static str, value: &str) -> opentelemetry::KeyValue {
    opentelemetry::KeyValue::new(key, value.to_string())
}

pub fn record_publish(queue: &str, ok: bool) {
    #[cfg(feature = "otel")]
    FANOUT_PUBLISH_TOTAL.add(
        1,
        &[
            attr("queue", queue),
            attr("outcome", if ok { "success" } else { "error" }),
        ],
    );
    #[cfg(not(feature = "otel"))]
    let _ = (queue, ok);
}

pub fn record_discard(reason: &str) {
    #[cfg(feature = "otel")]
    FRAGMENT_DISCARDED_TOTAL.add(1, &[attr("reason", reason)]);
    #[cfg(not(feature = "otel"))]
    let _ = reason;
}

pub fn record_terminal(status: &str) {
    #[cfg(feature = "otel")]
    CORRELATION_TERMINAL_TOTAL.add(1, &[attr("status", status)]);
    #[cfg(not(feature = "otel"))]
    let _ = status;
}
