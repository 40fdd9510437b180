//! The `telemetry` module carries distributed-trace context across the broker.
//!
//! Spans are ordinary `tracing` spans; `tracing-opentelemetry` bridges them to
//! OpenTelemetry so their context can be injected into and extracted from
//! message headers with the globally installed text-map propagator.

pub mod carrier;

use std::fmt;

use opentelemetry::Context;
use opentelemetry::global;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Span;

use crate::broker::FieldTable;

pub use carrier::{TableCarrier, TableExtractor};

/// Value of the `messaging.system` span attribute.
pub const MESSAGING_SYSTEM: &str = "rabbitmq";

/// Installs the W3C trace-context propagator and an SDK tracer provider as
/// the process-wide defaults. The caller owns shutdown of the returned provider.
pub fn init_tracer_provider(service_name: &str) -> SdkTracerProvider {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let provider = SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();
    global::set_tracer_provider(provider.clone());
    provider
}

/// Writes `cx` into `headers` using the global propagator.
pub fn inject_context(cx: &Context, headers: &mut FieldTable) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut TableCarrier::new(headers));
    });
}

/// Reads a parent context from `headers` using the global propagator.
pub fn extract_context(headers: &FieldTable) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&TableExtractor::new(headers)))
}

/// Marks the span as failed. The span must declare `otel.status_code` and
/// `otel.status_message`.
pub(crate) fn record_error(span: &Span, err: &dyn fmt::Display) {
    span.record("otel.status_code", "ERROR");
    span.record("otel.status_message", tracing::field::display(err));
}

#[cfg(test)]
mod tests;
