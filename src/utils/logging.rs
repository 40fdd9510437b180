use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Instrumentation scope used for spans exported through OpenTelemetry.
const TRACER_NAME: &str = "tethermq";

/// Initialize tracing/logging for the application.
///
/// Console output is filtered by `default_level`. When a tracer provider is
/// given, every span is also bridged to OpenTelemetry regardless of the
/// console level so trace context keeps flowing through message headers.
pub fn init(default_level: &str, provider: Option<&SdkTracerProvider>) {
    let otel = provider.map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_NAME)));

    let fmt = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(parse_level(default_level));

    // try_init so tests and libraries can call this multiple times without panicking
    let _ = tracing_subscriber::registry().with(otel).with(fmt).try_init();
}

pub(crate) fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" | "warning" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}
