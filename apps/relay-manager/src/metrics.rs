use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use relay_proto::AckErrorCode;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static BOOT_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new("relay_manager_boot_total", "relay manager boots"))
        .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SESSIONS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "relay_sessions_created_total",
        "extension sessions created",
    ))
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SESSIONS_CLOSED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "relay_sessions_closed_total",
        "extension sessions closed",
    ))
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SESSIONS_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("relay_sessions_open", "extension sessions not yet closed").unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static COMMANDS_REGISTERED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "relay_commands_registered_total",
            "command envelopes processed by outcome",
        ),
        &["outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PROTOCOL_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "relay_protocol_rejections_total",
            "commands and acks refused by error code",
        ),
        &["code"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static COMMAND_ACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "relay_command_acks_total",
            "terminal acknowledgments recorded by status",
        ),
        &["status"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static EVENTS_TRIMMED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "relay_events_trimmed_total",
        "session events dropped from full logs",
    ))
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn record_rejection(code: &AckErrorCode) {
    let label = match code {
        AckErrorCode::Protocol(code) => code.as_str(),
        AckErrorCode::Runtime(_) => "runtime",
    };
    PROTOCOL_REJECTIONS.with_label_values(&[label]).inc();
}

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}
