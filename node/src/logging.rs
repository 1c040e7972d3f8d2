//! Structured logging setup, following the teacher CLI's `init_tracing`
//! shape: an `EnvFilter` built from `RUST_LOG` (falling back to a
//! `--log-level` default) feeding a non-blocking file writer, plus our own
//! `AlertLayer` that mirrors >=WARN events out to webhook sinks (§7,
//! §SPEC_FULL 10.1/10.1.1). Log rotation policy and line formatting beyond
//! this are an external collaborator's concern (§1 non-goals) — we only
//! open one append-mode file via `tracing_appender::rolling::never`.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use ld_network::webhook::AlertSink;

pub struct LoggingHandles {
    _guard: WorkerGuard,
}

/// Installs the global subscriber. Returns a guard that must be held for
/// the process lifetime (dropping it stops the background flush thread).
pub fn init(log_level: &str, log_path: &std::path::Path, alerts: AlertTx) -> anyhow::Result<LoggingHandles> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},listd={log_level}")));

    let dir = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let file_name = log_path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_else(|| "listd.log".to_string());
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let fmt_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let alert_layer = AlertLayer { tx: alerts.0 };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(alert_layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(LoggingHandles { _guard: guard })
}

/// Channel handle handed to [`init`]; the receiving half is drained by
/// [`spawn_alert_forwarder`] into the configured webhook sinks.
#[derive(Clone)]
pub struct AlertTx(UnboundedSender<AlertMessage>);

pub struct AlertMessage {
    pub level: Level,
    pub text: String,
}

pub fn channel() -> (AlertTx, mpsc::UnboundedReceiver<AlertMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AlertTx(tx), rx)
}

/// Drains alert events into the fanout sink; spawned once at startup.
pub async fn spawn_alert_forwarder(
    mut rx: mpsc::UnboundedReceiver<AlertMessage>,
    sink: Arc<dyn AlertSink>,
    origin: String,
) {
    while let Some(msg) = rx.recv().await {
        sink.send(&origin, msg.level, &msg.text).await;
    }
}

struct AlertLayer {
    tx: UnboundedSender<AlertMessage>,
}

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return; // only WARN and ERROR are mirrored (§7)
        }
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        let _ = self.tx.send(AlertMessage {
            level,
            text: visitor.message,
        });
    }
}
