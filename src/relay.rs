//! Per-request log relay.
//!
//! While a request runs inside [`scope`], every `tracing` event it emits is also
//! written back on the reply channel as a `LOG` line tagged with the request id.

use std::fmt;
use std::future::Future;
use tokio::sync::mpsc::UnboundedSender;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::protocol::{LogLine, Outgoing};

tokio::task_local! {
    static RELAY: LogRelay;
}

/// Where a request's log lines go, and how chatty they are
#[derive(Debug, Clone)]
pub struct LogRelay {
    tx: UnboundedSender<Outgoing>,
    verbose: bool,
    id: Option<String>,
}

impl LogRelay {
    pub fn new(tx: UnboundedSender<Outgoing>, verbose: bool) -> Self {
        Self { tx, verbose, id: None }
    }

    pub fn for_request(&self, id: Option<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            verbose: self.verbose,
            id,
        }
    }

    /// Warnings and errors always; info only when verbose
    fn relays(&self, level: &Level) -> bool {
        *level <= Level::WARN || (self.verbose && *level == Level::INFO)
    }

    fn forward(&self, event: &Event<'_>) {
        let level = event.metadata().level();
        if !self.relays(level) {
            return;
        }
        let mut message = MessageVisitor::default();
        event.record(&mut message);
        let _ = self.tx.send(Outgoing::Log(LogLine {
            id: self.id.clone(),
            level: level.as_str().to_lowercase(),
            text: message.0,
            ts: chrono::Utc::now().timestamp_millis(),
        }));
    }
}

/// Run `future` with its log events relayed, or plainly when `relay` is `None`
pub async fn scope<F: Future>(relay: Option<LogRelay>, future: F) -> F::Output {
    match relay {
        Some(relay) => RELAY.scope(relay, future).await,
        None => future.await,
    }
}

/// Subscriber layer feeding events to the relay of the current request task
pub struct RelayLayer;

impl<S: Subscriber> Layer<S> for RelayLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let _ = RELAY.try_with(|relay| relay.forward(event));
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};
    use tracing_subscriber::layer::SubscriberExt;

    fn relayed(verbose: bool) -> Vec<LogLine> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay = LogRelay::new(tx, verbose).for_request(Some("m1".to_string()));
        let subscriber = tracing_subscriber::registry().with(RelayLayer);
        tracing::subscriber::with_default(subscriber, || {
            info!("before the request");
            RELAY.sync_scope(relay, || {
                debug!("chunk 3/12 stored");
                info!("Job {}: 2 track(s) from stream", "m1");
                warn!("stream 2 has no cues");
            });
            warn!("after the request");
        });

        let mut lines = Vec::new();
        while let Ok(Outgoing::Log(line)) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_verbose_relay_forwards_info_and_up() {
        let lines = relayed(true);
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Job m1: 2 track(s) from stream", "stream 2 has no cues"]);
        assert_eq!(lines[0].level, "info");
        assert!(lines.iter().all(|l| l.id.as_deref() == Some("m1")));
    }

    #[test]
    fn test_quiet_relay_forwards_warnings_only() {
        let lines = relayed(false);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, "warn");
    }
}
