use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cloudwatch::client::{ApiError, LogsApi};
use crate::cloudwatch::destination::Destination;
use crate::cloudwatch::queue::EventQueue;
use crate::cloudwatch::{LogEvent, MAX_BATCH_EVENTS};
use crate::config::FlowConfig;
use crate::receiver::{new_receiver, Receiver};
use crate::syslog::parser::SyslogParser;
use crate::syslog::{parser_for, Template};

/// One running pipeline: receiver -> convert -> driver. Shut down by
/// closing the receiver, which cascades through the channels until the
/// driver drains and exits.
pub struct Flow {
    name: String,
    receiver: Box<dyn Receiver>,
    driver: JoinHandle<()>,
}

impl Flow {
    pub async fn start(cfg: FlowConfig, api: Arc<dyn LogsApi>) -> anyhow::Result<Flow> {
        let parser = parser_for(&cfg.syslog_format)
            .with_context(|| format!("unknown syslog format {}", cfg.syslog_format))?;
        let template = Template::parse(&cfg.cloudwatch_format)
            .with_context(|| format!("bad cloudwatch format {}", cfg.cloudwatch_format))?;

        let mut receiver = new_receiver(&cfg.source)?;
        receiver.listen().await?;
        let raw = receiver.receive()?;

        let (events_tx, events_rx) = mpsc::channel(MAX_BATCH_EVENTS);
        tokio::spawn(convert(raw, parser, template, events_tx));

        let mut destination = Destination::new(cfg.group, cfg.stream, api);
        if let Err(err) = destination.refresh_token().await {
            warn!("{}: initial token refresh failed: {}", destination, err);
        }

        info!("flow {} started on {}", cfg.name, cfg.source);
        let driver = Driver {
            name: cfg.name.clone(),
            queue: EventQueue::new(cfg.queue_size),
            upload_delay: cfg.upload_delay,
        };
        let driver = tokio::spawn(driver.run(events_rx, destination));

        Ok(Flow {
            name: cfg.name,
            receiver,
            driver,
        })
    }

    /// Close the receiver and wait for the driver to drain.
    pub async fn shutdown(mut self) {
        self.receiver.close().await;
        if let Err(err) = self.driver.await {
            error!("flow {} driver failed: {}", self.name, err);
        } else {
            info!("flow {} drained", self.name);
        }
    }
}

/// Parse and render raw payloads. Anything that does not make it to a
/// valid event is dropped here.
async fn convert(
    mut raw: mpsc::Receiver<String>,
    parser: SyslogParser,
    template: Template,
    events: mpsc::Sender<LogEvent>,
) {
    while let Some(payload) = raw.recv().await {
        let message = match parser(&payload) {
            Ok(message) => message,
            Err(err) => {
                debug!("discarding datagram: {}", err);
                continue;
            }
        };
        let event = match template.render(&message) {
            Ok(text) => LogEvent {
                message: text,
                timestamp: message.timestamp.timestamp_millis(),
            },
            Err(err) => {
                debug!("discarding event: {}", err);
                continue;
            }
        };
        if let Err(err) = event.validate() {
            debug!("discarding event: {}", err);
            continue;
        }
        if !event.within_ingest_window(Utc::now().timestamp_millis()) {
            debug!("discarding event outside the accepted time window");
            continue;
        }
        if events.send(event).await.is_err() {
            break;
        }
    }
}

struct UploadDone {
    destination: Destination,
    batch: Vec<LogEvent>,
    result: Result<(), ApiError>,
}

struct Driver {
    name: String,
    queue: EventQueue,
    upload_delay: std::time::Duration,
}

impl Driver {
    /// The flow event loop: queue inbound events, start one upload per
    /// tick, apply upload results, drain after the inbound side closes.
    async fn run(mut self, mut events: mpsc::Receiver<LogEvent>, destination: Destination) {
        let mut destination = Some(destination);
        // First tick one period in, then periodic; ticks missed while an
        // upload is in flight are skipped, not queued.
        let mut ticker = interval_at(Instant::now() + self.upload_delay, self.upload_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inflight: Option<oneshot::Receiver<UploadDone>> = None;
        let mut open = true;

        loop {
            tokio::select! {
                inbound = events.recv(), if open => match inbound {
                    Some(event) => self.queue.add([event]),
                    None => open = false,
                },
                done = pending_upload(&mut inflight), if inflight.is_some() => {
                    inflight = None;
                    match done {
                        Ok(done) => {
                            destination = Some(self.apply_upload_result(done).await);
                        }
                        Err(_) => {
                            error!("flow {}: upload task dropped its result", self.name);
                            break;
                        }
                    }
                },
                _ = ticker.tick() => {
                    if inflight.is_none() && !self.queue.is_empty() {
                        if let Some(destination) = destination.take() {
                            inflight = Some(self.start_upload(destination));
                        }
                    }
                },
            }

            if !open && self.queue.is_empty() && inflight.is_none() {
                break;
            }
        }
    }

    fn start_upload(&mut self, mut destination: Destination) -> oneshot::Receiver<UploadDone> {
        let batch = self.queue.extract_batch();
        debug!(
            "flow {}: uploading {} events to {}",
            self.name,
            batch.len(),
            destination
        );
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = destination.upload(&batch).await;
            let _ = tx.send(UploadDone {
                destination,
                batch,
                result,
            });
        });
        rx
    }

    /// Map an upload outcome to one of: keep going, re-enqueue after
    /// recovery, or discard.
    async fn apply_upload_result(&mut self, done: UploadDone) -> Destination {
        let UploadDone {
            mut destination,
            batch,
            result,
        } = done;

        match result {
            Ok(()) => {
                debug!(
                    "flow {}: uploaded {} events to {}",
                    self.name,
                    batch.len(),
                    destination
                );
            }
            Err(ApiError::InvalidSequenceToken) => {
                warn!("{}: stale sequence token, refreshing", destination);
                if let Err(err) = destination.refresh_token().await {
                    warn!("{}: token refresh failed: {}", destination, err);
                }
                self.queue.add(batch);
                debug!(
                    "flow {}: {} events queued for retry",
                    self.name,
                    self.queue.len()
                );
            }
            Err(ApiError::ResourceNotFound) => {
                warn!("{}: group or stream missing, creating", destination);
                match destination.create().await {
                    Ok(()) => destination.clear_token(),
                    Err(err) => error!("{}: create failed: {}", destination, err),
                }
                self.queue.add(batch);
            }
            Err(err) => {
                error!(
                    "flow {}: dropping batch of {} events: {}",
                    self.name,
                    batch.len(),
                    err
                );
            }
        }
        destination
    }
}

async fn pending_upload(slot: &mut Option<oneshot::Receiver<UploadDone>>) -> Result<UploadDone, oneshot::error::RecvError> {
    match slot.as_mut() {
        Some(rx) => rx.await,
        // Guarded out by `if inflight.is_some()`.
        None => std::future::pending().await,
    }
}
