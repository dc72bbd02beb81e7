//! Event Hub / Pub/Sub to SQS forwarding

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RelayContext;
use crate::dispatch::queue::{create_batch_entries, send_entries, FailedEntry};
use crate::error_handling::RelayResult;
use crate::normalizer::ProviderMessage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardReport {
    pub received: usize,
    /// Entry ids accepted by the queue
    pub sent: Vec<String>,
    pub failed: Vec<FailedEntry>,
    /// Highest sequence number with every earlier message delivered; safe to checkpoint
    pub checkpoint_sequence_number: Option<i64>,
}

/// Normalize `messages` and enqueue them in queue batches
pub async fn forward_events(
    ctx: &RelayContext,
    messages: &[ProviderMessage],
) -> RelayResult<ForwardReport> {
    let queue_url = ctx.config.require_queue_url()?;
    let queue = ctx.queue()?;

    let events: Vec<_> = messages.iter().map(|m| ctx.normalizer.normalize(m)).collect();
    let bodies: Vec<_> = events.iter().map(|e| e.to_value()).collect();
    let entries = create_batch_entries(&ctx.config.queue_id_prefix, &bodies);
    let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();

    let dispatch = send_entries(queue, queue_url, entries).await;

    // entries are numbered in message order, so the first failure bounds the checkpoint
    let checkpoint_sequence_number = ids
        .iter()
        .zip(&events)
        .take_while(|(id, _)| !dispatch.failed.iter().any(|f| &f.id == *id))
        .filter_map(|(_, event)| event.event_metadata.sequence_number)
        .max();

    info!(
        received = messages.len(),
        sent = dispatch.sent.len(),
        failed = dispatch.failed.len(),
        checkpoint = ?checkpoint_sequence_number,
        "forwarded provider events"
    );

    Ok(ForwardReport {
        received: messages.len(),
        sent: dispatch.sent,
        failed: dispatch.failed,
        checkpoint_sequence_number,
    })
}
