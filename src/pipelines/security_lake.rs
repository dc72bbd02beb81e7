//! SQS to Security Lake: OCSF records written as Parquet objects

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::collaborators::ObjectMetadata;
use crate::context::RelayContext;
use crate::dispatch::parquet_objects::{encode_rows, plan_objects};
use crate::error_handling::{RelayError, RelayResult};
use crate::flow_logs;
use crate::handler::{
    self, RecordProcessor, Rejection, SqsBatchResponse, SqsEvent, SqsRecord, Submission,
};
use crate::normalizer::NormalizedEvent;
use crate::ocsf::{map_event, OcsfRecord};
use crate::repair;

pub struct SecurityLakeProcessor<'a> {
    ctx: &'a RelayContext,
}

impl<'a> SecurityLakeProcessor<'a> {
    pub fn new(ctx: &'a RelayContext) -> Self {
        Self { ctx }
    }
}

/// Flow-log documents expand to one event per tuple, sharing the envelope metadata
fn expand_flow_logs(event: NormalizedEvent) -> Vec<NormalizedEvent> {
    if !flow_logs::is_flow_log(&event.event_data) {
        return vec![event];
    }
    let expanded = flow_logs::expand(&event.event_data);
    debug!(tuples = expanded.len(), "expanded flow-log document");
    expanded
        .into_iter()
        .map(|event_data| NormalizedEvent {
            event_data,
            event_metadata: event.event_metadata.clone(),
            processing_metadata: event.processing_metadata.clone(),
        })
        .collect()
}

#[async_trait]
impl<'a> RecordProcessor for SecurityLakeProcessor<'a> {
    type Parsed = Vec<NormalizedEvent>;
    type Prepared = OcsfRecord;

    fn name(&self) -> &'static str {
        "security_lake"
    }

    fn parse(&self, record: &SqsRecord) -> RelayResult<Vec<NormalizedEvent>> {
        let value = repair::repair(&record.body)
            .map_err(|e| RelayError::repair("queue body is not JSON after repair", e))?;
        let event = self.ctx.normalizer.from_parsed_body(value);
        Ok(expand_flow_logs(event))
    }

    fn validate(&self, events: Vec<NormalizedEvent>) -> RelayResult<Vec<OcsfRecord>> {
        events
            .iter()
            .map(|event| {
                let template = self.ctx.templates.select(&event.to_value())?;
                map_event(template, event)
            })
            .collect()
    }

    async fn submit(&self, items: Vec<Submission<OcsfRecord>>) -> RelayResult<Vec<Rejection>> {
        let config = &self.ctx.config;
        let bucket = config.require_security_lake_bucket()?;
        let store = self.ctx.object_store()?;

        let records = items.into_iter().map(|s| (s.item_identifier, s.item)).collect();
        let plans = plan_objects(
            records,
            &config.security_lake_prefix,
            &config.account_id_path,
            &config.source_account_id,
            config.max_rows_per_file,
        );

        let mut rejections = Vec::new();
        for plan in plans {
            let written = match encode_rows(&plan.rows) {
                Ok(body) => {
                    let mut metadata = ObjectMetadata::new();
                    metadata.insert("record-count".to_string(), plan.rows.len().to_string());
                    metadata.insert("account-id".to_string(), plan.partition.account_id.clone());
                    metadata.insert("event-day".to_string(), plan.partition.event_day.clone());
                    metadata.insert("source".to_string(), config.source_name.clone());
                    store.put_object(bucket, &plan.key, body, metadata).await
                }
                Err(e) => Err(e),
            };

            match written {
                Ok(()) => {
                    info!(key = %plan.key, rows = plan.rows.len(), "wrote Security Lake object")
                }
                Err(e) => {
                    error!(
                        key = %plan.key,
                        rows = plan.rows.len(),
                        "Failed to write Security Lake object: {}",
                        e
                    );
                    rejections.extend(plan.tags.into_iter().map(|id| Rejection::new(id, &e)));
                }
            }
        }
        Ok(rejections)
    }
}

pub async fn handle(ctx: &RelayContext, event: &SqsEvent) -> SqsBatchResponse {
    handler::handle(&SecurityLakeProcessor::new(ctx), event).await
}
