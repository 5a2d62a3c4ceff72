//! Webhook ingestion: envelope validation, JUnit enrichment, result storage and
//! reconciliation, shaped into transport-agnostic responses.

use crate::config::{Config, DEFAULT_MAX_JUNIT_XML_BYTES};
use crate::error::{Error, Result};
use crate::events::QualityEvent;
use crate::junit_xml::extract_test_result;
use crate::model::{EnrichedResult, ParsingSource, TestCaseResult, TestStatus};
use crate::reconcile::Reconciler;
use crate::webhook_store::WebhookResultStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Status code plus JSON body, independent of any HTTP framework.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A single-result envelope that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEnvelope {
    pub request_id: String,
    pub timestamp: String,
    pub result: TestCaseResult,
}

/// What the store accepted for one webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub request_id: String,
    pub storage_key: String,
    pub result: EnrichedResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummaryEntry {
    pub id: String,
    pub name: Option<String>,
    pub status: TestStatus,
    pub duration: Option<f64>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub request_id: String,
    pub total_tests: usize,
    /// Status wire name to count.
    pub summary: BTreeMap<String, usize>,
    pub test_cases: Vec<ExecutionSummaryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemError {
    pub index: usize,
    pub test_case_id: Option<String>,
    pub error: String,
}

/// Aggregate of a legacy multi-result delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub processed: usize,
    pub passed: usize,
    pub failed: usize,
    pub succeeded: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkOutcome {
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.succeeded == self.processed
    }
}

/// Check the single-result envelope shape and decode its result.
pub fn validate_envelope(payload: &Value) -> Result<ValidatedEnvelope> {
    let object = payload
        .as_object()
        .ok_or_else(|| Error::validation("payload must be a JSON object"))?;
    let request_id = required_request_id(object)?;

    let results = match object.get("results") {
        None | Some(Value::Null) => return Err(Error::validation("results is required")),
        Some(Value::Array(results)) => results,
        Some(_) => return Err(Error::validation("results must be an array")),
    };
    match results.len() {
        1 => {}
        0 => {
            return Err(Error::validation(
                "results must contain exactly 1 item, got 0",
            ));
        }
        n => {
            return Err(Error::validation(format!(
                "results must contain exactly 1 item, got {n}; send multi-result payloads to the bulk endpoint"
            )));
        }
    }

    let result = decode_result(&results[0])?;
    Ok(ValidatedEnvelope {
        request_id,
        timestamp: object
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        result,
    })
}

fn required_request_id(object: &Map<String, Value>) -> Result<String> {
    object
        .get("requestId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::validation("requestId is required"))
}

fn decode_result(item: &Value) -> Result<TestCaseResult> {
    let fields = item
        .as_object()
        .ok_or_else(|| Error::validation("each result must be a JSON object"))?;
    if fields
        .get("id")
        .and_then(Value::as_str)
        .is_none_or(str::is_empty)
    {
        return Err(Error::validation("result id is required"));
    }
    if fields.get("status").is_none_or(Value::is_null) {
        return Err(Error::validation("result status is required"));
    }
    serde_json::from_value(item.clone())
        .map_err(|err| Error::validation(format!("invalid result: {err}")))
}

/// Attach JUnit-derived details to `result` when it carries a usable report.
///
/// Parse failures and unmatched tests leave the result as delivered; only the
/// parsing source records what happened.
#[must_use]
pub fn enrich(result: TestCaseResult, max_junit_xml_bytes: usize) -> EnrichedResult {
    let xml = result
        .junit_xml
        .as_ref()
        .filter(|attachment| attachment.available)
        .and_then(|attachment| attachment.content.as_deref())
        .filter(|content| !content.trim().is_empty())
        .map(str::to_string);
    let Some(xml) = xml else {
        return EnrichedResult::plain(result, ParsingSource::None);
    };

    match extract_test_result(&xml, &result.id, max_junit_xml_bytes) {
        Ok(Some(extracted)) => {
            let mut enriched = EnrichedResult::plain(result, ParsingSource::JunitXml);
            if enriched.result.status == TestStatus::Unknown {
                enriched.result.status = extracted.status;
            }
            enriched.result.duration = Some(extracted.duration);
            enriched.result.logs = Some(extracted.logs);
            enriched.enhanced = true;
            enriched.framework = Some(extracted.framework);
            enriched.file = Some(extracted.file);
            enriched.raw_output = Some(extracted.raw_output);
            enriched.failure = extracted.failure;
            enriched
        }
        Ok(None) => {
            tracing::debug!(
                event = "webhook.junit_unmatched",
                test_case_id = %result.id,
                "No matching test in JUnit report; skipping enrichment"
            );
            EnrichedResult::plain(result, ParsingSource::None)
        }
        Err(err) => {
            tracing::warn!(
                event = "webhook.junit_parse_failed",
                test_case_id = %result.id,
                error = %err,
                "JUnit report could not be parsed; skipping enrichment"
            );
            EnrichedResult::plain(result, ParsingSource::JunitXmlError)
        }
    }
}

/// Validates, stores and reconciles webhook deliveries.
pub struct WebhookHandler {
    results: Arc<dyn WebhookResultStore>,
    reconciler: Arc<Reconciler>,
    max_junit_xml_bytes: usize,
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("reconciler", &self.reconciler)
            .field("max_junit_xml_bytes", &self.max_junit_xml_bytes)
            .finish_non_exhaustive()
    }
}

impl WebhookHandler {
    #[must_use]
    pub fn new(results: Arc<dyn WebhookResultStore>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            results,
            reconciler,
            max_junit_xml_bytes: DEFAULT_MAX_JUNIT_XML_BYTES,
        }
    }

    #[must_use]
    pub fn with_config(
        results: Arc<dyn WebhookResultStore>,
        reconciler: Arc<Reconciler>,
        config: &Config,
    ) -> Self {
        Self {
            max_junit_xml_bytes: config.max_junit_xml_bytes(),
            ..Self::new(results, reconciler)
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Validate and enrich one envelope, then store it. Nothing is
    /// reconciled here.
    pub fn store_test_case_webhook_result(&self, payload: &Value) -> Result<StoredResult> {
        let envelope = validate_envelope(payload)?;
        let enriched = enrich(envelope.result, self.max_junit_xml_bytes);
        let test_case_id = enriched.id().to_string();
        let status = enriched.result.status;
        let storage_key = self.results.put(&envelope.request_id, enriched.clone());

        tracing::debug!(
            event = "webhook.stored",
            request_id = %envelope.request_id,
            test_case_id = %test_case_id,
            storage_key = %storage_key,
            parsing_source = enriched.parsing_source.as_str(),
            "Stored webhook result"
        );
        self.reconciler
            .events()
            .publish(&QualityEvent::WebhookReceived {
                request_id: envelope.request_id.clone(),
                test_case_id,
                storage_key: storage_key.clone(),
                status,
            });

        Ok(StoredResult {
            request_id: envelope.request_id,
            storage_key,
            result: enriched,
        })
    }

    /// Full single-result path: store, reconcile, shape the response.
    ///
    /// A reconciliation failure is reported in the body (`reconciled: false`)
    /// but does not fail the delivery.
    pub fn handle(&self, payload: &Value) -> WebhookResponse {
        let stored = match self.store_test_case_webhook_result(payload) {
            Ok(stored) => stored,
            Err(err) => return error_response(&err, payload),
        };

        let (reconciled, change) = match self.reconciler.reconcile(&stored.result) {
            Ok(outcome) => (true, outcome.change.as_str()),
            Err(err) => {
                tracing::warn!(
                    event = "webhook.reconcile_failed",
                    request_id = %stored.request_id,
                    test_case_id = %stored.result.id(),
                    error = %err,
                    "Reconciliation failed; webhook result kept"
                );
                (false, "failed")
            }
        };

        let result = &stored.result;
        WebhookResponse {
            status: 200,
            body: json!({
                "success": true,
                "testCaseId": result.id(),
                "status": result.result.status,
                "storageKey": stored.storage_key,
                "enhanced": result.enhanced,
                "logsExtracted": result.has_logs(),
                "parsingSource": result.parsing_source,
                "reconciled": reconciled,
                "change": change,
            }),
        }
    }

    #[must_use]
    pub fn get_results_for_request(&self, request_id: &str) -> Vec<EnrichedResult> {
        self.results.results_for_request(request_id)
    }

    #[must_use]
    pub fn get_execution_summary(&self, request_id: &str) -> ExecutionSummary {
        let results = self.get_results_for_request(request_id);
        let mut summary = BTreeMap::new();
        for result in &results {
            *summary
                .entry(result.result.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        ExecutionSummary {
            request_id: request_id.to_string(),
            total_tests: results.len(),
            summary,
            test_cases: results
                .into_iter()
                .map(|result| ExecutionSummaryEntry {
                    id: result.result.id,
                    name: result.result.name,
                    status: result.result.status,
                    duration: result.result.duration,
                    received_at: result.received_at,
                })
                .collect(),
        }
    }

    /// Legacy multi-result path. Each element goes through [`Self::handle`]
    /// on its own, sequentially and in input order.
    pub fn process_test_results(&self, payload: &Value) -> Result<BulkOutcome> {
        let object = payload
            .as_object()
            .ok_or_else(|| Error::validation("payload must be a JSON object"))?;
        let request_id = required_request_id(object)?;
        let items = object
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation("results must be an array"))?;
        let timestamp = object.get("timestamp").cloned().unwrap_or(Value::Null);

        let mut outcome = BulkOutcome::default();
        for (index, item) in items.iter().enumerate() {
            outcome.processed += 1;
            match item.get("status").and_then(Value::as_str) {
                Some("Passed") => outcome.passed += 1,
                Some("Failed") => outcome.failed += 1,
                _ => {}
            }

            let single = json!({
                "requestId": request_id,
                "timestamp": timestamp,
                "results": [item],
            });
            let response = self.handle(&single);
            if response.is_success() {
                outcome.succeeded += 1;
            } else {
                outcome.errors.push(BulkItemError {
                    index,
                    test_case_id: item.get("id").and_then(Value::as_str).map(str::to_string),
                    error: response
                        .body
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }
        }

        tracing::info!(
            event = "webhook.bulk_processed",
            request_id = %request_id,
            processed = outcome.processed,
            succeeded = outcome.succeeded,
            "Processed bulk test results"
        );
        Ok(outcome)
    }
}

fn error_response(err: &Error, payload: &Value) -> WebhookResponse {
    let status = err.http_status();
    if status == 400 {
        tracing::debug!(event = "webhook.rejected", error = %err, "Rejected webhook payload");
        WebhookResponse {
            status,
            body: json!({ "error": err.to_string(), "received": payload }),
        }
    } else {
        tracing::warn!(event = "webhook.internal_error", error = %err, "Webhook handling failed");
        WebhookResponse {
            status,
            body: json!({ "error": err.to_string() }),
        }
    }
}
