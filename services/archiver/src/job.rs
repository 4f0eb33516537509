use crate::executor::{ArchivalExecutor, ReconcileReport};
use crate::scanner::ArchivalScanner;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument};
use tweet_storage::PartitionCount;

/// Result of one job invocation, shaped like a function-trigger response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub status_code: u16,
    pub body: String,
}

impl JobResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

#[derive(Debug, Serialize)]
struct PartitionFailure {
    partition: String,
    error: String,
}

/// One archival pass over every over-threshold partition
pub struct ArchivalJob {
    scanner: ArchivalScanner,
    executor: ArchivalExecutor,
    threshold: i64,
    partition_concurrency: usize,
}

impl ArchivalJob {
    pub fn new(
        scanner: ArchivalScanner,
        executor: ArchivalExecutor,
        threshold: i64,
        partition_concurrency: usize,
    ) -> Self {
        Self {
            scanner,
            executor,
            threshold,
            partition_concurrency: partition_concurrency.max(1),
        }
    }

    /// Scan, then reconcile each partition down to the threshold.
    ///
    /// A failing partition does not stop the others; any failure turns the
    /// response into a 500.
    #[instrument(skip(self), fields(threshold = self.threshold))]
    pub async fn run(&self) -> JobResponse {
        let partitions = match self.scanner.find_over_threshold(self.threshold).await {
            Ok(partitions) => partitions,
            Err(e) => {
                error!(error = %e, "Count scan failed");
                return response(
                    500,
                    json!({ "message": "Archival failed", "error": e.to_string() }),
                );
            }
        };

        let results: Vec<(PartitionCount, Result<ReconcileReport, String>)> =
            stream::iter(partitions)
                .map(|count| async move {
                    let excess = count.item_count - self.threshold;
                    let result = self
                        .executor
                        .reconcile(&count.partition, excess)
                        .await
                        .map_err(|e| e.to_string());
                    (count, result)
                })
                .buffered(self.partition_concurrency)
                .collect()
                .await;

        let mut archived = Vec::new();
        let mut failures = Vec::new();
        for (count, result) in results {
            match result {
                Ok(report) => archived.push(report),
                Err(e) => {
                    error!(partition = %count.partition, error = %e, "Partition archival failed");
                    failures.push(PartitionFailure {
                        partition: count.partition.to_string(),
                        error: e,
                    });
                }
            }
        }

        let rows: usize = archived.iter().map(|r| r.rows_archived).sum();
        info!(
            partitions = archived.len(),
            failures = failures.len(),
            rows_archived = rows,
            "Archival run finished"
        );

        if failures.is_empty() {
            response(
                200,
                json!({
                    "message": "Archival complete",
                    "threshold": self.threshold,
                    "rowsArchived": rows,
                    "partitions": archived,
                }),
            )
        } else {
            response(
                500,
                json!({
                    "message": "Archival failed",
                    "threshold": self.threshold,
                    "partitions": archived,
                    "failures": failures,
                }),
            )
        }
    }
}

fn response(status_code: u16, body: serde_json::Value) -> JobResponse {
    JobResponse {
        status_code,
        body: body.to_string(),
    }
}
