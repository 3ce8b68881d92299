//! Run-related API endpoints

use crate::KeelClient;
use crate::error::Result;
use keel_core::dto::run::{RunDetail, RunSummary};
use uuid::Uuid;

impl KeelClient {
    /// List runs, most recent first, optionally only those of one pipeline
    pub async fn list_runs(&self, pipeline: Option<&str>) -> Result<Vec<RunSummary>> {
        let response = self.list_runs_request(pipeline).send().await?;

        self.handle_response(response).await
    }

    fn list_runs_request(&self, pipeline: Option<&str>) -> reqwest::RequestBuilder {
        let url = format!("{}/runs", self.base_url);
        let request = self.client.get(&url);
        match pipeline {
            Some(pipeline) => request.query(&[("pipeline", pipeline)]),
            None => request,
        }
    }

    /// Get a run with its job results
    pub async fn get_run(&self, run_id: Uuid) -> Result<RunDetail> {
        let url = format!("{}/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a running run
    ///
    /// Fails with status 409 when the run has already finished.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<()> {
        let url = format!("{}/runs/{}/cancel", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
