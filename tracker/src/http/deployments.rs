//! Deployment API client

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::channels::{push, PollSource, PushSource, PushStream};
use crate::errors::TrackerError;
use crate::http::client::{error_detail, HttpClient};
use crate::models::deployment::{
    DeployRequest, DeployResponse, JobStatus, Project, ProjectLogs, NO_LOGS_PLACEHOLDER,
};

impl HttpClient {
    /// Ask the service to build and deploy a repository.
    ///
    /// Any failure is reported as [`TrackerError::InitiationError`] carrying the
    /// service's error detail verbatim.
    pub async fn initiate_deploy(
        &self,
        request: &DeployRequest,
    ) -> Result<DeployResponse, TrackerError> {
        info!("Initiating deployment of {} as {}", request.git_url, request.project_id);

        self.post("/deploy", request).await.map_err(|e| match e {
            TrackerError::TransportError(detail) | TrackerError::NotFound(detail) => {
                TrackerError::InitiationError(detail)
            }
            other => TrackerError::InitiationError(other.to_string()),
        })
    }

    /// List the caller's projects
    pub async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        self.get("/projects/").await
    }

    /// Fetch the accumulated build log of a project
    pub async fn get_project_logs(&self, project_id: i64) -> Result<Option<String>, TrackerError> {
        let path = format!("/projects/{}/logs", project_id);
        let response: ProjectLogs = self.get(&path).await?;

        if response.logs.is_empty() || response.logs == NO_LOGS_PLACEHOLDER {
            return Ok(None);
        }
        Ok(Some(response.logs))
    }

    /// URL of the push stream for a job
    pub fn stream_url(&self, job_id: &str) -> Result<Url, TrackerError> {
        let mut url = Url::parse(&format!("{}/logs/stream/", self.base_url()))?;
        url.path_segments_mut()
            .map_err(|_| TrackerError::ConfigError("backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(job_id);

        let token = self.token().ok_or_else(|| {
            TrackerError::ConfigError("the build stream requires a token".to_string())
        })?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Open the server-sent event stream for a job
    pub async fn open_event_stream(&self, job_id: &str) -> Result<PushStream, TrackerError> {
        let url = self.stream_url(job_id)?;
        debug!("GET {}/logs/stream/{} (event stream)", self.base_url(), job_id);

        let response = self
            .stream_client()
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TrackerError::TransportError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::TransportError(error_detail(status, &body)));
        }

        Ok(push::event_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl PushSource for HttpClient {
    async fn open(&self, job_id: &str) -> Result<PushStream, TrackerError> {
        self.open_event_stream(job_id).await
    }
}

#[async_trait]
impl PollSource for HttpClient {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, TrackerError> {
        let project = self
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.name == job_id)
            .ok_or_else(|| TrackerError::NotFound(format!("project {}", job_id)))?;

        let raw_log = match self.get_project_logs(project.id).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Failed to fetch build logs for {}: {}", job_id, e);
                None
            }
        };

        Ok(JobStatus {
            status: project.status,
            domain: project.domain,
            raw_log,
        })
    }
}
