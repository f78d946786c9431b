//! JSON-over-HTTP submission client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use smrt_core::SmrtError;
use smrt_fetch::{create_http_client, FetchConfig};
use tracing::{debug, warn};

use crate::{ClientConfig, Submission, SubmissionClient};

/// Posts indicators to `{remote}/indicators`
pub struct RestClient {
    client: Client,
    remote: String,
    token: Option<String>,
    user: Option<String>,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, SmrtError> {
        let remote = config
            .remote
            .as_deref()
            .map(|r| r.trim_end_matches('/').to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SmrtError::Config("rest client requires a remote".to_string()))?;

        let client = create_http_client(&FetchConfig {
            verify_ssl: config.verify_ssl,
            timeout_secs: config.timeout_secs,
            proxy: config.proxy.clone(),
            user_agent: Some(format!("smrt/{}", env!("CARGO_PKG_VERSION"))),
            ..FetchConfig::default()
        })?;

        Ok(Self {
            client,
            remote,
            token: config.token.clone(),
            user: config.user.clone(),
        })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.user, &self.token) {
            (Some(user), Some(token)) => request.basic_auth(user, Some(token)),
            (None, Some(token)) => request.header("Authorization", format!("Token token={token}")),
            _ => request,
        }
    }

    async fn failure_body(response: Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let body = body.trim();
        if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.chars().take(200).collect::<String>())
        }
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl SubmissionClient for RestClient {
    fn name(&self) -> &str {
        "rest"
    }

    async fn ping(&self, write: bool) -> Result<bool, SmrtError> {
        let url = format!("{}/ping", self.remote);
        let mut request = self.authorize(self.client.get(&url));
        if write {
            request = request.query(&[("write", "1")]);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(SmrtError::Timeout(format!("ping {url}"))),
            Err(e) => {
                warn!("Ping to {} failed: {}", url, e);
                return Ok(false);
            }
        };

        let status = response.status();
        if is_auth_failure(status) {
            return Err(SmrtError::Auth(Self::failure_body(response).await));
        }

        debug!("Ping {} -> {}", url, status);
        Ok(status.is_success())
    }

    async fn indicators_create(&self, submission: Submission<'_>) -> Result<usize, SmrtError> {
        let url = format!("{}/indicators", self.remote);
        let request = self.authorize(self.client.post(&url));
        let request = match submission {
            Submission::Single(indicator) => request.json(indicator),
            Submission::Batch(batch) => request.json(batch),
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(SmrtError::Timeout(format!("POST {url}"))),
            Err(e) => return Err(SmrtError::submission_failed(e)),
        };

        let status = response.status();
        if is_auth_failure(status) {
            return Err(SmrtError::Auth(Self::failure_body(response).await));
        }
        if !status.is_success() {
            return Err(SmrtError::submission_failed(Self::failure_body(response).await));
        }

        debug!("Submitted {} indicator(s) to {}", submission.len(), url);
        Ok(submission.len())
    }
}
