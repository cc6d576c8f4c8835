//! Gitee REST client.
//!
//! [`GiteeClient`] lists the platform calls robots make; [`RestClient`] is
//! the reqwest-backed implementation against the v5 API. The access token is
//! read from a [`TokenGenerator`] on every request, so a rotated token takes
//! effect without rebuilding the client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::{
    event::{Label, User},
    secret::TokenGenerator,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRIES: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Errors returned by Gitee API calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gitee returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Gitee operations available to robots.
#[async_trait]
pub trait GiteeClient: Send + Sync {
    /// The account the token belongs to.
    async fn get_bot(&self) -> Result<User, ClientError>;

    async fn create_pr_comment(
        &self,
        org: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), ClientError>;

    async fn create_issue_comment(
        &self,
        org: &str,
        repo: &str,
        number: &str,
        body: &str,
    ) -> Result<(), ClientError>;

    async fn get_pr_labels(
        &self,
        org: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<Label>, ClientError>;

    async fn add_pr_labels(
        &self,
        org: &str,
        repo: &str,
        number: i64,
        labels: &[String],
    ) -> Result<(), ClientError>;

    async fn remove_pr_label(
        &self,
        org: &str,
        repo: &str,
        number: i64,
        label: &str,
    ) -> Result<(), ClientError>;
}

/// [`GiteeClient`] over the Gitee v5 REST API.
pub struct RestClient {
    http: Client,
    endpoint: Url,
    token: TokenGenerator,
    retries: u32,
}

impl RestClient {
    pub fn new(endpoint: &str, token: TokenGenerator) -> Result<Self, ClientError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
        }

        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            http,
            endpoint,
            token,
            retries: DEFAULT_RETRIES,
        })
    }

    /// Number of retries after a transport error or a 5xx response.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request, retrying transport failures and server errors with a
    /// linear backoff.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<Response, ClientError> {
        let url = self.url(segments)?;
        let max_attempts = self.retries.saturating_add(1);
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);

            let token = self.token.token();
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .query(&[("access_token", token.as_str())]);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempts < max_attempts {
                        tracing::warn!(
                            %status,
                            attempt = attempts,
                            max_attempts,
                            path = url.path(),
                            "gitee request failed, retrying"
                        );
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ClientError::Status {
                            status: status.as_u16(),
                            body,
                        });
                    }
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        error = %e,
                        attempt = attempts,
                        max_attempts,
                        path = url.path(),
                        "gitee request error, retrying"
                    );
                }
            }

            tokio::time::sleep(backoff(attempts)).await;
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let response = self.send(method, segments, body).await?;
        Ok(response.json().await?)
    }
}

/// Linear backoff after the given attempt, capped at [`MAX_BACKOFF`].
fn backoff(attempt: u32) -> Duration {
    BACKOFF_STEP.saturating_mul(attempt).min(MAX_BACKOFF)
}

#[async_trait]
impl GiteeClient for RestClient {
    async fn get_bot(&self) -> Result<User, ClientError> {
        self.send_json(Method::GET, &["user"], None).await
    }

    async fn create_pr_comment(
        &self,
        org: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<(), ClientError> {
        let number = number.to_string();
        self.send(
            Method::POST,
            &["repos", org, repo, "pulls", number.as_str(), "comments"],
            Some(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        org: &str,
        repo: &str,
        number: &str,
        body: &str,
    ) -> Result<(), ClientError> {
        self.send(
            Method::POST,
            &["repos", org, repo, "issues", number, "comments"],
            Some(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn get_pr_labels(
        &self,
        org: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<Label>, ClientError> {
        let number = number.to_string();
        self.send_json(
            Method::GET,
            &["repos", org, repo, "pulls", number.as_str(), "labels"],
            None,
        )
        .await
    }

    async fn add_pr_labels(
        &self,
        org: &str,
        repo: &str,
        number: i64,
        labels: &[String],
    ) -> Result<(), ClientError> {
        if labels.is_empty() {
            return Ok(());
        }

        let number = number.to_string();
        self.send(
            Method::POST,
            &["repos", org, repo, "pulls", number.as_str(), "labels"],
            Some(&json!(labels)),
        )
        .await?;
        Ok(())
    }

    async fn remove_pr_label(
        &self,
        org: &str,
        repo: &str,
        number: i64,
        label: &str,
    ) -> Result<(), ClientError> {
        let number = number.to_string();
        self.send(
            Method::DELETE,
            &["repos", org, repo, "pulls", number.as_str(), "labels", label],
            None,
        )
        .await?;
        Ok(())
    }
}
