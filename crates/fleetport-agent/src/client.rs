//! HTTP client for the control plane's agent endpoints.
//!
//! Every call carries the cached agent token. When the control plane rejects
//! it, the client registers again with its invite secret, persists the new
//! token and retries the call once.

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use fleetport_core::{
    HeartbeatRequest, RegisterRequest, RegisterResponse, TaskId, TaskReportRequest,
    TaskReportStatus, TaskView,
};

use crate::credentials::CredentialCache;
use crate::error::{AgentError, Result};

/// Client for the control plane REST API, authenticated as one agent.
pub struct ControlClient {
    http: Client,
    base_url: String,
    name: String,
    secret: String,
    cache: CredentialCache,
    token: RwLock<Option<String>>,
    reauth: tokio::sync::Mutex<()>,
}

impl ControlClient {
    /// Create a client, seeding the token from the credential cache.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        name: impl Into<String>,
        secret: impl Into<String>,
        cache: CredentialCache,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("http client: {e}")))?;
        let token = cache.load().map(|c| c.agent_token);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: name.into(),
            secret: secret.into(),
            cache,
            token: RwLock::new(token),
            reauth: tokio::sync::Mutex::new(()),
        })
    }

    /// Whether a token is currently cached.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    /// The currently cached token.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Exchange the invite secret for a fresh agent token and persist it.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailure` if the secret is rejected,
    /// `TransientNetwork` for transport or other HTTP failures, and
    /// `Credentials` if the token cannot be persisted.
    pub async fn register(&self) -> Result<RegisterResponse> {
        let response = self
            .http
            .post(self.url("/v1/agent/register"))
            .json(&RegisterRequest {
                name: self.name.clone(),
                secret: self.secret.clone(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AgentError::AuthenticationFailure(format!(
                "registration rejected for {}",
                self.name
            )));
        }
        let registered: RegisterResponse = check(response).await?.json().await?;

        self.cache
            .save(registered.agent_id, &registered.agent_token)?;
        *self.token.write() = Some(registered.agent_token.clone());

        tracing::info!(
            agent_id = %registered.agent_id,
            token = %redact(&registered.agent_token),
            "Registered with control plane"
        );

        Ok(registered)
    }

    async fn current_token(&self) -> Result<String> {
        if let Some(token) = self.token() {
            return Ok(token);
        }
        Ok(self.register().await?.agent_token)
    }

    /// Replace a rejected token.
    ///
    /// Concurrent callers that hit a 401 with the same token share one
    /// registration.
    async fn reauthenticate(&self, rejected: &str) -> Result<String> {
        let _guard = self.reauth.lock().await;

        if let Some(current) = self.token() {
            if current != rejected {
                return Ok(current);
            }
        }

        tracing::warn!(token = %redact(rejected), "Agent token rejected, re-registering");
        *self.token.write() = None;
        Ok(self.register().await?.agent_token)
    }

    async fn send_authed<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.current_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }

        let token = self.reauthenticate(&token).await?;
        let response = build(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AgentError::AuthenticationFailure(
                "token rejected after re-registration".to_string(),
            ));
        }
        check(response).await
    }

    // =========================================================================
    // Agent operations
    // =========================================================================

    /// Send a heartbeat with optional metrics.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::register`].
    pub async fn heartbeat(&self, metrics: HeartbeatRequest) -> Result<()> {
        let url = self.url("/v1/agent/heartbeat");
        self.send_authed(|token| self.http.post(&url).bearer_auth(token).json(&metrics))
            .await?;
        Ok(())
    }

    /// Fetch the tasks still waiting for this agent.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::register`].
    pub async fn poll_tasks(&self) -> Result<Vec<TaskView>> {
        let url = self.url("/v1/agent/tasks");
        let response = self
            .send_authed(|token| self.http.get(&url).bearer_auth(token))
            .await?;
        Ok(response.json().await?)
    }

    /// Report the outcome of a task.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::register`].
    pub async fn report_task(
        &self,
        task_id: TaskId,
        status: TaskReportStatus,
        message: Option<String>,
    ) -> Result<()> {
        let url = self.url(&format!("/v1/agent/tasks/{task_id}/report"));
        let body = TaskReportRequest { status, message };
        self.send_authed(|token| self.http.post(&url).bearer_auth(token).json(&body))
            .await?;
        Ok(())
    }
}

/// Map non-success, non-auth responses to `TransientNetwork`.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::TransientNetwork(format!("{status}: {body}")))
}

/// Short, log-safe form of a token.
pub(crate) fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetport_core::AgentId;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str, dir: &TempDir) -> ControlClient {
        ControlClient::new(
            base_url,
            "agent_x",
            "invite-secret",
            CredentialCache::new(dir.path().join("credentials.json")),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    fn registered(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"agent_id": 7, "agent_token": token}))
    }

    #[tokio::test]
    async fn register_persists_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/register"))
            .and(body_json(json!({"name": "agent_x", "secret": "invite-secret"})))
            .respond_with(registered("7:fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = client(&server.uri(), &dir);
        assert!(!client.has_token());

        let response = client.register().await.unwrap();
        assert_eq!(response.agent_id, AgentId::new(7));
        assert_eq!(client.token().as_deref(), Some("7:fresh"));

        let cached = CredentialCache::new(dir.path().join("credentials.json"))
            .load()
            .unwrap();
        assert_eq!(cached.agent_token, "7:fresh");
    }

    #[tokio::test]
    async fn rejected_token_triggers_one_reregistration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .and(header("authorization", "Bearer 7:stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .and(header("authorization", "Bearer 7:fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/register"))
            .respond_with(registered("7:fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        CredentialCache::new(dir.path().join("credentials.json"))
            .save(AgentId::new(7), "7:stale")
            .unwrap();
        let client = client(&server.uri(), &dir);
        assert_eq!(client.token().as_deref(), Some("7:stale"));

        client.heartbeat(HeartbeatRequest::default()).await.unwrap();

        assert_eq!(client.token().as_deref(), Some("7:fresh"));
        let cached = CredentialCache::new(dir.path().join("credentials.json"))
            .load()
            .unwrap();
        assert_eq!(cached.agent_token, "7:fresh");
    }

    #[tokio::test]
    async fn second_rejection_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/tasks"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/register"))
            .respond_with(registered("7:fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        CredentialCache::new(dir.path().join("credentials.json"))
            .save(AgentId::new(7), "7:stale")
            .unwrap();
        let client = client(&server.uri(), &dir);

        let err = client.poll_tasks().await.unwrap_err();
        assert!(matches!(err, AgentError::AuthenticationFailure(_)));
    }

    #[tokio::test]
    async fn rejected_invite_secret_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/register"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = client(&server.uri(), &dir).register().await.unwrap_err();
        assert!(matches!(err, AgentError::AuthenticationFailure(_)));
    }

    #[tokio::test]
    async fn poll_decodes_tasks_and_report_posts_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 3,
                "type": "stop_code_server",
                "payload": {"allocation_id": 1, "remote_port": 50001},
                "status": "pending",
                "created_at": "2026-01-01T00:00:00Z"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/tasks/3/report"))
            .and(header("authorization", "Bearer 7:tok"))
            .and(body_json(json!({"status": "done", "message": "stopped"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        CredentialCache::new(dir.path().join("credentials.json"))
            .save(AgentId::new(7), "7:tok")
            .unwrap();
        let client = client(&server.uri(), &dir);

        let tasks = client.poll_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, "stop_code_server");

        client
            .report_task(tasks[0].id, TaskReportStatus::Done, Some("stopped".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        CredentialCache::new(dir.path().join("credentials.json"))
            .save(AgentId::new(7), "7:tok")
            .unwrap();
        let err = client(&server.uri(), &dir)
            .heartbeat(HeartbeatRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_control_plane_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let dir = TempDir::new().unwrap();
        let err = client(&format!("http://127.0.0.1:{port}"), &dir)
            .heartbeat(HeartbeatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TransientNetwork(_)));
    }

    #[test]
    fn redaction_keeps_short_prefix() {
        assert_eq!(redact("12:abcdefgh"), "12:abc***");
        assert_eq!(redact("ab"), "ab***");
    }
}
