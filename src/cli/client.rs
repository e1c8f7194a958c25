use anyhow::{anyhow, Context};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::api::error::ErrorBody;
use crate::api::routes::{CreateVmBody, ExistsResponse, NameBody, NameCheckResponse, VmDetails};
use crate::auth::{issue_token, Principal};
use crate::core::vm::VmSummary;
use crate::store::ChangeRecord;

/// Thin HTTP client for the local daemon's public API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, jwt_secret: &str, principal: &Principal, ttl: Duration) -> anyhow::Result<Self> {
        let token = issue_token(jwt_secret, principal, ttl).context("cannot sign API token")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        let response = request.send().await.context("cannot reach the VM manager daemon")?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(anyhow!("{} ({})", body.message, body.error)),
            Err(_) => Err(anyhow!("daemon answered HTTP {}", status)),
        }
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        Ok(self.send(request).await?.json::<T>().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.json(self.request(Method::POST, path).json(body)).await
    }

    pub async fn create_vm(&self, body: &CreateVmBody) -> anyhow::Result<VmSummary> {
        self.post("/api/v1/vms", body).await
    }

    pub async fn list_vms(&self) -> anyhow::Result<Vec<VmSummary>> {
        self.json(self.request(Method::GET, "/api/v1/vms")).await
    }

    pub async fn list_names(&self, node: Option<&str>) -> anyhow::Result<Vec<String>> {
        let mut request = self.request(Method::GET, "/api/v1/vms/names");
        if let Some(node) = node {
            request = request.query(&[("node", node)]);
        }
        self.json(request).await
    }

    pub async fn table(&self) -> anyhow::Result<String> {
        Ok(self.send(self.request(Method::GET, "/api/v1/vms/table")).await?.text().await?)
    }

    pub async fn info(&self, name: &str) -> anyhow::Result<VmDetails> {
        self.json(self.request(Method::GET, &format!("/api/v1/vms/{}", name))).await
    }

    pub async fn exists(&self, name: &str, node: Option<&str>) -> anyhow::Result<ExistsResponse> {
        let mut request = self.request(Method::GET, &format!("/api/v1/vms/{}/exists", name));
        if let Some(node) = node {
            request = request.query(&[("node", node)]);
        }
        self.json(request).await
    }

    pub async fn check_name(&self, name: &str) -> anyhow::Result<NameCheckResponse> {
        self.post(
            "/api/v1/vms/check-name",
            &NameBody {
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn history(&self, name: &str) -> anyhow::Result<Vec<ChangeRecord>> {
        self.json(self.request(Method::GET, &format!("/api/v1/vms/{}/history", name))).await
    }
}
