//! REST cloud provider client

use std::time::Duration;

use base64::Engine;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::infra::api::{
    Backend, Bucket, Certificate, CloudApi, DnsRecord, DnsZone, ImageBuild, ObjectUpload,
    RoutingTable, Service, ServiceSpec, Terminator,
};
use crate::storage::settings::CloudSettings;

/// Cloud provider client speaking the provider's project-scoped REST API.
/// Every call is one request with the configured timeout; retries and
/// idempotency live a layer up.
#[derive(Debug, Clone)]
pub struct RestCloudApi {
    http: reqwest::Client,
    base: String,
    project: String,
    token: String,
}

impl RestCloudApi {
    pub fn new(settings: &CloudSettings) -> Result<Self, DeployError> {
        let base = url::Url::parse(&settings.api_base)
            .map_err(|e| DeployError::ConfigError(format!("invalid cloud.api_base: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.api_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
            project: settings.project.clone(),
            token: settings.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.base, self.project, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    /// GET a resource; 404 becomes None
    async fn get_resource<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, DeployError> {
        let response = self.authorized(self.http.get(self.url(path))).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn post_resource<B: Serialize>(&self, path: &str, body: &B) -> Result<(), DeployError> {
        let response = self
            .authorized(self.http.post(self.url(path)).json(body))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn post_returning<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DeployError> {
        let response = self
            .authorized(self.http.post(self.url(path)).json(body))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn put_resource<B: Serialize>(&self, path: &str, body: &B) -> Result<(), DeployError> {
        let response = self
            .authorized(self.http.put(self.url(path)).json(body))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn put_returning<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DeployError> {
        let response = self
            .authorized(self.http.put(self.url(path)).json(body))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }
}

/// Map non-2xx responses to ProvisionError with the body text
async fn check(response: reqwest::Response) -> Result<reqwest::Response, DeployError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeployError::ProvisionError(format!(
        "provider returned {}: {}",
        status, body
    )))
}

#[async_trait]
impl CloudApi for RestCloudApi {
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>, DeployError> {
        self.get_resource(&format!("buckets/{}", name)).await
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), DeployError> {
        self.post_resource("buckets", bucket).await
    }

    async fn get_backend(&self, name: &str) -> Result<Option<Backend>, DeployError> {
        self.get_resource(&format!("backends/{}", name)).await
    }

    async fn create_backend(&self, backend: &Backend) -> Result<(), DeployError> {
        self.post_resource("backends", backend).await
    }

    async fn get_routing_table(&self, name: &str) -> Result<Option<RoutingTable>, DeployError> {
        self.get_resource(&format!("routing-tables/{}", name)).await
    }

    async fn update_routing_table(&self, table: &RoutingTable) -> Result<(), DeployError> {
        self.put_resource(&format!("routing-tables/{}", table.name), table)
            .await
    }

    async fn get_certificate(&self, name: &str) -> Result<Option<Certificate>, DeployError> {
        self.get_resource(&format!("certificates/{}", name)).await
    }

    async fn create_certificate(&self, certificate: &Certificate) -> Result<(), DeployError> {
        self.post_resource("certificates", certificate).await
    }

    async fn get_terminator(&self, name: &str) -> Result<Option<Terminator>, DeployError> {
        self.get_resource(&format!("terminators/{}", name)).await
    }

    async fn set_terminator_certificates(
        &self,
        name: &str,
        certificates: &[String],
    ) -> Result<(), DeployError> {
        self.put_resource(
            &format!("terminators/{}/certificates", name),
            &json!({ "certificates": certificates }),
        )
        .await
    }

    async fn get_dns_zone(&self, name: &str) -> Result<Option<DnsZone>, DeployError> {
        self.get_resource(&format!("dns-zones/{}", name)).await
    }

    async fn create_dns_zone(&self, zone: &DnsZone) -> Result<(), DeployError> {
        self.post_resource("dns-zones", zone).await
    }

    async fn upsert_dns_record(&self, zone: &str, record: &DnsRecord) -> Result<(), DeployError> {
        self.put_resource(&format!("dns-zones/{}/records", zone), record)
            .await
    }

    async fn register_domain(&self, domain: &str) -> Result<(), DeployError> {
        self.post_resource("domain-registrations", &json!({ "domain": domain }))
            .await
    }

    async fn build_image(&self, build: &ImageBuild) -> Result<String, DeployError> {
        let result: serde_json::Value = self.post_returning("image-builds", build).await?;
        result["image"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                DeployError::ProvisionError("image build response carried no image".to_string())
            })
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>, DeployError> {
        self.get_resource(&format!("services/{}", name)).await
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError> {
        self.post_returning("services", spec).await
    }

    async fn update_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError> {
        self.put_returning(&format!("services/{}", spec.name), spec)
            .await
    }

    async fn allow_public_invocations(&self, service: &str) -> Result<(), DeployError> {
        self.post_resource(
            &format!("services/{}/bindings", service),
            &json!({ "role": "invoker", "member": "allUsers" }),
        )
        .await
    }

    async fn upload_object(&self, bucket: &str, object: &ObjectUpload) -> Result<(), DeployError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&object.bytes);
        let body = json!({
            "key": object.key,
            "content_type": object.content_type,
            "cache_control": object.cache_control,
            "data": encoded,
        });
        let response = self
            .authorized(
                self.http
                    .post(self.url(&format!("buckets/{}/objects", bucket)))
                    .json(&body),
            )
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeployError::UploadError(format!(
                "upload of {} returned {}: {}",
                object.key, status, text
            )));
        }
        Ok(())
    }

    async fn invalidate_cache(&self, table: &str, path_pattern: &str) -> Result<(), DeployError> {
        self.post_resource(
            &format!("routing-tables/{}/invalidations", table),
            &json!({ "path": path_pattern }),
        )
        .await
    }
}
