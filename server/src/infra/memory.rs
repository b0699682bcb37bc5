//! In-memory cloud provider

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::DeployError;
use crate::infra::api::{
    Backend, Bucket, Certificate, CloudApi, DnsRecord, DnsZone, ImageBuild, ObjectUpload,
    RoutingTable, Service, ServiceSpec, Terminator,
};

#[derive(Debug, Default)]
struct MemoryState {
    buckets: HashMap<String, Bucket>,
    backends: HashMap<String, Backend>,
    routing_tables: HashMap<String, RoutingTable>,
    certificates: HashMap<String, Certificate>,
    terminators: HashMap<String, Terminator>,
    dns_zones: HashMap<String, DnsZone>,
    dns_records: HashMap<String, Vec<DnsRecord>>,
    registered_domains: Vec<String>,
    services: HashMap<String, Service>,
    public_services: Vec<String>,
    objects: HashMap<String, HashMap<String, StoredObject>>,
    built_images: Vec<String>,
    invalidations: Vec<(String, String)>,
}

/// Uploaded object as the fake provider stores it
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// Cloud provider backed by process memory. Selected with
/// `cloud.provider = "memory"` for dry runs, and the workhorse of the
/// integration tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloudApi {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryCloudApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the pre-existing shared edge resources that real environments
    /// are born with.
    pub async fn seed_shared_edge(
        &self,
        routing_table: &str,
        terminator: &str,
        shared_domain: &str,
        default_backend: &str,
    ) {
        let mut state = self.state.write().await;
        state.routing_tables.insert(
            routing_table.to_string(),
            RoutingTable {
                name: routing_table.to_string(),
                default_backend: default_backend.to_string(),
                host_rules: vec![crate::infra::api::HostRule {
                    hosts: vec![shared_domain.to_string()],
                    path_matcher: "shared".to_string(),
                }],
                path_matchers: vec![crate::infra::api::PathMatcher {
                    name: "shared".to_string(),
                    default_backend: default_backend.to_string(),
                    path_rules: vec![],
                }],
            },
        );
        state.terminators.insert(
            terminator.to_string(),
            Terminator {
                name: terminator.to_string(),
                certificates: vec!["shared-edge-cert".to_string()],
            },
        );
    }

    /// Objects uploaded into a bucket, for assertions
    pub async fn objects_in(&self, bucket: &str) -> HashMap<String, StoredObject> {
        self.state
            .read()
            .await
            .objects
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    /// Terminator state, for assertions
    pub async fn terminator(&self, name: &str) -> Option<Terminator> {
        self.state.read().await.terminators.get(name).cloned()
    }

    /// Routing table state, for assertions
    pub async fn routing_table(&self, name: &str) -> Option<RoutingTable> {
        self.state.read().await.routing_tables.get(name).cloned()
    }

    /// DNS records in a zone, for assertions
    pub async fn dns_records(&self, zone: &str) -> Vec<DnsRecord> {
        self.state
            .read()
            .await
            .dns_records
            .get(zone)
            .cloned()
            .unwrap_or_default()
    }

    /// Domains purchased through the fake registrar, for assertions
    pub async fn registered_domains(&self) -> Vec<String> {
        self.state.read().await.registered_domains.clone()
    }

    /// Cache invalidations issued, for assertions
    pub async fn invalidations(&self) -> Vec<(String, String)> {
        self.state.read().await.invalidations.clone()
    }

    /// Pre-create a bucket with different parameters, to simulate
    /// conflicting partial state from an earlier run.
    pub async fn inject_bucket(&self, bucket: Bucket) {
        self.state
            .write()
            .await
            .buckets
            .insert(bucket.name.clone(), bucket);
    }
}

#[async_trait]
impl CloudApi for MemoryCloudApi {
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>, DeployError> {
        Ok(self.state.read().await.buckets.get(name).cloned())
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if state.buckets.contains_key(&bucket.name) {
            return Err(DeployError::ProvisionError(format!(
                "bucket {} already exists",
                bucket.name
            )));
        }
        state.buckets.insert(bucket.name.clone(), bucket.clone());
        Ok(())
    }

    async fn get_backend(&self, name: &str) -> Result<Option<Backend>, DeployError> {
        Ok(self.state.read().await.backends.get(name).cloned())
    }

    async fn create_backend(&self, backend: &Backend) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if state.backends.contains_key(&backend.name) {
            return Err(DeployError::ProvisionError(format!(
                "backend {} already exists",
                backend.name
            )));
        }
        state.backends.insert(backend.name.clone(), backend.clone());
        Ok(())
    }

    async fn get_routing_table(&self, name: &str) -> Result<Option<RoutingTable>, DeployError> {
        Ok(self.state.read().await.routing_tables.get(name).cloned())
    }

    async fn update_routing_table(&self, table: &RoutingTable) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if !state.routing_tables.contains_key(&table.name) {
            return Err(DeployError::ProvisionError(format!(
                "routing table {} does not exist",
                table.name
            )));
        }
        state.routing_tables.insert(table.name.clone(), table.clone());
        Ok(())
    }

    async fn get_certificate(&self, name: &str) -> Result<Option<Certificate>, DeployError> {
        Ok(self.state.read().await.certificates.get(name).cloned())
    }

    async fn create_certificate(&self, certificate: &Certificate) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        state
            .certificates
            .insert(certificate.name.clone(), certificate.clone());
        Ok(())
    }

    async fn get_terminator(&self, name: &str) -> Result<Option<Terminator>, DeployError> {
        Ok(self.state.read().await.terminators.get(name).cloned())
    }

    async fn set_terminator_certificates(
        &self,
        name: &str,
        certificates: &[String],
    ) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        let terminator = state.terminators.get_mut(name).ok_or_else(|| {
            DeployError::ProvisionError(format!("terminator {} does not exist", name))
        })?;
        terminator.certificates = certificates.to_vec();
        Ok(())
    }

    async fn get_dns_zone(&self, name: &str) -> Result<Option<DnsZone>, DeployError> {
        Ok(self.state.read().await.dns_zones.get(name).cloned())
    }

    async fn create_dns_zone(&self, zone: &DnsZone) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        state.dns_zones.insert(zone.name.clone(), zone.clone());
        Ok(())
    }

    async fn upsert_dns_record(&self, zone: &str, record: &DnsRecord) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        let records = state.dns_records.entry(zone.to_string()).or_default();
        records.retain(|r| !(r.name == record.name && r.record_type == record.record_type));
        records.push(record.clone());
        Ok(())
    }

    async fn register_domain(&self, domain: &str) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if !state.registered_domains.iter().any(|d| d == domain) {
            state.registered_domains.push(domain.to_string());
        }
        Ok(())
    }

    async fn build_image(&self, build: &ImageBuild) -> Result<String, DeployError> {
        let mut state = self.state.write().await;
        state.built_images.push(build.image.clone());
        Ok(build.image.clone())
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>, DeployError> {
        Ok(self.state.read().await.services.get(name).cloned())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError> {
        let mut state = self.state.write().await;
        if state.services.contains_key(&spec.name) {
            return Err(DeployError::ProvisionError(format!(
                "service {} already exists",
                spec.name
            )));
        }
        let service = Service {
            name: spec.name.clone(),
            url: format!("https://{}-{}.run.example.app", spec.name, spec.region),
            image: spec.image.clone(),
        };
        state.services.insert(spec.name.clone(), service.clone());
        Ok(service)
    }

    async fn update_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError> {
        let mut state = self.state.write().await;
        let service = state.services.get_mut(&spec.name).ok_or_else(|| {
            DeployError::ProvisionError(format!("service {} does not exist", spec.name))
        })?;
        service.image = spec.image.clone();
        Ok(service.clone())
    }

    async fn allow_public_invocations(&self, service: &str) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if !state.public_services.iter().any(|s| s == service) {
            state.public_services.push(service.to_string());
        }
        Ok(())
    }

    async fn upload_object(&self, bucket: &str, object: &ObjectUpload) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        if !state.buckets.contains_key(bucket) {
            return Err(DeployError::UploadError(format!(
                "bucket {} does not exist",
                bucket
            )));
        }
        state.objects.entry(bucket.to_string()).or_default().insert(
            object.key.clone(),
            StoredObject {
                bytes: object.bytes.clone(),
                content_type: object.content_type.clone(),
                cache_control: object.cache_control.clone(),
            },
        );
        Ok(())
    }

    async fn invalidate_cache(&self, table: &str, path_pattern: &str) -> Result<(), DeployError> {
        let mut state = self.state.write().await;
        state
            .invalidations
            .push((table.to_string(), path_pattern.to_string()));
        Ok(())
    }
}
