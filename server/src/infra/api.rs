//! Raw cloud provider operations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Storage bucket description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub location: String,
    /// Object served for directory requests
    pub main_page: String,
    /// Object served for missing paths
    pub not_found_page: String,
    /// World-readable objects (static site serving)
    pub public_read: bool,
}

/// CDN-fronted backend over a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub name: String,
    pub bucket: String,
    pub cdn_enabled: bool,
    pub default_ttl_secs: u32,
    pub max_ttl_secs: u32,
    pub negative_caching: bool,
}

/// Host rule on a routing table: these hosts use that path matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRule {
    pub hosts: Vec<String>,
    pub path_matcher: String,
}

/// Path rule inside a matcher: these path patterns go to that backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub paths: Vec<String>,
    pub backend: String,
}

/// Named group of path rules with a default backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathMatcher {
    pub name: String,
    pub default_backend: String,
    pub path_rules: Vec<PathRule>,
}

/// Edge routing table mapping hosts and paths to backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    pub name: String,
    pub default_backend: String,
    pub host_rules: Vec<HostRule>,
    pub path_matchers: Vec<PathMatcher>,
}

impl RoutingTable {
    /// Matcher serving the given host, if a host rule covers it
    pub fn matcher_for_host(&self, host: &str) -> Option<&PathMatcher> {
        let rule = self
            .host_rules
            .iter()
            .find(|r| r.hosts.iter().any(|h| h == host))?;
        self.path_matchers.iter().find(|m| m.name == rule.path_matcher)
    }

    pub fn matcher_mut(&mut self, name: &str) -> Option<&mut PathMatcher> {
        self.path_matchers.iter_mut().find(|m| m.name == name)
    }
}

/// Managed TLS certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    pub domains: Vec<String>,
}

/// HTTPS terminator at the shared edge; certificates attach here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminator {
    pub name: String,
    pub certificates: Vec<String>,
}

/// DNS zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsZone {
    pub name: String,
    /// Zone apex with trailing dot, e.g. "example.com."
    pub dns_name: String,
}

/// DNS record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Fully qualified name with trailing dot
    pub name: String,
    /// Record type, "A" or "CNAME"
    pub record_type: String,
    pub ttl_secs: u32,
    pub values: Vec<String>,
}

/// Managed container image build request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuild {
    /// Fully qualified image reference to produce
    pub image: String,
    /// Path of the source tree to build from
    pub source_dir: String,
    pub timeout_secs: u64,
}

/// Managed container service description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub region: String,
    pub image: String,
    pub cpu: String,
    pub memory: String,
    pub min_instances: u32,
    pub max_instances: u32,
}

/// Running service state returned by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub url: String,
    pub image: String,
}

/// One object to upload
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// Raw provider operations. Every call is a single round trip; idempotency
/// and conflict detection live in [`crate::infra::ResourceClient`].
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>, DeployError>;
    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), DeployError>;

    async fn get_backend(&self, name: &str) -> Result<Option<Backend>, DeployError>;
    async fn create_backend(&self, backend: &Backend) -> Result<(), DeployError>;

    async fn get_routing_table(&self, name: &str) -> Result<Option<RoutingTable>, DeployError>;
    async fn update_routing_table(&self, table: &RoutingTable) -> Result<(), DeployError>;

    async fn get_certificate(&self, name: &str) -> Result<Option<Certificate>, DeployError>;
    async fn create_certificate(&self, certificate: &Certificate) -> Result<(), DeployError>;

    async fn get_terminator(&self, name: &str) -> Result<Option<Terminator>, DeployError>;
    async fn set_terminator_certificates(
        &self,
        name: &str,
        certificates: &[String],
    ) -> Result<(), DeployError>;

    async fn get_dns_zone(&self, name: &str) -> Result<Option<DnsZone>, DeployError>;
    async fn create_dns_zone(&self, zone: &DnsZone) -> Result<(), DeployError>;
    async fn upsert_dns_record(&self, zone: &str, record: &DnsRecord) -> Result<(), DeployError>;

    /// Purchase and register a domain through the provider's registrar.
    /// Billable, so callers gate it on explicit confirmation.
    async fn register_domain(&self, domain: &str) -> Result<(), DeployError>;

    /// Submit a managed image build and wait for the produced image reference
    async fn build_image(&self, build: &ImageBuild) -> Result<String, DeployError>;

    async fn get_service(&self, name: &str) -> Result<Option<Service>, DeployError>;
    async fn create_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError>;
    async fn update_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError>;
    async fn allow_public_invocations(&self, service: &str) -> Result<(), DeployError>;

    async fn upload_object(&self, bucket: &str, object: &ObjectUpload) -> Result<(), DeployError>;

    /// Invalidate cached paths behind a routing table; callers treat
    /// failures as non-fatal
    async fn invalidate_cache(&self, table: &str, path_pattern: &str) -> Result<(), DeployError>;
}
