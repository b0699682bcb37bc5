//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Base data directory (records, backups, scratch space)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Cloud provider configuration
    #[serde(default)]
    pub cloud: CloudSettings,

    /// Container topology configuration
    #[serde(default)]
    pub container: ContainerSettings,

    /// AI validation configuration
    #[serde(default)]
    pub ai: AiSettings,

    /// Build adapter configuration
    #[serde(default)]
    pub build: BuildSettings,

    /// Pipeline and watchdog configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Notification configuration
    #[serde(default)]
    pub notify: NotifySettings,
}

fn default_data_dir() -> String {
    "/var/lib/webdeploy".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            data_dir: default_data_dir(),
            server: ServerSettings::default(),
            cloud: CloudSettings::default(),
            container: ContainerSettings::default(),
            ai: AiSettings::default(),
            build: BuildSettings::default(),
            pipeline: PipelineSettings::default(),
            notify: NotifySettings::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Cloud provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Provider backend: "rest" against a real API, "memory" for dry runs
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the provider REST API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Provider project identifier
    #[serde(default = "default_project")]
    pub project: String,

    /// API bearer token (empty when the environment supplies credentials)
    #[serde(default)]
    pub api_token: String,

    /// Bucket location for new storage buckets
    #[serde(default = "default_bucket_location")]
    pub bucket_location: String,

    /// Shared edge resources (pre-existing, never created by this service)
    #[serde(default)]
    pub shared: SharedEdgeSettings,

    /// Automatically create a managed TLS certificate in host-shared mode
    #[serde(default)]
    pub auto_create_certificate: bool,

    /// Automatically create a DNS zone + records in host-shared mode
    #[serde(default = "default_true")]
    pub auto_create_dns_zone: bool,

    /// Automatically register custom domains (requires user confirmation)
    #[serde(default)]
    pub auto_register_domains: bool,

    /// CDN cache TTL seconds
    #[serde(default = "default_cdn_ttl")]
    pub cdn_default_ttl: u32,

    /// CDN maximum TTL seconds
    #[serde(default = "default_cdn_max_ttl")]
    pub cdn_max_ttl: u32,

    /// Per-request API timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
}

fn default_provider() -> String {
    "rest".to_string()
}

fn default_api_base() -> String {
    "https://cloud.example.com/v1".to_string()
}

fn default_project() -> String {
    "webdeploy".to_string()
}

fn default_bucket_location() -> String {
    "US".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cdn_ttl() -> u32 {
    3600
}

fn default_cdn_max_ttl() -> u32 {
    86400
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_base: default_api_base(),
            project: default_project(),
            api_token: String::new(),
            bucket_location: default_bucket_location(),
            shared: SharedEdgeSettings::default(),
            auto_create_certificate: false,
            auto_create_dns_zone: true,
            auto_register_domains: false,
            cdn_default_ttl: default_cdn_ttl(),
            cdn_max_ttl: default_cdn_max_ttl(),
            api_timeout_secs: default_api_timeout(),
        }
    }
}

/// Pre-existing shared edge resources, referenced by name only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedEdgeSettings {
    /// Domain serving path-shared deployments
    #[serde(default = "default_shared_domain")]
    pub domain: String,

    /// Shared routing table mutated by both shared topologies
    #[serde(default = "default_routing_table")]
    pub routing_table: String,

    /// Shared HTTPS terminator receiving host-shared certificates
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Public IP of the shared edge (target of host-shared DNS records)
    #[serde(default = "default_edge_ip")]
    pub edge_ip: String,

    /// Hard ceiling on certificates attached to the shared terminator
    #[serde(default = "default_cert_limit")]
    pub certificate_limit: usize,
}

fn default_shared_domain() -> String {
    "sites.example.com".to_string()
}

fn default_routing_table() -> String {
    "shared-edge-routes".to_string()
}

fn default_terminator() -> String {
    "shared-edge-https".to_string()
}

fn default_edge_ip() -> String {
    "203.0.113.10".to_string()
}

fn default_cert_limit() -> usize {
    15
}

impl Default for SharedEdgeSettings {
    fn default() -> Self {
        Self {
            domain: default_shared_domain(),
            routing_table: default_routing_table(),
            terminator: default_terminator(),
            edge_ip: default_edge_ip(),
            certificate_limit: default_cert_limit(),
        }
    }
}

/// Container topology settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Provider region for container services
    #[serde(default = "default_region")]
    pub region: String,

    /// Image repository for built images
    #[serde(default = "default_image_repo")]
    pub image_repo: String,

    /// CPU limit per instance
    #[serde(default = "default_cpu")]
    pub cpu: String,

    /// Memory limit per instance
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Maximum instance count
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    /// Minimum instance count
    #[serde(default)]
    pub min_instances: u32,

    /// Managed image build timeout in seconds
    #[serde(default = "default_image_build_timeout")]
    pub image_build_timeout_secs: u64,
}

fn default_region() -> String {
    "europe-west1".to_string()
}

fn default_image_repo() -> String {
    "web-images".to_string()
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_memory() -> String {
    "512Mi".to_string()
}

fn default_max_instances() -> u32 {
    10
}

fn default_image_build_timeout() -> u64 {
    600
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            image_repo: default_image_repo(),
            cpu: default_cpu(),
            memory: default_memory(),
            max_instances: default_max_instances(),
            min_instances: 0,
            image_build_timeout_secs: default_image_build_timeout(),
        }
    }
}

/// AI validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// Master switch for the AI inspect/fix steps
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Primary reviewer API key (empty disables the primary)
    #[serde(default)]
    pub primary_api_key: String,

    /// Primary reviewer base URL (Anthropic-style messages API)
    #[serde(default = "default_primary_base")]
    pub primary_base_url: String,

    /// Primary reviewer model
    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    /// Fallback reviewer API key (empty disables the fallback)
    #[serde(default)]
    pub fallback_api_key: String,

    /// Fallback reviewer base URL (OpenAI-compatible chat completions)
    #[serde(default = "default_fallback_base")]
    pub fallback_base_url: String,

    /// Fallback reviewer model
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Per-request reviewer timeout in seconds
    #[serde(default = "default_reviewer_timeout")]
    pub request_timeout_secs: u64,
}

fn default_primary_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_primary_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_fallback_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_fallback_model() -> String {
    "meta-llama/llama-3.1-8b-instruct:free".to_string()
}

fn default_reviewer_timeout() -> u64 {
    60
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_api_key: String::new(),
            primary_base_url: default_primary_base(),
            primary_model: default_primary_model(),
            fallback_api_key: String::new(),
            fallback_base_url: default_fallback_base(),
            fallback_model: default_fallback_model(),
            request_timeout_secs: default_reviewer_timeout(),
        }
    }
}

/// Build adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Build command timeout in seconds
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Preview/health-check timeout in seconds
    #[serde(default = "default_preview_timeout")]
    pub preview_timeout_secs: u64,

    /// Maximum accepted archive size in megabytes
    #[serde(default = "default_max_archive_mb")]
    pub max_archive_mb: u64,
}

fn default_build_timeout() -> u64 {
    600
}

fn default_preview_timeout() -> u64 {
    30
}

fn default_max_archive_mb() -> u64 {
    500
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            build_timeout_secs: default_build_timeout(),
            preview_timeout_secs: default_preview_timeout(),
            max_archive_mb: default_max_archive_mb(),
        }
    }
}

/// Pipeline and recovery watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Whole-pipeline ceiling enforced by the watchdog, in seconds
    #[serde(default = "default_pipeline_max")]
    pub max_duration_secs: u64,

    /// Watchdog sweep interval in seconds
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    /// Maximum automatic restarts per deployment
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,

    /// Lease time-to-live in seconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Upload parallelism within one deployment
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
}

fn default_pipeline_max() -> u64 {
    900
}

fn default_watchdog_interval() -> u64 {
    120
}

fn default_retry_cap() -> u32 {
    2
}

fn default_lease_ttl() -> u64 {
    60
}

fn default_upload_workers() -> usize {
    10
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_duration_secs: default_pipeline_max(),
            watchdog_interval_secs: default_watchdog_interval(),
            retry_cap: default_retry_cap(),
            lease_ttl_secs: default_lease_ttl(),
            upload_workers: default_upload_workers(),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifySettings {
    /// Webhook URL receiving deployment summaries (empty disables delivery)
    #[serde(default)]
    pub webhook_url: String,

    /// Targets always included in addition to per-deployment targets
    #[serde(default)]
    pub default_targets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ceilings() {
        let settings = Settings::default();
        assert_eq!(settings.build.build_timeout_secs, 600);
        assert_eq!(settings.pipeline.max_duration_secs, 900);
        assert_eq!(settings.pipeline.retry_cap, 2);
        assert_eq!(settings.cloud.shared.certificate_limit, 15);
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"server": {"port": 9001}}"#).unwrap();
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.pipeline.watchdog_interval_secs, 120);
    }
}
