//! Idempotent resource provisioning

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::DeployError;
use crate::infra::api::{
    Backend, Bucket, Certificate, CloudApi, DnsRecord, DnsZone, HostRule, ImageBuild, PathMatcher,
    PathRule, Service, ServiceSpec,
};

/// Async mutex per shared resource name. Mutating a shared routing table or
/// terminator is a read-modify-write over provider state, so concurrent
/// deployments must take the resource's lock first.
#[derive(Debug, Clone, Default)]
pub struct SharedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SharedLocks {
    pub async fn lock_for(&self, resource: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Idempotent wrappers over the raw provider operations. Every `ensure_*`
/// follows read, reuse on match, create otherwise, verify. An existing
/// resource with conflicting parameters is a `ProvisionConflict` and is
/// never silently overwritten.
#[derive(Clone)]
pub struct ResourceClient {
    api: Arc<dyn CloudApi>,
    shared_locks: SharedLocks,
}

impl ResourceClient {
    pub fn new(api: Arc<dyn CloudApi>) -> Self {
        Self {
            api,
            shared_locks: SharedLocks::default(),
        }
    }

    pub fn api(&self) -> &Arc<dyn CloudApi> {
        &self.api
    }

    /// Bucket with the requested parameters, created if absent
    pub async fn ensure_bucket(&self, spec: &Bucket) -> Result<Bucket, DeployError> {
        if let Some(existing) = self.api.get_bucket(&spec.name).await? {
            if existing.location != spec.location || existing.public_read != spec.public_read {
                return Err(DeployError::ProvisionConflict {
                    resource: format!("bucket {}", spec.name),
                    reason: format!(
                        "exists with location={} public_read={}, wanted location={} public_read={}",
                        existing.location, existing.public_read, spec.location, spec.public_read
                    ),
                });
            }
            tracing::debug!("Reusing existing bucket {}", spec.name);
            return Ok(existing);
        }

        self.api.create_bucket(spec).await?;
        self.api.get_bucket(&spec.name).await?.ok_or_else(|| {
            DeployError::ProvisionError(format!(
                "bucket {} missing after creation",
                spec.name
            ))
        })
    }

    /// CDN backend over a bucket, created if absent
    pub async fn ensure_backend(&self, spec: &Backend) -> Result<Backend, DeployError> {
        if let Some(existing) = self.api.get_backend(&spec.name).await? {
            if existing.bucket != spec.bucket {
                return Err(DeployError::ProvisionConflict {
                    resource: format!("backend {}", spec.name),
                    reason: format!(
                        "exists over bucket {}, wanted bucket {}",
                        existing.bucket, spec.bucket
                    ),
                });
            }
            tracing::debug!("Reusing existing backend {}", spec.name);
            return Ok(existing);
        }

        self.api.create_backend(spec).await?;
        self.api.get_backend(&spec.name).await?.ok_or_else(|| {
            DeployError::ProvisionError(format!(
                "backend {} missing after creation",
                spec.name
            ))
        })
    }

    /// Append `/{slug}` and `/{slug}/*` rules for a backend to the matcher
    /// serving the shared domain. Re-running for the same backend is a
    /// no-op; the same paths pointing at a different backend is a conflict.
    pub async fn append_path_rules(
        &self,
        table_name: &str,
        shared_domain: &str,
        slug: &str,
        backend: &str,
    ) -> Result<(), DeployError> {
        let lock = self.shared_locks.lock_for(table_name).await;
        let _guard = lock.lock().await;

        let mut table = self.api.get_routing_table(table_name).await?.ok_or_else(|| {
            DeployError::ProvisionError(format!(
                "shared routing table {} does not exist",
                table_name
            ))
        })?;

        let matcher_name = table
            .matcher_for_host(shared_domain)
            .map(|m| m.name.clone())
            .or_else(|| table.path_matchers.first().map(|m| m.name.clone()))
            .ok_or_else(|| {
                DeployError::ProvisionError(format!(
                    "routing table {} has no path matcher for {}",
                    table_name, shared_domain
                ))
            })?;

        let prefix = format!("/{}", slug);
        let wildcard = format!("/{}/*", slug);

        let matcher = table.matcher_mut(&matcher_name).ok_or_else(|| {
            DeployError::ProvisionError(format!("path matcher {} vanished", matcher_name))
        })?;

        if let Some(existing) = matcher
            .path_rules
            .iter()
            .find(|r| r.paths.iter().any(|p| p == &prefix))
        {
            if existing.backend == backend {
                tracing::debug!("Path rules for {} already present", prefix);
                return Ok(());
            }
            return Err(DeployError::ProvisionConflict {
                resource: format!("routing table {}", table_name),
                reason: format!(
                    "path {} already routed to backend {}",
                    prefix, existing.backend
                ),
            });
        }

        matcher.path_rules.push(PathRule {
            paths: vec![prefix, wildcard],
            backend: backend.to_string(),
        });

        self.api.update_routing_table(&table).await
    }

    /// Append a host rule sending a custom domain (and its www alias) to a
    /// dedicated matcher defaulting to the site's backend.
    pub async fn append_host_rule(
        &self,
        table_name: &str,
        domain: &str,
        matcher_name: &str,
        backend: &str,
    ) -> Result<(), DeployError> {
        let lock = self.shared_locks.lock_for(table_name).await;
        let _guard = lock.lock().await;

        let mut table = self.api.get_routing_table(table_name).await?.ok_or_else(|| {
            DeployError::ProvisionError(format!(
                "shared routing table {} does not exist",
                table_name
            ))
        })?;

        if let Some(rule) = table
            .host_rules
            .iter()
            .find(|r| r.hosts.iter().any(|h| h == domain))
        {
            let existing_matcher = rule.path_matcher.clone();
            let same_backend = table
                .path_matchers
                .iter()
                .find(|m| m.name == existing_matcher)
                .map(|m| m.default_backend == backend)
                .unwrap_or(false);
            if existing_matcher == matcher_name && same_backend {
                tracing::debug!("Host rule for {} already present", domain);
                return Ok(());
            }
            return Err(DeployError::ProvisionConflict {
                resource: format!("routing table {}", table_name),
                reason: format!("host {} already routed via {}", domain, existing_matcher),
            });
        }

        if table.matcher_mut(matcher_name).is_none() {
            table.path_matchers.push(PathMatcher {
                name: matcher_name.to_string(),
                default_backend: backend.to_string(),
                path_rules: vec![],
            });
        }
        table.host_rules.push(HostRule {
            hosts: vec![domain.to_string(), format!("www.{}", domain)],
            path_matcher: matcher_name.to_string(),
        });

        self.api.update_routing_table(&table).await
    }

    /// Managed certificate covering the domain and its www alias
    pub async fn ensure_certificate(
        &self,
        name: &str,
        domain: &str,
    ) -> Result<Certificate, DeployError> {
        if let Some(existing) = self.api.get_certificate(name).await? {
            if !existing.domains.iter().any(|d| d == domain) {
                return Err(DeployError::ProvisionConflict {
                    resource: format!("certificate {}", name),
                    reason: format!(
                        "exists for domains {:?}, wanted {}",
                        existing.domains, domain
                    ),
                });
            }
            tracing::debug!("Reusing existing certificate {}", name);
            return Ok(existing);
        }

        let certificate = Certificate {
            name: name.to_string(),
            domains: vec![domain.to_string(), format!("www.{}", domain)],
        };
        self.api.create_certificate(&certificate).await?;
        Ok(certificate)
    }

    /// Attach a certificate to the shared terminator, honoring its capacity
    /// ceiling. Already attached is success; a full terminator is a
    /// conflict, not a crash.
    pub async fn register_certificate(
        &self,
        terminator_name: &str,
        certificate: &str,
        capacity: usize,
    ) -> Result<(), DeployError> {
        let lock = self.shared_locks.lock_for(terminator_name).await;
        let _guard = lock.lock().await;

        let terminator = self.api.get_terminator(terminator_name).await?.ok_or_else(|| {
            DeployError::ProvisionError(format!(
                "shared terminator {} does not exist",
                terminator_name
            ))
        })?;

        if terminator.certificates.iter().any(|c| c == certificate) {
            tracing::debug!("Certificate {} already attached", certificate);
            return Ok(());
        }
        if terminator.certificates.len() >= capacity {
            return Err(DeployError::ProvisionConflict {
                resource: format!("terminator {}", terminator_name),
                reason: format!(
                    "certificate capacity {} reached, cannot attach {}",
                    capacity, certificate
                ),
            });
        }

        let mut certificates = terminator.certificates.clone();
        certificates.push(certificate.to_string());
        self.api
            .set_terminator_certificates(terminator_name, &certificates)
            .await
    }

    /// DNS zone for the domain with an A record at the apex and a www CNAME
    pub async fn ensure_dns(
        &self,
        zone_name: &str,
        domain: &str,
        edge_ip: &str,
    ) -> Result<(), DeployError> {
        if self.api.get_dns_zone(zone_name).await?.is_none() {
            self.api
                .create_dns_zone(&DnsZone {
                    name: zone_name.to_string(),
                    dns_name: format!("{}.", domain),
                })
                .await?;
        }

        self.api
            .upsert_dns_record(
                zone_name,
                &DnsRecord {
                    name: format!("{}.", domain),
                    record_type: "A".to_string(),
                    ttl_secs: 300,
                    values: vec![edge_ip.to_string()],
                },
            )
            .await?;
        self.api
            .upsert_dns_record(
                zone_name,
                &DnsRecord {
                    name: format!("www.{}.", domain),
                    record_type: "CNAME".to_string(),
                    ttl_secs: 300,
                    values: vec![format!("{}.", domain)],
                },
            )
            .await
    }

    /// Container service running the image: update in place when it exists,
    /// create otherwise, then open public invocations.
    pub async fn ensure_service(&self, spec: &ServiceSpec) -> Result<Service, DeployError> {
        let service = if self.api.get_service(&spec.name).await?.is_some() {
            tracing::debug!("Updating existing service {}", spec.name);
            self.api.update_service(spec).await?
        } else {
            self.api.create_service(spec).await?
        };
        self.api.allow_public_invocations(&spec.name).await?;
        Ok(service)
    }

    pub async fn build_image(&self, build: &ImageBuild) -> Result<String, DeployError> {
        self.api.build_image(build).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryCloudApi;

    fn bucket(name: &str) -> Bucket {
        Bucket {
            name: name.to_string(),
            location: "US".to_string(),
            main_page: "index.html".to_string(),
            not_found_page: "index.html".to_string(),
            public_read: true,
        }
    }

    async fn seeded() -> (Arc<MemoryCloudApi>, ResourceClient) {
        let api = Arc::new(MemoryCloudApi::new());
        api.seed_shared_edge("edge-routes", "edge-https", "sites.example.com", "edge-default")
            .await;
        let client = ResourceClient::new(api.clone());
        (api, client)
    }

    #[tokio::test]
    async fn ensure_bucket_is_idempotent() {
        let (_api, client) = seeded().await;
        let first = client.ensure_bucket(&bucket("demo-site")).await.unwrap();
        let second = client.ensure_bucket(&bucket("demo-site")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn conflicting_bucket_is_not_overwritten() {
        let (api, client) = seeded().await;
        api.inject_bucket(Bucket {
            location: "EU".to_string(),
            ..bucket("demo-site")
        })
        .await;

        let err = client.ensure_bucket(&bucket("demo-site")).await.unwrap_err();
        assert!(err.is_conflict());
        // The existing resource keeps its parameters.
        let existing = api.get_bucket("demo-site").await.unwrap().unwrap();
        assert_eq!(existing.location, "EU");
    }

    #[tokio::test]
    async fn path_rules_append_once() {
        let (api, client) = seeded().await;
        client
            .append_path_rules("edge-routes", "sites.example.com", "demo", "demo-backend")
            .await
            .unwrap();
        client
            .append_path_rules("edge-routes", "sites.example.com", "demo", "demo-backend")
            .await
            .unwrap();

        let table = api.routing_table("edge-routes").await.unwrap();
        let rules = &table.path_matchers[0].path_rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].paths, vec!["/demo", "/demo/*"]);

        let err = client
            .append_path_rules("edge-routes", "sites.example.com", "demo", "other-backend")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn terminator_capacity_is_a_conflict() {
        let (_api, client) = seeded().await;
        // Seeded terminator already carries one certificate.
        client
            .register_certificate("edge-https", "a-cert", 2)
            .await
            .unwrap();
        let err = client
            .register_certificate("edge-https", "b-cert", 2)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        // Re-registering an attached certificate stays fine at capacity.
        client
            .register_certificate("edge-https", "a-cert", 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_service_updates_in_place() {
        let (_api, client) = seeded().await;
        let spec = ServiceSpec {
            name: "demo".to_string(),
            region: "europe-west1".to_string(),
            image: "repo/demo:1".to_string(),
            cpu: "1".to_string(),
            memory: "512Mi".to_string(),
            min_instances: 0,
            max_instances: 10,
        };
        let first = client.ensure_service(&spec).await.unwrap();
        let updated = client
            .ensure_service(&ServiceSpec {
                image: "repo/demo:2".to_string(),
                ..spec
            })
            .await
            .unwrap();
        assert_eq!(first.url, updated.url);
        assert_eq!(updated.image, "repo/demo:2");
    }

    #[tokio::test]
    async fn concurrent_path_appends_all_land() {
        let (api, client) = seeded().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .append_path_rules(
                        "edge-routes",
                        "sites.example.com",
                        &format!("site-{}", i),
                        &format!("backend-{}", i),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let table = api.routing_table("edge-routes").await.unwrap();
        assert_eq!(table.path_matchers[0].path_rules.len(), 8);
    }
}
