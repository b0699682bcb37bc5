//! Deterministic resource naming

use crate::errors::DeployError;
use crate::models::DeploymentMode;

/// Provider resource name limit
const MAX_NAME_LEN: usize = 63;

/// Normalize arbitrary input into a provider-safe resource name: lowercase,
/// dots/underscores/whitespace become hyphens, everything outside [a-z0-9-]
/// is dropped, runs of hyphens collapse, leading/trailing hyphens are
/// trimmed, and the result is capped at 63 characters (re-trimmed in case
/// truncation leaves a trailing hyphen).
pub fn safe_name(input: &str) -> Result<String, DeployError> {
    let mut out = String::with_capacity(input.len());
    let mut last_was_hyphen = false;

    for ch in input.to_lowercase().chars() {
        let mapped = match ch {
            '.' | '_' => Some('-'),
            c if c.is_whitespace() => Some('-'),
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => Some(c),
            '-' => Some('-'),
            _ => None,
        };
        if let Some(c) = mapped {
            if c == '-' {
                if !last_was_hyphen && !out.is_empty() {
                    out.push('-');
                }
                last_was_hyphen = true;
            } else {
                out.push(c);
                last_was_hyphen = false;
            }
        }
    }

    let mut trimmed = out.trim_matches('-').to_string();
    if trimmed.len() > MAX_NAME_LEN {
        trimmed.truncate(MAX_NAME_LEN);
        trimmed = trimmed.trim_matches('-').to_string();
    }

    if trimmed.is_empty() {
        return Err(DeployError::InputError(format!(
            "name {:?} reduces to an empty resource name",
            input
        )));
    }
    Ok(trimmed)
}

/// Names for every resource a topology may touch, derived once per
/// deployment so creation and later lookups always agree.
#[derive(Debug, Clone)]
pub struct ResourceNames {
    /// Normalized site slug
    pub slug: String,
    pub bucket: String,
    pub backend: String,
    pub certificate: String,
    pub dns_zone: String,
    pub path_matcher: String,
    pub service: String,
}

impl ResourceNames {
    /// Derive resource names for a deployment. In host-shared mode names
    /// come from the custom domain so two sites with the same slug on
    /// different domains never collide.
    pub fn derive(
        mode: DeploymentMode,
        target_name: &str,
        custom_domain: Option<&str>,
    ) -> Result<Self, DeployError> {
        let slug = safe_name(target_name)?;
        let stem = match mode {
            DeploymentMode::HostShared => {
                let domain = custom_domain.ok_or_else(|| {
                    DeployError::InputError(
                        "host-shared deployments require a custom domain".to_string(),
                    )
                })?;
                safe_name(domain)?
            }
            _ => slug.clone(),
        };
        let suffix = match mode {
            DeploymentMode::PathShared => "shared",
            DeploymentMode::HostShared => "host",
            DeploymentMode::Container => "svc",
        };

        Ok(Self {
            bucket: capped(&format!("{}-site-{}", stem, suffix)),
            backend: capped(&format!("{}-backend-{}", stem, suffix)),
            certificate: capped(&format!("{}-cert", stem)),
            dns_zone: capped(&format!("{}-zone", stem)),
            path_matcher: capped(&format!("{}-matcher", stem)),
            service: slug.clone(),
            slug,
        })
    }
}

fn capped(name: &str) -> String {
    let mut name = name.to_string();
    if name.len() > MAX_NAME_LEN {
        name.truncate(MAX_NAME_LEN);
        name = name.trim_matches('-').to_string();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_normalizes() {
        assert_eq!(safe_name("My Cool Site").unwrap(), "my-cool-site");
        assert_eq!(safe_name("demo.example_v2").unwrap(), "demo-example-v2");
        assert_eq!(safe_name("--weird---name--").unwrap(), "weird-name");
        assert_eq!(safe_name("ünïcode site").unwrap(), "ncode-site");
    }

    #[test]
    fn safe_name_truncates_and_retrims() {
        let long = format!("{}-x", "a".repeat(62));
        let name = safe_name(&long).unwrap();
        assert_eq!(name.len(), 62);
        assert!(!name.ends_with('-'));
    }

    #[test]
    fn safe_name_rejects_empty_results() {
        assert!(safe_name("!!!").is_err());
        assert!(safe_name("").is_err());
    }

    #[test]
    fn host_shared_names_derive_from_the_domain() {
        let names = ResourceNames::derive(
            DeploymentMode::HostShared,
            "blog",
            Some("blog.example.com"),
        )
        .unwrap();
        assert_eq!(names.bucket, "blog-example-com-site-host");
        assert_eq!(names.certificate, "blog-example-com-cert");
        assert_eq!(names.slug, "blog");
    }

    #[test]
    fn path_shared_names_derive_from_the_slug() {
        let names = ResourceNames::derive(DeploymentMode::PathShared, "My Blog", None).unwrap();
        assert_eq!(names.slug, "my-blog");
        assert_eq!(names.bucket, "my-blog-site-shared");
        assert_eq!(names.backend, "my-blog-backend-shared");
    }
}
