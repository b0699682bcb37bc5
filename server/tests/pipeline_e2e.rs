//! End-to-end pipeline tests over the in-memory cloud provider

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use webdeployd::archive::pack_tar_gz;
use webdeployd::backup::ArchiveVault;
use webdeployd::build::BuildAdapter;
use webdeployd::errors::DeployError;
use webdeployd::infra::{MemoryCloudApi, ResourceClient};
use webdeployd::loghub::LogHub;
use webdeployd::models::{
    Deployment, DeploymentConfig, DeploymentMode, DeploymentStatus, PipelineStep, StepStatus,
    ValidationReport, VerifyOutcome,
};
use webdeployd::notify::{DeploymentSummary, Notifier};
use webdeployd::pipeline::{PipelineDeps, PipelineOrchestrator};
use webdeployd::storage::layout::StorageLayout;
use webdeployd::storage::settings::Settings;
use webdeployd::store::DeploymentStore;
use webdeployd::validate::{CodeValidationAdapter, ValidationAdapter};
use webdeployd::workers::watchdog;

/// Build adapter stub: no npm, the source tree is the artifact
struct StubBuilder {
    reachable: bool,
}

#[async_trait]
impl BuildAdapter for StubBuilder {
    async fn build(
        &self,
        source_root: &Path,
        _base_path: Option<&str>,
    ) -> Result<PathBuf, DeployError> {
        Ok(source_root.to_path_buf())
    }

    async fn verify(
        &self,
        _artifact_root: &Path,
        _base_path: Option<&str>,
    ) -> Result<VerifyOutcome, DeployError> {
        Ok(VerifyOutcome {
            reachable: self.reachable,
            status_code: Some(if self.reachable { 200 } else { 500 }),
        })
    }
}

/// Notifier that records every summary it is handed
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<DeploymentSummary>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, summary: &DeploymentSummary) -> Result<(), DeployError> {
        self.sent.lock().await.push(summary.clone());
        Ok(())
    }
}

/// Reviewer stub handing back a fixed report
struct CannedReviewer {
    report: ValidationReport,
}

#[async_trait]
impl ValidationAdapter for CannedReviewer {
    async fn inspect(
        &self,
        _source_root: &Path,
        _mode: DeploymentMode,
        _base_path: Option<&str>,
    ) -> ValidationReport {
        self.report.clone()
    }
}

/// Notifier that reads the record while delivering, capturing what an
/// outside observer sees mid-delivery.
struct StatusSpyNotifier {
    store: DeploymentStore,
    seen: Mutex<Option<(DeploymentStatus, StepStatus)>>,
}

#[async_trait]
impl Notifier for StatusSpyNotifier {
    async fn notify(&self, summary: &DeploymentSummary) -> Result<(), DeployError> {
        let record = self.store.get(&summary.deployment_id).await?;
        *self.seen.lock().await = Some((
            record.status,
            record.step_statuses[&PipelineStep::Notify],
        ));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    orchestrator: PipelineOrchestrator,
    api: Arc<MemoryCloudApi>,
    notifier: Arc<RecordingNotifier>,
    settings: Settings,
}

fn base_settings(data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = data_dir.to_string_lossy().to_string();
    settings.cloud.provider = "memory".to_string();
    settings.cloud.auto_create_certificate = true;
    settings.ai.enabled = false;
    settings
}

async fn seeded_api(settings: &Settings) -> Arc<MemoryCloudApi> {
    let api = Arc::new(MemoryCloudApi::new());
    api.seed_shared_edge(
        &settings.cloud.shared.routing_table,
        &settings.cloud.shared.terminator,
        &settings.cloud.shared.domain,
        "shared-edge-default",
    )
    .await;
    api
}

fn make_orchestrator(
    data_dir: &Path,
    api: Arc<MemoryCloudApi>,
    settings: &Settings,
    builder: Arc<dyn BuildAdapter>,
    validator: Arc<dyn ValidationAdapter>,
    notifier: Arc<dyn Notifier>,
) -> PipelineOrchestrator {
    let layout = StorageLayout::new(data_dir);
    let deps = PipelineDeps {
        store: DeploymentStore::new(layout.clone()),
        hub: LogHub::new(),
        vault: ArchiveVault::new(layout),
        resources: ResourceClient::new(api),
        builder,
        validator,
        notifier,
        settings: settings.clone(),
    };
    PipelineOrchestrator::new(Arc::new(deps))
}

async fn harness_with(
    tweak: impl FnOnce(&mut Settings),
    builder: Arc<dyn BuildAdapter>,
    validator: Option<Arc<dyn ValidationAdapter>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = base_settings(dir.path());
    tweak(&mut settings);
    let api = seeded_api(&settings).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let validator = validator
        .unwrap_or_else(|| Arc::new(CodeValidationAdapter::new(settings.ai.clone()).unwrap()));
    let orchestrator = make_orchestrator(
        dir.path(),
        api.clone(),
        &settings,
        builder,
        validator,
        notifier.clone(),
    );

    Harness {
        _dir: dir,
        orchestrator,
        api,
        notifier,
        settings,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}, Arc::new(StubBuilder { reachable: true }), None).await
}

/// Write a static site and pack it into the deployment's backup slot
async fn stage_archive(orchestrator: &PipelineOrchestrator, deployment_id: &str) -> PathBuf {
    let site = tempfile::tempdir().unwrap();
    std::fs::write(site.path().join("index.html"), "<h1>hello</h1>").unwrap();
    std::fs::create_dir_all(site.path().join("assets")).unwrap();
    std::fs::write(site.path().join("assets/app.js"), "console.log(1);").unwrap();

    let mut bytes = Vec::new();
    pack_tar_gz(site.path(), &mut bytes).unwrap();
    orchestrator
        .deps()
        .vault
        .store(deployment_id, &bytes)
        .await
        .unwrap()
}

async fn create_deployment(
    orchestrator: &PipelineOrchestrator,
    id: &str,
    config: DeploymentConfig,
) -> PathBuf {
    let deployment = Deployment::new(id.to_string(), &config, Some("site.tar.gz".to_string()));
    orchestrator.deps().store.create(&deployment).await.unwrap();
    stage_archive(orchestrator, id).await
}

/// Pack an arbitrary file set into the deployment's backup slot
async fn stage_custom_archive(
    orchestrator: &PipelineOrchestrator,
    deployment_id: &str,
    files: &[(&str, &str)],
) -> PathBuf {
    let site = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        let path = site.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
    }
    let mut bytes = Vec::new();
    pack_tar_gz(site.path(), &mut bytes).unwrap();
    orchestrator
        .deps()
        .vault
        .store(deployment_id, &bytes)
        .await
        .unwrap()
}

fn path_shared_config(name: &str) -> DeploymentConfig {
    DeploymentConfig {
        mode: DeploymentMode::PathShared,
        target_name: name.to_string(),
        custom_domain: None,
        notification_targets: vec![],
        ai_enabled: false,
        domain_purchase_confirmed: false,
    }
}

fn host_shared_config(name: &str, domain: &str) -> DeploymentConfig {
    DeploymentConfig {
        mode: DeploymentMode::HostShared,
        target_name: name.to_string(),
        custom_domain: Some(domain.to_string()),
        notification_targets: vec!["ops@example.com".to_string()],
        ai_enabled: false,
        domain_purchase_confirmed: false,
    }
}

#[tokio::test]
async fn path_shared_static_site_deploys_end_to_end() {
    let h = harness().await;
    let archive = create_deployment(&h.orchestrator, "d-path", path_shared_config("My Blog")).await;

    let status = h.orchestrator.run("d-path", &archive).await.unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.orchestrator.deps().store.get("d-path").await.unwrap();
    assert_eq!(
        record.result_url.as_deref(),
        Some("https://sites.example.com/my-blog/")
    );
    // Static input: nothing to build, nothing to preview.
    assert_eq!(
        record.step_statuses[&PipelineStep::Build],
        StepStatus::Skipped
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Verify],
        StepStatus::Skipped
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Upload],
        StepStatus::Completed
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Notify],
        StepStatus::Completed
    );

    // Objects land under the site prefix with the right headers.
    let objects = h.api.objects_in("my-blog-site-shared").await;
    let index = objects.get("my-blog/index.html").expect("index uploaded");
    assert!(index.cache_control.contains("no-cache"));
    let js = objects.get("my-blog/assets/app.js").expect("js uploaded");
    assert!(js.cache_control.contains("max-age=3600"));

    // The shared routing table gained exactly the two path rules.
    let table = h
        .api
        .routing_table(&h.settings.cloud.shared.routing_table)
        .await
        .unwrap();
    let rules = &table.path_matchers[0].path_rules;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].paths, vec!["/my-blog", "/my-blog/*"]);

    // Success summary went out, and the backup was reclaimed.
    let sent = h.notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].success());
    drop(sent);
    assert!(h.orchestrator.deps().vault.fetch("d-path").await.is_err());
}

#[tokio::test]
async fn host_shared_deploys_with_certificate_and_dns() {
    let h = harness().await;
    let archive =
        create_deployment(&h.orchestrator, "d-host", host_shared_config("blog", "blog.example.com")).await;

    let status = h.orchestrator.run("d-host", &archive).await.unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.orchestrator.deps().store.get("d-host").await.unwrap();
    assert_eq!(record.result_url.as_deref(), Some("https://blog.example.com/"));
    // DOMAIN is skipped without auto-registration enabled.
    assert_eq!(
        record.step_statuses[&PipelineStep::Domain],
        StepStatus::Skipped
    );

    // Host rule routes the apex and www through a dedicated matcher.
    let table = h
        .api
        .routing_table(&h.settings.cloud.shared.routing_table)
        .await
        .unwrap();
    let rule = table
        .host_rules
        .iter()
        .find(|r| r.hosts.contains(&"blog.example.com".to_string()))
        .expect("host rule added");
    assert!(rule.hosts.contains(&"www.blog.example.com".to_string()));

    // Certificate attached to the shared terminator.
    let terminator = h
        .api
        .terminator(&h.settings.cloud.shared.terminator)
        .await
        .unwrap();
    assert!(terminator
        .certificates
        .contains(&"blog-example-com-cert".to_string()));

    // DNS: apex A record at the edge IP plus the www alias.
    let records = h.api.dns_records("blog-example-com-zone").await;
    let a = records.iter().find(|r| r.record_type == "A").unwrap();
    assert_eq!(a.values, vec![h.settings.cloud.shared.edge_ip.clone()]);
    assert!(records.iter().any(|r| r.record_type == "CNAME"));

    // Objects are uploaded without a prefix in this mode.
    let objects = h.api.objects_in("blog-example-com-site-host").await;
    assert!(objects.contains_key("index.html"));
}

#[tokio::test]
async fn terminator_capacity_fails_the_deployment_cleanly() {
    let h = harness().await;

    // Fill the terminator to its ceiling (seeded with 1 certificate).
    let client = ResourceClient::new(h.api.clone());
    for i in 1..h.settings.cloud.shared.certificate_limit {
        client
            .register_certificate(
                &h.settings.cloud.shared.terminator,
                &format!("filler-{}", i),
                h.settings.cloud.shared.certificate_limit,
            )
            .await
            .unwrap();
    }

    let archive =
        create_deployment(&h.orchestrator, "d-full", host_shared_config("shop", "shop.example.com")).await;
    let err = h.orchestrator.run("d-full", &archive).await.unwrap_err();
    assert!(err.is_conflict());

    let record = h.orchestrator.deps().store.get("d-full").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(
        record.step_statuses[&PipelineStep::Infra],
        StepStatus::Failed
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Upload],
        StepStatus::Skipped
    );
    // NOTIFY still ran and reported the failure.
    assert_eq!(
        record.step_statuses[&PipelineStep::Notify],
        StepStatus::Completed
    );
    let sent = h.notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].success());
    let error = record.error_message.unwrap();
    assert!(error.contains("terminator"), "error names the resource: {}", error);
}

#[tokio::test]
async fn container_mode_builds_an_image_and_rolls_out_a_service() {
    let h = harness().await;
    let config = DeploymentConfig {
        mode: DeploymentMode::Container,
        target_name: "api-demo".to_string(),
        custom_domain: None,
        notification_targets: vec![],
        ai_enabled: false,
        domain_purchase_confirmed: false,
    };
    let archive = create_deployment(&h.orchestrator, "d-cont", config).await;

    let status = h.orchestrator.run("d-cont", &archive).await.unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.orchestrator.deps().store.get("d-cont").await.unwrap();
    let url = record.result_url.unwrap();
    assert!(url.contains("api-demo"), "service url: {}", url);
    // Local build and verify are skipped, the provider builds the image,
    // and the upload step completes as a logged no-op.
    assert_eq!(
        record.step_statuses[&PipelineStep::Build],
        StepStatus::Skipped
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Verify],
        StepStatus::Skipped
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Upload],
        StepStatus::Completed
    );
}

#[tokio::test]
async fn rerunning_a_deployment_is_idempotent() {
    let h = harness().await;
    let archive = create_deployment(&h.orchestrator, "d-again", path_shared_config("again")).await;

    h.orchestrator.run("d-again", &archive).await.unwrap();
    // Stage a fresh backup since success reclaimed the first one.
    let archive = stage_archive(&h.orchestrator, "d-again").await;
    h.orchestrator.run("d-again", &archive).await.unwrap();

    let table = h
        .api
        .routing_table(&h.settings.cloud.shared.routing_table)
        .await
        .unwrap();
    assert_eq!(table.path_matchers[0].path_rules.len(), 1);
}

#[tokio::test]
async fn watchdog_restarts_a_stale_deployment_from_backup() {
    let h = harness().await;
    let _archive = create_deployment(&h.orchestrator, "d-stale", path_shared_config("stale-site")).await;

    // Simulate a run that died mid-pipeline long ago.
    h.orchestrator
        .deps()
        .store
        .update("d-stale", |d| {
            d.status = DeploymentStatus::Running;
            d.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(2000));
            d.current_step = Some(PipelineStep::Upload);
        })
        .await
        .unwrap();

    let options = watchdog::Options {
        holder: "test-watchdog".to_string(),
        ..watchdog::Options::default()
    };
    watchdog::sweep(&options, &h.orchestrator).await;

    // The recovered run happens on a spawned task; wait for it to finish.
    let mut record = h.orchestrator.deps().store.get("d-stale").await.unwrap();
    for _ in 0..100 {
        if record.status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        record = h.orchestrator.deps().store.get("d-stale").await.unwrap();
    }

    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.retry_count, 1);
    assert!(record.result_url.is_some());
}

#[tokio::test]
async fn watchdog_fails_a_deployment_out_of_retries() {
    let h = harness().await;
    let _archive = create_deployment(&h.orchestrator, "d-dead", path_shared_config("dead-site")).await;

    h.orchestrator
        .deps()
        .store
        .update("d-dead", |d| {
            d.status = DeploymentStatus::Running;
            d.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(2000));
            d.current_step = Some(PipelineStep::Infra);
            d.retry_count = 2;
        })
        .await
        .unwrap();

    let options = watchdog::Options {
        holder: "test-watchdog".to_string(),
        ..watchdog::Options::default()
    };
    watchdog::sweep(&options, &h.orchestrator).await;

    let record = h.orchestrator.deps().store.get("d-dead").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    let error = record.error_message.unwrap();
    assert!(error.contains("INFRA"), "error names the stuck step: {}", error);
    assert!(error.contains("ceiling"), "error mentions the timeout: {}", error);

    let sent = h.notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].success());
}

#[tokio::test]
async fn watchdog_skips_leased_deployments() {
    let h = harness().await;
    let _archive = create_deployment(&h.orchestrator, "d-leased", path_shared_config("leased-site")).await;

    h.orchestrator
        .deps()
        .store
        .update("d-leased", |d| {
            d.status = DeploymentStatus::Running;
            d.started_at = Some(chrono::Utc::now() - chrono::Duration::seconds(2000));
        })
        .await
        .unwrap();
    // Another watchdog holds the lease.
    assert!(h
        .orchestrator
        .deps()
        .store
        .try_acquire_lease("d-leased", "other-watchdog", 60)
        .await
        .unwrap());

    let options = watchdog::Options {
        holder: "this-watchdog".to_string(),
        ..watchdog::Options::default()
    };
    watchdog::sweep(&options, &h.orchestrator).await;

    let record = h.orchestrator.deps().store.get("d-leased").await.unwrap();
    // Untouched: still running, no retry consumed.
    assert_eq!(record.status, DeploymentStatus::Running);
    assert_eq!(record.retry_count, 0);
}

#[tokio::test]
async fn failed_verify_marks_the_step_and_skips_the_rest() {
    // Builder whose preview probe fails, and a buildable project so VERIFY
    // actually runs.
    let h = harness_with(|_| {}, Arc::new(StubBuilder { reachable: false }), None).await;

    let deployment = Deployment::new(
        "d-verify".to_string(),
        &path_shared_config("verify-site"),
        None,
    );
    h.orchestrator.deps().store.create(&deployment).await.unwrap();
    let archive = stage_custom_archive(
        &h.orchestrator,
        "d-verify",
        &[
            ("package.json", r#"{"scripts": {"build": "vite build"}}"#),
            ("index.html", "<h1>hi</h1>"),
        ],
    )
    .await;

    let err = h.orchestrator.run("d-verify", &archive).await.unwrap_err();
    assert!(matches!(err, DeployError::BuildError(_)));

    let record = h.orchestrator.deps().store.get("d-verify").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(
        record.step_statuses[&PipelineStep::Verify],
        StepStatus::Failed
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Infra],
        StepStatus::Skipped
    );
    // Nothing was provisioned for the failed site.
    assert!(h.api.objects_in("verify-site-site-shared").await.is_empty());
}

#[tokio::test]
async fn archive_without_a_manifest_fails_at_extract() {
    let h = harness().await;
    let deployment = Deployment::new(
        "d-manifest".to_string(),
        &path_shared_config("no-manifest"),
        Some("site.tar.gz".to_string()),
    );
    h.orchestrator.deps().store.create(&deployment).await.unwrap();
    let archive =
        stage_custom_archive(&h.orchestrator, "d-manifest", &[("notes.txt", "not a website")])
            .await;

    let err = h.orchestrator.run("d-manifest", &archive).await.unwrap_err();
    assert!(matches!(err, DeployError::InputError(_)));

    let record = h.orchestrator.deps().store.get("d-manifest").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(
        record.step_statuses[&PipelineStep::Extract],
        StepStatus::Failed
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::Upload],
        StepStatus::Skipped
    );
    // NOTIFY still delivers the failure.
    assert_eq!(
        record.step_statuses[&PipelineStep::Notify],
        StepStatus::Completed
    );
    let error = record.error_message.unwrap();
    assert!(
        error.contains("package.json"),
        "error names the missing manifest: {}",
        error
    );
}

#[tokio::test]
async fn reviewer_fixes_land_in_the_uploaded_artifact() {
    let mut fixes = BTreeMap::new();
    fixes.insert(
        "index.html".to_string(),
        "<script src=\"assets/app.js\"></script>".to_string(),
    );
    let reviewer = Arc::new(CannedReviewer {
        report: ValidationReport {
            pass: false,
            summary: "root-relative asset path breaks under the serving prefix".to_string(),
            fixes,
        },
    });
    let h = harness_with(
        |settings| settings.ai.enabled = true,
        Arc::new(StubBuilder { reachable: true }),
        Some(reviewer),
    )
    .await;

    let mut config = path_shared_config("review-site");
    config.ai_enabled = true;
    let deployment = Deployment::new(
        "d-review".to_string(),
        &config,
        Some("site.tar.gz".to_string()),
    );
    h.orchestrator.deps().store.create(&deployment).await.unwrap();
    let archive = stage_custom_archive(
        &h.orchestrator,
        "d-review",
        &[
            ("index.html", "<script src=\"/assets/app.js\"></script>"),
            ("assets/app.js", "console.log(1);"),
        ],
    )
    .await;

    let status = h.orchestrator.run("d-review", &archive).await.unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.orchestrator.deps().store.get("d-review").await.unwrap();
    assert_eq!(
        record.step_statuses[&PipelineStep::AiInspect],
        StepStatus::Completed
    );
    assert_eq!(
        record.step_statuses[&PipelineStep::AiFix],
        StepStatus::Completed
    );
    assert_eq!(
        record.ai_summary.as_deref(),
        Some("root-relative asset path breaks under the serving prefix")
    );

    // The uploaded page carries the rewritten reference, not the flagged one.
    let objects = h.api.objects_in("review-site-site-shared").await;
    let index = String::from_utf8(objects["review-site/index.html"].bytes.clone()).unwrap();
    assert!(!index.contains("\"/assets/app.js\""), "fix applied: {}", index);
    assert!(index.contains("\"assets/app.js\""));
}

#[tokio::test]
async fn record_stays_non_terminal_until_notify_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let settings = base_settings(dir.path());
    let api = seeded_api(&settings).await;
    let spy = Arc::new(StatusSpyNotifier {
        store: DeploymentStore::new(StorageLayout::new(dir.path())),
        seen: Mutex::new(None),
    });
    let orchestrator = make_orchestrator(
        dir.path(),
        api,
        &settings,
        Arc::new(StubBuilder { reachable: true }),
        Arc::new(CodeValidationAdapter::new(settings.ai.clone()).unwrap()),
        spy.clone(),
    );

    let archive =
        create_deployment(&orchestrator, "d-order", path_shared_config("order-site")).await;
    let status = orchestrator.run("d-order", &archive).await.unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    // What the notifier saw mid-delivery: the record was not yet terminal,
    // with NOTIFY as the step in flight.
    let (seen_status, seen_notify) = spy.seen.lock().await.clone().expect("notifier ran");
    assert_eq!(seen_status, DeploymentStatus::Running);
    assert_eq!(seen_notify, StepStatus::Running);

    // And afterwards the record is terminal with nothing left running.
    let record = orchestrator.deps().store.get("d-order").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);
    assert!(record.completed_at.is_some());
    assert!(record
        .step_statuses
        .values()
        .all(|s| *s != StepStatus::Running));
}

#[tokio::test]
async fn confirmed_domain_purchase_registers_through_the_provider() {
    let h = harness_with(
        |settings| settings.cloud.auto_register_domains = true,
        Arc::new(StubBuilder { reachable: true }),
        None,
    )
    .await;

    let mut config = host_shared_config("shop", "shop.example.com");
    config.domain_purchase_confirmed = true;
    let archive = create_deployment(&h.orchestrator, "d-domain", config).await;

    let status = h.orchestrator.run("d-domain", &archive).await.unwrap();
    assert_eq!(status, DeploymentStatus::Success);

    let record = h.orchestrator.deps().store.get("d-domain").await.unwrap();
    assert_eq!(
        record.step_statuses[&PipelineStep::Domain],
        StepStatus::Completed
    );
    assert_eq!(
        h.api.registered_domains().await,
        vec!["shop.example.com".to_string()]
    );
}

#[tokio::test]
async fn logs_accumulate_in_order_for_a_run() {
    let h = harness().await;
    let archive = create_deployment(&h.orchestrator, "d-logs", path_shared_config("log-site")).await;
    h.orchestrator.run("d-logs", &archive).await.unwrap();

    let logs = h.orchestrator.deps().store.get_logs("d-logs").await.unwrap();
    assert!(!logs.is_empty());
    // Timestamps never go backwards.
    for pair in logs.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    // The step lifecycle shows up in the durable log.
    assert!(logs.iter().any(|l| l.message.contains("Starting EXTRACT")));
    assert!(logs
        .iter()
        .any(|l| l.message.contains("Step UPLOAD completed")));
}
