mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use po_core::models::{DeploymentStatus, Health};
use po_core::{ErrorKind, OrchestratorError};

use common::{harness, harness_with};

#[tokio::test]
async fn deploy_runs_container_and_records_running() {
    let h = harness().await;
    let project = h.add_project("landing").await;

    let deployment = h.deploy(project).await;

    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(deployment.host_port, Some(45000));
    assert_eq!(deployment.url.as_deref(), Some("http://localhost:45000"));
    assert!(deployment.last_built_at.is_some());
    let container = h
        .engine
        .container(deployment.container_id.as_deref().unwrap())
        .unwrap();
    assert!(container.running);
    assert_eq!(container.name, format!("po-preview-{project}-{}", deployment.id));
    assert_eq!(
        container.labels.get("po.deployment-id").map(String::as_str),
        Some(deployment.id.to_string().as_str())
    );

    let dir = h.orchestrator.materializer().project_dir(project);
    assert!(dir.join("Dockerfile").is_file());
    assert!(dir.join("style.css").is_file());

    let transitions: Vec<_> = h
        .store
        .events_for_deployment(deployment.id)
        .await
        .into_iter()
        .map(|e| (e.from, e.to))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (None, DeploymentStatus::Starting),
            (Some(DeploymentStatus::Starting), DeploymentStatus::Running),
        ]
    );
}

#[tokio::test]
async fn redeploy_leaves_exactly_one_running() {
    let h = harness().await;
    let project = h.add_project("landing").await;

    let first = h.deploy(project).await;
    let second = h.deploy(project).await;

    assert_eq!(h.engine.running_count(), 1);
    let first = h.store.get_deployment(first.id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Stopped);
    assert_eq!(second.status, DeploymentStatus::Running);
    assert_eq!(h.engine.with(|s| s.builds), 2);
}

#[tokio::test]
async fn start_reuses_existing_image() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let first = h.deploy(project).await;

    let second = h
        .orchestrator
        .start(project, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.engine.with(|s| s.builds), 1);
    assert_eq!(second.status, DeploymentStatus::Running);
    assert_eq!(second.last_built_at, first.last_built_at);
}

#[tokio::test]
async fn stop_keeps_container_and_is_idempotent() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    let container_id = deployment.container_id.clone().unwrap();

    let stopped = h.orchestrator.stop(deployment.id).await.unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Stopped);
    let container = h.engine.container(&container_id).unwrap();
    assert!(!container.running);

    let again = h.orchestrator.stop(deployment.id).await.unwrap();
    assert_eq!(again.status, DeploymentStatus::Stopped);

    let report = h.orchestrator.status(deployment.id).await.unwrap();
    assert_eq!(report.status, DeploymentStatus::Stopped);
    assert_eq!(report.health, Health::Stopped);
}

#[tokio::test]
async fn stop_escalates_to_kill_when_graceful_stop_times_out() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    h.engine.with(|s| s.stop_times_out = true);

    let stopped = h.orchestrator.stop(deployment.id).await.unwrap();

    assert_eq!(stopped.status, DeploymentStatus::Stopped);
    assert_eq!(h.engine.with(|s| s.kills), 1);
    assert_eq!(h.engine.running_count(), 0);
}

#[tokio::test]
async fn status_reports_health_and_stats() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;

    let report = h.orchestrator.status(deployment.id).await.unwrap();

    assert_eq!(report.status, DeploymentStatus::Running);
    assert_eq!(report.health, Health::Healthy);
    assert_eq!(report.stats.cpu_percent, Some(0.5));
    assert_eq!(report.stats.memory_percent, Some(1.25));
    assert!(report.stats.uptime_secs.is_some());
}

#[tokio::test]
async fn status_of_vanished_container_is_missing_and_read_only() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    let container_id = deployment.container_id.clone().unwrap();
    h.engine.with(|s| s.containers.remove(&container_id));
    let events_before = h.store.events_for_deployment(deployment.id).await.len();

    let report = h.orchestrator.status(deployment.id).await.unwrap();

    assert_eq!(report.health, Health::Missing);
    assert_eq!(report.stats.cpu_percent, None);
    assert_eq!(report.stats.uptime_secs, None);
    let record = h.store.get_deployment(deployment.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert_eq!(
        h.store.events_for_deployment(deployment.id).await.len(),
        events_before
    );
}

#[tokio::test]
async fn restart_reuses_container_when_port_is_free() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    h.orchestrator.stop(deployment.id).await.unwrap();

    let restarted = h
        .orchestrator
        .restart(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(restarted.status, DeploymentStatus::Running);
    assert_eq!(restarted.container_id, deployment.container_id);
    assert_eq!(restarted.host_port, deployment.host_port);
    assert_eq!(h.engine.with(|s| s.runs), 1);
}

#[tokio::test]
async fn restart_moves_to_new_port_when_old_one_is_taken() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    h.orchestrator.stop(deployment.id).await.unwrap();
    h.engine
        .occupy_port(&h.orchestrator.config().owner_label, 45000);

    let restarted = h
        .orchestrator
        .restart(deployment.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(restarted.status, DeploymentStatus::Running);
    assert_eq!(restarted.host_port, Some(45001));
    assert_ne!(restarted.container_id, deployment.container_id);
    let old = deployment.container_id.unwrap();
    assert!(h.engine.container(&old).is_none());
}

#[tokio::test]
async fn launch_is_retried_after_a_transient_failure() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    h.engine.with(|s| s.run_failures = 1);

    let deployment = h.deploy(project).await;

    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(h.engine.with(|s| s.runs), 2);
    assert_eq!(h.engine.with(|s| s.containers.len()), 1);
}

#[tokio::test]
async fn exhausted_retries_persist_error_and_leave_nothing_behind() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    h.engine.with(|s| s.run_failures = 5);

    let err = h
        .orchestrator
        .deploy(project, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::StartFailed(_)));
    assert_eq!(h.engine.with(|s| s.runs), 2);
    assert!(h.engine.with(|s| s.containers.is_empty()));
    let record = h.store.deployments_for_project(project).await.pop().unwrap();
    assert_eq!(record.status, DeploymentStatus::Error);
    assert_eq!(record.host_port, None);
    assert!(record.last_error.unwrap().contains("2 attempt(s) failed"));
}

#[tokio::test]
async fn build_failure_marks_deployment_error_with_output() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    h.engine.with(|s| s.fail_builds = true);

    let err = h
        .orchestrator
        .deploy(project, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BuildFailed);
    assert_eq!(h.engine.with(|s| s.runs), 0);
    let record = h.store.deployments_for_project(project).await.pop().unwrap();
    assert_eq!(record.status, DeploymentStatus::Error);
    assert!(record.last_error.unwrap().contains("npm ERR!"));
}

#[tokio::test]
async fn previous_deployment_keeps_serving_when_rebuild_fails() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let first = h.deploy(project).await;
    h.engine.with(|s| s.fail_builds = true);

    h.orchestrator
        .deploy(project, &CancellationToken::new())
        .await
        .unwrap_err();

    let first = h.store.get_deployment(first.id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Running);
    assert_eq!(h.engine.running_count(), 1);
}

#[tokio::test]
async fn missing_engine_fails_fast_with_503() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    h.engine.with(|s| s.available = false);

    let result = h.deployer.deploy(project, &CancellationToken::new()).await;

    assert!(!result.success);
    assert_eq!(result.status_code, 503);
    assert_eq!(result.error_kind, Some(ErrorKind::EngineUnavailable));
    assert!(h.store.list_deployments().await.is_empty());
}

#[tokio::test]
async fn exhausted_port_range_is_507() {
    let h = harness_with(|config| {
        config.port_range.start = 45000;
        config.port_range.end = 45000;
    })
    .await;
    let project = h.add_project("landing").await;
    h.engine
        .occupy_port(&h.orchestrator.config().owner_label, 45000);

    let result = h.deployer.deploy(project, &CancellationToken::new()).await;

    assert_eq!(result.status_code, 507);
    assert_eq!(result.error_kind, Some(ErrorKind::ResourceExhausted));
    let record = h.store.deployments_for_project(project).await.pop().unwrap();
    assert_eq!(record.status, DeploymentStatus::Error);
}

#[tokio::test]
async fn concurrent_deploys_of_different_projects_get_distinct_ports() {
    let h = harness().await;
    let a = h.add_project("alpha").await;
    let b = h.add_project("beta").await;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        h.orchestrator.deploy(a, &cancel),
        h.orchestrator.deploy(b, &cancel)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.host_port, second.host_port);
    assert_eq!(h.engine.running_count(), 2);
}

#[tokio::test]
async fn cancelled_build_marks_deployment_cancelled() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    h.engine.with(|s| s.hang_builds = true);
    let cancel = CancellationToken::new();

    let orchestrator = h.orchestrator.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move { orchestrator.deploy(project, &token).await });
    cancel.cancel();
    let err = task.await.unwrap().unwrap_err();

    assert!(matches!(err, OrchestratorError::Cancelled));
    let record = h.store.deployments_for_project(project).await.pop().unwrap();
    assert_eq!(record.status, DeploymentStatus::Error);
    assert_eq!(record.last_error.as_deref(), Some("cancelled"));
    assert_eq!(h.engine.with(|s| s.runs), 0);
}

#[tokio::test]
async fn logs_return_the_requested_tail() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    h.engine
        .with(|s| s.logs = "booting\nlistening on :80\nGET / 200\n".into());

    let logs = h.orchestrator.logs(deployment.id, 2).await.unwrap();
    assert_eq!(logs, "listening on :80\nGET / 200");

    let result = h.deployer.get_logs(deployment.id, 100).await;
    assert!(result.success);
    assert_eq!(result.data.unwrap().logs.lines().count(), 3);
}

#[tokio::test]
async fn unknown_deployment_is_404() {
    let h = harness().await;

    assert_eq!(h.deployer.get_status(999).await.status_code, 404);
    assert_eq!(h.deployer.stop(999).await.status_code, 404);
    assert_eq!(h.deployer.get_logs(999, 10).await.status_code, 404);
}

#[tokio::test]
async fn unknown_project_is_404() {
    let h = harness().await;
    let result = h.deployer.deploy(42, &CancellationToken::new()).await;
    assert_eq!(result.status_code, 404);
}

#[tokio::test]
async fn reconcile_repairs_records_whose_container_drifted() {
    let h = harness().await;
    let vanished = h.add_project("vanished").await;
    let crashed = h.add_project("crashed").await;
    let healthy = h.add_project("healthy").await;
    let vanished = h.deploy(vanished).await;
    let crashed = h.deploy(crashed).await;
    let healthy = h.deploy(healthy).await;

    h.engine.with(|s| {
        s.containers.remove(vanished.container_id.as_ref().unwrap());
        let c = s
            .containers
            .get_mut(crashed.container_id.as_ref().unwrap())
            .unwrap();
        c.running = false;
        c.exit_code = 1;
    });

    assert_eq!(h.orchestrator.reconcile().await.unwrap(), 2);

    let vanished = h.store.get_deployment(vanished.id).await.unwrap();
    assert_eq!(vanished.status, DeploymentStatus::Stopped);
    assert_eq!(
        vanished.last_error.as_deref(),
        Some("container no longer exists")
    );
    let crashed = h.store.get_deployment(crashed.id).await.unwrap();
    assert_eq!(crashed.status, DeploymentStatus::Error);
    let healthy = h.store.get_deployment(healthy.id).await.unwrap();
    assert_eq!(healthy.status, DeploymentStatus::Running);

    assert_eq!(h.orchestrator.reconcile().await.unwrap(), 0);
}

#[tokio::test]
async fn listings_reflect_store_and_engine() {
    let h = harness().await;
    let a = h.add_project("alpha").await;
    let b = h.add_project("beta").await;
    h.deploy(a).await;
    let second = h.deploy(b).await;
    h.orchestrator.stop(second.id).await.unwrap();

    let all = h.deployer.list_all().await.data.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].name, format!("po-preview-{b}-{}", second.id));
    assert_eq!(all[1].status, DeploymentStatus::Stopped);

    let running = h.deployer.list_running().await.data.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].project_id(), Some(a));
}

#[tokio::test]
async fn subdomain_urls_do_not_carry_the_port() {
    let h = harness_with(|config| {
        config.use_subdomains = true;
        config.domain = "preview.example.com".into();
    })
    .await;
    let project = h.add_project("landing").await;

    let deployment = h.deploy(project).await;

    assert_eq!(
        deployment.url,
        Some(format!("https://project-{project}.preview.example.com"))
    );
}

#[tokio::test]
async fn concurrent_deploys_of_the_same_project_leave_one_running() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        h.orchestrator.deploy(project, &cancel),
        h.orchestrator.deploy(project, &cancel)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.id, second.id);
    assert_eq!(h.engine.running_count(), 1);
    let running: Vec<_> = h
        .store
        .deployments_for_project(project)
        .await
        .into_iter()
        .filter(|d| d.status == DeploymentStatus::Running)
        .collect();
    assert_eq!(running.len(), 1);
}

#[tokio::test]
async fn deploys_from_two_processes_are_serialised() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let other = h.second_process().await;
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        h.orchestrator.deploy(project, &cancel),
        other.deploy(project, &cancel)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.id, second.id);
    assert_eq!(h.engine.running_count(), 1);
    let records = h.store.deployments_for_project(project).await;
    assert_eq!(records.len(), 2);
    assert_eq!(
        records
            .iter()
            .filter(|d| d.status == DeploymentStatus::Running)
            .count(),
        1
    );
}

#[tokio::test]
async fn redeploy_after_a_failed_stop_halts_the_old_container() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let first = h.deploy(project).await;

    h.engine.with(|s| s.available = false);
    let err = h.orchestrator.stop(first.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    let record = h.store.get_deployment(first.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Error);
    h.engine.with(|s| s.available = true);

    let second = h.deploy(project).await;

    assert_eq!(h.engine.running_count(), 1);
    let first = h.store.get_deployment(first.id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Stopped);
    assert_eq!(second.status, DeploymentStatus::Running);
    let survivor = h.engine.container(second.container_id.as_deref().unwrap()).unwrap();
    assert!(survivor.running);
}

#[tokio::test]
async fn reconcile_halts_containers_left_running_under_an_error_record() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    let deployment = h.deploy(project).await;
    h.engine.with(|s| s.available = false);
    h.orchestrator.stop(deployment.id).await.unwrap_err();
    h.engine.with(|s| s.available = true);

    assert_eq!(h.orchestrator.reconcile().await.unwrap(), 1);

    let record = h.store.get_deployment(deployment.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Stopped);
    assert_eq!(h.engine.running_count(), 0);
    assert_eq!(h.orchestrator.reconcile().await.unwrap(), 0);
}

#[tokio::test]
async fn build_waits_for_the_project_lock_before_touching_files() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    h.deploy(project).await;
    let marker = h
        .orchestrator
        .materializer()
        .project_dir(project)
        .join("in-use.txt");
    std::fs::write(&marker, "serving").unwrap();
    let cancel = CancellationToken::new();

    let guard = h.orchestrator.lock_project(project).await.unwrap();
    let blocked = tokio::time::timeout(
        Duration::from_millis(200),
        h.deployer.build(project, &cancel),
    )
    .await;
    assert!(blocked.is_err());
    assert!(marker.is_file());
    assert_eq!(h.engine.with(|s| s.builds), 1);

    drop(guard);
    let built = h.deployer.build(project, &cancel).await;
    assert!(built.success);
    assert!(!marker.exists());
}

#[tokio::test]
async fn launch_moves_to_another_port_when_the_first_is_taken() {
    let h = harness().await;
    let project = h.add_project("landing").await;
    // Held by a container outside our ownership label, so only the engine
    // knows about it.
    h.engine.occupy_port("someone-else", 45000);

    let deployment = h.deploy(project).await;

    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(deployment.host_port, Some(45001));
    assert_eq!(deployment.url.as_deref(), Some("http://localhost:45001"));
    assert_eq!(h.engine.with(|s| s.runs), 2);
}
