use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kameo::actor::Spawn;
use tempfile::TempDir;

use metalprov_core::*;
use metalprov_exec::{CommandLine, CommandResult, CommandRunner, ExecError, RunOptions};

// Mock implementations
#[derive(Default)]
struct ScriptedRunner {
    rules: Mutex<Vec<(String, VecDeque<CommandResult>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Answer commands containing `pattern` with `results` in order, repeating the last
    fn on(&self, pattern: &str, results: Vec<CommandResult>) -> &Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), results.into()));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, cmd: &CommandLine, _opts: &RunOptions) -> Result<CommandResult, ExecError> {
        let line = cmd.to_string();
        self.calls.lock().unwrap().push(line.clone());

        let mut rules = self.rules.lock().unwrap();
        let result = rules
            .iter_mut()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .and_then(|(_, results)| {
                if results.len() > 1 {
                    results.pop_front()
                } else {
                    results.front().cloned()
                }
            })
            .unwrap_or_else(|| ok(""));

        Ok(result)
    }

    fn runner_type(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Debug, Clone)]
struct Seen {
    operation: String,
    diagnostic: Option<String>,
    attempt: u32,
    cleanup_allowed: bool,
}

#[derive(Default)]
struct ScriptedDecisions {
    answers: Mutex<VecDeque<RetryDecision>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedDecisions {
    fn new(answers: &[RetryDecision]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            seen: Mutex::default(),
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedDecisions {
    async fn decide(&self, notice: &FailureNotice<'_>) -> Result<RetryDecision, CoreError> {
        self.seen.lock().unwrap().push(Seen {
            operation: notice.operation.to_string(),
            diagnostic: notice.diagnostic.map(str::to_string),
            attempt: notice.attempt,
            cleanup_allowed: notice.cleanup_allowed,
        });
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RetryDecision::Quit))
    }
}

fn ok(stdout: &str) -> CommandResult {
    CommandResult {
        status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

fn failed(stdout: &str, stderr: &str) -> CommandResult {
    exited(1, stdout, stderr)
}

fn exited(status: i32, stdout: &str, stderr: &str) -> CommandResult {
    CommandResult {
        status,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(1),
    }
}

/// Inventory path passed to the last `ansible-playbook` run
fn playbook_inventory(runner: &ScriptedRunner) -> PathBuf {
    let call = runner
        .calls()
        .into_iter()
        .rev()
        .find(|c| c.starts_with("ansible-playbook"))
        .unwrap();
    let mut words = call.split_whitespace();
    words.find(|w| *w == "-i").unwrap();
    PathBuf::from(words.next().unwrap())
}

const DRIVER_ACTIONS: [&str; 5] = ["deploy", "poll", "cancel", "reset", "reboot"];

fn install_driver(remotes: &Path, driver: &str) {
    let dir = remotes.join("pm").join(driver);
    std::fs::create_dir_all(&dir).unwrap();
    for action in DRIVER_ACTIONS {
        let path = dir.join(action);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

fn seeded_host() -> HostRecord {
    let mut template = HostTemplate {
        im_mad: "kvm".to_string(),
        vm_mad: "kvm".to_string(),
        pm_mad: Some("dummy".to_string()),
        provision_configuration_status: Some(ConfigurationStatus::Pending),
        ..HostTemplate::default()
    };
    template.set_deploy_id("abc-123");

    HostRecord {
        id: 0,
        name: "node1".to_string(),
        state: HostState::Enabled,
        running_vms: 0,
        cluster_id: -1,
        last_mon_time: None,
        template,
    }
}

struct Harness {
    _remotes: TempDir,
    runner: Arc<ScriptedRunner>,
    store: Arc<MemoryHostStore>,
    lifecycle: Arc<HostLifecycle>,
}

fn harness(ctx: OrchestrationContext, decisions: Arc<dyn DecisionProvider>) -> Harness {
    let remotes = TempDir::new().unwrap();
    install_driver(remotes.path(), "dummy");

    let ctx = Arc::new(
        ctx.with_remotes_dir(remotes.path())
            .with_ping(Duration::ZERO, 2),
    );
    let runner = Arc::new(ScriptedRunner::default());
    runner.on("--version", vec![ok("ansible 2.5.4\n")]);
    let store = Arc::new(MemoryHostStore::with_records([seeded_host()]));

    let lifecycle = Arc::new(HostLifecycle::new(
        ctx,
        store.clone(),
        runner.clone(),
        decisions,
    ));

    Harness {
        _remotes: remotes,
        runner,
        store,
        lifecycle,
    }
}

fn batch(policy: RetryDecision, max_retries: u32) -> OrchestrationContext {
    OrchestrationContext::default()
        .with_mode(RunMode::Batch)
        .with_fail_policy(policy, max_retries)
}

fn policy(policy: RetryDecision) -> Arc<dyn DecisionProvider> {
    Arc::new(PolicyDecisions::new(policy))
}

#[tokio::test]
async fn test_configure_success_enables_host() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner
        .on("-m raw", vec![ok("node1 | SUCCESS | rc=0 >>\n")])
        .on("ansible-playbook", vec![ok("PLAY RECAP\n")]);

    let outcome = h.lifecycle.configure(0, true).await.unwrap();
    assert_eq!(outcome, Outcome::Completed(()));

    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.configuration_status(), Some(ConfigurationStatus::Configured));
    assert_eq!(host.state, HostState::Enabled);
    assert_eq!(h.runner.count("-m raw"), 1);
    assert_eq!(h.runner.count("ansible-playbook"), 1);
}

#[tokio::test]
async fn test_probe_retries_before_configuring() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner
        .on(
            "-m raw",
            vec![
                ok("node1 | UNREACHABLE! => {}\n"),
                ok("node1 | SUCCESS | rc=0 >>\n"),
            ],
        )
        .on("ansible-playbook", vec![ok("")]);

    h.lifecycle.configure(0, true).await.unwrap();
    assert_eq!(h.runner.count("-m raw"), 2);
}

#[tokio::test]
async fn test_partial_reachability_does_not_pass() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    let partial = "10.0.0.5 | SUCCESS | rc=0 >>\n10.0.0.6 | UNREACHABLE! => {}\n";
    h.runner
        .on("-m raw", vec![exited(4, partial, "")])
        .on("ansible-playbook", vec![ok("")]);

    let err = h.lifecycle.configure(0, true).await.unwrap_err();
    match err {
        CoreError::RetriesExhausted {
            operation,
            attempts,
        } => {
            assert_eq!(operation, "SSH connection is failing");
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Two private attempts, then one under the failure policy
    assert_eq!(h.runner.count("-m raw"), 3);
    assert_eq!(h.runner.count("ansible-playbook"), 0);
    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.configuration_status(), Some(ConfigurationStatus::Pending));
}

#[tokio::test]
async fn test_unreachable_host_escalates_without_cleanup() {
    let decisions = Arc::new(ScriptedDecisions::new(&[
        RetryDecision::Retry,
        RetryDecision::Skip,
    ]));
    let h = harness(
        OrchestrationContext::default().with_mode(RunMode::Interactive),
        decisions.clone(),
    );
    h.runner
        .on("-m raw", vec![exited(4, "node1 | UNREACHABLE! => {}\n", "")])
        .on("ansible-playbook", vec![ok("")]);

    // A skipped reachability check still configures the host
    let outcome = h.lifecycle.configure(0, true).await.unwrap();
    assert_eq!(outcome, Outcome::Completed(()));

    let seen = decisions.seen();
    assert_eq!(seen.len(), 2);
    for notice in &seen {
        assert_eq!(notice.operation, "SSH connection is failing");
        assert!(!notice.cleanup_allowed);
    }
    assert_eq!(seen[0].attempt, 1);
    assert_eq!(seen[1].attempt, 2);

    assert_eq!(h.runner.count("-m raw"), 4);
    assert_eq!(h.runner.count("ansible-playbook"), 1);
}

#[tokio::test]
async fn test_bundle_removed_after_success() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner.on("ansible-playbook", vec![ok("")]);

    h.lifecycle.configure(0, false).await.unwrap();

    let inventory = playbook_inventory(&h.runner);
    assert!(inventory.ends_with("inventory"));
    assert!(!inventory.exists());
}

#[tokio::test]
async fn test_bundle_removed_after_failure() {
    let h = harness(batch(RetryDecision::Retry, 1), policy(RetryDecision::Retry));
    h.runner.on("ansible-playbook", vec![failed("", "")]);

    let err = h.lifecycle.configure(0, false).await.unwrap_err();
    assert!(matches!(err, CoreError::RetriesExhausted { .. }));
    assert!(!playbook_inventory(&h.runner).exists());
}

#[tokio::test]
async fn test_bundle_removed_after_skip() {
    let h = harness(batch(RetryDecision::Skip, 3), policy(RetryDecision::Skip));
    h.runner.on("ansible-playbook", vec![failed("", "")]);

    let outcome = h.lifecycle.configure(0, false).await.unwrap();
    assert!(outcome.is_skipped());
    assert!(!playbook_inventory(&h.runner).exists());
}

#[tokio::test]
async fn test_bundle_kept_on_request() {
    let mut ctx = batch(RetryDecision::Quit, 0);
    ctx.ansible.keep_bundle = true;
    let h = harness(ctx, policy(RetryDecision::Quit));
    h.runner.on("ansible-playbook", vec![ok("")]);

    h.lifecycle.configure(0, false).await.unwrap();

    let inventory = playbook_inventory(&h.runner);
    assert!(inventory.exists());
    let bundle = inventory.parent().unwrap();
    assert!(bundle.join("group_vars").join("all").exists());
    std::fs::remove_dir_all(bundle).unwrap();
}

#[tokio::test]
async fn test_configure_failure_leaves_error_status() {
    let h = harness(batch(RetryDecision::Retry, 2), policy(RetryDecision::Retry));
    h.runner.on("ansible-playbook", vec![failed("", "")]);

    let err = h.lifecycle.configure(0, false).await.unwrap_err();
    assert!(matches!(err, CoreError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(h.runner.count("ansible-playbook"), 3);

    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.configuration_status(), Some(ConfigurationStatus::Error));
    assert_eq!(host.state, HostState::Offline);
}

#[tokio::test]
async fn test_configure_quit_leaves_error_status() {
    let h = harness(batch(RetryDecision::Quit, 3), policy(RetryDecision::Quit));
    h.runner.on("ansible-playbook", vec![failed("", "")]);

    let err = h.lifecycle.configure(0, false).await.unwrap_err();
    assert!(matches!(err, CoreError::Quit(_)));

    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.configuration_status(), Some(ConfigurationStatus::Error));
}

#[tokio::test]
async fn test_playbook_report_reaches_operator() {
    let decisions = Arc::new(ScriptedDecisions::new(&[RetryDecision::Skip]));
    let h = harness(
        OrchestrationContext::default().with_mode(RunMode::Interactive),
        decisions.clone(),
    );
    let transcript = "TASK [Install pkg] ****\nfatal: [node1]: FAILED! => {\"msg\": \"no space\\nleft\"}\n";
    h.runner.on("ansible-playbook", vec![failed(transcript, "")]);

    let outcome = h.lifecycle.configure(0, false).await.unwrap();
    assert!(outcome.is_skipped());

    let seen = decisions.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].operation, "Configuration failed");
    let report = seen[0].diagnostic.clone().unwrap();
    assert!(report.contains("node1"));
    assert!(report.contains("TASK[Install pkg]"));
    assert!(report.contains("no space left"));

    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.configuration_status(), Some(ConfigurationStatus::Error));
}

#[tokio::test]
async fn test_unsupported_ansible_stops_before_playbook() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner.rules.lock().unwrap().clear();
    h.runner.on("--version", vec![ok("ansible 2.9.6\n")]);

    let err = h.lifecycle.configure(0, false).await.unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedAnsible { .. }));
    assert_eq!(h.runner.count("ansible-playbook"), 0);
}

#[tokio::test]
async fn test_delete_with_running_workloads_skips_cancel() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.store.set_running_vms(0, 2).await.unwrap();

    let err = h.lifecycle.delete(0).await.unwrap_err();
    assert!(matches!(err, CoreError::RunningWorkloads { count: 2 }));
    assert_eq!(h.runner.count("pm/dummy/cancel"), 0);

    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.state, HostState::Enabled);
}

#[tokio::test]
async fn test_delete_cancels_and_removes_record() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));

    h.lifecycle.delete(0).await.unwrap();

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].ends_with("pm/dummy/cancel abc-123 node1 0 node1"));
    assert!(matches!(h.store.info(0).await, Err(CoreError::HostNotFound(0))));
}

#[tokio::test]
async fn test_delete_requires_driver() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    let mut host = seeded_host();
    host.id = 1;
    host.template.pm_mad = None;
    let store = MemoryHostStore::with_records([host]);
    let lifecycle = HostLifecycle::new(
        Arc::new(h.lifecycle.context().clone()),
        Arc::new(store),
        h.runner.clone(),
        policy(RetryDecision::Quit),
    );

    assert!(matches!(lifecycle.delete(1).await, Err(CoreError::InvalidHost)));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_provision_flow() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner
        .on("pm/dummy/deploy", vec![ok("dep-42\n")])
        .on("pm/dummy/poll", vec![ok("STATE=running GUEST_IP_ADDRESSES=10.0.0.5")])
        .on("-m raw", vec![ok("10.0.0.5 | SUCCESS | rc=0 >>\n")])
        .on("ansible-playbook", vec![ok("")]);

    let yaml = r"
provision:
  driver: dummy
configuration:
  ntp_server: pool.ntp.org
devices:
  - provision:
      plan: baremetal_0
";
    let device = DeviceFile::from_yaml(yaml).unwrap().devices().remove(0);

    let record = h
        .lifecycle
        .provision(&device, true)
        .await
        .unwrap()
        .into_option()
        .unwrap();

    assert_eq!(record.name, "10.0.0.5");
    assert_eq!(record.template.deploy_id(), Some("dep-42"));
    assert_eq!(record.state, HostState::Enabled);
    assert_eq!(
        record.configuration_status(),
        Some(ConfigurationStatus::Configured)
    );
    assert!(record.last_mon_time.is_some());

    let deploy = h
        .runner
        .calls()
        .into_iter()
        .find(|c| c.contains("pm/dummy/deploy"))
        .unwrap();
    assert!(deploy.ends_with(" -"));
}

#[tokio::test]
async fn test_provision_cleanup_deletes_host() {
    let decisions = Arc::new(ScriptedDecisions::new(&[RetryDecision::Cleanup]));
    let h = harness(
        OrchestrationContext::default().with_mode(RunMode::Interactive),
        decisions.clone(),
    );
    h.runner
        .on("pm/dummy/deploy", vec![ok("dep-42")])
        .on("pm/dummy/poll", vec![failed("", "")]);

    let device = DeviceFile::from_yaml("provision:\n  driver: dummy\ndevices:\n  - {}\n")
        .unwrap()
        .devices()
        .remove(0);

    let err = h.lifecycle.provision(&device, false).await.unwrap_err();
    assert!(matches!(err, CoreError::CleanupRequested));

    assert_eq!(h.runner.count("pm/dummy/cancel"), 1);
    // Only the seeded host survives
    let hosts = h.store.list().await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].id, 0);
}

#[tokio::test]
async fn test_missing_deploy_id_is_fatal() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner.on("pm/dummy/deploy", vec![ok("  \n")]);

    let device = DeviceFile::from_yaml("provision:\n  driver: dummy\ndevices:\n  - {}\n")
        .unwrap()
        .devices()
        .remove(0);

    let err = h.lifecycle.provision(&device, false).await.unwrap_err();
    assert!(matches!(err, CoreError::MissingDeployId));
    assert_eq!(h.store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_soft_reset_reboots() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));

    let renamed = h.lifecycle.reset(0, false).await.unwrap();
    assert_eq!(renamed, None);
    assert_eq!(h.runner.count("pm/dummy/reboot"), 1);
    assert_eq!(h.runner.count("pm/dummy/reset"), 0);
    assert_eq!(h.store.info(0).await.unwrap().state, HostState::Enabled);
}

#[tokio::test]
async fn test_hard_reset_renames() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner
        .on("pm/dummy/poll", vec![ok("AWS_PUBLIC_IP_ADDRESS=(54.1.2.3)")]);

    let renamed = h.lifecycle.reset(0, true).await.unwrap();
    assert_eq!(renamed.as_deref(), Some("54.1.2.3"));
    assert_eq!(h.runner.count("pm/dummy/reset"), 1);

    let host = h.store.info(0).await.unwrap();
    assert_eq!(host.name, "54.1.2.3");
    assert_eq!(host.state, HostState::Enabled);
}

#[tokio::test]
async fn test_monitor_parse_failure_goes_through_policy() {
    let h = harness(batch(RetryDecision::Skip, 3), policy(RetryDecision::Skip));
    h.runner.on("pm/dummy/poll", vec![ok("STATE=running garbage")]);

    let outcome = h.lifecycle.monitor(0).await.unwrap();
    assert!(outcome.is_skipped());
    assert!(h.store.info(0).await.unwrap().last_mon_time.is_none());
}

#[tokio::test]
async fn test_driver_diagnostic_reaches_operator() {
    let decisions = Arc::new(ScriptedDecisions::new(&[
        RetryDecision::Retry,
        RetryDecision::Quit,
    ]));
    let h = harness(
        OrchestrationContext::default().with_mode(RunMode::Interactive),
        decisions.clone(),
    );
    let stderr = "noise\nERROR MESSAGE --8<------\ndevice\nbusy\nERROR MESSAGE ------>8--\n";
    h.runner.on("pm/dummy/reboot", vec![failed("", stderr)]);

    let err = h.lifecycle.reset(0, false).await.unwrap_err();
    assert!(matches!(err, CoreError::Quit(_)));

    let seen = decisions.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].diagnostic.as_deref(), Some("device busy"));
    assert_eq!(h.runner.count("pm/dummy/reboot"), 2);
    assert_eq!(h.store.info(0).await.unwrap().state, HostState::Offline);
}

#[tokio::test]
async fn test_host_actor_serves_lifecycle() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.runner
        .on("pm/dummy/poll", vec![ok("GUEST_IP_ADDRESSES=10.0.0.9")]);

    let actor_ref = HostActor::spawn(HostActorArgs {
        host_id: 0,
        lifecycle: h.lifecycle.clone(),
    });

    let record = actor_ref.ask(GetRecord).await.unwrap();
    assert_eq!(record.name, "node1");

    let monitored = actor_ref.ask(MonitorHost).await.unwrap();
    let report = monitored.report.unwrap();
    assert_eq!(report["GUEST_IP_ADDRESSES"], "10.0.0.9");

    actor_ref.ask(DeleteHost).await.unwrap();

    let err = actor_ref.ask(GetRecord).await.map_err(ask_error).unwrap_err();
    assert!(matches!(err, CoreError::HostNotFound(0)));

    actor_ref.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_host_actor_surfaces_handler_errors() {
    let h = harness(batch(RetryDecision::Quit, 0), policy(RetryDecision::Quit));
    h.store.set_running_vms(0, 1).await.unwrap();

    let actor_ref = HostActor::spawn(HostActorArgs {
        host_id: 0,
        lifecycle: h.lifecycle.clone(),
    });

    let err = actor_ref.ask(DeleteHost).await.map_err(ask_error).unwrap_err();
    assert!(matches!(err, CoreError::RunningWorkloads { count: 1 }));

    let reset = actor_ref.ask(ResetHost { hard: false }).await.unwrap();
    assert_eq!(reset.renamed, None);

    actor_ref.stop_gracefully().await.unwrap();
}
