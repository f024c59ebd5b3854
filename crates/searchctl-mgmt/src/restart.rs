//! Supervised fast restart: halt replica allocation, bounce the local
//! service, wait for the node to answer again, then watch the cluster
//! converge back to green.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use searchctl_client::{ClusterHealth, HealthApi, TransportError, Url};

use crate::replication::{ReplicationController, ReplicationError, ReplicationMode};
use crate::service::{ServiceError, ServiceRestarter};

/// Columns emitted while watching convergence.
pub const CONVERGENCE_COLUMNS: &[&str] = &[
    "status",
    "initializing_shards",
    "relocating_shards",
    "unassigned_shards",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Idle,
    Guarding,
    DisablingReplication,
    RestartingService,
    WaitingAlive,
    Settling,
    EnablingReplication,
    WaitingGreen,
    Done,
    Failed,
}

/// Poll intervals and delays. Production defaults; tests shrink them.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub alive_poll_interval: Duration,
    pub settle_delay: Duration,
    pub green_poll_interval: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            alive_poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
            green_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Precondition inputs, detected once and passed in explicitly so the state
/// machine itself stays deterministic.
#[derive(Debug, Clone, Copy)]
pub struct RestartContext {
    pub effective_uid_is_root: bool,
    pub target_is_local: bool,
}

impl RestartContext {
    pub fn detect(server: &str) -> Self {
        Self {
            effective_uid_is_root: effective_uid_is_root(),
            target_is_local: is_local_target(server),
        }
    }
}

pub fn effective_uid_is_root() -> bool {
    // SAFETY: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() == 0 }
}

/// A restart may only target the node the tool runs on: loopback addresses,
/// `localhost`, or this machine's own hostname.
pub fn is_local_target(server: &str) -> bool {
    let Ok(url) = Url::parse(server) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return ip.is_loopback();
    }

    match hostname::get() {
        Ok(name) => name.to_string_lossy().eq_ignore_ascii_case(host),
        Err(_) => false,
    }
}

#[derive(Debug)]
pub struct RestartReport {
    pub final_health: Option<ClusterHealth>,
    /// False when the operator cancelled the green-wait early; replication is
    /// fully enabled either way.
    pub convergence_confirmed: bool,
}

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("restart precondition failed: {0}")]
    Precondition(String),

    #[error("could not halt replica allocation: {0}; replication state is indeterminate, restore it manually with `searchctl start-replication`")]
    ReplicationHalt(#[source] ReplicationError),

    #[error("service restart failed: {0}; replica allocation is still disabled, restore it manually with `searchctl start-replication`")]
    ServiceRestart(#[source] ServiceError),

    #[error("cancelled before the node came back; replica allocation is still disabled, restore it manually with `searchctl start-replication`")]
    Cancelled,

    #[error("could not re-enable replica allocation: {0}; restore it manually with `searchctl start-replication`")]
    ReplicationResume(#[source] ReplicationError),

    #[error("health polling failed while waiting for green: {0}; replica allocation is already re-enabled")]
    ConvergencePoll(#[source] TransportError),
}

/// Drives the restart sequence. Health reads are the only operations that
/// loop; a failed write always stops the machine and surfaces to the
/// operator.
pub struct RestartOrchestrator {
    health: Arc<dyn HealthApi>,
    replication: ReplicationController,
    restarter: Arc<dyn ServiceRestarter>,
    policy: RestartPolicy,
    phase: RestartPhase,
    progress: Box<dyn Fn(&str) + Send + Sync>,
}

impl RestartOrchestrator {
    pub fn new(
        health: Arc<dyn HealthApi>,
        replication: ReplicationController,
        restarter: Arc<dyn ServiceRestarter>,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            health,
            replication,
            restarter,
            policy,
            phase: RestartPhase::Idle,
            progress: Box::new(|line| println!("{line}")),
        }
    }

    /// Replaces the convergence progress sink (stdout by default).
    pub fn with_progress(mut self, sink: Box<dyn Fn(&str) + Send + Sync>) -> Self {
        self.progress = sink;
        self
    }

    pub fn phase(&self) -> RestartPhase {
        self.phase
    }

    pub async fn run(
        &mut self,
        ctx: RestartContext,
        cancel: &CancellationToken,
    ) -> Result<RestartReport, RestartError> {
        self.phase = RestartPhase::Guarding;
        if !ctx.effective_uid_is_root {
            self.phase = RestartPhase::Failed;
            return Err(RestartError::Precondition(
                "restarting the service requires root privileges".to_string(),
            ));
        }
        if !ctx.target_is_local {
            self.phase = RestartPhase::Failed;
            return Err(RestartError::Precondition(
                "only the local node can be restarted; point --server at this host".to_string(),
            ));
        }

        self.phase = RestartPhase::DisablingReplication;
        info!("halting replica allocation before restart");
        match self.replication.require_mode(ReplicationMode::Primaries).await {
            Ok(()) => {}
            Err(e) => {
                self.phase = RestartPhase::Failed;
                return Err(RestartError::ReplicationHalt(e));
            }
        }

        self.phase = RestartPhase::RestartingService;
        match self.restarter.restart().await {
            Ok(()) => {}
            Err(e) => {
                self.phase = RestartPhase::Failed;
                return Err(RestartError::ServiceRestart(e));
            }
        }

        self.phase = RestartPhase::WaitingAlive;
        info!("waiting for the node to respond");
        loop {
            if cancel.is_cancelled() {
                self.phase = RestartPhase::Failed;
                return Err(RestartError::Cancelled);
            }

            // Liveness, not health: any decodable response counts, red included.
            match self.health.health().await {
                Ok(health) => {
                    info!("node is responding, cluster status {}", health.status);
                    break;
                }
                Err(e) => debug!("not alive yet: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.phase = RestartPhase::Failed;
                    return Err(RestartError::Cancelled);
                }
                _ = tokio::time::sleep(self.policy.alive_poll_interval) => {}
            }
        }

        self.phase = RestartPhase::Settling;
        tokio::select! {
            _ = cancel.cancelled() => {
                self.phase = RestartPhase::Failed;
                return Err(RestartError::Cancelled);
            }
            _ = tokio::time::sleep(self.policy.settle_delay) => {}
        }

        self.phase = RestartPhase::EnablingReplication;
        match self.replication.require_mode(ReplicationMode::All).await {
            Ok(()) => {}
            Err(e) => {
                self.phase = RestartPhase::Failed;
                return Err(RestartError::ReplicationResume(e));
            }
        }

        self.phase = RestartPhase::WaitingGreen;
        info!("replication restored, waiting for the cluster to go green");
        let mut last_seen: Option<ClusterHealth> = None;
        loop {
            if cancel.is_cancelled() {
                info!("green-wait cancelled by operator; replication is fully enabled");
                self.phase = RestartPhase::Done;
                return Ok(RestartReport {
                    final_health: last_seen,
                    convergence_confirmed: false,
                });
            }

            match self.health.health().await {
                Ok(health) if health.status.is_green() => {
                    self.phase = RestartPhase::Done;
                    return Ok(RestartReport {
                        final_health: Some(health),
                        convergence_confirmed: true,
                    });
                }
                Ok(health) => {
                    if let Ok(summary) = health.summary(CONVERGENCE_COLUMNS) {
                        (self.progress)(&summary);
                    }
                    last_seen = Some(health);
                }
                Err(e) => {
                    warn!("health poll failed during green-wait: {}", e);
                    self.phase = RestartPhase::Failed;
                    return Err(RestartError::ConvergencePoll(e));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("green-wait cancelled by operator; replication is fully enabled");
                    self.phase = RestartPhase::Done;
                    return Ok(RestartReport {
                        final_health: last_seen,
                        convergence_confirmed: false,
                    });
                }
                _ = tokio::time::sleep(self.policy.green_poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use searchctl_client::{ClusterSettings, HealthStatus, SettingScope, SettingsApi};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn snapshot(status: HealthStatus) -> ClusterHealth {
        ClusterHealth {
            cluster_name: "search-test".to_string(),
            status,
            timed_out: false,
            number_of_nodes: 3,
            number_of_data_nodes: 3,
            active_primary_shards: 10,
            active_shards: 20,
            relocating_shards: 0,
            initializing_shards: 1,
            unassigned_shards: 2,
            number_of_pending_tasks: 0,
        }
    }

    fn transport_error() -> TransportError {
        TransportError::Malformed {
            url: "http://localhost:9200/_cluster/health".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    struct ScriptedHealth {
        responses: Mutex<VecDeque<Result<ClusterHealth, TransportError>>>,
        calls: AtomicUsize,
        cancel_when_drained: Option<CancellationToken>,
    }

    impl ScriptedHealth {
        fn new(responses: Vec<Result<ClusterHealth, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                cancel_when_drained: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthApi for ScriptedHealth {
        async fn health(&self) -> searchctl_client::client::Result<ClusterHealth> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = responses.pop_front().expect("unexpected health poll");
            if responses.is_empty() {
                if let Some(token) = &self.cancel_when_drained {
                    token.cancel();
                }
            }
            next
        }
    }

    struct FakeSettings {
        acks: Mutex<VecDeque<bool>>,
        puts: Mutex<Vec<(SettingScope, String, Value)>>,
    }

    impl FakeSettings {
        fn acking() -> Self {
            Self::with_acks(vec![true, true])
        }

        fn with_acks(acks: Vec<bool>) -> Self {
            Self {
                acks: Mutex::new(acks.into()),
                puts: Mutex::new(Vec::new()),
            }
        }

        fn put_values(&self) -> Vec<String> {
            self.puts
                .lock()
                .unwrap()
                .iter()
                .map(|(_, _, v)| v.as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl SettingsApi for FakeSettings {
        async fn get_settings(&self) -> searchctl_client::client::Result<ClusterSettings> {
            Ok(ClusterSettings::default())
        }

        async fn put_setting(
            &self,
            scope: SettingScope,
            key: &str,
            value: Value,
        ) -> searchctl_client::client::Result<bool> {
            self.puts
                .lock()
                .unwrap()
                .push((scope, key.to_string(), value));
            Ok(self.acks.lock().unwrap().pop_front().unwrap_or(true))
        }
    }

    struct FakeRestarter {
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeRestarter {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ServiceRestarter for FakeRestarter {
        async fn restart(&self) -> Result<(), ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ServiceError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "systemctl not found",
                )))
            } else {
                Ok(())
            }
        }
    }

    fn permissive_ctx() -> RestartContext {
        RestartContext {
            effective_uid_is_root: true,
            target_is_local: true,
        }
    }

    fn fast_policy() -> RestartPolicy {
        RestartPolicy {
            alive_poll_interval: Duration::from_millis(10),
            settle_delay: Duration::from_millis(10),
            green_poll_interval: Duration::from_millis(10),
        }
    }

    fn orchestrator(
        health: Arc<ScriptedHealth>,
        settings: Arc<FakeSettings>,
        restarter: Arc<FakeRestarter>,
    ) -> RestartOrchestrator {
        RestartOrchestrator::new(
            health,
            ReplicationController::new(settings),
            restarter,
            fast_policy(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_converges_green() {
        let health = Arc::new(ScriptedHealth::new(vec![
            Err(transport_error()),
            Err(transport_error()),
            Ok(snapshot(HealthStatus::Red)),
            Ok(snapshot(HealthStatus::Yellow)),
            Ok(snapshot(HealthStatus::Green)),
        ]));
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::ok());

        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = emitted.clone();
        let mut orch = orchestrator(health.clone(), settings.clone(), restarter.clone())
            .with_progress(Box::new(move |line| {
                sink.lock().unwrap().push(line.to_string())
            }));

        let report = orch
            .run(permissive_ctx(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(orch.phase(), RestartPhase::Done);
        assert!(report.convergence_confirmed);
        assert_eq!(report.final_health.unwrap().status, HealthStatus::Green);
        assert_eq!(settings.put_values(), vec!["primaries", "all"]);
        assert_eq!(restarter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(health.calls(), 5);

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].starts_with("status "));
    }

    #[tokio::test]
    async fn test_guard_rejects_non_root() {
        let health = Arc::new(ScriptedHealth::new(Vec::new()));
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health, settings.clone(), restarter.clone());

        let ctx = RestartContext {
            effective_uid_is_root: false,
            target_is_local: true,
        };
        let err = orch.run(ctx, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, RestartError::Precondition(_)));
        assert_eq!(orch.phase(), RestartPhase::Failed);
        assert!(settings.put_values().is_empty());
        assert_eq!(restarter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_guard_rejects_remote_target() {
        let health = Arc::new(ScriptedHealth::new(Vec::new()));
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health, settings.clone(), restarter);

        let ctx = RestartContext {
            effective_uid_is_root: true,
            target_is_local: false,
        };
        let err = orch.run(ctx, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, RestartError::Precondition(msg) if msg.contains("local")));
        assert!(settings.put_values().is_empty());
    }

    #[tokio::test]
    async fn test_unacknowledged_halt_stops_before_restart() {
        let health = Arc::new(ScriptedHealth::new(Vec::new()));
        let settings = Arc::new(FakeSettings::with_acks(vec![false]));
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health, settings, restarter.clone());

        let err = orch
            .run(permissive_ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RestartError::ReplicationHalt(_)));
        assert_eq!(orch.phase(), RestartPhase::Failed);
        assert_eq!(restarter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_failure_never_enters_alive_wait() {
        let health = Arc::new(ScriptedHealth::new(Vec::new()));
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::failing());
        let mut orch = orchestrator(health.clone(), settings.clone(), restarter);

        let err = orch
            .run(permissive_ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RestartError::ServiceRestart(_)));
        assert_eq!(orch.phase(), RestartPhase::Failed);
        assert_eq!(health.calls(), 0);
        // Replication stays primaries-only; remediation is on the operator.
        assert_eq!(settings.put_values(), vec!["primaries"]);
    }

    #[tokio::test]
    async fn test_resume_failure_surfaces_after_settle() {
        let health = Arc::new(ScriptedHealth::new(vec![Ok(snapshot(HealthStatus::Red))]));
        let settings = Arc::new(FakeSettings::with_acks(vec![true, false]));
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health, settings.clone(), restarter);

        tokio::time::pause();
        let err = orch
            .run(permissive_ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RestartError::ReplicationResume(_)));
        assert_eq!(orch.phase(), RestartPhase::Failed);
        assert_eq!(settings.put_values(), vec!["primaries", "all"]);
    }

    #[tokio::test]
    async fn test_cancel_before_alive_is_a_failure() {
        let health = Arc::new(ScriptedHealth::new(Vec::new()));
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health.clone(), settings.clone(), restarter);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch.run(permissive_ctx(), &cancel).await.unwrap_err();

        assert!(matches!(err, RestartError::Cancelled));
        assert_eq!(orch.phase(), RestartPhase::Failed);
        assert_eq!(health.calls(), 0);
        assert_eq!(settings.put_values(), vec!["primaries"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_green_wait_is_clean() {
        let cancel = CancellationToken::new();
        let mut health = ScriptedHealth::new(vec![
            Ok(snapshot(HealthStatus::Red)),
            Ok(snapshot(HealthStatus::Yellow)),
        ]);
        health.cancel_when_drained = Some(cancel.clone());
        let health = Arc::new(health);
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health, settings.clone(), restarter)
            .with_progress(Box::new(|_| {}));

        let report = orch.run(permissive_ctx(), &cancel).await.unwrap();

        assert_eq!(orch.phase(), RestartPhase::Done);
        assert!(!report.convergence_confirmed);
        assert_eq!(report.final_health.unwrap().status, HealthStatus::Yellow);
        // Replication was restored before the operator interrupted.
        assert_eq!(settings.put_values(), vec!["primaries", "all"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_green_wait_transport_error_fails_after_resume() {
        let health = Arc::new(ScriptedHealth::new(vec![
            Ok(snapshot(HealthStatus::Red)),
            Err(transport_error()),
        ]));
        let settings = Arc::new(FakeSettings::acking());
        let restarter = Arc::new(FakeRestarter::ok());
        let mut orch = orchestrator(health, settings.clone(), restarter);

        let err = orch
            .run(permissive_ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RestartError::ConvergencePoll(_)));
        assert_eq!(orch.phase(), RestartPhase::Failed);
        assert_eq!(settings.put_values(), vec!["primaries", "all"]);
    }

    #[test]
    fn test_is_local_target() {
        assert!(is_local_target("http://localhost:9200"));
        assert!(is_local_target("http://127.0.0.1:9200"));
        assert!(is_local_target("http://[::1]:9200"));
        assert!(!is_local_target("http://10.20.0.5:9200"));
        assert!(!is_local_target("http://search-node-7.internal:9200"));
        assert!(!is_local_target("not a url"));
    }

    #[test]
    fn test_default_policy_intervals() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.alive_poll_interval, Duration::from_secs(1));
        assert_eq!(policy.settle_delay, Duration::from_secs(5));
        assert_eq!(policy.green_poll_interval, Duration::from_secs(30));
    }
}
