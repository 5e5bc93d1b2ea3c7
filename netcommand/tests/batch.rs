mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use common::{MockDevice, MockTransport, Reply, fast_config, fast_timeouts, inventory};
use netcommand::config::RetryPolicy;
use netcommand::driver::{DriverDefinition, DriverRegistry};
use netcommand::image::ImageResolver;
use netcommand::inventory::{SelectionFilter, resolve};
use netcommand::runner::SessionState;
use netcommand::{BatchConfig, BatchScheduler, BatchStatus, ErrorKind, Operation, SessionStatus};

const EDGE: &str = "
groups:
  edge:
    hosts:
      r1: { model: routeros }
      r2: { model: ios }
hosts:
  core1: { model: ios }
";

fn scheduler(transport: &MockTransport, config: BatchConfig) -> BatchScheduler {
    let images = Arc::new(ImageResolver::new(Duration::from_secs(5)).unwrap());
    BatchScheduler::new(Arc::new(transport.clone()), images).with_config(config)
}

fn routeros_fleet(hosts: &[&str]) -> String {
    let mut yaml = String::from("hosts:\n");
    for host in hosts {
        yaml.push_str(&format!("  {host}: {{ model: routeros, platform: arm64 }}\n"));
    }
    yaml
}

#[tokio::test]
async fn reboot_command_ends_batch_on_every_vendor() {
    let inventory = inventory(EDGE);
    let transport = MockTransport::new()
        .device("r1", MockDevice::new().reply_with("/system/reboot", Reply::Disconnect))
        .device("r2", MockDevice::new().reply_with("/system/reboot", Reply::Disconnect))
        .device("core1", MockDevice::new());

    let targets = assert_ok!(resolve(&inventory, &SelectionFilter::parse("edge")));
    let report = scheduler(&transport, fast_config())
        .run_batch(&targets, Operation::commands(["/system/reboot", "/ip address print"]))
        .await
        .unwrap();

    assert_eq!(report.status(), BatchStatus::Success);
    assert_eq!(report.results().len(), 2);
    for host in ["r1", "r2"] {
        let result = report.get(host).unwrap();
        assert_eq!(result.status(), SessionStatus::Success, "{host}");
        assert!(result.error().is_none());
        assert!(result
            .notes()
            .iter()
            .any(|n| n.contains("no further commands were sent")));
        assert!(!transport.executed(host).contains(&"/ip address print".to_string()));
    }

    assert_eq!(
        transport.executed("r2"),
        ["enable", "terminal length 0", "/system/reboot"]
    );
    assert!(transport.executed("core1").is_empty());
}

#[tokio::test]
async fn unknown_group_touches_nothing() {
    let inventory = inventory(EDGE);
    let transport = MockTransport::new();

    let err = assert_err!(resolve(&inventory, &SelectionFilter::parse("nonexistent-group")));
    assert_eq!(err.kind(), ErrorKind::UnknownSelector);
    assert!(transport.events().is_empty());
}

#[tokio::test]
async fn empty_target_list_is_rejected() {
    let transport = MockTransport::new();
    let err = assert_err!(scheduler(&transport, fast_config())
        .run_batch(&[], Operation::Version)
        .await);
    assert_eq!(err.kind(), ErrorKind::NoTargets);
}

#[tokio::test]
async fn missing_image_aborts_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "images:\n  routeros:\n    directory: {}\nhosts:\n  r1: {{ model: routeros, platform: arm64 }}\n",
        dir.path().display()
    );
    let inventory = inventory(&yaml);
    let transport = MockTransport::new().device("r1", MockDevice::new());

    let err = assert_err!(scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
        .await);

    assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    assert!(err.to_string().contains("routeros-arm64-7.10.2.npk"));
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn pinned_image_with_other_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("routeros-arm64-7.9.npk"), b"npk").unwrap();
    let yaml = format!(
        "images:\n  default:\n    directory: {}\n    filename: routeros-arm64-7.9.npk\nhosts:\n  r1: {{ model: routeros, platform: arm64 }}\n",
        dir.path().display()
    );
    let inventory = inventory(&yaml);
    let transport = MockTransport::new().device("r1", MockDevice::new());

    let err = assert_err!(scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
        .await);

    assert_eq!(err.kind(), ErrorKind::VersionMismatch);
    assert!(transport.events().is_empty());
    assert!(transport.transfers().is_empty());
}

#[tokio::test]
async fn pinned_image_version_is_compared_exactly() {
    let dir = tempfile::tempdir().unwrap();
    for (pinned, requested) in [
        ("routeros-arm64-7.10.2-rc1.npk", "7.10.2"),
        ("routeros-arm64-7.10.npk", "7.10.0"),
    ] {
        std::fs::write(dir.path().join(pinned), b"npk").unwrap();
        let yaml = format!(
            "images:\n  routeros:\n    directory: {}\n    filename: {pinned}\nhosts:\n  r1: {{ model: routeros, platform: arm64 }}\n",
            dir.path().display()
        );
        let inventory = inventory(&yaml);
        let transport = MockTransport::new().device("r1", MockDevice::new());

        let err = assert_err!(scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade(requested))
            .await);

        assert_eq!(err.kind(), ErrorKind::VersionMismatch, "{pinned} for {requested}");
        assert!(transport.events().is_empty());
    }
}

#[tokio::test]
async fn upgrade_needs_platform() {
    let inventory = inventory("hosts:\n  r1: { model: routeros }\n");
    let transport = MockTransport::new();

    let err = assert_err!(scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
        .await);
    assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    assert!(err.to_string().contains("no platform"));
}

#[tokio::test]
async fn upgrade_on_commands_only_model_is_rejected() {
    let inventory = inventory(EDGE);
    let transport = MockTransport::new();

    let err = assert_err!(scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::upgrade("15.2"))
        .await);
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn unknown_model_is_rejected() {
    let inventory = inventory("hosts:\n  x1: { model: junos }\n");
    let transport = MockTransport::new();

    let err = assert_err!(scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::Version)
        .await);
    assert_eq!(err.kind(), ErrorKind::UnknownModel);
}

#[tokio::test]
async fn dry_run_never_touches_devices() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("routeros-arm64-7.10.2.npk"), b"npk").unwrap();
    let yaml = format!(
        "images:\n  routeros:\n    directory: {}\nhosts:\n  r1: {{ model: routeros, platform: arm64 }}\n  r2: {{ model: routeros, platform: arm64 }}\n",
        dir.path().display()
    );
    let inventory = inventory(&yaml);
    let transport = MockTransport::new()
        .device("r1", MockDevice::new())
        .device("r2", MockDevice::new());
    let scheduler = scheduler(&transport, fast_config().with_dry_run(true));

    let report = scheduler
        .run_batch(inventory.devices(), Operation::commands(["/system/reboot"]))
        .await
        .unwrap();
    assert!(report.is_dry_run());
    assert!(report
        .results()
        .iter()
        .all(|r| r.status() == SessionStatus::Skipped));
    assert_eq!(
        report.results()[0].states(),
        [SessionState::Idle, SessionState::Done(SessionStatus::Skipped)]
    );

    let report = scheduler
        .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
        .await
        .unwrap();
    assert_eq!(report.status(), BatchStatus::Success);
    assert!(report.results()[0]
        .notes()
        .iter()
        .any(|n| n.contains("would upgrade to 7.10.2")));
    assert!(report.render().contains("DRY RUN"));

    assert!(transport.events().is_empty());
}

#[tokio::test]
async fn one_auth_failure_does_not_affect_others() {
    let inventory = inventory(&routeros_fleet(&["r1", "r2", "r3", "r4"]));
    let transport = MockTransport::new()
        .device("r1", MockDevice::new())
        .device("r2", MockDevice::new())
        .device("r3", MockDevice::new().reject_auth())
        .device("r4", MockDevice::new());

    let report = scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    assert_eq!(report.status(), BatchStatus::Failure);
    let hosts: Vec<&str> = report.results().iter().map(|r| r.hostname()).collect();
    assert_eq!(hosts, ["r1", "r2", "r3", "r4"]);

    let failed = report.get("r3").unwrap();
    assert_eq!(failed.status(), SessionStatus::Failed);
    assert_eq!(failed.error().unwrap().kind, ErrorKind::AuthFailed);
    assert!(failed.states().contains(&SessionState::Authenticating));
    assert!(!failed.states().contains(&SessionState::Executing));

    for host in ["r1", "r2", "r4"] {
        assert_eq!(report.get(host).unwrap().status(), SessionStatus::Success);
        assert_eq!(transport.executed(host), ["/system identity print"]);
    }
}

#[tokio::test]
async fn results_follow_inventory_order() {
    let inventory = inventory(&routeros_fleet(&["r1", "r2", "r3"]));
    let transport = MockTransport::new()
        .device("r1", MockDevice::new().open_delay(Duration::from_millis(150)))
        .device("r2", MockDevice::new())
        .device("r3", MockDevice::new().open_delay(Duration::from_millis(50)));

    let report = scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    let hosts: Vec<&str> = report.results().iter().map(|r| r.hostname()).collect();
    assert_eq!(hosts, ["r1", "r2", "r3"]);
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let hosts = ["r1", "r2", "r3", "r4", "r5", "r6"];
    let inventory = inventory(&routeros_fleet(&hosts));
    let mut transport = MockTransport::new();
    for host in hosts {
        transport = transport.device(
            host,
            MockDevice::new().reply_with(
                "/system identity print",
                Reply::Slow(Duration::from_millis(30), "name: x".into()),
            ),
        );
    }

    let report = scheduler(&transport, fast_config().with_concurrency(2))
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    assert_eq!(report.counts().success, 6);
    assert!(transport.peak_sessions() <= 2);
}

#[tokio::test]
async fn failed_command_does_not_stop_the_batch() {
    let inventory = inventory(&routeros_fleet(&["r1"]));
    let transport = MockTransport::new().device(
        "r1",
        MockDevice::new()
            .reply("/interface prnt", "bad command name prnt (line 1 column 12)")
            .reply("/system identity print", "name: r1"),
    );

    let report = scheduler(&transport, fast_config())
        .run_batch(
            inventory.devices(),
            Operation::commands(["/interface prnt", "/system identity print"]),
        )
        .await
        .unwrap();

    let result = report.get("r1").unwrap();
    assert_eq!(result.status(), SessionStatus::Failed);
    assert_eq!(result.error().unwrap().kind, ErrorKind::CommandFailed);
    assert!(result.error().unwrap().message.contains("/interface prnt"));
    assert_eq!(result.transcript().len(), 2);
    assert!(!result.transcript()[0].is_success());
    assert!(result.transcript()[1].is_success());
    assert!(transport.closed("r1"));
}

#[tokio::test]
async fn stderr_marks_command_failed() {
    let inventory = inventory(&routeros_fleet(&["r1"]));
    let transport = MockTransport::new().device(
        "r1",
        MockDevice::new().reply_with("/ip route print", Reply::Stderr("failure: not allowed".into())),
    );

    let report = scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::commands(["/ip route print"]))
        .await
        .unwrap();
    assert_eq!(report.get("r1").unwrap().error().unwrap().kind, ErrorKind::CommandFailed);
}

#[tokio::test]
async fn command_timeout_fails_and_disconnects() {
    let inventory = inventory(&routeros_fleet(&["r1"]));
    let transport = MockTransport::new().device(
        "r1",
        MockDevice::new().reply_with("/export", Reply::Hang),
    );
    let timeouts = netcommand::Timeouts {
        command: Duration::from_millis(100),
        ..fast_timeouts()
    };

    let report = scheduler(&transport, fast_config().with_timeouts(timeouts))
        .run_batch(inventory.devices(), Operation::commands(["/export", "/system identity print"]))
        .await
        .unwrap();

    let result = report.get("r1").unwrap();
    assert_eq!(result.status(), SessionStatus::Failed);
    assert_eq!(result.error().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(transport.executed("r1"), ["/export"]);
    assert!(transport.closed("r1"));
}

#[tokio::test]
async fn panicking_session_becomes_internal_error() {
    let inventory = inventory(&routeros_fleet(&["r1", "r2", "r3"]));
    let transport = MockTransport::new()
        .device("r1", MockDevice::new())
        .device("r2", MockDevice::new().panic_on_open())
        .device("r3", MockDevice::new());

    let report = scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    assert_eq!(report.results().len(), 3);
    let r2 = report.get("r2").unwrap();
    assert_eq!(r2.status(), SessionStatus::Failed);
    assert_eq!(r2.error().unwrap().kind, ErrorKind::InternalError);
    assert_eq!(report.get("r1").unwrap().status(), SessionStatus::Success);
    assert_eq!(report.get("r3").unwrap().status(), SessionStatus::Success);
}

#[tokio::test]
async fn connection_failures_are_retried() {
    let inventory = inventory(&routeros_fleet(&["r1", "r2"]));
    let transport = MockTransport::new()
        .device("r1", MockDevice::new().refuse_connections(1))
        .device("r2", MockDevice::new().reject_auth());
    let config = fast_config().with_retry(RetryPolicy::new(2, Duration::from_millis(10)));

    let report = scheduler(&transport, config)
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    let r1 = report.get("r1").unwrap();
    assert_eq!(r1.status(), SessionStatus::Success);
    assert_eq!(r1.attempts(), 2);

    // Bad credentials are not retried
    let r2 = report.get("r2").unwrap();
    assert_eq!(r2.status(), SessionStatus::Failed);
    assert_eq!(r2.attempts(), 1);
}

#[tokio::test]
async fn no_retry_by_default() {
    let inventory = inventory(&routeros_fleet(&["r1"]));
    let transport = MockTransport::new().device("r1", MockDevice::new().refuse_connections(1));

    let report = scheduler(&transport, fast_config())
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    let r1 = report.get("r1").unwrap();
    assert_eq!(r1.error().unwrap().kind, ErrorKind::ConnectionFailed);
    assert_eq!(r1.attempts(), 1);
    assert_eq!(transport.opened(), 1);
}

#[tokio::test]
async fn stop_on_error_cancels_pending_devices() {
    let inventory = inventory(&routeros_fleet(&["r1", "r2", "r3"]));
    let transport = MockTransport::new()
        .device("r1", MockDevice::new().reject_auth())
        .device("r2", MockDevice::new())
        .device("r3", MockDevice::new());
    let config = fast_config().with_concurrency(1).with_stop_on_error(true);

    let report = scheduler(&transport, config)
        .run_batch(inventory.devices(), Operation::commands(["/system identity print"]))
        .await
        .unwrap();

    assert_eq!(report.get("r1").unwrap().status(), SessionStatus::Failed);
    assert_eq!(report.get("r2").unwrap().status(), SessionStatus::Cancelled);
    assert_eq!(report.get("r3").unwrap().status(), SessionStatus::Cancelled);
    assert_eq!(transport.opened(), 1);
}

#[tokio::test]
async fn custom_registry_drives_unlisted_model() {
    let inventory = inventory("hosts:\n  lab1: { model: lab }\n");
    let transport = MockTransport::new().device(
        "lab1",
        MockDevice::new()
            .reply("show clock", "12:00:01 UTC")
            .reply("show bogus", "% Invalid input detected"),
    );
    let mut registry = DriverRegistry::new();
    registry
        .register(DriverDefinition::new("lab").with_failure_pattern("% Invalid input"))
        .unwrap();

    let builtin = scheduler(&transport, fast_config());
    assert_err!(
        builtin
            .run_batch(inventory.devices(), Operation::commands(["show clock"]))
            .await
    );

    let report = scheduler(&transport, fast_config())
        .with_registry(Arc::new(registry))
        .run_batch(inventory.devices(), Operation::commands(["show clock", "show bogus"]))
        .await
        .unwrap();

    let result = report.get("lab1").unwrap();
    assert_eq!(result.status(), SessionStatus::Failed);
    assert_eq!(result.error().unwrap().kind, ErrorKind::CommandFailed);
    assert_eq!(result.transcript()[0].result, "12:00:01 UTC");
    assert_eq!(transport.executed("lab1"), ["show clock", "show bogus"]);
}

#[tokio::test]
async fn cancellation_finalizes_every_target() {
    let inventory = inventory(&routeros_fleet(&["r1", "r2"]));
    let transport = MockTransport::new()
        .device("r1", MockDevice::new().reply_with("/export", Reply::Hang))
        .device("r2", MockDevice::new().reply_with("/export", Reply::Hang));
    let token = CancellationToken::new();
    let scheduler = scheduler(&transport, fast_config().with_concurrency(1)).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let report = scheduler
        .run_batch(inventory.devices(), Operation::commands(["/export"]))
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(report.was_cancelled());
    assert_eq!(report.get("r1").unwrap().status(), SessionStatus::Cancelled);
    assert_eq!(report.get("r2").unwrap().status(), SessionStatus::Cancelled);
    assert!(transport.closed("r1"));
    assert!(transport.executed("r2").is_empty());
}

mod upgrade {
    use super::*;

    const NPK: &str = "routeros-arm64-7.10.2.npk";

    fn resource(version: &str) -> String {
        format!("             uptime: 1w2d\n            version: {version} (stable)\n  architecture-name: arm64\n")
    }

    fn routeros_inventory(dir: &std::path::Path) -> netcommand::inventory::Inventory {
        inventory(&format!(
            "images:\n  routeros:\n    directory: {}\nhosts:\n  r1: {{ model: routeros, platform: arm64 }}\n",
            dir.display()
        ))
    }

    #[tokio::test]
    async fn routeros_upgrade_reboots_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("routeros-arm64-7.10.2.npk"), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new()
                .reply("/system resource print", &resource("7.9"))
                .reply("/system resource print", &resource("7.10.2"))
                .reply_with("/system/reboot", Reply::Disconnect),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Success, "{:?}", result.error());
        assert_eq!(result.initial_version(), Some("7.9"));
        assert_eq!(result.final_version(), Some("7.10.2"));
        assert!(result.states().contains(&SessionState::Verifying));
        assert_eq!(
            transport.transfers(),
            [("r1".to_string(), "routeros-arm64-7.10.2.npk".to_string())]
        );
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test]
    async fn version_not_applied_after_reboot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("routeros-arm64-7.10.2.npk"), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new()
                .reply("/system resource print", &resource("7.9"))
                .reply_with("/system/reboot", Reply::Disconnect),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Failed);
        assert_eq!(result.error().unwrap().kind, ErrorKind::VersionMismatch);
        assert_eq!(result.final_version(), Some("7.9"));
    }

    #[tokio::test]
    async fn already_running_target_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("routeros-arm64-7.10.2.npk"), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new().reply("/system resource print", &resource("7.10.2")),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Success);
        assert!(result.notes().iter().any(|n| n.contains("already running")));
        assert!(transport.transfers().is_empty());
    }

    #[tokio::test]
    async fn downgrade_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("routeros-arm64-7.10.2.npk"), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new().reply("/system resource print", &resource("7.12")),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Failed);
        assert_eq!(result.error().unwrap().kind, ErrorKind::VersionMismatch);
        assert!(result.error().unwrap().message.contains("downgrade"));
        assert!(transport.transfers().is_empty());
    }

    #[tokio::test]
    async fn routeros_upgrade_uploads_extra_packages_first() {
        let dir = tempfile::tempdir().unwrap();
        for package in [NPK, "wireless-arm64-7.10.2.npk", "zerotier-arm64-7.10.2.npk"] {
            std::fs::write(dir.path().join(package), b"npk").unwrap();
        }
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new()
                .reply("/system resource print", &resource("7.9"))
                .reply("/system resource print", &resource("7.10.2"))
                .reply(
                    "/system/package print",
                    "Columns: NAME, VERSION, BUILD-TIME, SIZE\n # NAME      VERSION  BUILD-TIME           SIZE\n 0 routeros  7.9      2023-05-08 09:40:51  12.1MiB\n 1 wireless  7.9      2023-05-08 09:40:51  2640.2KiB\n 2 zerotier  7.9      2023-05-08 09:40:51  1260.2KiB\n",
                )
                .reply_with("/system/reboot", Reply::Disconnect),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Success, "{:?}", result.error());
        let uploaded: Vec<String> = transport.transfers().into_iter().map(|(_, remote)| remote).collect();
        assert_eq!(
            uploaded,
            ["wireless-arm64-7.10.2.npk", "zerotier-arm64-7.10.2.npk", NPK]
        );

        let executed = transport.executed("r1");
        let listed = executed.iter().position(|c| c == "/system/package print").unwrap();
        let reboot = executed.iter().position(|c| c == "/system/reboot").unwrap();
        assert!(listed < reboot);
    }

    #[tokio::test]
    async fn missing_extra_package_stops_before_any_upload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NPK), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new()
                .reply("/system resource print", &resource("7.9"))
                .reply("/system/package print", " # NAME      VERSION\n 0 routeros  7.9\n 1 container 7.9\n"),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Failed);
        assert_eq!(result.error().unwrap().kind, ErrorKind::ImageNotFound);
        assert!(result.error().unwrap().message.contains("container-arm64-7.10.2.npk"));
        assert!(transport.transfers().is_empty());
        assert!(!transport.executed("r1").contains(&"/system/reboot".to_string()));
        assert!(transport.closed("r1"));
    }

    #[tokio::test]
    async fn platform_mismatch_transfers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NPK), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new().reply(
                "/system resource print",
                "            version: 7.9 (stable)\n  architecture-name: mipsbe\n",
            ),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Failed);
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::PlatformMismatch);
        assert!(error.message.contains("mipsbe"));
        assert!(error.message.contains(NPK));
        assert!(transport.transfers().is_empty());
        assert!(!transport.executed("r1").contains(&"/system/reboot".to_string()));
        assert!(transport.closed("r1"));
    }

    #[tokio::test]
    async fn interrupted_transfer_fails_without_reboot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NPK), b"npk").unwrap();
        let inventory = routeros_inventory(dir.path());
        let transport = MockTransport::new().device(
            "r1",
            MockDevice::new()
                .reply("/system resource print", &resource("7.9"))
                .interrupt_transfers(),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        let result = report.get("r1").unwrap();
        assert_eq!(result.status(), SessionStatus::Failed);
        assert_eq!(result.error().unwrap().kind, ErrorKind::TransferInterrupted);
        assert!(!result.states().contains(&SessionState::Verifying));
        assert!(result.transcript().iter().all(|r| r.command != "/system/reboot"));
        assert!(!transport.executed("r1").contains(&"/system/reboot".to_string()));
        assert_eq!(transport.transfers().len(), 1);
        assert!(transport.events().contains(&common::Event::Close("r1".to_string())));
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn dry_run_upgrade_does_not_download() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(format!("/routeros/{NPK}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"npk".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let inventory = inventory(&format!(
            "images:\n  routeros:\n    directory: {}\n    url: {}/routeros\nhosts:\n  r1: {{ model: routeros, platform: arm64 }}\n",
            images.display(),
            server.uri()
        ));
        let transport = MockTransport::new().device("r1", MockDevice::new());

        let report = scheduler(&transport, fast_config().with_dry_run(true))
            .run_batch(inventory.devices(), Operation::upgrade("7.10.2"))
            .await
            .unwrap();

        assert_eq!(report.get("r1").unwrap().status(), SessionStatus::Skipped);
        assert!(!images.join(NPK).exists());
        assert!(transport.events().is_empty());
    }

    #[tokio::test]
    async fn os10_upgrade_leaves_reload_to_operator() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/os10/os10-Enterprise-10.6.0.1.bin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/os10", server.uri());
        let inventory = inventory(&format!(
            "images:\n  dellos10:\n    url: {url}\nhosts:\n  s1: {{ model: dellos10, platform: Enterprise }}\n"
        ));
        let image_url = format!("{url}/os10-Enterprise-10.6.0.1.bin");
        let transport = MockTransport::new().device(
            "s1",
            MockDevice::new()
                .reply(
                    "show version",
                    "Dell EMC Networking OS10 Enterprise\nOS Version: 10.5.4.0\nBuild Version: 10.5.4.0",
                )
                .reply(&format!("image download {image_url}"), "Download started. Use 'show image status' for updates")
                .reply(
                    "show image status",
                    "File Transfer State: transfer-success\nInstallation State: install-success",
                ),
        );

        let report = scheduler(&transport, fast_config())
            .run_batch(inventory.devices(), Operation::upgrade("10.6.0.1"))
            .await
            .unwrap();

        let result = report.get("s1").unwrap();
        assert_eq!(result.status(), SessionStatus::Success, "{:?}", result.error());
        assert!(result.notes().iter().any(|n| n.contains("reload the device")));
        assert!(!result.states().contains(&SessionState::Verifying));

        let executed = transport.executed("s1");
        assert!(executed.contains(&"write memory".to_string()));
        assert!(executed.contains(&"image install image://os10-Enterprise-10.6.0.1.bin".to_string()));
        assert_eq!(executed.last().map(String::as_str), Some("boot system standby"));
        assert_eq!(transport.opened(), 1);
    }
}
