//! SSH Channel Integration Tests
//!
//! ## Running Tests
//!
//! Basic tests (no SSH server required):
//! ```bash
//! cargo test --features ssh-backend --test ssh_channel_test
//! ```
//!
//! Integration tests (requires SSH server):
//! ```bash
//! export PULSAR_TEST_SSH_HOST=localhost
//! export PULSAR_TEST_SSH_USER=testuser
//! export PULSAR_SSH_PASSWORD=secret
//! cargo test --features ssh-backend --test ssh_channel_test -- --ignored
//! ```

#[cfg(feature = "ssh-backend")]
mod ssh_tests {
    use pulsar::channel::{
        ArtifactTransfer, Credential, CredentialSecret, ExecutionSession, SessionConnector,
        SshConnector, SshOptions,
    };
    use pulsar::{CommandRequest, ExecControl, TargetError};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Test SSH options defaults
    #[test]
    fn test_ssh_options_defaults() {
        let options = SshOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
        assert!(!options.compress);
        assert!(options.known_hosts.is_none());
        assert_eq!(options.poll_interval, Duration::from_millis(50));
    }

    /// Connector keeps the options it was built with
    #[test]
    fn test_connector_options() {
        let connector = SshConnector::new(SshOptions {
            connect_timeout: Duration::from_secs(5),
            known_hosts: Some(PathBuf::from("/etc/ssh/ssh_known_hosts")),
            ..Default::default()
        });
        assert_eq!(connector.options().connect_timeout, Duration::from_secs(5));
        assert!(connector.options().known_hosts.is_some());
    }

    /// An unreachable host is reported as an authentication failure
    #[tokio::test]
    async fn test_connect_unreachable_host() {
        let connector = SshConnector::new(SshOptions {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        // Port 1 on localhost is closed on any sane test machine
        let credential = Credential::new("127.0.0.1", "nobody", CredentialSecret::Agent).with_port(1);

        let err = connector.connect(credential).await.err().unwrap();
        match err {
            TargetError::Authentication { endpoint, .. } => {
                assert_eq!(endpoint, "nobody@127.0.0.1:1")
            }
            other => panic!("expected authentication failure, got {:?}", other),
        }
    }

    /// Empty user names are rejected before any network traffic
    #[tokio::test]
    async fn test_connect_rejects_invalid_credential() {
        let connector = SshConnector::default();
        let credential = Credential::new("example.com", "", CredentialSecret::Agent);
        assert!(matches!(
            connector.connect(credential).await.err().unwrap(),
            TargetError::Authentication { .. }
        ));
    }

    fn live_credential() -> Option<Credential> {
        let host = std::env::var("PULSAR_TEST_SSH_HOST").ok()?;
        let user = std::env::var("PULSAR_TEST_SSH_USER").ok()?;
        Some(Credential::new(host, user, CredentialSecret::password_or_prompt()))
    }

    /// Run a command and check output streaming (requires SSH server)
    #[tokio::test]
    #[ignore]
    async fn test_live_execute() {
        let Some(credential) = live_credential() else {
            eprintln!("PULSAR_TEST_SSH_HOST / PULSAR_TEST_SSH_USER not set, skipping");
            return;
        };

        let mut session = SshConnector::default().connect(credential).await.unwrap();
        let result = session
            .execute(
                &CommandRequest::new("echo hello; echo oops >&2"),
                &ExecControl::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout, vec!["hello".to_string()]);
        assert_eq!(result.stderr, vec!["oops".to_string()]);

        session.close().await;
        assert!(!session.is_open());
    }

    /// Exit status and timeout handling (requires SSH server)
    #[tokio::test]
    #[ignore]
    async fn test_live_exit_status_and_timeout() {
        let Some(credential) = live_credential() else {
            return;
        };

        let mut session = SshConnector::default().connect(credential).await.unwrap();

        let unchecked = session
            .execute(
                &CommandRequest::new("exit 4").check_exit_status(false),
                &ExecControl::new(),
            )
            .await
            .unwrap();
        assert_eq!(unchecked.exit_status, 4);

        let err = session
            .execute(
                &CommandRequest::new("sleep 10").with_timeout(Some(Duration::from_millis(500))),
                &ExecControl::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        session.close().await;
    }

    /// A timed-out command's children are stopped too (requires SSH server)
    #[tokio::test]
    #[ignore]
    async fn test_live_timeout_stops_children() {
        let Some(credential) = live_credential() else {
            return;
        };

        let marker = format!("/tmp/pulsar-survivor-{}", std::process::id());
        let mut session = SshConnector::default().connect(credential).await.unwrap();

        let err = session
            .execute(
                &CommandRequest::new(format!("sh -c 'sleep 2; touch {}'; sleep 5", marker))
                    .with_timeout(Some(Duration::from_millis(500))),
                &ExecControl::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let check = session
            .execute(
                &CommandRequest::new(format!("test -e {}", marker)).check_exit_status(false),
                &ExecControl::new(),
            )
            .await
            .unwrap();
        assert_ne!(check.exit_status, 0, "child outlived the timeout");

        session.close().await;
    }

    /// Upload then download a file (requires SSH server)
    #[tokio::test]
    #[ignore]
    async fn test_live_push_pull() {
        let Some(credential) = live_credential() else {
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("materials.h5");
        std::fs::write(&local, b"cross sections").unwrap();

        let remote = PathBuf::from(format!(
            "/tmp/pulsar-test-{}/materials.h5",
            std::process::id()
        ));

        let mut session = SshConnector::default().connect(credential).await.unwrap();
        session.push(&local, &remote).await.unwrap();

        let back = dir.path().join("back.h5");
        session.pull(&remote, &back).await.unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), b"cross sections");

        let missing = session
            .pull(&remote.with_file_name("absent"), &dir.path().join("absent"))
            .await
            .unwrap_err();
        assert!(missing.failing_path().is_some());

        session.close().await;
    }
}
