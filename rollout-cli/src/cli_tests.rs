//! Tests for CLI command parsing and the pack/restore flows

#[cfg(test)]
mod tests {
    use clap::Parser;
    use std::path::PathBuf;

    use crate::config::Config;
    use crate::{Cli, Commands, run_pack, run_restore};
    use rollout_core::{ReleaseLedger, RestoreMode, RuntimeId, SemanticVersion};

    #[test]
    fn test_cli_parsing_pack_command() {
        let args = vec![
            "rollout",
            "pack",
            "--app-id",
            "demo",
            "--rid",
            "linux-x64",
            "--version",
            "1.0.0",
            "--payload-dir",
            "/tmp/payload",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Pack {
                app_id,
                rid,
                version,
                payload_dir,
                channel,
                ..
            } => {
                assert_eq!(app_id, "demo");
                assert_eq!(rid, "linux-x64");
                assert_eq!(version, "1.0.0");
                assert_eq!(payload_dir, PathBuf::from("/tmp/payload"));
                assert!(channel.is_none());
            }
            _ => panic!("Expected Pack command"),
        }
    }

    #[test]
    fn test_cli_parsing_restore_defaults_to_install() {
        let args = vec!["rollout", "restore", "--app-id", "demo", "--rid", "win-x64"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Restore { mode, channel, .. } => {
                assert_eq!(mode, "install");
                assert!(channel.is_none());
            }
            _ => panic!("Expected Restore command"),
        }
    }

    #[test]
    fn test_cli_parsing_rejects_missing_args() {
        let args = vec!["rollout", "pack", "--app-id", "demo"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_cli_parsing_verbose_flag() {
        let args = vec!["rollout", "--verbose", "releases", "--app-id", "a", "--rid", "linux-x64"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.verbose);
    }

    #[tokio::test]
    async fn test_pack_then_restore_roundtrip() {
        let rid: RuntimeId = "linux-x64".parse().unwrap();
        let publish_dir = tempfile::tempdir().unwrap();
        let payload_dir = tempfile::tempdir().unwrap();
        std::fs::write(payload_dir.path().join("app.bin"), b"first version").unwrap();

        run_pack(
            "demo".to_string(),
            rid,
            SemanticVersion::new(1, 0, 0),
            payload_dir.path(),
            "stable".to_string(),
            None,
            publish_dir.path(),
        )
        .await
        .unwrap();

        std::fs::write(payload_dir.path().join("app.bin"), b"second version").unwrap();
        run_pack(
            "demo".to_string(),
            rid,
            SemanticVersion::new(1, 1, 0),
            payload_dir.path(),
            "stable".to_string(),
            None,
            publish_dir.path(),
        )
        .await
        .unwrap();

        let ledger = ReleaseLedger::from_bytes(
            &std::fs::read(publish_dir.path().join(crate::LEDGER_FILENAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(ledger.releases().len(), 2);

        // Restore into a fresh cache from the publish directory as feed.
        let cache_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.feed.url = publish_dir.path().to_string_lossy().to_string();
        config.packages.dir = cache_dir.path().to_string_lossy().to_string();

        let ok = run_restore(
            &config,
            "demo".to_string(),
            rid,
            RestoreMode::Install,
            Some("stable".to_string()),
        )
        .await
        .unwrap();
        assert!(ok);
        assert!(
            cache_dir
                .path()
                .join("demo-linux-x64-1.1.0-full.zip")
                .exists()
        );
    }
}
