//! Integration tests for rpmbrowse

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn rpmbrowse(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("rpmbrowse");
        cmd.env("RPMBROWSE_CONFIG", dir.path().join("config.toml"))
            .env("RPMBROWSE_CACHE_DIR", dir.path().join("cache"));
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("RPM packages"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("rpmbrowse"));
    }

    #[test]
    fn parse_debuginfo_json() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .args([
                "parse",
                "strace-debuginfo-4.12-1.fc24.armv7hl.rpm",
                "--format",
                "json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""name": "strace""#))
            .stdout(predicate::str::contains(r#""is_debuginfo": true"#));
    }

    #[test]
    fn parse_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .args(["parse", "not-an-rpm"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid package identifier"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn fetch_rejects_path_separator_before_any_io() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .args(["fetch", "../strace-4.12-1.fc24.x86_64.rpm"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("path separator"));
    }

    #[test]
    fn cache_list_empty() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached packages"));
    }

    #[test]
    fn cache_list_adopts_existing_package() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("cache/strace-4.12-1.fc24.x86_64.rpm/usr/bin");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("strace"), vec![0u8; 10]).unwrap();

        rpmbrowse(&dir)
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("strace-4.12-1.fc24.x86_64.rpm"));
    }

    #[test]
    fn browse_cached_package_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("cache/strace-4.12-1.fc24.x86_64.rpm/usr/bin");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("strace"), vec![0u8; 10]).unwrap();

        rpmbrowse(&dir)
            .args(["browse", "strace-4.12-1.fc24.x86_64.rpm", "usr"])
            .assert()
            .success()
            .stdout(predicate::str::contains("bin/"));

        rpmbrowse(&dir)
            .args(["browse", "strace-4.12-1.fc24.x86_64.rpm", "../../etc/passwd"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Insecure path"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        rpmbrowse(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("max_cache_size"));
    }
}
