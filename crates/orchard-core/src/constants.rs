pub mod markers {
    pub const CANCELLED: &[&str] = &["CANCELLED", "CANCELED"];
    pub const TIMEOUT: &[&str] = &["TIMEOUT"];
    pub const FAILED: &[&str] = &["FAILED", "FAILURE", "NODE_FAIL"];
    pub const SUCCESS: &[&str] = &["SUCCESS", "COMPLETED"];
}

pub mod suffixes {
    pub const SCRIPT: &str = ".sh";
    pub const PULL_SCRIPT: &str = ".pull.sh";
    pub const PUSH_SCRIPT: &str = ".push.sh";
    pub const CONFIG: &str = ".yaml";
    pub const LAUNCHER: &str = ".launcher";
    pub const INPUTS: &str = ".inputs";
    pub const ARCHIVE: &str = ".zip";
    pub const STDOUT: &str = ".out";
    pub const STDERR: &str = ".err";
    pub const EXIT: &str = ".exit";
    pub const STATUS_LOG: &str = ".log";
}

pub mod dirs {
    pub const APP: &str = "orchard";
    pub const INPUT: &str = "input";
    pub const LOGS: &str = "logs";
    pub const STATUS: &str = "status";
}

pub mod cache_keys {
    pub const RESULTS: &str = "results";
    pub const HEALTHCHECKS: &str = "healthchecks";
    pub const LOCKS: &str = "lock";
}

pub mod defaults {
    pub const REFRESH_SECONDS: u64 = 60;
    pub const CLEANUP_MINUTES: u64 = 60;
    pub const STAGE_TIME_LIMIT_SECONDS: u64 = 3600;
    /// Upper bound on a workflow's `time` limit.
    pub const MAX_TIME_LIMIT_SECONDS: u64 = 365 * 24 * 3600;
    pub const INITIAL_DELAY_SECONDS: u64 = 5;
    pub const HEALTHCHECK_MINUTES: u64 = 5;
    pub const LOCK_TTL_SECONDS: u64 = 300;
    pub const HEALTHCHECK_HISTORY: usize = 12;
    pub const SSH_PORT: u16 = 22;
    pub const SERVICE_ACCOUNT: &str = "orchard";
    pub const PUBLIC_PREFIX: &str = "/iplant/home/shared";
    pub const PULL_COMMAND: &str = "cp -r {source} {dest}/";
    pub const PUSH_COMMAND: &str = "cp {source} {dest}/";
}

pub mod env {
    pub const LOG_LEVEL: &str = "ORCHARD_LOG_LEVEL";
    pub const LOG_TEE: &str = "ORCHARD_TEST_LOG_TEE";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_groups_do_not_overlap() {
        for group in [markers::TIMEOUT, markers::FAILED, markers::SUCCESS] {
            for marker in group {
                assert!(!markers::CANCELLED.contains(marker));
            }
        }
        assert!(!markers::FAILED.contains(&"COMPLETED"));
    }

    #[test]
    fn test_suffix_constants() {
        assert_eq!(suffixes::SCRIPT, ".sh");
        assert_eq!(suffixes::CONFIG, ".yaml");
        assert!(suffixes::PULL_SCRIPT.ends_with(suffixes::SCRIPT));
        assert!(suffixes::PUSH_SCRIPT.ends_with(suffixes::SCRIPT));
    }

    #[test]
    fn test_transfer_templates_have_placeholders() {
        for template in [defaults::PULL_COMMAND, defaults::PUSH_COMMAND] {
            assert!(template.contains("{source}"));
            assert!(template.contains("{dest}"));
        }
    }
}
