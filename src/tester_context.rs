/// Per-invocation tester context, derived from environment variables and
/// the submission's `codecrafters.yml`.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::{Result, TesterError};

/// One element of the `CODECRAFTERS_TEST_CASES_JSON` array.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TesterContextTestCase {
    /// Slug of the test case. Example: "bind-to-port"
    pub slug: String,

    /// Prefix for all logs the tester emits for this case. Example: "stage-1"
    pub tester_log_prefix: String,

    /// Display title. Example: "Stage #1: Bind to a port"
    pub title: String,
}

/// All flags passed in via environment variables or the submission's
/// `codecrafters.yml`.
#[derive(Clone, Debug)]
pub struct TesterContext {
    /// Absolute path of the candidate executable.
    pub executable_path: PathBuf,
    /// From the `debug` key in codecrafters.yml.
    pub is_debug: bool,
    pub test_cases: Vec<TesterContextTestCase>,
    pub should_skip_anti_cheat_test_cases: bool,

    /// True when this process is a re-invocation that should run exactly one
    /// step and exit.
    pub is_worker_process: bool,
    /// Slug of the step to run when `is_worker_process` is set.
    pub worker_process_step_slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    #[serde(default)]
    debug: bool,
}

fn env_flag(env: &HashMap<String, String>, name: &str) -> bool {
    env.get(name).map(String::as_str) == Some("true")
}

/// Parses the tester context from the given environment.
pub fn get_tester_context(
    env: &HashMap<String, String>,
    executable_file_name: &str,
) -> Result<TesterContext> {
    let submission_dir = env.get("CODECRAFTERS_SUBMISSION_DIR").ok_or_else(|| {
        TesterError::Context("CODECRAFTERS_SUBMISSION_DIR env var not found".to_string())
    })?;

    let is_worker_process = env_flag(env, "CODECRAFTERS_IS_WORKER_PROCESS")
        || env_flag(env, "CODECRAFTERS_IS_FORKED_PROCESS_FOR_TEST_RUNNER_STEP");
    let worker_process_step_slug = env.get("CODECRAFTERS_WORKER_PROCESS_STEP_SLUG").cloned();

    let test_cases_json = env.get("CODECRAFTERS_TEST_CASES_JSON").ok_or_else(|| {
        TesterError::Context("CODECRAFTERS_TEST_CASES_JSON env var not found".to_string())
    })?;

    let test_cases: Vec<TesterContextTestCase> =
        serde_json::from_str(test_cases_json).map_err(|e| {
            TesterError::Context(format!("failed to parse CODECRAFTERS_TEST_CASES_JSON: {}", e))
        })?;

    for test_case in &test_cases {
        if test_case.slug.is_empty() {
            return Err(TesterError::Context(
                "CODECRAFTERS_TEST_CASES_JSON contains a test case with an empty slug".to_string(),
            ));
        }
        if test_case.tester_log_prefix.is_empty() {
            return Err(TesterError::Context(
                "CODECRAFTERS_TEST_CASES_JSON contains a test case with an empty tester_log_prefix"
                    .to_string(),
            ));
        }
        if test_case.title.is_empty() {
            return Err(TesterError::Context(
                "CODECRAFTERS_TEST_CASES_JSON contains a test case with an empty title".to_string(),
            ));
        }
    }

    if test_cases.is_empty() && !is_worker_process {
        return Err(TesterError::Context(
            "CODECRAFTERS_TEST_CASES_JSON is empty".to_string(),
        ));
    }

    let should_skip_anti_cheat_test_cases = env_flag(env, "CODECRAFTERS_SKIP_ANTI_CHEAT");

    let submission_dir = Path::new(submission_dir);
    let yaml_config = read_from_yaml(&submission_dir.join("codecrafters.yml"))?;

    Ok(TesterContext {
        executable_path: submission_dir.join(executable_file_name),
        is_debug: yaml_config.debug,
        test_cases,
        should_skip_anti_cheat_test_cases,
        is_worker_process,
        worker_process_step_slug,
    })
}

fn read_from_yaml(config_path: &Path) -> Result<YamlConfig> {
    let contents = std::fs::read_to_string(config_path).map_err(|e| {
        TesterError::Context(format!("failed to read {}: {}", config_path.display(), e))
    })?;

    if contents.trim().is_empty() {
        return Ok(YamlConfig::default());
    }

    serde_yaml::from_str(&contents).map_err(|e| {
        TesterError::Context(format!("failed to parse {}: {}", config_path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_submission_dir(yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("codecrafters.yml"), yaml).unwrap();
        dir
    }

    fn base_env(submission_dir: &Path) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "CODECRAFTERS_SUBMISSION_DIR".to_string(),
            submission_dir.to_string_lossy().into_owned(),
        );
        env.insert(
            "CODECRAFTERS_TEST_CASES_JSON".to_string(),
            r#"[{"slug": "stage-one", "tester_log_prefix": "stage-1", "title": "Stage #1"}]"#
                .to_string(),
        );
        env
    }

    #[test]
    fn test_parses_context_from_env_and_yaml() {
        let dir = write_submission_dir("debug: true\n");
        let env = base_env(dir.path());

        let context = get_tester_context(&env, "your_program.sh").unwrap();
        assert!(context.is_debug);
        assert_eq!(
            context.executable_path,
            dir.path().join("your_program.sh")
        );
        assert_eq!(context.test_cases.len(), 1);
        assert_eq!(context.test_cases[0].slug, "stage-one");
        assert!(!context.is_worker_process);
        assert!(!context.should_skip_anti_cheat_test_cases);
    }

    #[test]
    fn test_missing_submission_dir_is_an_error() {
        let env = HashMap::new();
        let err = get_tester_context(&env, "x").unwrap_err();
        assert!(err.to_string().contains("CODECRAFTERS_SUBMISSION_DIR"));
    }

    #[test]
    fn test_missing_test_cases_json_is_an_error() {
        let dir = write_submission_dir("debug: false\n");
        let mut env = base_env(dir.path());
        env.remove("CODECRAFTERS_TEST_CASES_JSON");

        let err = get_tester_context(&env, "x").unwrap_err();
        assert!(err.to_string().contains("CODECRAFTERS_TEST_CASES_JSON"));
    }

    #[test]
    fn test_malformed_test_cases_json_is_an_error() {
        let dir = write_submission_dir("debug: false\n");
        let mut env = base_env(dir.path());
        env.insert(
            "CODECRAFTERS_TEST_CASES_JSON".to_string(),
            "not json".to_string(),
        );

        let err = get_tester_context(&env, "x").unwrap_err();
        assert!(err
            .to_string()
            .contains("failed to parse CODECRAFTERS_TEST_CASES_JSON"));
    }

    #[test]
    fn test_empty_field_in_test_case_is_an_error() {
        let dir = write_submission_dir("debug: false\n");
        let mut env = base_env(dir.path());
        env.insert(
            "CODECRAFTERS_TEST_CASES_JSON".to_string(),
            r#"[{"slug": "", "tester_log_prefix": "stage-1", "title": "Stage #1"}]"#.to_string(),
        );

        let err = get_tester_context(&env, "x").unwrap_err();
        assert!(err.to_string().contains("empty slug"));
    }

    #[test]
    fn test_empty_test_case_list_requires_worker_mode() {
        let dir = write_submission_dir("debug: false\n");
        let mut env = base_env(dir.path());
        env.insert("CODECRAFTERS_TEST_CASES_JSON".to_string(), "[]".to_string());

        let err = get_tester_context(&env, "x").unwrap_err();
        assert!(err.to_string().contains("is empty"));

        env.insert(
            "CODECRAFTERS_IS_WORKER_PROCESS".to_string(),
            "true".to_string(),
        );
        let context = get_tester_context(&env, "x").unwrap();
        assert!(context.is_worker_process);
        assert!(context.test_cases.is_empty());
    }

    #[test]
    fn test_worker_flag_accepts_legacy_name() {
        let dir = write_submission_dir("debug: false\n");
        let mut env = base_env(dir.path());
        env.insert(
            "CODECRAFTERS_IS_FORKED_PROCESS_FOR_TEST_RUNNER_STEP".to_string(),
            "true".to_string(),
        );
        env.insert(
            "CODECRAFTERS_WORKER_PROCESS_STEP_SLUG".to_string(),
            "stage-one".to_string(),
        );

        let context = get_tester_context(&env, "x").unwrap();
        assert!(context.is_worker_process);
        assert_eq!(
            context.worker_process_step_slug.as_deref(),
            Some("stage-one")
        );
    }

    #[test]
    fn test_missing_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let env = base_env(dir.path());

        let err = get_tester_context(&env, "x").unwrap_err();
        assert!(err.to_string().contains("codecrafters.yml"));
    }

    #[test]
    fn test_skip_anti_cheat_flag() {
        let dir = write_submission_dir("debug: false\n");
        let mut env = base_env(dir.path());
        env.insert(
            "CODECRAFTERS_SKIP_ANTI_CHEAT".to_string(),
            "true".to_string(),
        );

        let context = get_tester_context(&env, "x").unwrap();
        assert!(context.should_skip_anti_cheat_test_cases);
    }
}
