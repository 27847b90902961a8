//! Subprocess-based execution collaborator.
//!
//! Runs an assembled unit plus the current task's setup code and test
//! asserts under a Python interpreter. The fixture is provided out of band
//! through [`CodeExecutor::prepare`] before each rollout.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::curriculum::Task;
use crate::oracle::{CodeExecutor, Execution};

/// Test fixture captured from the current task.
#[derive(Debug, Clone, Default)]
struct Fixture {
    setup_code: String,
    test_cases: Vec<String>,
}

pub struct PythonSandbox {
    python_bin: String,
    timeout: Duration,
    fixture: Mutex<Fixture>,
}

impl PythonSandbox {
    pub fn new(python_bin: String, timeout: Duration) -> Self {
        Self {
            python_bin,
            timeout,
            fixture: Mutex::new(Fixture::default()),
        }
    }

    /// Candidate code, then setup code, then the selected test asserts.
    fn build_script(code: &str, fixture: &Fixture, use_public_tests: bool) -> String {
        let mut parts = vec![code.to_string()];
        if !fixture.setup_code.trim().is_empty() {
            parts.push(fixture.setup_code.clone());
        }
        let tests: Vec<String> = if use_public_tests {
            fixture.test_cases.iter().take(1).cloned().collect()
        } else {
            fixture.test_cases.clone()
        };
        parts.extend(tests);
        parts.join("\n\n")
    }
}

#[async_trait]
impl CodeExecutor for PythonSandbox {
    async fn prepare(&self, task: &Task) -> anyhow::Result<()> {
        let mut fixture = self
            .fixture
            .lock()
            .map_err(|_| anyhow::anyhow!("sandbox fixture lock poisoned"))?;
        *fixture = Fixture {
            setup_code: task.setup_code.clone(),
            test_cases: task.test_cases.clone(),
        };
        Ok(())
    }

    async fn execute(&self, code: &str, use_public_tests: bool) -> anyhow::Result<Execution> {
        let script = {
            let fixture = self
                .fixture
                .lock()
                .map_err(|_| anyhow::anyhow!("sandbox fixture lock poisoned"))?;
            Self::build_script(code, &fixture, use_public_tests)
        };

        let mut command = Command::new(&self.python_bin);
        command.arg("-c").arg(&script).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(Execution {
                    feedback: format!(
                        "execution timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                    reward: false,
                    info: json!({"timeout": true}),
                });
            }
        };

        let reward = output.status.success();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let feedback = if reward {
            "all test cases passed".to_string()
        } else {
            format!("{stdout}\n{stderr}").trim().to_string()
        };

        Ok(Execution {
            feedback,
            reward,
            info: json!({"exit_code": output.status.code()}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_places_tests_after_code() {
        let fixture = Fixture {
            setup_code: "data = [1, 2, 3]".to_string(),
            test_cases: vec![
                "assert total(data) == 6".to_string(),
                "assert total([]) == 0".to_string(),
            ],
        };
        let script =
            PythonSandbox::build_script("def total(xs):\n    return sum(xs)", &fixture, false);

        let code_pos = script.find("def total").unwrap();
        let setup_pos = script.find("data = [1, 2, 3]").unwrap();
        let test_pos = script.find("assert total(data)").unwrap();
        assert!(code_pos < setup_pos && setup_pos < test_pos);
        assert!(script.contains("assert total([]) == 0"));
    }

    #[test]
    fn public_tests_take_only_the_first() {
        let fixture = Fixture {
            setup_code: String::new(),
            test_cases: vec![
                "assert f(1) == 1".to_string(),
                "assert f(2) == 2".to_string(),
            ],
        };
        let script = PythonSandbox::build_script("def f(x):\n    return x", &fixture, true);
        assert!(script.contains("assert f(1) == 1"));
        assert!(!script.contains("assert f(2) == 2"));
    }
}
