//! Restricted code execution tool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::sandbox::{self, RunOutput};
use super::Tool;

/// Output reported when the program never binds `result`.
pub const NO_RESULT_PLACEHOLDER: &str =
    "Code executed. No 'result' variable found or assigned by the code.";

const RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a short Python-like snippet in the sandbox.
pub struct CodeRunner {
    timeout: Duration,
}

impl Default for CodeRunner {
    fn default() -> Self {
        Self::new(RUN_TIMEOUT)
    }
}

impl CodeRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn envelope(outcome: Result<RunOutput, String>) -> Value {
        let mut envelope = Map::new();
        match outcome {
            Ok(run) => {
                envelope.insert("execution_status".into(), json!("success"));
                envelope.insert(
                    "output".into(),
                    run.result.unwrap_or_else(|| json!(NO_RESULT_PLACEHOLDER)),
                );
                if !run.stdout.is_empty() {
                    envelope.insert("stdout".into(), json!(run.stdout));
                }
            }
            Err(message) => {
                envelope.insert("execution_status".into(), json!("error"));
                envelope.insert("output".into(), json!(message));
            }
        }
        Value::Object(envelope)
    }
}

#[async_trait]
impl Tool for CodeRunner {
    fn name(&self) -> &str {
        "python_code_executor"
    }

    fn description(&self) -> &str {
        "Executes a given string of Python code. The code MUST be safe and simple. The code should assign its main output to a variable named 'result' to be captured. Example: To find the length of a list, use code like 'my_list = [1,2,3]; result = len(my_list)'. Use this tool when explicitly asked to run Python code or if a task is best solved by a short Python script (e.g., complex text manipulation not covered by other tools). Runs in a restricted interpreter: only basic statements, lists, dicts, strings and the builtins print, len, str, int, float, bool, list, dict, sum, min, max, range, abs, round and sorted are available. No imports, file system access or network calls."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The code to execute; assign the answer to 'result'"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let code = args["code"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'code' argument"))?
            .to_string();

        tracing::info!(bytes = code.len(), "Executing sandboxed code");

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let task = tokio::task::spawn_blocking(move || {
            sandbox::run(&code, flag).map_err(|e| e.to_string())
        });

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined.map_err(|e| anyhow::anyhow!("Execution task failed: {}", e))?,
            Err(_) => {
                // The blocking thread cannot be aborted; the flag stops it at its next step.
                cancel.store(true, Ordering::Relaxed);
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Sandboxed code timed out"
                );
                anyhow::bail!("Execution timed out after {:?}", self.timeout);
            }
        };

        if let Err(message) = &outcome {
            tracing::debug!(error = %message, "Sandboxed code failed");
        }

        Ok(Self::envelope(outcome).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(code: &str) -> Value {
        let out = CodeRunner::default()
            .execute(json!({ "code": code }))
            .await
            .unwrap();
        serde_json::from_str(&out).unwrap()
    }

    #[tokio::test]
    async fn result_variable_is_reported() {
        let envelope = run("my_list = [1,2,3]; result = len(my_list)").await;
        assert_eq!(envelope, json!({"execution_status": "success", "output": 3}));
    }

    #[tokio::test]
    async fn structured_results_stay_json() {
        let envelope = run("result = {'squares': [i * i for i in range(4)]}").await;
        assert_eq!(envelope["output"], json!({"squares": [0, 1, 4, 9]}));
    }

    #[tokio::test]
    async fn missing_result_uses_placeholder() {
        let envelope = run("x = 1\nprint('x is', x)").await;
        assert_eq!(envelope["execution_status"], "success");
        assert_eq!(envelope["output"], NO_RESULT_PLACEHOLDER);
        assert_eq!(envelope["stdout"], "x is 1\n");
    }

    #[tokio::test]
    async fn failures_are_reported_in_the_envelope() {
        let envelope = run("result = 1 / 0").await;
        assert_eq!(envelope["execution_status"], "error");
        assert_eq!(envelope["output"], "ZeroDivisionError: division by zero");
        assert!(envelope.get("stdout").is_none());

        let envelope = run("import os").await;
        assert_eq!(envelope["execution_status"], "error");
        assert!(envelope["output"].as_str().unwrap().starts_with("SyntaxError"));
    }

    #[tokio::test]
    async fn missing_code_argument_is_a_tool_error() {
        let err = CodeRunner::default().execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Missing 'code'"));
    }

    #[tokio::test]
    async fn limits_surface_as_error_envelopes() {
        let envelope = run("result = sum(range(10 ** 18), 0.0)").await;
        assert_eq!(envelope["execution_status"], "error");
        assert!(envelope["output"]
            .as_str()
            .unwrap()
            .starts_with("LimitExceeded"));

        let envelope = run("a = []\nfor i in range(20):\n    a = [a, a]\nresult = a").await;
        assert_eq!(envelope["execution_status"], "error");
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let runner = CodeRunner::new(Duration::from_millis(1));
        let err = runner
            .execute(json!({ "code": "while True:\n    x = sum(range(150))" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
