//! Configured jobs
//!
//! Turns `[[jobs]]` entries into schedule requests and runs their actions.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cadence_core::{callback_fn, ScheduleRequest, SchedulerEngine, TaskCallback, TaskContext, TriggerConfig};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::config::{JobAction, JobConfig, JobTrigger};

/// Build the schedule request for a job
pub fn build_request(job: &JobConfig) -> Result<ScheduleRequest> {
    job.validate()?;

    let trigger = match &job.trigger {
        JobTrigger::Delay { secs } => TriggerConfig::delay(Duration::from_secs(*secs)),
        JobTrigger::At {
            at,
            interval_secs: Some(interval),
        } => TriggerConfig::every(*at, Duration::from_secs(*interval)),
        JobTrigger::At { at, .. } => TriggerConfig::at(*at),
        JobTrigger::Event { name } => TriggerConfig::event(name.clone()),
        JobTrigger::FileExists { path } => {
            let path = path.clone();
            TriggerConfig::custom(move || Ok(path.exists()))
        }
    };

    let mut request = ScheduleRequest::new(action_callback(&job.action), trigger)
        .with_name(job.name.clone())
        .recurring(job.recurring)
        .with_params(job.params.clone());
    if let Some(secs) = job.timeout_secs {
        request = request.with_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = job.max_retries {
        request = request.with_max_retries(retries);
    }
    Ok(request)
}

/// Register every configured job. Returns the number registered.
pub fn register_jobs(engine: &SchedulerEngine, jobs: &[JobConfig]) -> Result<usize> {
    for job in jobs {
        let request = build_request(job)?;
        let id = engine
            .create_schedule(request)
            .with_context(|| format!("Failed to register job '{}'", job.name))?;
        info!(job = %job.name, task_id = %id, trigger = %job.trigger, "Job registered");
    }
    Ok(jobs.len())
}

fn action_callback(action: &JobAction) -> Arc<dyn TaskCallback> {
    match action.clone() {
        JobAction::Log { message } => callback_fn(move |ctx: TaskContext| {
            let message = message.clone();
            async move {
                info!(job = %ctx.task_name, attempt = ctx.attempt, params = ?ctx.params, "{}", message);
                Ok(json!({ "logged": message }))
            }
        }),
        JobAction::Shell { command } => callback_fn(move |ctx: TaskContext| {
            let command = command.clone();
            async move { run_shell(&command, &ctx).await }
        }),
    }
}

/// Run `command` with `sh -c`; a non-zero exit is an error.
///
/// The child is killed if the execution is cancelled or times out.
async fn run_shell(command: &str, ctx: &TaskContext) -> Result<Value> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(param_env(&ctx.params))
        .env("CADENCE_TASK_NAME", &ctx.task_name)
        .env("CADENCE_ATTEMPT", ctx.attempt.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to spawn shell for job '{}'", ctx.task_name))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        warn!(job = %ctx.task_name, status = %output.status, stderr = %stderr, "Shell command failed");
        bail!("command exited with {}: {}", output.status, stderr);
    }
    Ok(json!({
        "exit_code": output.status.code(),
        "stdout": stdout,
    }))
}

/// `CADENCE_PARAM_<KEY>` variables for the task parameters.
///
/// Keys are upper-cased with non-alphanumerics replaced by `_`; string values
/// are passed as-is, everything else as JSON.
pub fn param_env(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let key: String = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (format!("CADENCE_PARAM_{}", key), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::config::JobConfig;
    use cadence_core::{SchedulerConfig, TaskStatus, TriggerKind};
    use uuid::Uuid;

    fn job(trigger: JobTrigger, action: JobAction) -> JobConfig {
        JobConfig {
            name: "job".to_string(),
            trigger,
            action,
            recurring: false,
            timeout_secs: None,
            max_retries: None,
            params: Map::new(),
        }
    }

    fn context(params: Map<String, Value>) -> TaskContext {
        TaskContext {
            task_id: Uuid::new_v4(),
            task_name: "job".to_string(),
            execution_id: Uuid::new_v4(),
            attempt: 1,
            params,
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    #[test]
    fn test_param_env() {
        let mut params = Map::new();
        params.insert("file".to_string(), json!("a.csv"));
        params.insert("retry-count".to_string(), json!(3));
        let mut env = param_env(&params);
        env.sort();
        assert_eq!(
            env,
            vec![
                ("CADENCE_PARAM_FILE".to_string(), "a.csv".to_string()),
                ("CADENCE_PARAM_RETRY_COUNT".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_request_rejects_invalid_job() {
        let mut bad = job(
            JobTrigger::Delay { secs: 0 },
            JobAction::Log { message: "x".to_string() },
        );
        bad.recurring = true;
        assert!(build_request(&bad).is_err());
    }

    #[tokio::test]
    async fn test_shell_action_success_and_failure() {
        let mut params = Map::new();
        params.insert("who".to_string(), json!("world"));
        let ok = run_shell("echo hello $CADENCE_PARAM_WHO", &context(params))
            .await
            .unwrap();
        assert_eq!(ok["stdout"], json!("hello world"));
        assert_eq!(ok["exit_code"], json!(0));

        let err = run_shell("echo broken >&2; exit 3", &context(Map::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_register_jobs() {
        let engine = SchedulerEngine::new(SchedulerConfig::new()).unwrap();
        engine.start().await.unwrap();

        let mut on_event = job(
            JobTrigger::Event { name: "deploy".to_string() },
            JobAction::Log { message: "deployed".to_string() },
        );
        on_event.name = "on-deploy".to_string();
        on_event.recurring = true;
        let mut watcher = job(
            JobTrigger::FileExists { path: "/definitely/not/here".into() },
            JobAction::Shell { command: "true".to_string() },
        );
        watcher.name = "watch".to_string();
        watcher.timeout_secs = Some(5);

        assert_eq!(register_jobs(&engine, &[on_event, watcher.clone()]).unwrap(), 2);
        let id = engine.find_schedule_by_name("on-deploy").unwrap();
        let info = engine.task_info(id).unwrap();
        assert_eq!(info.trigger_kind, TriggerKind::Event);
        assert!(info.recurring);

        let watch = engine.task_info(engine.find_schedule_by_name("watch").unwrap()).unwrap();
        assert_eq!(watch.trigger_kind, TriggerKind::Custom);
        assert_eq!(watch.timeout_secs, 5.0);
        assert_eq!(watch.status, TaskStatus::Pending);

        // same name again conflicts
        assert!(register_jobs(&engine, &[watcher]).is_err());
        engine.stop().await;
    }
}
