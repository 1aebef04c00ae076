use crate::config::QueueConfig;
use crate::constants::{defaults, keys, suffixes};
use crate::context::ExecutionContext;
use crate::model::{Params, TaskSpec};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Malformed template at offset {position}: {reason}")]
    Malformed { position: usize, reason: String },

    #[error("Template references undefined parameter '{0}'")]
    MissingParameter(String),
}

/// Quotes a string for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(_) => value.to_string(),
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitutes `{name}` placeholders. `{{` and `}}` produce literal braces.
pub fn render(template: &str, params: &Params) -> Result<String, TemplateError> {
    let template = template.replace("\r\n", "\n");
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for (_, nc) in chars.by_ref() {
                    if nc == '}' {
                        closed = true;
                        break;
                    }
                    if nc == '{' {
                        return Err(TemplateError::Malformed {
                            position: pos,
                            reason: "nested '{' inside placeholder".into(),
                        });
                    }
                    name.push(nc);
                }
                if !closed {
                    return Err(TemplateError::Malformed {
                        position: pos,
                        reason: "unclosed '{'".into(),
                    });
                }
                let name = name.trim();
                if !is_valid_name(name) {
                    return Err(TemplateError::Malformed {
                        position: pos,
                        reason: format!("invalid placeholder name '{}'", name),
                    });
                }
                let value = params
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingParameter(name.to_string()))?;
                out.push_str(&render_value(value));
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(TemplateError::Malformed {
                        position: pos,
                        reason: "single '}' encountered".into(),
                    });
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// `<base>/<id>.sh`, or `<base>/<queue>/<id>.sh` for queues with scoped directories.
pub fn job_file_path(base: &Path, queue: Option<&str>, id: &str) -> PathBuf {
    let dir = match queue {
        Some(q) => base.join(q),
        None => base.to_path_buf(),
    };
    dir.join(format!("{}.{}", id, suffixes::SCRIPT))
}

/// Builds the parameter set a task template is rendered with.
pub struct TaskParameters {
    params: Params,
}

impl TaskParameters {
    pub fn new(ctx: &ExecutionContext, queue: &str, queue_config: &QueueConfig, task: &TaskSpec) -> Self {
        let mut params = queue_config.template_params();
        params.extend(task.params.iter().map(|(k, v)| (k.clone(), v.clone())));

        if task.runtime.extra.contains_key("name") {
            tracing::warn!("Runtime option name is deprecated. Please use job_name instead.");
        }
        params.extend(task.runtime.to_params());

        let id = task.id.to_string();
        let workdir = task
            .runtime
            .workdir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        params.insert(keys::WORKDIR.into(), Value::from(workdir.clone()));
        params.insert(keys::CUR_DIR.into(), Value::from(workdir));
        params.insert(keys::TASK.into(), Value::from(id.clone()));
        params
            .entry(keys::JOB_NAME.to_string())
            .or_insert_with(|| Value::from(id.clone()));
        params
            .entry(keys::NODES.to_string())
            .or_insert_with(|| Value::from(1));
        params
            .entry(keys::CORES.to_string())
            .or_insert_with(|| Value::from(1));

        let verbosity = task.runtime.verbosity.unwrap_or(ctx.verbosity);
        let sig_mode = task
            .runtime
            .sig_mode
            .clone()
            .unwrap_or_else(|| ctx.sig_mode.clone());
        let run_mode = task
            .runtime
            .run_mode
            .clone()
            .unwrap_or_else(|| ctx.run_mode.clone());
        params.insert(keys::VERBOSITY.into(), Value::from(verbosity));
        params.insert(keys::SIG_MODE.into(), Value::from(sig_mode.clone()));
        params.insert(keys::RUN_MODE.into(), Value::from(run_mode.clone()));
        params.insert(
            keys::COMMAND.into(),
            Value::from(format!(
                "{} execute {} -v {} -s {} -m {}",
                defaults::EXECUTABLE,
                id,
                verbosity,
                sig_mode,
                run_mode
            )),
        );

        let scope = queue_config.queue_scoped_dirs.then_some(queue);
        let job_file = job_file_path(Path::new(&ctx.config.tasks_dir), scope, &id);
        params.insert(
            keys::JOB_FILE.into(),
            Value::from(job_file.to_string_lossy().to_string()),
        );

        Self { params }
    }

    pub fn run_mode(&self) -> &str {
        self.params
            .get(keys::RUN_MODE)
            .and_then(Value::as_str)
            .unwrap_or(defaults::RUN_MODE)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_params(self) -> Params {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{RuntimeParams, TaskId};
    use std::sync::Arc;

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_values() {
        let p = params(&[
            ("task", Value::from("t1")),
            ("cores", Value::from(4)),
            ("modules", Value::from(vec!["gcc", "R"])),
            ("empty", Value::Null),
        ]);
        let out = render("#PBS -N {task}\n#PBS -l ppn={cores}\nmodule load {modules}{empty}\n", &p).unwrap();
        assert_eq!(out, "#PBS -N t1\n#PBS -l ppn=4\nmodule load gcc R\n");
    }

    #[test]
    fn test_render_escapes_and_crlf() {
        let p = params(&[("x", Value::from("v"))]);
        assert_eq!(render("{{x}} = {x}\r\n", &p).unwrap(), "{x} = v\n");
        assert_eq!(render("awk '{{print $1}}'", &p).unwrap(), "awk '{print $1}'");
    }

    #[test]
    fn test_render_missing_parameter() {
        let err = render("qsub {job_file}", &Params::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingParameter("job_file".into()));
    }

    #[test]
    fn test_render_malformed() {
        let p = params(&[("x", Value::from("v"))]);
        assert!(matches!(render("{x", &p), Err(TemplateError::Malformed { .. })));
        assert!(matches!(render("x}", &p), Err(TemplateError::Malformed { .. })));
        assert!(matches!(render("{}", &p), Err(TemplateError::Malformed { .. })));
        assert!(matches!(render("{a b}", &p), Err(TemplateError::Malformed { .. })));
    }

    #[test]
    fn test_job_file_path_scoping() {
        let base = Path::new("~/.sos/tasks");
        assert_eq!(
            job_file_path(base, None, "abc"),
            PathBuf::from("~/.sos/tasks/abc.sh")
        );
        assert_eq!(
            job_file_path(base, Some("long"), "abc"),
            PathBuf::from("~/.sos/tasks/long/abc.sh")
        );
    }

    #[test]
    fn test_task_parameters_defaults_and_overrides() {
        let ctx = ExecutionContext::from_parts(Arc::new(Config::default()), None, "/tmp/t".into(), "/tmp/w".into());
        let mut queue = QueueConfig {
            queue_scoped_dirs: false,
            ..Default::default()
        };
        queue.extra.insert("walltime".into(), Value::from("01:00:00"));
        queue.extra.insert("account".into(), Value::from("proj"));

        let mut task = TaskSpec::new(TaskId("t42".into()));
        task.runtime = RuntimeParams {
            walltime: Some("10:00:00".into()),
            workdir: Some("/scratch/run".into()),
            ..Default::default()
        };

        let built = TaskParameters::new(&ctx, "cluster", &queue, &task);
        let p = built.params();
        assert_eq!(p["task"], Value::from("t42"));
        assert_eq!(p["job_name"], Value::from("t42"));
        assert_eq!(p["nodes"], Value::from(1));
        assert_eq!(p["cores"], Value::from(1));
        assert_eq!(p["walltime"], Value::from("10:00:00"));
        assert_eq!(p["account"], Value::from("proj"));
        assert_eq!(p["cur_dir"], Value::from("/scratch/run"));
        assert_eq!(p["job_file"], Value::from("~/.sos/tasks/t42.sh"));
        assert_eq!(
            p["command"],
            Value::from("pbsq execute t42 -v 2 -s default -m run")
        );
        assert_eq!(built.run_mode(), "run");
    }
}
