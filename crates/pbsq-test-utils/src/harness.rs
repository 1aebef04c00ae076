use pbsq_core::config::{load_config, Config};
use pbsq_core::context::ExecutionContext;
use pbsq_core::model::{TaskId, TaskSpec};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const QUEUE: &str = "fake";

const CONFIG_TEMPLATE: &str = r##"
default_queue = "fake"
tasks_dir = "@ROOT@/tasks"
workflows_dir = "@ROOT@/workflows"

[queues.fake]
task_template = """
#!/bin/bash
#PBS -N {job_name}
#PBS -l nodes={nodes}:ppn={cores}
cd {cur_dir}
echo "would run: {command}"
"""
workflow_template = """
#!/bin/bash
#PBS -N {job_name}
echo "workflow {job_name} {script}"
"""
submit_cmd = "@BIN@/qsub {job_file}"
status_cmd = "@BIN@/qstat {job_id}"
kill_cmd = "@BIN@/qdel {job_id}"
submit_cmd_output = "Job <{job_id}> submitted"
account = "test-project"

[executor]
transport = "in_process"
ready_timeout_secs = 5
collect_timeout_secs = 20
join_timeout_secs = 5

[logging]
max_files = 3
"##;

const QSUB: &str = r#"#!/bin/sh
echo "qsub $*" >> "@LOG@"
n=$(cat "@COUNTER@" 2>/dev/null || echo 1000)
n=$((n + 1))
echo "$n" > "@COUNTER@"
echo "Job <$n> submitted"
"#;

const QSTAT: &str = r#"#!/bin/sh
echo "qstat $*" >> "@LOG@"
echo "$1 R batch"
"#;

const QDEL: &str = r#"#!/bin/sh
echo "qdel $*" >> "@LOG@"
echo "deleted $1"
"#;

/// A throwaway home for one test: config, spool directories and a fake
/// scheduler whose invocations are logged to `scheduler.log`.
pub struct TestContext {
    pub _temp_dir: tempfile::TempDir,
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub workflows_dir: PathBuf,
    pub config_path: PathBuf,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("pbsq-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let bin_dir = root.join("bin");
        let tasks_dir = root.join("tasks");
        let workflows_dir = root.join("workflows");
        let config_dir = root.join("config").join("pbsq");
        for dir in [&bin_dir, &tasks_dir, &workflows_dir, &config_dir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }
        fs::create_dir_all(root.join("home")).expect("Failed to create home");
        fs::create_dir_all(root.join("cache")).expect("Failed to create cache");

        let ctx = Self {
            _temp_dir: temp_dir,
            config_path: config_dir.join("config.toml"),
            root,
            bin_dir,
            tasks_dir,
            workflows_dir,
        };
        ctx.write_config(CONFIG_TEMPLATE);
        ctx.install_script("qsub", QSUB);
        ctx.install_script("qstat", QSTAT);
        ctx.install_script("qdel", QDEL);
        ctx
    }

    fn substitute(&self, text: &str) -> String {
        text.replace("@ROOT@", &self.root.to_string_lossy())
            .replace("@BIN@", &self.bin_dir.to_string_lossy())
            .replace("@LOG@", &self.scheduler_log().to_string_lossy())
            .replace("@COUNTER@", &self.root.join("job_counter").to_string_lossy())
    }

    /// Writes a config file; `@ROOT@` and `@BIN@` are replaced first.
    pub fn write_config(&self, template: &str) {
        fs::write(&self.config_path, self.substitute(template)).expect("Failed to write config");
    }

    /// Installs (or replaces) an executable in the fake scheduler's bin dir.
    pub fn install_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin_dir.join(name);
        fs::write(&path, self.substitute(body)).expect("Failed to write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
        path
    }

    pub fn config(&self) -> Config {
        load_config(Some(&self.config_path)).expect("Test config must parse")
    }

    pub fn exec_ctx(&self) -> ExecutionContext {
        ExecutionContext::new(self.config(), Some(QUEUE.to_string()))
            .expect("Test context must build")
    }

    pub fn write_task(&self, spec: &TaskSpec) -> PathBuf {
        let path = self.tasks_dir.join(format!("{}.task", spec.id));
        spec.save(&path).expect("Failed to write task file");
        path
    }

    pub fn simple_task(&self, id: &str) -> TaskSpec {
        let mut spec = TaskSpec::new(TaskId(id.to_string()));
        spec.runtime.workdir = Some(self.root.clone());
        self.write_task(&spec);
        spec
    }

    pub fn scheduler_log(&self) -> PathBuf {
        self.root.join("scheduler.log")
    }

    pub fn scheduler_calls(&self) -> Vec<String> {
        fs::read_to_string(self.scheduler_log())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn read(&self, path: &Path) -> String {
        fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
    }

    /// Environment for running the binary against this context.
    pub fn envs(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("HOME", self.root.join("home")),
            ("XDG_CONFIG_HOME", self.root.join("config")),
            ("XDG_CACHE_HOME", self.root.join("cache")),
        ]
    }
}
