pub mod suffixes {
    pub const SCRIPT: &str = "sh";
    pub const JOB_ID: &str = "job_id";
    pub const TASK: &str = "task";
    pub const STATUS: &str = "status";
    pub const STDOUT: &str = "out";
    pub const STDERR: &str = "err";
}

pub mod dirs {
    pub const TASKS: &str = "tasks";
    pub const WORKFLOWS: &str = "workflows";
    pub const DEFAULT_TASKS_DIR: &str = "~/.sos/tasks";
    pub const DEFAULT_WORKFLOWS_DIR: &str = "~/.sos/workflows";
}

pub mod keys {
    pub const JOB_ID: &str = "job_id";
    pub const TASK: &str = "task";
    pub const JOB_NAME: &str = "job_name";
    pub const JOB_FILE: &str = "job_file";
    pub const NODES: &str = "nodes";
    pub const CORES: &str = "cores";
    pub const MEM: &str = "mem";
    pub const WALLTIME: &str = "walltime";
    pub const WORKDIR: &str = "workdir";
    pub const CUR_DIR: &str = "cur_dir";
    pub const VERBOSITY: &str = "verbosity";
    pub const SIG_MODE: &str = "sig_mode";
    pub const RUN_MODE: &str = "run_mode";
    pub const COMMAND: &str = "command";
    pub const RUNTIME: &str = "_runtime";
}

pub mod defaults {
    pub const SUBMIT_CMD_OUTPUT: &str = "{job_id}";
    pub const DRYRUN: &str = "dryrun";
    pub const RUN_MODE: &str = "run";
    pub const SIG_MODE: &str = "default";
    pub const VERBOSITY: u8 = 2;
    pub const EXECUTABLE: &str = "pbsq";
}
