use assert_cmd::Command as AssertCommand;
use pbsq_core::model::{SubTask, TaskId, TaskSpec};
use pbsq_test_utils::TestContext;
use predicates::prelude::*;
use serde_json::{json, Value};

fn pbsq(ctx: &TestContext) -> AssertCommand {
    let mut cmd = AssertCommand::new(env!("CARGO_BIN_EXE_pbsq"));
    for (key, value) in ctx.envs() {
        cmd.env(key, value);
    }
    cmd.env("PBSQ_LOG_LEVEL", "debug");
    cmd.arg("--config").arg(&ctx.config_path);
    cmd
}

fn master_task(ctx: &TestContext, id: &str, commands: &[&str]) -> TaskSpec {
    let mut task = TaskSpec::new(TaskId(id.into()));
    task.runtime.workdir = Some(ctx.root.clone());
    task.sub_tasks = commands
        .iter()
        .enumerate()
        .map(|(i, command)| SubTask {
            id: TaskId(format!("{}-{}", id, i)),
            params: [("command".to_string(), Value::from(*command))]
                .into_iter()
                .collect(),
            runtime: Default::default(),
        })
        .collect();
    ctx.write_task(&task);
    task
}

#[test]
fn test_submit_prints_job_id_and_calls_scheduler() {
    let ctx = TestContext::new();
    ctx.simple_task("t1");

    pbsq(&ctx)
        .args(["submit", "t1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("t1 submitted as job 1001"));

    assert!(ctx.tasks_dir.join("t1.sh").exists());
    assert_eq!(
        ctx.scheduler_calls(),
        vec![format!("qsub {}", ctx.tasks_dir.join("t1.sh").display())]
    );
    assert!(ctx.read(&ctx.tasks_dir.join("t1.job_id")).contains("job_id: 1001"));
}

#[test]
fn test_submit_dry_run_runs_script_locally() {
    let ctx = TestContext::new();
    ctx.simple_task("t1");

    pbsq(&ctx)
        .args(["submit", "t1", "-m", "dryrun"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "would run: pbsq execute t1 -v 2 -s default -m dryrun",
        ));
    assert!(ctx.scheduler_calls().is_empty());
}

#[test]
fn test_submit_reports_missing_task_but_submits_the_rest() {
    let ctx = TestContext::new();
    ctx.simple_task("a");

    pbsq(&ctx)
        .args(["submit", "a", "ghost"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("a submitted as job 1001"))
        .stderr(predicate::str::contains("ghost").and(predicate::str::contains("1 of 2")));
}

#[test]
fn test_submit_rejects_unknown_queue() {
    let ctx = TestContext::new();
    ctx.simple_task("t1");

    pbsq(&ctx)
        .args(["-q", "nowhere", "submit", "t1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_status_confirms_submitted_task() {
    let ctx = TestContext::new();
    ctx.simple_task("t1");
    pbsq(&ctx).args(["submit", "t1"]).assert().success();

    let output = pbsq(&ctx)
        .args(["status", "t1", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["entries"][0]["status"], json!("submitted"));
    assert_eq!(report["entries"][0]["job_id"], json!("1001"));
    assert!(ctx.scheduler_calls().contains(&"qstat 1001".to_string()));
}

#[test]
fn test_status_of_unsubmitted_task_does_not_probe() {
    let ctx = TestContext::new();
    ctx.simple_task("t1");

    pbsq(&ctx)
        .args(["status", "t1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("new"));
    assert!(ctx.scheduler_calls().is_empty());
}

#[test]
fn test_kill_cancels_batch_job() {
    let ctx = TestContext::new();
    ctx.simple_task("t1");
    pbsq(&ctx).args(["submit", "t1"]).assert().success();

    pbsq(&ctx)
        .args(["kill", "t1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1001 cancelled"));

    let qdel: Vec<String> = ctx
        .scheduler_calls()
        .into_iter()
        .filter(|c| c.starts_with("qdel"))
        .collect();
    assert_eq!(qdel, vec!["qdel 1001".to_string()]);
    assert!(ctx.read(&ctx.tasks_dir.join("t1.status")).starts_with("killed"));
}

#[test]
fn test_submit_workflow() {
    let ctx = TestContext::new();

    pbsq(&ctx)
        .args(["submit-workflow", "wf1", "-p", "script=run.sos"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow wf1 submitted as job 1001"));

    let script = ctx.read(&ctx.workflows_dir.join("wf1.sh"));
    assert!(script.contains("workflow wf1 run.sos"));
}

#[test]
fn test_execute_master_task_locally() {
    let ctx = TestContext::new();
    let out = ctx.root.join("results");
    std::fs::create_dir_all(&out).unwrap();
    let commands: Vec<String> = (0..4)
        .map(|i| format!("echo part{i} > {}/part{i}.txt && echo hello from {i}", out.display()))
        .collect();
    let refs: Vec<&str> = commands.iter().map(String::as_str).collect();
    master_task(&ctx, "m1", &refs);

    pbsq(&ctx)
        .args(["execute", "m1", "-j", "2"])
        .assert()
        .success();

    for i in 0..4 {
        assert!(out.join(format!("part{i}.txt")).exists());
    }
    let master_out = ctx.read(&ctx.tasks_dir.join("m1.out"));
    assert!(master_out.contains("hello from 0"));
    assert!(master_out.contains("hello from 3"));
    assert!(ctx.read(&ctx.tasks_dir.join("m1.status")).starts_with("completed"));
}

#[test]
fn test_execute_master_task_through_coordinator() {
    let ctx = TestContext::new();
    master_task(&ctx, "m2", &["true", "true", "true"]);

    pbsq(&ctx)
        .args(["execute", "m2", "-j", "localhost:2", "localhost:2"])
        .assert()
        .success();
    assert!(ctx.read(&ctx.tasks_dir.join("m2.status")).starts_with("completed"));
}

#[test]
fn test_execute_reports_failed_sub_task() {
    let ctx = TestContext::new();
    master_task(&ctx, "m3", &["true", "exit 4"]);

    pbsq(&ctx)
        .args(["execute", "m3", "-j", "2"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("m3-1"));
    assert!(ctx.read(&ctx.tasks_dir.join("m3.status")).starts_with("failed"));
}

#[test]
fn test_execute_rejects_bad_worker_spec() {
    let ctx = TestContext::new();
    master_task(&ctx, "m4", &["true"]);

    pbsq(&ctx)
        .args(["execute", "m4", "-j", "node1:4", "node2:lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unacceptable worker specification"));
}

#[test]
fn test_execute_dry_run_lists_commands() {
    let ctx = TestContext::new();
    master_task(&ctx, "m5", &["echo a", "echo b"]);

    pbsq(&ctx)
        .args(["execute", "m5", "-m", "dryrun"])
        .assert()
        .success()
        .stdout(predicate::str::contains("m5-0: echo a").and(predicate::str::contains("m5-1: echo b")));
    assert!(!ctx.tasks_dir.join("m5.status").exists());
}
