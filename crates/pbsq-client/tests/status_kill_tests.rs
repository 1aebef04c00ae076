use pbsq_client::agent::agent_for;
use pbsq_client::backend::{PbsBackend, QueueBackend};
use pbsq_client::kill::{KillAction, KillCascade};
use pbsq_client::registry::JobRegistry;
use pbsq_client::status::StatusReconciler;
use pbsq_client::store::{FileTaskStore, TaskStore};
use pbsq_core::model::{JobIdentity, TaskId, TaskStatus};
use pbsq_test_utils::TestContext;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Parts {
    backend: Arc<dyn QueueBackend>,
    store: Arc<FileTaskStore>,
    registry: JobRegistry,
}

fn parts(t: &TestContext) -> Parts {
    let ctx = t.exec_ctx();
    let (name, queue) = ctx.queue_config().unwrap();
    let agent = agent_for(&name, queue, &ctx);
    Parts {
        backend: Arc::new(PbsBackend::for_tasks(&name, queue.clone(), agent).unwrap()),
        store: Arc::new(FileTaskStore::new(t.tasks_dir.clone())),
        registry: JobRegistry::new(t.tasks_dir.clone()),
    }
}

fn task(p: &Parts, id: &str, status: TaskStatus, job_id: Option<&str>) -> TaskId {
    let task = TaskId(id.to_string());
    p.store.set_status(&task, status).unwrap();
    if let Some(job_id) = job_id {
        let mut fields = BTreeMap::new();
        fields.insert("job_id".to_string(), job_id.to_string());
        p.registry
            .record(id, &JobIdentity::new(fields).unwrap())
            .unwrap();
    }
    task
}

fn reconciler(p: &Parts) -> StatusReconciler {
    StatusReconciler::new(p.backend.clone(), p.store.clone(), p.registry.clone())
}

#[test]
fn test_submitted_task_without_identity_is_failed() {
    let t = TestContext::new();
    let p = parts(&t);
    let id = task(&p, "lost", TaskStatus::Submitted, None);

    let report = reconciler(&p).query(&[id.clone()], 1).unwrap();
    assert_eq!(report.get(&id).unwrap().status, TaskStatus::Failed);
    assert!(t.scheduler_calls().is_empty());
}

#[test]
fn test_submitted_task_is_probed_once() {
    let t = TestContext::new();
    let p = parts(&t);
    let id = task(&p, "t1", TaskStatus::Submitted, Some("4242"));

    let report = reconciler(&p).query(&[id.clone()], 2).unwrap();
    let entry = report.get(&id).unwrap();
    assert_eq!(entry.status, TaskStatus::Submitted);
    assert_eq!(entry.job_id.as_deref(), Some("4242"));
    assert_eq!(t.scheduler_calls(), vec!["qstat 4242".to_string()]);
}

#[test]
fn test_failed_probe_marks_submitted_task_failed() {
    let t = TestContext::new();
    t.install_script("qstat", "#!/bin/sh\necho 'Unknown Job Id' 1>&2\nexit 153\n");
    let p = parts(&t);
    let id = task(&p, "t1", TaskStatus::Submitted, Some("4242"));

    let report = reconciler(&p).query(&[id.clone()], 0).unwrap();
    assert_eq!(report.get(&id).unwrap().status, TaskStatus::Failed);
}

#[test]
fn test_low_verbosity_never_probes_other_statuses() {
    let t = TestContext::new();
    let p = parts(&t);
    let running = task(&p, "r", TaskStatus::Running, Some("1"));
    let done = task(&p, "d", TaskStatus::Completed, Some("2"));

    let report = reconciler(&p).query(&[running, done], 2).unwrap();
    assert_eq!(report.entries[0].status, TaskStatus::Running);
    assert_eq!(report.entries[1].status, TaskStatus::Completed);
    assert!(t.scheduler_calls().is_empty());
}

#[test]
fn test_high_verbosity_probes_every_task_with_identity() {
    let t = TestContext::new();
    let p = parts(&t);
    let running = task(&p, "r", TaskStatus::Running, Some("11"));
    let done = task(&p, "d", TaskStatus::Completed, Some("12"));
    let bare = task(&p, "b", TaskStatus::Running, None);

    let report = reconciler(&p)
        .query(&[running.clone(), done.clone(), bare.clone()], 3)
        .unwrap();
    assert!(report.get(&running).unwrap().detail.contains("11 R batch"));
    assert!(report.get(&done).unwrap().detail.contains("12 R batch"));
    assert_eq!(report.get(&bare).unwrap().status, TaskStatus::Running);
    assert_eq!(
        t.scheduler_calls(),
        vec!["qstat 11".to_string(), "qstat 12".to_string()]
    );
}

#[test]
fn test_kill_cascade_spares_completed_tasks() {
    let t = TestContext::new();
    let p = parts(&t);
    let done = task(&p, "done", TaskStatus::Completed, Some("7"));

    let cascade = KillCascade::new(p.backend.clone(), p.store.clone(), p.registry.clone());
    let report = cascade.kill(&[done.clone()]).unwrap();

    assert_eq!(report.get(&done).unwrap().action, KillAction::NotKilled);
    assert_eq!(p.store.status(&done).unwrap(), TaskStatus::Completed);
    assert!(t.scheduler_calls().is_empty());
}

#[test]
fn test_kill_cascade_cancels_job_exactly_once() {
    let t = TestContext::new();
    let p = parts(&t);
    let running = task(&p, "run", TaskStatus::Running, Some("99"));

    let cascade = KillCascade::new(p.backend.clone(), p.store.clone(), p.registry.clone());
    let report = cascade.kill(&[running.clone()]).unwrap();

    let entry = report.get(&running).unwrap();
    assert_eq!(entry.status, TaskStatus::Killed);
    assert!(matches!(
        &entry.action,
        KillAction::Killed { job_id, output } if job_id == "99" && output.contains("deleted 99")
    ));
    assert_eq!(t.scheduler_calls(), vec!["qdel 99".to_string()]);
}

#[test]
fn test_kill_cascade_skips_tasks_without_identity() {
    let t = TestContext::new();
    let p = parts(&t);
    let pending = task(&p, "pend", TaskStatus::Pending, None);

    let cascade = KillCascade::new(p.backend.clone(), p.store.clone(), p.registry.clone());
    let report = cascade.kill(&[pending.clone()]).unwrap();

    assert!(matches!(
        report.get(&pending).unwrap().action,
        KillAction::Skipped { .. }
    ));
    assert!(t.scheduler_calls().is_empty());
}

#[test]
fn test_kill_command_failure_is_recorded_not_raised() {
    let t = TestContext::new();
    t.install_script("qdel", "#!/bin/sh\necho 'qdel: Unknown Job Id' 1>&2\nexit 1\n");
    let p = parts(&t);
    let running = task(&p, "run", TaskStatus::Running, Some("5"));

    let cascade = KillCascade::new(p.backend.clone(), p.store.clone(), p.registry.clone());
    let report = cascade.kill(&[running.clone()]).unwrap();
    assert!(matches!(
        report.get(&running).unwrap().action,
        KillAction::Failed { .. }
    ));
}

fn corrupt(t: &TestContext, id: &str) -> TaskId {
    std::fs::write(t.tasks_dir.join(format!("{}.status", id)), "weird\n").unwrap();
    TaskId(id.to_string())
}

#[test]
fn test_kill_cascade_continues_past_unreadable_status() {
    let t = TestContext::new();
    let p = parts(&t);
    let running = task(&p, "run", TaskStatus::Running, Some("99"));
    let bad = corrupt(&t, "bad");

    let cascade = KillCascade::new(p.backend.clone(), p.store.clone(), p.registry.clone());
    let report = cascade.kill(&[running.clone(), bad.clone()]).unwrap();

    assert_eq!(report.entries.len(), 2);
    assert!(matches!(
        &report.get(&running).unwrap().action,
        KillAction::Killed { job_id, .. } if job_id == "99"
    ));
    let entry = report.get(&bad).unwrap();
    assert_eq!(entry.status, TaskStatus::Failed);
    assert!(matches!(&entry.action, KillAction::Skipped { reason } if reason.contains("unreadable")));
    assert_eq!(p.store.status(&running).unwrap(), TaskStatus::Killed);
    assert_eq!(t.scheduler_calls(), vec!["qdel 99".to_string()]);
}

#[test]
fn test_status_report_continues_past_unreadable_status() {
    let t = TestContext::new();
    let p = parts(&t);
    let bad = corrupt(&t, "bad");
    let submitted = task(&p, "t1", TaskStatus::Submitted, Some("4242"));

    for verbosity in [1, 3] {
        let report = reconciler(&p)
            .query(&[bad.clone(), submitted.clone()], verbosity)
            .unwrap();
        assert_eq!(report.entries.len(), 2);
        let entry = report.get(&bad).unwrap();
        assert_eq!(entry.status, TaskStatus::Failed);
        assert!(entry.detail.contains("unreadable"));
        assert_eq!(report.get(&submitted).unwrap().job_id.as_deref(), Some("4242"));
    }
}
