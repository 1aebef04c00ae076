use crate::control::CoordinatorSummary;
use crate::runner::SubTaskResult;
use pbsq_core::model::TaskId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutState {
    Pending,
    Dispatching,
    Collecting,
    Combined,
    Aborted,
}

impl fmt::Display for FanOutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FanOutState::Pending => "pending",
            FanOutState::Dispatching => "dispatching",
            FanOutState::Collecting => "collecting",
            FanOutState::Combined => "combined",
            FanOutState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CombinedResult {
    pub task: TaskId,
    pub state: FanOutState,
    /// One entry per sub-task that reported, in sub-task order.
    pub entries: Vec<SubTaskResult>,
    pub exit_code: i32,
    pub outputs: Vec<String>,
    /// Sub-tasks that reported a failure. Non-empty means partial failure.
    pub failed: Vec<TaskId>,
    pub abort_reason: Option<String>,
    /// Phase the run was in when it was aborted.
    pub aborted_in: Option<FanOutState>,
    pub control_plane: Option<CoordinatorSummary>,
}

impl CombinedResult {
    pub fn empty(task: TaskId) -> Self {
        Self {
            task,
            state: FanOutState::Combined,
            entries: Vec::new(),
            exit_code: 0,
            outputs: Vec::new(),
            failed: Vec::new(),
            abort_reason: None,
            aborted_in: None,
            control_plane: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == FanOutState::Combined && self.failed.is_empty()
    }
}

/// Accumulates sub-task results. Folding the same sub-task twice keeps the first.
pub struct ResultFolder {
    order: Vec<TaskId>,
    received: HashMap<TaskId, SubTaskResult>,
}

impl ResultFolder {
    pub fn new(order: Vec<TaskId>) -> Self {
        Self {
            order,
            received: HashMap::new(),
        }
    }

    pub fn fold(&mut self, result: SubTaskResult) -> bool {
        if !self.order.contains(&result.sub_id) {
            tracing::warn!("Ignoring result of unknown sub-task {}", result.sub_id);
            return false;
        }
        if self.received.contains_key(&result.sub_id) {
            tracing::warn!("Ignoring duplicate result of sub-task {}", result.sub_id);
            return false;
        }
        self.received.insert(result.sub_id.clone(), result);
        true
    }

    pub fn received(&self) -> usize {
        self.received.len()
    }

    pub fn finish(
        mut self,
        task: TaskId,
        abort_reason: Option<String>,
        control_plane: Option<CoordinatorSummary>,
    ) -> CombinedResult {
        let entries: Vec<SubTaskResult> = self
            .order
            .iter()
            .filter_map(|id| self.received.remove(id))
            .collect();

        let failed: Vec<TaskId> = entries
            .iter()
            .filter(|e| !e.succeeded())
            .map(|e| e.sub_id.clone())
            .collect();

        let mut outputs = Vec::new();
        for entry in &entries {
            for output in &entry.outputs {
                if !outputs.contains(output) {
                    outputs.push(output.clone());
                }
            }
        }

        let exit_code = entries
            .iter()
            .find(|e| !e.succeeded())
            .map(|e| if e.exit_code == 0 { 1 } else { e.exit_code })
            .unwrap_or(if abort_reason.is_some() { 1 } else { 0 });

        let state = if abort_reason.is_some() {
            FanOutState::Aborted
        } else {
            FanOutState::Combined
        };

        CombinedResult {
            task,
            state,
            entries,
            exit_code,
            outputs,
            failed,
            abort_reason,
            aborted_in: None,
            control_plane,
        }
    }
}

async fn append_file(from: &Path, to: &Path) -> std::io::Result<()> {
    let content = tokio::fs::read(from).await?;
    if content.is_empty() {
        return Ok(());
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(to)
        .await?;
    file.write_all(&content).await?;
    Ok(())
}

/// Appends a sub-task's captured stdout and stderr to the master task's files.
pub async fn append_subtask_outputs(
    result: &SubTaskResult,
    master_out: &Path,
    master_err: &Path,
) -> std::io::Result<()> {
    if let Some(out) = &result.stdout {
        append_file(out, master_out).await?;
    }
    if let Some(err) = &result.stderr {
        append_file(err, master_err).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str, outputs: &[&str]) -> SubTaskResult {
        SubTaskResult {
            sub_id: TaskId(id.into()),
            exit_code: 0,
            stdout: None,
            stderr: None,
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            error: None,
            node: None,
        }
    }

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|s| TaskId(s.to_string())).collect()
    }

    #[test]
    fn test_fold_is_idempotent_and_ordered() {
        let mut folder = ResultFolder::new(ids(&["a", "b", "c"]));
        assert!(folder.fold(ok("c", &["c.txt"])));
        assert!(folder.fold(ok("a", &["a.txt", "shared.txt"])));
        assert!(!folder.fold(ok("a", &["again.txt"])));
        assert!(!folder.fold(ok("zzz", &[])));
        assert!(folder.fold(ok("b", &["shared.txt"])));

        let result = folder.finish(TaskId("m".into()), None, None);
        assert_eq!(result.state, FanOutState::Combined);
        assert_eq!(result.entries.len(), 3);
        let order: Vec<&str> = result.entries.iter().map(|e| e.sub_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(result.outputs, vec!["a.txt", "shared.txt", "c.txt"]);
        assert!(result.is_success());
    }

    #[test]
    fn test_partial_failure_is_reported() {
        let mut folder = ResultFolder::new(ids(&["a", "b"]));
        folder.fold(ok("a", &[]));
        let mut bad = ok("b", &[]);
        bad.exit_code = 3;
        folder.fold(bad);

        let result = folder.finish(TaskId("m".into()), None, None);
        assert_eq!(result.state, FanOutState::Combined);
        assert_eq!(result.failed, ids(&["b"]));
        assert_eq!(result.exit_code, 3);
        assert!(!result.is_success());
    }

    #[test]
    fn test_abort_keeps_partial_entries() {
        let mut folder = ResultFolder::new(ids(&["a", "b"]));
        folder.fold(ok("a", &[]));
        let result = folder.finish(TaskId("m".into()), Some("timeout".into()), None);
        assert_eq!(result.state, FanOutState::Aborted);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_append_subtask_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let sub_out = dir.path().join("s.out");
        std::fs::write(&sub_out, "line\n").unwrap();
        let master_out = dir.path().join("m.out");
        let master_err = dir.path().join("m.err");
        std::fs::write(&master_out, "first\n").unwrap();

        let mut result = ok("s", &[]);
        result.stdout = Some(sub_out);
        append_subtask_outputs(&result, &master_out, &master_err)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&master_out).unwrap(),
            "first\nline\n"
        );
        assert!(!master_err.exists());
    }
}
