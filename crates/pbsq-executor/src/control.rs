use crate::error::{ExecutorError, Result};
use crate::runner::{SubTaskRequest, SubTaskResult, SubTaskRunner};
use crate::topology::WorkerTopology;
use futures::future::join_all;
use pbsq_core::config::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    Task(Box<SubTaskRequest>),
    Done { success: bool },
}

impl ControlMessage {
    /// `["task", {...}]` or `["done", true]`.
    pub fn to_wire(&self) -> Result<Value> {
        Ok(match self {
            ControlMessage::Task(request) => {
                Value::Array(vec![Value::from("task"), serde_json::to_value(request)?])
            }
            ControlMessage::Done { success } => {
                Value::Array(vec![Value::from("done"), Value::from(*success)])
            }
        })
    }

    pub fn from_wire(value: Value) -> Result<Self> {
        let malformed = |v: &Value| ExecutorError::Transport(format!("unexpected control message {}", v));
        let Value::Array(items) = &value else {
            return Err(malformed(&value));
        };
        match (items.first().and_then(Value::as_str), items.get(1)) {
            (Some("task"), Some(body)) => Ok(ControlMessage::Task(Box::new(
                serde_json::from_value(body.clone())?,
            ))),
            (Some("done"), Some(Value::Bool(success))) => Ok(ControlMessage::Done {
                success: *success,
            }),
            _ => Err(malformed(&value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorSummary {
    pub dispatched: usize,
    pub done_messages: usize,
    pub success: Option<bool>,
}

/// Where workers deliver results.
#[derive(Debug, Clone)]
pub enum CollectorAddress {
    InProcess(mpsc::Sender<SubTaskResult>),
    Tcp(SocketAddr),
}

impl fmt::Display for CollectorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorAddress::InProcess(_) => write!(f, "inproc://collector"),
            CollectorAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Receiving end of the result channel, owned by the dispatcher.
pub struct ResultCollector {
    results: mpsc::Receiver<SubTaskResult>,
    address: CollectorAddress,
    acceptor: Option<JoinHandle<()>>,
}

async fn read_results(stream: TcpStream, tx: mpsc::Sender<SubTaskResult>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<SubTaskResult>(&line) {
                Ok(result) => {
                    if tx.send(result).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("Discarding malformed result: {}", e),
            },
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Result connection failed: {}", e);
                return;
            }
        }
    }
}

impl ResultCollector {
    /// Binds on an ephemeral address. `capacity` should cover every expected result
    /// so workers never block on a slow dispatcher.
    pub async fn bind(transport: Transport, capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        match transport {
            Transport::InProcess => Ok(Self {
                results: rx,
                address: CollectorAddress::InProcess(tx),
                acceptor: None,
            }),
            Transport::Tcp => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let addr = listener.local_addr()?;
                let acceptor = tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, _)) => {
                                tokio::spawn(read_results(stream, tx.clone()));
                            }
                            Err(e) => {
                                tracing::warn!("Result collector stopped accepting: {}", e);
                                return;
                            }
                        }
                    }
                });
                Ok(Self {
                    results: rx,
                    address: CollectorAddress::Tcp(addr),
                    acceptor: Some(acceptor),
                })
            }
        }
    }

    pub fn address(&self) -> CollectorAddress {
        self.address.clone()
    }

    /// Waits for the next result until `deadline`. The caller fills in the counts of a timeout.
    pub async fn recv_until(&mut self, deadline: Instant) -> Result<SubTaskResult> {
        let started = Instant::now();
        match tokio::time::timeout_at(deadline, self.results.recv()).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(ExecutorError::ChannelClosed(
                "result collector has no senders left".into(),
            )),
            Err(_) => Err(ExecutorError::CollectTimeout {
                received: 0,
                expected: 0,
                timeout_secs: deadline.saturating_duration_since(started).as_secs_f64(),
            }),
        }
    }

    pub fn close(mut self) {
        self.results.close();
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

/// Worker-side sender for one collector address.
#[derive(Debug, Clone)]
pub struct ResultPusher {
    address: CollectorAddress,
}

impl ResultPusher {
    pub fn new(address: CollectorAddress) -> Self {
        Self { address }
    }

    pub async fn push(&self, result: &SubTaskResult) -> Result<()> {
        match &self.address {
            CollectorAddress::InProcess(tx) => tx
                .send(result.clone())
                .await
                .map_err(|_| ExecutorError::ChannelClosed("result collector is gone".into())),
            CollectorAddress::Tcp(addr) => {
                let mut stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| ExecutorError::Transport(format!("connect {}: {}", addr, e)))?;
                let mut line = serde_json::to_string(result)?;
                line.push('\n');
                stream.write_all(line.as_bytes()).await?;
                stream.shutdown().await?;
                Ok(())
            }
        }
    }
}

/// Actor that receives sub-tasks and runs them on worker slots.
pub struct Coordinator {
    topology: WorkerTopology,
    nodes: Vec<String>,
    runner: Arc<dyn SubTaskRunner>,
    pusher: ResultPusher,
}

impl Coordinator {
    pub fn new(
        topology: WorkerTopology,
        nodes: Vec<String>,
        runner: Arc<dyn SubTaskRunner>,
        collector: CollectorAddress,
    ) -> Self {
        Self {
            topology,
            nodes,
            runner,
            pusher: ResultPusher::new(collector),
        }
    }

    pub fn spawn(
        self,
        commands: mpsc::Receiver<ControlMessage>,
        ready: oneshot::Sender<()>,
    ) -> JoinHandle<CoordinatorSummary> {
        tokio::spawn(self.run(commands, ready))
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<ControlMessage>,
        ready: oneshot::Sender<()>,
    ) -> CoordinatorSummary {
        let slots = self
            .topology
            .total_slots()
            .filter(|n| *n <= Semaphore::MAX_PERMITS)
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut summary = CoordinatorSummary::default();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let _ = ready.send(());

        while let Some(message) = commands.recv().await {
            match message {
                ControlMessage::Task(mut request) => {
                    let node = self
                        .nodes
                        .get(summary.dispatched % self.nodes.len().max(1))
                        .cloned();
                    summary.dispatched += 1;
                    request.node = node;

                    let slots = slots.clone();
                    let runner = self.runner.clone();
                    let pusher = self.pusher.clone();
                    workers.push(tokio::spawn(async move {
                        let _permit = match slots {
                            Some(sem) => match sem.acquire_owned().await {
                                Ok(permit) => Some(permit),
                                Err(_) => return,
                            },
                            None => None,
                        };
                        let sub_id = request.sub_id.clone();
                        let result = runner.run(*request).await;
                        if let Err(e) = pusher.push(&result).await {
                            tracing::warn!("Could not deliver result of {}: {}", sub_id, e);
                        }
                    }));
                }
                ControlMessage::Done { success } => {
                    summary.done_messages += 1;
                    summary.success = Some(success);
                    if !success {
                        for worker in &workers {
                            worker.abort();
                        }
                    }
                    break;
                }
            }
        }

        for joined in join_all(workers).await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    tracing::warn!("Worker panicked: {}", e);
                }
            }
        }
        tracing::debug!("Coordinator finished: {:?}", summary);
        summary
    }
}

/// A running coordinator plus the collector its workers report to.
/// `shutdown` consumes it, so teardown happens at most once.
pub struct ControlPlane {
    commands: mpsc::Sender<ControlMessage>,
    coordinator: JoinHandle<CoordinatorSummary>,
    collector: ResultCollector,
    join_timeout: Duration,
}

impl ControlPlane {
    pub async fn start(
        coordinator: Coordinator,
        collector: ResultCollector,
        capacity: usize,
        ready_timeout: Duration,
        join_timeout: Duration,
    ) -> Result<Self> {
        let (commands, rx) = mpsc::channel(capacity.max(1) + 1);
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = coordinator.spawn(rx, ready_tx);

        match tokio::time::timeout(ready_timeout, ready_rx).await {
            Ok(Ok(())) => {}
            _ => {
                handle.abort();
                collector.close();
                return Err(ExecutorError::CoordinatorNotReady {
                    timeout_secs: ready_timeout.as_secs(),
                });
            }
        }
        tracing::debug!("Coordinator ready, collecting at {}", collector.address());

        Ok(Self {
            commands,
            coordinator: handle,
            collector,
            join_timeout,
        })
    }

    /// Queues a sub-task. Does not wait for it to run.
    pub async fn dispatch(&self, request: SubTaskRequest) -> Result<()> {
        self.commands
            .send(ControlMessage::Task(Box::new(request)))
            .await
            .map_err(|_| ExecutorError::ChannelClosed("coordinator stopped".into()))
    }

    pub async fn collect_until(&mut self, deadline: Instant) -> Result<SubTaskResult> {
        self.collector.recv_until(deadline).await
    }

    /// Closes the collector, sends `Done` and joins the coordinator.
    /// Problems are logged, never raised.
    pub async fn shutdown(self, success: bool) -> Option<CoordinatorSummary> {
        self.collector.close();
        if self
            .commands
            .send(ControlMessage::Done { success })
            .await
            .is_err()
        {
            tracing::warn!("Coordinator was gone before it could be told to stop");
        }

        let mut coordinator = self.coordinator;
        match tokio::time::timeout(self.join_timeout, &mut coordinator).await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                tracing::warn!("Coordinator terminated abnormally: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Coordinator did not stop within {:?}, aborting it",
                    self.join_timeout
                );
                coordinator.abort();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbsq_core::model::{Params, TaskId};

    fn request(id: &str) -> SubTaskRequest {
        SubTaskRequest {
            master_id: TaskId("m".into()),
            sub_id: TaskId(id.into()),
            params: Params::new(),
            runtime: Params::new(),
            sig_content: Params::new(),
            config: Params::new(),
            quiet: true,
            node: None,
        }
    }

    fn ok(id: &str) -> SubTaskResult {
        SubTaskResult {
            sub_id: TaskId(id.into()),
            exit_code: 0,
            stdout: None,
            stderr: None,
            outputs: vec![],
            error: None,
            node: None,
        }
    }

    #[test]
    fn test_wire_shape() {
        let done = ControlMessage::Done { success: false };
        assert_eq!(done.to_wire().unwrap(), serde_json::json!(["done", false]));

        let task = ControlMessage::Task(Box::new(request("s1")));
        let wire = task.to_wire().unwrap();
        assert_eq!(wire[0], "task");
        assert_eq!(wire[1]["sub_id"], "s1");
        assert_eq!(ControlMessage::from_wire(wire).unwrap(), task);
        assert!(ControlMessage::from_wire(serde_json::json!(["launch", 1])).is_err());
    }

    #[tokio::test]
    async fn test_tcp_collector_roundtrip() {
        let mut collector = ResultCollector::bind(Transport::Tcp, 2).await.unwrap();
        let pusher = ResultPusher::new(collector.address());
        pusher.push(&ok("a")).await.unwrap();
        pusher.push(&ok("b")).await.unwrap();

        let mut got = vec![
            collector.recv_until(Instant::now() + Duration::from_secs(5)).await.unwrap().sub_id.0,
            collector.recv_until(Instant::now() + Duration::from_secs(5)).await.unwrap().sub_id.0,
        ];
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
        collector.close();
    }

    #[tokio::test]
    async fn test_collector_times_out() {
        let mut collector = ResultCollector::bind(Transport::InProcess, 1).await.unwrap();
        let err = collector
            .recv_until(Instant::now() + Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::CollectTimeout { .. }));
    }
}
