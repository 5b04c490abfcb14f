//! The worker runtime (C12): listener, handler table, and the two
//! event-driven loops (`ensure_communicating`/`ensure_computing`, §4.8/4.9)
//! that keep the task and dependency state machines moving. Everything that
//! mutates `tasks`/`deps`/the store/the peer index happens inside
//! [`Worker::run`]'s single event loop (§5); every other task in this module
//! only ever talks back to it over a channel.

use crate::address::Address;
use crate::compute_stream::{self, ComputeStreamOp};
use crate::config::WorkerConfig;
use crate::dep_state::{DepState, Dependency};
use crate::error::{Result, WorkerError};
use crate::executor::{ExecutionOutcome, Executor};
use crate::gather::{self, GatherOutcome};
use crate::key::{Key, Priority, PriorityCounter};
use crate::message::{GatherStatus, Message};
use crate::metrics::WorkerMetrics;
use crate::pool::ConnectionPool;
use crate::rpc;
use crate::rw::{Connection, Envelope, ReadOnly, WriteOnly};
use crate::scheduler::{RegisterInfo, SchedulerSession};
use crate::store::{DataStore, InFlightIndex, PeerIndex, PendingPerPeer, SuspicionCounters};
use crate::task_state::{ReadyQueue, Task, TaskPayload, TaskState};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

enum WorkerEvent {
    Stream {
        op: ComputeStreamOp,
        payload: Vec<Bytes>,
    },
    SchedulerDisconnected,
    GatherDone {
        outcome: GatherOutcome,
    },
    ExecuteDone {
        key: Key,
        outcome: ExecutionOutcome,
    },
    WhoHasReply {
        who_has: HashMap<Key, Vec<Address>>,
    },
    Request {
        message: Message,
        payload: Vec<Bytes>,
        reply_tx: oneshot::Sender<(Option<Envelope>, bool)>,
    },
}

pub struct Worker {
    config: WorkerConfig,
    my_address: Address,
    tasks: HashMap<Key, Task>,
    deps: HashMap<Key, Dependency>,
    store: DataStore,
    peer_index: PeerIndex,
    in_flight: InFlightIndex,
    suspicion: SuspicionCounters,
    pending: PendingPerPeer,
    ready: ReadyQueue,
    data_needed: VecDeque<Key>,
    executing: HashSet<Key>,
    released: HashSet<Key>,
    priority_counter: PriorityCounter,
    pool: Arc<ConnectionPool>,
    scheduler: SchedulerSession,
    executor: Arc<dyn Executor>,
    metrics: Arc<WorkerMetrics>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    shutdown: bool,
}

impl Worker {
    pub fn new(config: WorkerConfig, executor: Arc<dyn Executor>) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            config.pool_limit_per_address,
            config.pool_limit_total,
            config.tcp_nodelay,
        ));
        let scheduler = SchedulerSession::new(config.scheduler_address.clone(), config.listen_address.clone());
        let (events_tx, events_rx) = mpsc::channel(1024);
        Self {
            my_address: config.listen_address.clone(),
            config,
            tasks: HashMap::new(),
            deps: HashMap::new(),
            store: DataStore::new(),
            peer_index: PeerIndex::new(),
            in_flight: InFlightIndex::new(),
            suspicion: SuspicionCounters::new(),
            pending: PendingPerPeer::new(),
            ready: ReadyQueue::new(),
            data_needed: VecDeque::new(),
            executing: HashSet::new(),
            released: HashSet::new(),
            priority_counter: PriorityCounter::new(),
            pool,
            scheduler,
            executor,
            metrics: Arc::new(WorkerMetrics::new()),
            events_tx,
            events_rx,
            shutdown: false,
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Binds the listener, registers with the scheduler, opens the
    /// compute-stream, then drives the event loop until a `terminate`,
    /// `close`, or lost scheduler connection asks us to stop.
    pub async fn run(mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_address.socket_addr_string())
            .await
            .map_err(|_| WorkerError::TransportLost {
                addr: self.config.listen_address.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|_| WorkerError::TransportLost {
            addr: "<listener>".to_string(),
        })?;
        self.my_address = Address::from((local_addr.ip(), local_addr.port()));
        self.scheduler = SchedulerSession::new(self.config.scheduler_address.clone(), self.my_address.clone());

        tokio::spawn(accept_loop(listener, self.events_tx.clone()));

        self.register().await?;
        self.open_compute_stream().await?;

        info!(
            "worker {} registered with scheduler at {}",
            self.my_address, self.config.scheduler_address
        );

        while !self.shutdown {
            let event = match self.events_rx.recv().await {
                Some(event) => event,
                None => break,
            };
            self.handle_event(event).await;
            self.ensure_communicating();
            self.ensure_computing();
        }

        info!("worker {} shutting down", self.my_address);
        self.scheduler.close(true).await;
        self.pool.close().await;
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let info = RegisterInfo {
            ncores: self.config.executor_threads,
            keys: Vec::new(),
            memory_limit: 0,
            now,
            executing: 0,
            in_memory: 0,
            ready: 0,
            in_flight: 0,
            services: HashMap::new(),
        };
        self.scheduler.register(&self.pool, info).await
    }

    /// Dials the scheduler a second time and switches that connection into
    /// compute-stream mode: one half feeds the batched sender, the other is
    /// read continuously for `compute-task`/`release-task`/`delete-data`.
    async fn open_compute_stream(&mut self) -> Result<()> {
        let stream = TcpStream::connect(self.config.scheduler_address.socket_addr_string())
            .await
            .map_err(|_| WorkerError::TransportLost {
                addr: self.config.scheduler_address.to_string(),
            })?;
        stream.set_nodelay(self.config.tcp_nodelay).ok();
        let (read_half, write_half) = stream.into_split();

        let mut write_conn = Connection::from_stream(WriteOnly(write_half));
        write_conn.send(&Message::ComputeStream {}, &[]).await?;
        self.scheduler
            .open_stream(write_conn, self.config.batch_interval, 256);

        let read_conn = Connection::from_stream(ReadOnly(read_half));
        tokio::spawn(compute_stream_reader(read_conn, self.events_tx.clone()));
        Ok(())
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Stream { op, payload } => self.handle_stream_op(op, payload).await,
            WorkerEvent::SchedulerDisconnected => {
                warn!("lost the scheduler stream; shutting down");
                self.shutdown = true;
            }
            WorkerEvent::GatherDone { outcome } => self.handle_gather_done(outcome).await,
            WorkerEvent::ExecuteDone { key, outcome } => self.handle_execute_done(key, outcome).await,
            WorkerEvent::WhoHasReply { who_has } => self.handle_who_has_reply(who_has).await,
            WorkerEvent::Request {
                message,
                payload,
                reply_tx,
            } => {
                let (reply, keep_open) = self.handle_peer_request(message, payload).await;
                let _ = reply_tx.send((reply, keep_open));
            }
        }
    }

    async fn handle_stream_op(&mut self, op: ComputeStreamOp, payload: Vec<Bytes>) {
        match op {
            ComputeStreamOp::ComputeTask {
                key,
                priority,
                deps,
                who_has,
                has_payload,
            } => {
                self.handle_compute_task(key, priority, deps, who_has, has_payload, payload)
                    .await
            }
            ComputeStreamOp::ReleaseTask { key, reason } => self.handle_release_task(key, reason).await,
            ComputeStreamOp::DeleteData { keys } => self.purge_keys(&keys),
        }
    }

    async fn handle_compute_task(
        &mut self,
        key: Key,
        priority_in: Priority,
        deps: Vec<Key>,
        who_has: HashMap<Key, Vec<Address>>,
        has_payload: bool,
        payload_frames: Vec<Bytes>,
    ) {
        if self.store.contains(&key) {
            // resubmit of an already-finished key: report again without recomputing
            let nbytes = self.store.get(&key).map(|b| b.len() as u64).unwrap_or(0);
            let _ = self.scheduler.task_finished(key, nbytes).await;
            return;
        }
        if self.tasks.contains_key(&key) {
            return;
        }
        if has_payload && payload_frames.len() < 3 {
            self.metrics.incr_tasks_erred();
            let _ = self
                .scheduler
                .task_erred(
                    key,
                    "DeserializationFailed".to_string(),
                    format!("expected 3 payload frames (func, args, kwargs), got {}", payload_frames.len()),
                )
                .await;
            return;
        }

        for (dep_key, addrs) in who_has {
            for addr in addrs {
                self.peer_index.add(dep_key.clone(), addr);
            }
        }

        let mut dependencies = HashSet::new();
        let mut unmet = HashSet::new();
        for dep_key in &deps {
            dependencies.insert(dep_key.clone());
            if self.store.contains(dep_key) {
                continue;
            }
            let dep = self
                .deps
                .entry(dep_key.clone())
                .or_insert_with(|| Dependency::new(dep_key.clone()));
            dep.dependents.insert(key.clone());
            if dep.state != DepState::Memory {
                unmet.insert(dep_key.clone());
                self.data_needed.push_back(dep_key.clone());
            }
        }

        let priority = Priority {
            scheduler_priority: priority_in.scheduler_priority,
            counter: self.priority_counter.next(),
        };
        let payload = if has_payload {
            TaskPayload {
                func: payload_frames[0].clone(),
                args: payload_frames[1].clone(),
                kwargs: payload_frames[2].clone(),
            }
        } else {
            TaskPayload {
                func: Bytes::new(),
                args: Bytes::new(),
                kwargs: Bytes::new(),
            }
        };

        let mut task = Task::new(key.clone(), payload, priority, dependencies);
        for dep_key in task.dependencies.clone() {
            if !unmet.contains(&dep_key) {
                task.dependency_satisfied(&dep_key);
            }
        }
        if task.waiting_for_data.is_empty() {
            task.transition(TaskState::Ready);
            self.ready.push(task.priority.clone(), task.key.clone());
        }
        self.tasks.insert(key, task);
    }

    async fn handle_release_task(&mut self, key: Key, reason: Option<String>) {
        let is_stolen = reason.as_deref() == Some("stolen");

        if let Some(task) = self.tasks.get(&key) {
            if is_stolen && task.state == TaskState::Executing {
                return;
            }
            let task = self.tasks.remove(&key).expect("just checked present");
            if matches!(task.state, TaskState::Executing | TaskState::Ready) {
                self.released.insert(key.clone());
            }
            for dep_key in &task.dependencies {
                self.drop_dependent(dep_key, &key);
            }
            return;
        }

        if self.store.contains(&key) {
            if is_stolen {
                return;
            }
            self.purge_keys(&[key]);
        }
    }

    fn drop_dependent(&mut self, dep_key: &str, task_key: &str) {
        let now_orphaned = match self.deps.get_mut(dep_key) {
            Some(dep) => {
                dep.dependents.remove(task_key);
                dep.dependents.is_empty()
            }
            None => false,
        };
        if now_orphaned {
            self.deps.remove(dep_key);
            self.peer_index.remove_key(dep_key);
            self.store.remove(dep_key);
        }
    }

    fn purge_keys(&mut self, keys: &[Key]) {
        for key in keys {
            self.store.remove(key);
            self.tasks.remove(key);
            self.deps.remove(key);
            self.peer_index.remove_key(key);
            self.released.remove(key);
            self.suspicion.reset(key);
        }
    }

    /// A task's dependency (fetched remotely, or finished locally by this
    /// same worker) just landed in the store: drain it out of every waiting
    /// task and queue newly-ready ones.
    fn satisfy_dependents(&mut self, key: &Key) {
        if let Some(dep) = self.deps.get_mut(key) {
            dep.transition(DepState::Memory);
        }
        let dependents = self.deps.get(key).map(|d| d.dependents.clone()).unwrap_or_default();
        for task_key in dependents {
            let became_ready = match self.tasks.get_mut(&task_key) {
                Some(task) => task.dependency_satisfied(key) && task.transition(TaskState::Ready),
                None => false,
            };
            if became_ready {
                if let Some(task) = self.tasks.get(&task_key) {
                    self.ready.push(task.priority.clone(), task_key.clone());
                }
            }
        }
    }

    /// A value for `key` just arrived from outside (scheduler `update_data`)
    /// while we still had a `waiting`/`ready` task scheduled to produce that
    /// same key ourselves. The external value wins: drop our own task record
    /// (tombstoning it if it was already executing) and report it finished
    /// without ever running it.
    async fn resolve_task_if_pending(&mut self, key: &Key) {
        if let Some(task) = self.tasks.remove(key) {
            if task.state == TaskState::Executing {
                self.released.insert(key.clone());
            }
            let nbytes = self.store.get(key).map(|b| b.len() as u64).unwrap_or(0);
            self.metrics.incr_tasks_finished();
            let _ = self.scheduler.task_finished(key.clone(), nbytes).await;
        }
    }

    async fn poison_dependency(&mut self, key: Key) {
        self.metrics.incr_deps_poisoned();
        warn!(
            "dependency {} poisoned after {} failed location rounds",
            key, self.config.suspicion_threshold
        );
        self.suspicion.reset(&key);
        let exception = "DependencyPoisoned".to_string();
        let traceback = format!(
            "dependency {} poisoned after {} failed location rounds",
            key, self.config.suspicion_threshold
        );
        self.fail_dependents(&key, exception, traceback).await;
    }

    /// A key that was tracked as a `Dependency` will never reach `memory`
    /// (its dependency record is dropped here). Every task still waiting on
    /// it sees `exception`/`traceback` as its own value, the same way
    /// `satisfy_dependents` hands a successful value to waiting tasks —
    /// dependents fail, they are not rerun.
    async fn fail_dependents(&mut self, key: &Key, exception: String, traceback: String) {
        self.peer_index.remove_key(key);
        let dependents = self.deps.remove(key).map(|d| d.dependents).unwrap_or_default();
        for task_key in dependents {
            self.tasks.remove(&task_key);
            self.released.remove(&task_key);
            self.metrics.incr_tasks_erred();
            let _ = self
                .scheduler
                .task_erred(task_key, exception.clone(), traceback.clone())
                .await;
        }
    }

    fn request_who_has(&mut self, key: Key) {
        let pool = self.pool.clone();
        let scheduler_addr = self.config.scheduler_address.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let reply = rpc::call(&pool, &scheduler_addr, Message::WhoHas { keys: vec![key] }, &[]).await;
            let who_has = match reply {
                Ok(envelope) => match envelope.message {
                    Message::WhoHasReply { who_has } => who_has,
                    _ => HashMap::new(),
                },
                Err(_) => HashMap::new(),
            };
            let _ = tx.send(WorkerEvent::WhoHasReply { who_has }).await;
        });
    }

    async fn handle_who_has_reply(&mut self, who_has: HashMap<Key, Vec<Address>>) {
        for (key, addrs) in who_has {
            if addrs.is_empty() {
                // Scheduler still has no location for this dep. Tick the same
                // suspicion counter the failed-gather path uses, and poison
                // once it crosses the threshold so dependents are guaranteed
                // to make progress instead of waiting on a key nobody can
                // ever hand us.
                if !self.deps.contains_key(&key) {
                    continue;
                }
                let rounds = self.suspicion.increment(&key);
                if rounds >= self.config.suspicion_threshold {
                    self.poison_dependency(key).await;
                } else {
                    self.data_needed.push_back(key.clone());
                    self.request_who_has(key);
                }
                continue;
            }
            for addr in addrs {
                self.peer_index.add(key.clone(), addr);
            }
            if self.deps.contains_key(&key) {
                self.data_needed.push_back(key);
            }
        }
    }

    async fn handle_gather_done(&mut self, outcome: GatherOutcome) {
        for key in outcome.results.keys() {
            self.in_flight.finish(key);
        }
        for key in &outcome.bad_keys {
            self.in_flight.finish(key);
        }
        let mut fetched_keys = Vec::new();
        for (key, bytes) in outcome.results {
            self.metrics.incr_deps_fetched(bytes.len() as u64);
            self.store.insert(key.clone(), bytes);
            self.suspicion.reset(&key);
            self.satisfy_dependents(&key);
            fetched_keys.push(key);
        }
        if !fetched_keys.is_empty() {
            // tell the scheduler we now also hold these keys, so other
            // workers can discover us as a peer for them via `who_has`.
            let _ = self
                .scheduler
                .send(Envelope::new(Message::AddKeys { keys: fetched_keys }))
                .await;
        }
        for key in outcome.bad_keys {
            if let Some(dep) = self.deps.get_mut(&key) {
                dep.transition(DepState::Waiting);
            }
            self.peer_index.remove_key(&key);
            let rounds = self.suspicion.increment(&key);
            if rounds >= self.config.suspicion_threshold {
                self.poison_dependency(key).await;
            } else {
                self.data_needed.push_back(key.clone());
                self.request_who_has(key);
            }
        }
        for addr in outcome.missing_workers {
            warn!("peer {} unreachable while gathering", addr);
        }
    }

    async fn handle_execute_done(&mut self, key: Key, outcome: ExecutionOutcome) {
        self.executing.remove(&key);
        if self.released.remove(&key) {
            return;
        }
        if !self.tasks.contains_key(&key) {
            return;
        }
        match outcome {
            ExecutionOutcome::Finished { result } => {
                let nbytes = result.len() as u64;
                self.store.insert(key.clone(), result);
                self.tasks.remove(&key);
                self.metrics.incr_tasks_finished();
                let _ = self.scheduler.task_finished(key.clone(), nbytes).await;
                self.satisfy_dependents(&key);
            }
            ExecutionOutcome::Erred { exception, traceback } => {
                self.tasks.remove(&key);
                self.metrics.incr_tasks_erred();
                let _ = self
                    .scheduler
                    .task_erred(key.clone(), exception.clone(), traceback.clone())
                    .await;
                // Other local tasks may be waiting on this key as a
                // dependency; they see the same error as their value rather
                // than hanging on a key that will never reach memory.
                if self.deps.contains_key(&key) {
                    self.fail_dependents(&key, exception, traceback).await;
                }
            }
        }
    }

    /// C7/§4.8: drains `data_needed` into per-peer batches bounded by
    /// `total_connections`, then spawns one multi-round gather per peer.
    fn ensure_communicating(&mut self) {
        let capacity = self.config.total_connections;
        let mut deferred = VecDeque::new();
        let mut touched: HashSet<Address> = HashSet::new();

        while self.in_flight.worker_count() + touched.len() < capacity {
            let key = match self.data_needed.pop_front() {
                Some(key) => key,
                None => break,
            };
            match self.deps.get(&key).map(|d| d.state) {
                Some(DepState::Waiting) => {}
                _ => continue,
            }
            let addr = match self
                .peer_index
                .peers_for(&key)
                .and_then(|addrs| addrs.iter().choose(&mut rand::thread_rng()).cloned())
            {
                Some(addr) => addr,
                None => {
                    self.request_who_has(key);
                    continue;
                }
            };
            if self.in_flight.is_addr_busy(&addr) {
                deferred.push_back(key);
                continue;
            }
            touched.insert(addr.clone());
            self.pending.push(addr, key);
        }
        for key in deferred {
            self.data_needed.push_back(key);
        }

        for addr in touched {
            let keys = self.pending.drain(&addr);
            if keys.is_empty() {
                continue;
            }
            let mut who_has = HashMap::new();
            for key in &keys {
                if let Some(dep) = self.deps.get_mut(key) {
                    dep.start_flight(addr.clone());
                }
                self.in_flight.start(key.clone(), addr.clone());
                if let Some(peers) = self.peer_index.peers_for(key) {
                    who_has.insert(key.clone(), peers.clone());
                }
            }
            let pool = self.pool.clone();
            let metrics = self.metrics.clone();
            let my_address = self.my_address.clone();
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let outcome = gather::gather(&pool, &my_address, who_has, &metrics).await;
                let _ = tx.send(WorkerEvent::GatherDone { outcome }).await;
            });
        }
    }

    /// C8/§4.9: fills executor slots from the ready queue, skipping
    /// tombstoned (released-while-ready) keys.
    fn ensure_computing(&mut self) {
        while self.executing.len() < self.config.executor_threads {
            let key = loop {
                match self.ready.pop() {
                    Some(key) => {
                        if self.released.remove(&key) {
                            continue;
                        }
                        if !self.tasks.contains_key(&key) {
                            continue;
                        }
                        break key;
                    }
                    None => return,
                }
            };
            let task = self.tasks.get_mut(&key).expect("checked contains_key above");
            task.transition(TaskState::Executing);
            self.executing.insert(key.clone());

            let payload = task.payload.clone();
            let executor = self.executor.clone();
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let outcome = tokio::task::spawn_blocking(move || executor.execute(&payload)).await;
                let outcome = outcome.unwrap_or_else(|_| ExecutionOutcome::Erred {
                    exception: "executor thread panicked".to_string(),
                    traceback: String::new(),
                });
                let _ = tx.send(WorkerEvent::ExecuteDone { key, outcome }).await;
            });
        }
    }

    /// The request/reply handler table (§6) for connections peers and the
    /// scheduler open directly to us (as opposed to the compute-stream we
    /// ourselves open to the scheduler). Returns the reply to send, if any,
    /// and whether the connection should stay open afterward.
    async fn handle_peer_request(&mut self, message: Message, payload: Vec<Bytes>) -> (Option<Envelope>, bool) {
        match message {
            Message::GetData { keys, .. } => {
                let mut found = Vec::new();
                let mut out_payload = Vec::new();
                for key in &keys {
                    if let Some(bytes) = self.store.get(key) {
                        found.push(key.clone());
                        out_payload.push(bytes.clone());
                    }
                }
                let missing: Vec<Key> = keys.into_iter().filter(|k| !found.contains(k)).collect();
                let reply = Envelope::with_payload(Message::GetDataReply { found, missing }, out_payload);
                (Some(reply), true)
            }
            Message::Gather { who_has } => {
                let who_has: HashMap<Key, HashSet<Address>> = who_has
                    .into_iter()
                    .map(|(k, v)| (k, v.into_iter().collect()))
                    .collect();
                let outcome = gather::gather(&self.pool, &self.my_address, who_has, &self.metrics).await;
                let status = if outcome.bad_keys.is_empty() {
                    GatherStatus::Ok
                } else {
                    GatherStatus::MissingData
                };
                let keys: Vec<Key> = outcome.results.keys().cloned().collect();
                for (key, bytes) in outcome.results {
                    self.store.insert(key, bytes);
                }
                (Some(Envelope::new(Message::GatherReply { status, keys })), true)
            }
            Message::UpdateData { keys, report } => {
                let mut nbytes = 0u64;
                for (key, bytes) in keys.into_iter().zip(payload.into_iter()) {
                    nbytes += bytes.len() as u64;
                    self.store.insert(key.clone(), bytes);
                    self.resolve_task_if_pending(&key).await;
                    self.satisfy_dependents(&key);
                }
                let reply = if report {
                    Some(Envelope::new(Message::UpdateDataReply { nbytes }))
                } else {
                    None
                };
                (reply, true)
            }
            Message::DeleteData { keys, report: _ } => {
                self.purge_keys(&keys);
                (None, true)
            }
            Message::Terminate { report } => {
                self.shutdown = true;
                let reply = if report {
                    Some(Envelope::new(Message::Ok { status: "OK".to_string() }))
                } else {
                    None
                };
                (reply, false)
            }
            Message::Keys {} => {
                let keys: Vec<Key> = self.tasks.keys().cloned().chain(self.store.keys().cloned()).collect();
                (Some(Envelope::new(Message::KeysReply { keys })), true)
            }
            Message::Close { reply } => {
                self.shutdown = true;
                let reply = if reply {
                    Some(Envelope::new(Message::Ok { status: "OK".to_string() }))
                } else {
                    None
                };
                (reply, false)
            }
            other => {
                warn!("unexpected op on a peer connection: {:?}", other);
                (None, true)
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<WorkerEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                stream.set_nodelay(true).ok();
                let conn = Connection::from_stream(stream);
                tokio::spawn(serve_peer_connection(conn, tx.clone()));
            }
            Err(e) => warn!("accept error: {:?}", e),
        }
    }
}

async fn serve_peer_connection(mut conn: Connection<TcpStream>, tx: mpsc::Sender<WorkerEvent>) {
    loop {
        let envelope = match conn.recv_envelope().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) => {
                warn!("peer connection error: {:?}", e);
                break;
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .send(WorkerEvent::Request {
                message: envelope.message,
                payload: envelope.payload,
                reply_tx,
            })
            .await
            .is_err()
        {
            break;
        }
        match reply_rx.await {
            Ok((Some(reply), keep_open)) => {
                if conn.send_envelope(&reply).await.is_err() {
                    break;
                }
                if !keep_open {
                    break;
                }
            }
            Ok((None, keep_open)) => {
                if !keep_open {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

async fn compute_stream_reader<S>(mut conn: Connection<S>, tx: mpsc::Sender<WorkerEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        match conn.recv_envelope().await {
            Ok(Some(envelope)) => {
                if let Some(op) = compute_stream::route(envelope.message) {
                    if tx
                        .send(WorkerEvent::Stream {
                            op,
                            payload: envelope.payload,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(WorkerEvent::SchedulerDisconnected).await;
                break;
            }
            Err(e) => {
                warn!("scheduler stream read error: {:?}", e);
                let _ = tx.send(WorkerEvent::SchedulerDisconnected).await;
                break;
            }
        }
    }
}
