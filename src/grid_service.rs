//! 单写者 worker
//!
//! `GridState` 被移入一个 tokio 任务，外部只能通过 `GridHandle` 发送命令：
//! - 位置更新：plan 与 commit 在 worker 上同步执行，拉取在独立任务中并发进行
//! - 查询：闭包在 worker 上执行，拿到 `&GridState` 与 `TreeContext`
//!
//! 拉取期间 worker 继续用已发布的网格响应查询。新位置落在进行中网格的中心盒内时
//! 共享该次结果；否则中止进行中的拉取 (原调用方收到 `Cancelled`) 并立即处理新位置。

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::categories::EnabledCategories;
use crate::error::GridError;
use crate::grid_state::{fetch_tiles, GridState, GridUpdate, TreeContext, UpdatePlan};
use crate::projection::TileCoord;
use crate::tile_provider::{TileData, TileProvider};
use crate::types::LngLat;

const COMMAND_BUFFER: usize = 64;

type Reply = oneshot::Sender<Result<GridUpdate, GridError>>;
type Query<P> = Box<dyn FnOnce(&GridState<P>, &TreeContext) + Send>;
type Mutation<P> = Box<dyn FnOnce(&mut GridState<P>, &TreeContext) + Send>;
type FetchResult = Result<Vec<(TileCoord, TileData)>, GridError>;

enum Command<P: TileProvider> {
    Location { location: LngLat, reply: Reply },
    Query(Query<P>),
    Mutate(Mutation<P>),
}

/// 进行中的一次拉取
struct InFlight {
    ticket: u64,
    plan: UpdatePlan,
    waiters: Vec<Reply>,
    task: JoinHandle<()>,
}

impl InFlight {
    fn cancel(self) {
        self.task.abort();
        log::debug!("取消进行中的网格拉取 (ticket {})", self.ticket);
        for waiter in self.waiters {
            let _ = waiter.send(Err(GridError::Cancelled));
        }
    }
}

/// worker 句柄，可克隆
pub struct GridHandle<P: TileProvider> {
    commands: mpsc::Sender<Command<P>>,
}

impl<P: TileProvider> Clone for GridHandle<P> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<P: TileProvider> GridHandle<P> {
    async fn send(&self, command: Command<P>) -> Result<(), GridError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GridError::WorkerStopped)
    }

    /// 提交位置更新，等待本次 (或合并后的) 重算结果
    pub async fn location_update(&self, location: LngLat) -> Result<GridUpdate, GridError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Location { location, reply }).await?;
        response.await.map_err(|_| GridError::WorkerStopped)?
    }

    /// 在单写者上下文中执行只读查询
    pub async fn query<R, F>(&self, f: F) -> Result<R, GridError>
    where
        R: Send + 'static,
        F: FnOnce(&GridState<P>, &TreeContext) -> R + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let query: Query<P> = Box::new(move |state, ctx| {
            let _ = reply.send(f(state, ctx));
        });
        self.send(Command::Query(query)).await?;
        response.await.map_err(|_| GridError::WorkerStopped)
    }

    pub async fn set_enabled_categories(&self, enabled: EnabledCategories) -> Result<(), GridError> {
        let (reply, response) = oneshot::channel();
        let mutation: Mutation<P> = Box::new(move |state, ctx| {
            state.set_enabled_categories(ctx, enabled);
            let _ = reply.send(());
        });
        self.send(Command::Mutate(mutation)).await?;
        response.await.map_err(|_| GridError::WorkerStopped)
    }

    /// 丢弃已发布的网格并清空瓦片缓存；下一次位置更新重新拉取
    pub async fn reset(&self) -> Result<(), GridError> {
        let (reply, response) = oneshot::channel();
        let mutation: Mutation<P> = Box::new(move |state, ctx| {
            state.reset(ctx);
            let _ = reply.send(());
        });
        self.send(Command::Mutate(mutation)).await?;
        response.await.map_err(|_| GridError::WorkerStopped)
    }
}

/// 启动 worker；所有句柄被丢弃后 worker 退出
pub fn spawn<P: TileProvider>(state: GridState<P>) -> (GridHandle<P>, JoinHandle<()>) {
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let worker = tokio::spawn(run(state, receiver));
    (GridHandle { commands }, worker)
}

struct Worker<P: TileProvider> {
    state: GridState<P>,
    ctx: TreeContext,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    done: mpsc::Sender<(u64, FetchResult)>,
}

impl<P: TileProvider> Worker<P> {
    fn on_location(&mut self, location: LngLat, reply: Reply) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            if in_flight.plan.tile_grid.central.contains(location) {
                in_flight.waiters.push(reply);
                return;
            }
        }
        if let Some(superseded) = self.in_flight.take() {
            superseded.cancel();
        }

        let plan = match self.state.plan(&self.ctx, location) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                let _ = reply.send(Ok(GridUpdate::Unchanged));
                return;
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        if plan.missing.is_empty() {
            let _ = reply.send(self.state.commit(&self.ctx, plan, Vec::new()));
            return;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let provider = self.state.provider();
        let missing = plan.missing.clone();
        let attempts = self.state.config().max_fetch_attempts;
        let done = self.done.clone();
        let task = tokio::spawn(async move {
            let result = fetch_tiles(provider, missing, attempts).await;
            let _ = done.send((ticket, result)).await;
        });
        log::debug!("开始拉取 {} 个瓦片 (ticket {})", plan.missing.len(), ticket);
        self.in_flight = Some(InFlight {
            ticket,
            plan,
            waiters: vec![reply],
            task,
        });
    }

    fn on_fetched(&mut self, ticket: u64, result: FetchResult) {
        let current = self.in_flight.as_ref().map(|f| f.ticket);
        if current != Some(ticket) {
            // 已被取消的拉取
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let outcome = match result {
            Ok(fetched) => self.state.commit(&self.ctx, in_flight.plan, fetched),
            Err(err) => {
                log::warn!("网格更新失败，保留上一代网格: {}", err);
                Err(err)
            }
        };
        for waiter in in_flight.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

async fn run<P: TileProvider>(state: GridState<P>, mut commands: mpsc::Receiver<Command<P>>) {
    let (done, mut fetched) = mpsc::channel(4);
    let ctx = state.context();
    let mut worker = Worker {
        state,
        ctx,
        in_flight: None,
        next_ticket: 0,
        done,
    };

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Location { location, reply } => worker.on_location(location, reply),
                    Command::Query(query) => query(&worker.state, &worker.ctx),
                    Command::Mutate(mutation) => mutation(&mut worker.state, &worker.ctx),
                }
            }
            Some((ticket, result)) = fetched.recv() => worker.on_fetched(ticket, result),
        }
    }

    if let Some(in_flight) = worker.in_flight.take() {
        in_flight.task.abort();
    }
    log::debug!("网格 worker 退出");
}
