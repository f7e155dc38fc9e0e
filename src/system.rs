pub(crate) mod logger;
pub(crate) mod timer;

use std::fmt;

use crate::actor::{ActorError, BasicActorRef};

pub use self::timer::{ScheduleId, Timer};

#[derive(Clone, Debug)]
pub enum SystemMsg {
    Command(SystemCmd),
    Event(SystemEvent),
    Failed {
        actor: BasicActorRef,
        error: ActorError,
    },
}

#[derive(Clone, Debug)]
pub enum SystemCmd {
    Stop,
    Restart,
}

impl From<SystemCmd> for SystemMsg {
    fn from(cmd: SystemCmd) -> Self {
        SystemMsg::Command(cmd)
    }
}

#[derive(Clone, Debug)]
pub enum SystemEvent {
    /// An actor was created
    ActorCreated(ActorCreated),

    /// An actor was restarted
    ActorRestarted(ActorRestarted),

    /// An actor was terminated
    ActorTerminated(ActorTerminated),
}

impl From<SystemEvent> for SystemMsg {
    fn from(evt: SystemEvent) -> Self {
        SystemMsg::Event(evt)
    }
}

#[derive(Clone, Debug)]
pub struct ActorCreated {
    pub actor: BasicActorRef,
}

#[derive(Clone, Debug)]
pub struct ActorRestarted {
    pub actor: BasicActorRef,
}

#[derive(Clone, Debug)]
pub struct ActorTerminated {
    pub actor: BasicActorRef,
}

impl From<ActorCreated> for SystemEvent {
    fn from(evt: ActorCreated) -> Self {
        SystemEvent::ActorCreated(evt)
    }
}

impl From<ActorRestarted> for SystemEvent {
    fn from(evt: ActorRestarted) -> Self {
        SystemEvent::ActorRestarted(evt)
    }
}

impl From<ActorTerminated> for SystemEvent {
    fn from(evt: ActorTerminated) -> Self {
        SystemEvent::ActorTerminated(evt)
    }
}

pub enum SystemError {
    ModuleFailed(String),
    InvalidName(String),
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SystemError::ModuleFailed(m) => write!(
                f,
                "Failed to create actor system. Cause: Sub module failed to start ({})",
                m
            ),
            SystemError::InvalidName(name) => write!(
                f,
                "Failed to create actor system. Cause: Invalid actor system name ({})",
                name
            ),
        }
    }
}

impl fmt::Debug for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};
use std::time::{Duration, Instant, SystemTime};

use slog::{debug, warn, Logger};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    actor::{
        Actor, ActorRef, ActorRefFactory, ActorReference, AskError, BoxActorProd, Channel,
        ChannelMsg, ChannelRef, CreateError, DeadLetter, Props, Publish, Topic,
    },
    cluster::ClusterEvent,
    config::{load_config, Config},
    kernel::{
        ask::{AskRegistry, ReplyPayload},
        provider::{create_root, Provider},
    },
    remote::RemoteHandle,
    system::logger::{default_log, DeadLetterLogger},
    system::timer::BasicTimer,
    validate::validate_name,
    AskRequest, Envelope, Message,
};

pub struct ProtoSystem {
    id: Uuid,
    name: String,
    pub host: Arc<str>,
    config: Config,
    started_at: SystemTime,
    started_at_moment: Instant,
    terminating: AtomicBool,
}

#[derive(Default)]
pub struct SystemBuilder {
    name: Option<String>,
    cfg: Option<Config>,
    log: Option<Logger>,
}

impl SystemBuilder {
    pub fn new() -> Self {
        SystemBuilder::default()
    }

    pub async fn create(self) -> Result<ActorSystem, SystemError> {
        let name = self.name.unwrap_or_else(|| "lattice".to_string());
        let cfg = self.cfg.unwrap_or_else(load_config);
        let log = self.log.unwrap_or_else(|| default_log(&cfg));

        ActorSystem::create(name.as_ref(), log, cfg).await
    }

    pub fn name(self, name: &str) -> Self {
        SystemBuilder {
            name: Some(name.to_string()),
            ..self
        }
    }

    pub fn cfg(self, cfg: Config) -> Self {
        SystemBuilder {
            cfg: Some(cfg),
            ..self
        }
    }

    pub fn log(self, log: Logger) -> Self {
        SystemBuilder {
            log: Some(log),
            ..self
        }
    }
}

#[derive(Default)]
struct SystemCore {
    sys_actors: Option<SysActors>,
    sys_channels: Option<SysChannels>,
    remote: Option<RemoteHandle>,
}

/// The actor runtime and common services coordinator
///
/// The `ActorSystem` provides a runtime on which actors are executed.
/// It also provides common services such as channels, scheduling,
/// sharding and persistence plumbing. Create only one instance of
/// `ActorSystem` per application.
#[derive(Clone)]
pub struct ActorSystem {
    proto: Arc<ProtoSystem>,
    log: Logger,
    debug: bool,
    handle: Handle,
    timer: BasicTimer,
    asks: AskRegistry,
    core: Arc<RwLock<SystemCore>>,
    pub(crate) provider: Provider,
}

impl ActorSystem {
    /// Create a new `ActorSystem` instance
    ///
    /// Must be called within a tokio runtime.
    pub async fn new() -> Result<ActorSystem, SystemError> {
        let cfg = load_config();
        let log = default_log(&cfg);

        ActorSystem::create("lattice", log, cfg).await
    }

    /// Create a new `ActorSystem` instance with provided name
    pub async fn with_name(name: &str) -> Result<ActorSystem, SystemError> {
        let cfg = load_config();
        let log = default_log(&cfg);

        ActorSystem::create(name, log, cfg).await
    }

    /// Create a new `ActorSystem` instance bypassing default config behavior
    pub async fn with_config(name: &str, cfg: Config) -> Result<ActorSystem, SystemError> {
        let log = default_log(&cfg);

        ActorSystem::create(name, log, cfg).await
    }

    async fn create(name: &str, log: Logger, cfg: Config) -> Result<ActorSystem, SystemError> {
        validate_name(name).map_err(|_| SystemError::InvalidName(name.into()))?;
        let handle =
            Handle::try_current().map_err(|_| SystemError::ModuleFailed("runtime".into()))?;

        let debug = cfg.debug;
        if debug {
            debug!(log, "Starting actor system: System[{}]", name);
        }

        let prov = Provider::new(log.clone());
        let asks = AskRegistry::new(handle.clone(), log.clone());
        let timer = BasicTimer::new(handle.clone());

        // 1. create proto system
        let proto = ProtoSystem {
            id: Uuid::new_v4(),
            name: name.to_string(),
            host: Arc::from("localhost"),
            config: cfg.clone(),
            started_at: SystemTime::now(),
            started_at_moment: Instant::now(),
            terminating: AtomicBool::new(false),
        };

        // 2. create uninitialized system
        let sys = ActorSystem {
            proto: Arc::new(proto),
            debug,
            log,
            handle,
            timer,
            asks,
            core: Arc::new(RwLock::new(SystemCore::default())),
            provider: prov,
        };

        // 3. create initial actor hierarchy
        let sys_actors = create_root(&sys);
        sys.core.write().unwrap().sys_actors = Some(sys_actors);

        // 4. start system channels
        let sys_channels = sys_channels(&sys).await?;
        sys.core.write().unwrap().sys_channels = Some(sys_channels);

        // 5. start dead letter logger
        let _dl_logger = sys
            .provider
            .create_actor_with(
                Props::new_args(DeadLetterLogger::new, (sys.dead_letters(), sys.log())),
                "dl_logger",
                &sys.sys_root(),
                &sys,
                0,
            )
            .await
            .map_err(|_| SystemError::ModuleFailed("dl_logger".into()))?;

        if sys.debug {
            debug!(sys.log, "Actor system [{}] [{}] started", sys.id(), name);
        }

        Ok(sys)
    }

    /// Returns the system start moment
    pub fn start_date(&self) -> SystemTime {
        self.proto.started_at
    }

    /// Returns the number of seconds since the system started
    pub fn uptime(&self) -> u64 {
        let now = Instant::now();
        now.duration_since(self.proto.started_at_moment).as_secs()
    }

    /// Returns the hostname used when the system started
    ///
    /// The host is used in actor addressing.
    pub fn host(&self) -> Arc<str> {
        self.proto.host.clone()
    }

    /// Returns the UUID assigned to the system
    pub fn id(&self) -> Uuid {
        self.proto.id
    }

    /// Returns the name of the system
    pub fn name(&self) -> String {
        self.proto.name.clone()
    }

    pub fn print_tree(&self) -> Vec<String> {
        fn print_node(
            sys: &ActorSystem,
            node: &BasicActorRef,
            indent: &str,
            log: &mut Vec<String>,
        ) {
            if node.is_root() {
                log.push(sys.name());

                for actor in node.children() {
                    print_node(sys, &actor, "", log);
                }
            } else {
                log.push(format!("{}└─ {}", indent, node.name()));

                for actor in node.children() {
                    print_node(sys, &actor, &(indent.to_string() + "   "), log);
                }
            }
        }

        let mut log: Vec<String> = Vec::new();
        let root = self.root();
        print_node(self, &root, "", &mut log);
        log
    }

    /// Returns the system root's actor reference
    pub(crate) fn root(&self) -> BasicActorRef {
        self.core
            .read()
            .unwrap()
            .sys_actors
            .as_ref()
            .unwrap()
            .root
            .clone()
    }

    /// Returns the user root actor reference
    pub fn user_root(&self) -> BasicActorRef {
        self.core
            .read()
            .unwrap()
            .sys_actors
            .as_ref()
            .unwrap()
            .user
            .clone()
    }

    /// Returns the system root actor reference
    pub fn sys_root(&self) -> BasicActorRef {
        self.core
            .read()
            .unwrap()
            .sys_actors
            .as_ref()
            .unwrap()
            .sysm
            .clone()
    }

    /// Returns a reference to the system events channel
    pub fn sys_events(&self) -> ChannelRef<SystemEvent> {
        self.core
            .read()
            .unwrap()
            .sys_channels
            .as_ref()
            .unwrap()
            .sys_events
            .clone()
    }

    /// Returns a reference to the dead letters channel
    pub fn dead_letters(&self) -> ChannelRef<DeadLetter> {
        self.core
            .read()
            .unwrap()
            .sys_channels
            .as_ref()
            .unwrap()
            .dead_letters
            .clone()
    }

    /// Returns a reference to the cluster events channel
    ///
    /// The membership plugin publishes `MemberUp`, `MemberDown` and
    /// `UnreachableMember` here; the shard coordinator subscribes.
    pub fn cluster_events(&self) -> ChannelRef<ClusterEvent> {
        self.core
            .read()
            .unwrap()
            .sys_channels
            .as_ref()
            .unwrap()
            .cluster_events
            .clone()
    }

    fn sys_events_opt(&self) -> Option<ChannelRef<SystemEvent>> {
        self.core
            .read()
            .unwrap()
            .sys_channels
            .as_ref()
            .map(|c| c.sys_events.clone())
    }

    fn dead_letters_opt(&self) -> Option<ChannelRef<DeadLetter>> {
        self.core
            .read()
            .unwrap()
            .sys_channels
            .as_ref()
            .map(|c| c.dead_letters.clone())
    }

    pub async fn publish_event(&self, evt: SystemEvent) {
        if let Some(chan) = self.sys_events_opt() {
            let topic = Topic::from(&evt);
            raw_publish(&chan, Publish { topic, msg: evt }).await;
        }
    }

    /// Routes a dead letter to the dead letters channel. Enqueued
    /// directly so that a closed channel can never dead-letter its own
    /// dead letters.
    pub async fn publish_dead_letter(&self, dl: DeadLetter) {
        match self.dead_letters_opt() {
            Some(chan) => {
                raw_publish(
                    &chan,
                    Publish {
                        topic: Topic::from(crate::actor::DEAD_LETTER_TOPIC),
                        msg: dl,
                    },
                )
                .await;
            }
            None => {
                debug!(self.log, "DeadLetter: {:?}", dl);
            }
        }
    }

    /// Feeds a membership event into the cluster events channel.
    pub async fn publish_cluster_event(&self, evt: ClusterEvent) {
        let chan = {
            self.core
                .read()
                .unwrap()
                .sys_channels
                .as_ref()
                .map(|c| c.cluster_events.clone())
        };
        if let Some(chan) = chan {
            let topic = Topic::from(&evt);
            raw_publish(&chan, Publish { topic, msg: evt }).await;
        }
    }

    /// Returns the `Config` used by the system
    pub fn config(&self) -> &Config {
        &self.proto.config
    }

    #[inline]
    pub fn log(&self) -> Logger {
        self.log.clone()
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn asks(&self) -> &AskRegistry {
        &self.asks
    }

    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn is_terminating(&self) -> bool {
        self.proto.terminating.load(Ordering::Relaxed)
    }

    /// Installs the transport and serializer plugins used for remote
    /// envelopes. Contract-level: the transport's own lifecycle is the
    /// caller's concern.
    pub fn configure_remote(&self, remote: RemoteHandle) {
        self.core.write().unwrap().remote = Some(remote);
    }

    pub(crate) fn remote(&self) -> Option<RemoteHandle> {
        self.core.read().unwrap().remote.clone()
    }

    /// Resolves an ask: locally through the ask registry, or back over
    /// the transport when the request originated on another node.
    pub(crate) async fn respond_ask(
        &self,
        ask: AskRequest,
        result: Result<ReplyPayload, AskError>,
    ) {
        match ask.origin {
            None => self.asks.complete(ask.id, result),
            Some(origin) => match self.remote() {
                Some(remote) => remote.send_reply(self, origin, ask.id, result).await,
                None => {
                    warn!(
                        self.log,
                        "Dropping remote ask reply for {}: no transport configured", origin
                    );
                }
            },
        }
    }

    /// Shutdown the actor system
    ///
    /// Attempts a graceful shutdown of the system and all actors:
    /// the user tree is stopped first, then the system tree, each
    /// phase bounded by the configured budget. An overrun forces
    /// termination of the remaining cells with a logged warning.
    pub async fn shutdown(&self) {
        if self.proto.terminating.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(self.log, "Shutting down actor system [{}]", self.name());
        let budget = self.config().shutdown.phase_timeout;

        for guardian in [self.user_root(), self.sys_root(), self.root()].iter() {
            guardian.sys_tell(SystemCmd::Stop.into());
            if tokio::time::timeout(budget, guardian.await_stopped())
                .await
                .is_err()
            {
                warn!(
                    self.log,
                    "Shutdown phase for {} overran its budget; forcing termination",
                    guardian.path()
                );
                for actor in self.provider.subtree(guardian.path()) {
                    actor.cell.abort_task();
                    self.provider.unregister(actor.path());
                }
            }
        }

        self.timer.cancel_all();
    }
}

// enqueued directly, bypassing the dead-letter path: a closed channel
// must never dead-letter its own publications
async fn raw_publish<Msg: Message>(chan: &ChannelRef<Msg>, msg: Publish<Msg>) {
    let env = Envelope::new(ChannelMsg::Publish(msg), None);
    let _ = chan.cell.mailbox_sender().enqueue(env).await;
}

#[async_trait::async_trait]
impl ActorRefFactory for ActorSystem {
    async fn actor_of<A>(
        &self,
        props: BoxActorProd<A>,
        name: &str,
    ) -> Result<ActorRef<A::Msg>, CreateError>
    where
        A: Actor,
    {
        self.provider
            .create_actor(props, name, &self.user_root(), self)
            .await
    }

    fn stop(&self, actor: impl ActorReference) {
        actor.sys_tell(SystemCmd::Stop.into());
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ActorSystem[Name: {}, Start Time: {:?}, Uptime: {} seconds]",
            self.name(),
            self.start_date(),
            self.uptime()
        )
    }
}

impl Timer for ActorSystem {
    fn schedule<T, M>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        receiver: ActorRef<M>,
        sender: crate::actor::Sender,
        msg: T,
    ) -> ScheduleId
    where
        T: Message + Into<M>,
        M: Message,
    {
        self.timer
            .schedule_job(initial_delay, Some(interval), receiver, sender, msg.into())
    }

    fn schedule_once<T, M>(
        &self,
        delay: Duration,
        receiver: ActorRef<M>,
        sender: crate::actor::Sender,
        msg: T,
    ) -> ScheduleId
    where
        T: Message + Into<M>,
        M: Message,
    {
        self.timer
            .schedule_job(delay, None, receiver, sender, msg.into())
    }

    fn cancel_schedule(&self, id: Uuid) {
        self.timer.cancel(&id)
    }
}

/// Spawns futures on the system's runtime.
pub trait Run {
    fn run<Fut>(&self, future: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static;
}

impl Run for ActorSystem {
    fn run<Fut>(&self, future: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

async fn sys_channels(sys: &ActorSystem) -> Result<SysChannels, SystemError> {
    let sys_events = sys_channel::<SystemEvent>("sys_events", sys).await?;
    let dead_letters = sys_channel::<DeadLetter>("dead_letters", sys).await?;
    let cluster_events = sys_channel::<ClusterEvent>("cluster_events", sys).await?;

    Ok(SysChannels {
        sys_events,
        dead_letters,
        cluster_events,
    })
}

async fn sys_channel<Msg>(name: &str, sys: &ActorSystem) -> Result<ChannelRef<Msg>, SystemError>
where
    Msg: Message,
{
    // system channels are unbounded so event publication can never
    // deadlock a stopping cell
    sys.provider
        .create_actor_with(Channel::<Msg>::props(), name, &sys.sys_root(), sys, 0)
        .await
        .map_err(|_| SystemError::ModuleFailed(name.into()))
}

#[derive(Clone)]
pub struct SysActors {
    pub root: BasicActorRef,
    pub user: BasicActorRef,
    pub sysm: BasicActorRef,
}

#[derive(Clone)]
pub struct SysChannels {
    pub(crate) sys_events: ChannelRef<SystemEvent>,
    pub(crate) dead_letters: ChannelRef<DeadLetter>,
    pub(crate) cluster_events: ChannelRef<ClusterEvent>,
}
