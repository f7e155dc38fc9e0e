use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use slog::{trace, Logger};

use crate::{
    actor::{
        actor_cell::{ActorCell, ActorStatus, ExtendedCell},
        Actor, ActorPath, ActorRef, ActorReference, ActorResult, ActorUri, BasicActorRef,
        BoxActorProd, Context, CreateError, Props, Sender, Strategy,
    },
    kernel,
    kernel::mailbox::mailbox,
    system::{ActorSystem, SysActors, SystemMsg},
    validate::validate_name,
};

/// The dispatcher's registry of live actors, keyed by path.
///
/// Occupancy enforces sibling name uniqueness; the stored refs resolve
/// paths for selections and inbound remote routing.
#[derive(Clone)]
pub(crate) struct Provider {
    inner: Arc<ProviderInner>,
    log: Logger,
}

struct ProviderInner {
    paths: DashMap<ActorPath, BasicActorRef>,
}

impl Provider {
    pub(crate) fn new(log: Logger) -> Self {
        let inner = ProviderInner {
            paths: DashMap::new(),
        };

        Provider {
            inner: Arc::new(inner),
            log,
        }
    }

    pub(crate) async fn create_actor<A>(
        &self,
        props: BoxActorProd<A>,
        name: &str,
        parent: &BasicActorRef,
        sys: &ActorSystem,
    ) -> Result<ActorRef<A::Msg>, CreateError>
    where
        A: Actor,
    {
        self.create_actor_with(props, name, parent, sys, sys.config().mailbox.capacity)
            .await
    }

    pub(crate) async fn create_actor_with<A>(
        &self,
        props: BoxActorProd<A>,
        name: &str,
        parent: &BasicActorRef,
        sys: &ActorSystem,
        capacity: usize,
    ) -> Result<ActorRef<A::Msg>, CreateError>
    where
        A: Actor,
    {
        if sys.is_terminating() {
            return Err(CreateError::SystemTerminating);
        }

        validate_name(name)?;

        match parent.status() {
            ActorStatus::Starting | ActorStatus::Running | ActorStatus::Restarting => {}
            _ => return Err(CreateError::ParentNotRunning(parent.path().clone())),
        }

        let path = parent.path().child(name);
        trace!(self.log, "Attempting to create actor at: {}", path);

        let actor =
            catch_unwind(AssertUnwindSafe(|| props.produce())).map_err(|_| CreateError::Panicked)?;
        let strategy = actor.supervisor_strategy();

        let (sender, sys_tx, mb) = mailbox::<A::Msg>(capacity);

        let uri = ActorUri {
            name: Arc::from(name),
            path: path.clone(),
            host: sys.host(),
        };

        let cell = ActorCell::new(
            uri,
            Some(parent.clone()),
            strategy,
            false,
            sys_tx,
            Arc::new(sender.clone()),
            sys,
        );
        let cell = ExtendedCell::new(cell, sender);
        let actor_ref = ActorRef::new(cell.clone());
        let child = BasicActorRef::from(actor_ref.clone());

        // claim the path; losing a race to a sibling of the same name
        // must not start the kernel
        match self.inner.paths.entry(path.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CreateError::AlreadyExists(path))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(child.clone());
            }
        }

        parent.cell.add_child(child);
        kernel::start_cell(actor, props, cell, mb, sys);

        Ok(actor_ref)
    }

    pub(crate) fn unregister(&self, path: &ActorPath) {
        self.inner.paths.remove(path);
    }

    pub(crate) fn lookup(&self, path: &ActorPath) -> Option<BasicActorRef> {
        self.inner.paths.get(path).map(|r| r.value().clone())
    }

    /// Refs registered under the given subtree, the ancestor included.
    pub(crate) fn subtree(&self, ancestor: &ActorPath) -> Vec<BasicActorRef> {
        self.inner
            .paths
            .iter()
            .filter(|entry| entry.key().is_descendant_of(ancestor))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

pub(crate) fn create_root(sys: &ActorSystem) -> SysActors {
    let root = guardian(None, "root", "/", Strategy::Stop, sys);
    let user = guardian(Some(&root), "user", "/user", Strategy::Escalate, sys);
    let sysm = guardian(Some(&root), "system", "/system", Strategy::Stop, sys);

    SysActors { root, user, sysm }
}

fn guardian(
    parent: Option<&BasicActorRef>,
    name: &str,
    path: &str,
    strategy: Strategy,
    sys: &ActorSystem,
) -> BasicActorRef {
    let uri = ActorUri {
        name: Arc::from(name),
        path: ActorPath::new(path),
        host: sys.host(),
    };

    let props: BoxActorProd<Guardian> = Props::new_args(
        |(name, log): (String, Logger)| Guardian { name, log },
        (name.to_string(), sys.log()),
    );

    let (sender, sys_tx, mb) = mailbox::<SystemMsg>(0);

    let cell = ActorCell::new(
        uri,
        parent.cloned(),
        strategy,
        true,
        sys_tx,
        Arc::new(sender.clone()),
        sys,
    );
    let cell = ExtendedCell::new(cell, sender);
    let actor_ref = ActorRef::new(cell.clone());
    let actor = BasicActorRef::from(actor_ref);

    sys.provider()
        .inner
        .paths
        .insert(actor.path().clone(), actor.clone());

    if let Some(parent) = parent {
        parent.cell.add_child(actor.clone());
    }

    let guardian = props.produce();
    kernel::start_cell(guardian, props, cell, mb, sys);

    actor
}

struct Guardian {
    name: String,
    log: Logger,
}

#[async_trait]
impl Actor for Guardian {
    type Msg = SystemMsg;

    async fn recv(&mut self, _: &Context<Self::Msg>, _: Self::Msg, _: Sender) -> ActorResult {
        Ok(())
    }

    async fn post_stop(&mut self) {
        trace!(self.log, "{} guardian stopped", self.name);
    }
}
