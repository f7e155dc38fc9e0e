pub(crate) mod ask;
pub(crate) mod mailbox;
pub(crate) mod provider;

use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;
use slog::{debug, error, warn};

use crate::{
    actor::{
        actor_cell::{ActorStatus, ExtendedCell},
        Actor, ActorError, ActorPath, ActorRef, ActorReference, AskError, BasicActorRef,
        BoxActorProd, Context, Directive,
    },
    kernel::mailbox::{flush_to_deadletters, Mailbox, MailboxItem},
    system::{
        ActorCreated, ActorRestarted, ActorTerminated, ActorSystem, SystemCmd, SystemEvent,
        SystemMsg,
    },
    Envelope,
};

enum Flow {
    Continue,
    /// Leave the run loop and finalize the cell. `post_stop` is false
    /// when the current instance already ran its stop hook (or never
    /// completed `pre_start`).
    Terminate {
        post_stop: bool,
    },
}

/// Spawns the cell's run loop: the dedicated task draining the mailbox
/// one message at a time.
pub(crate) fn start_cell<A>(
    actor: A,
    props: BoxActorProd<A>,
    cell: ExtendedCell<A::Msg>,
    mailbox: Mailbox<A::Msg>,
    sys: &ActorSystem,
) where
    A: Actor,
{
    let task_cell = cell.clone();
    let sys = sys.clone();
    let handle = sys.handle().clone();
    let task = handle.spawn(async move {
        run_cell(actor, props, task_cell, mailbox, sys).await;
    });
    cell.cell().set_task(task);
}

async fn run_cell<A>(
    mut actor: A,
    props: BoxActorProd<A>,
    cell: ExtendedCell<A::Msg>,
    mut mailbox: Mailbox<A::Msg>,
    sys: ActorSystem,
) where
    A: Actor,
{
    let ctx = Context::new(ActorRef::new(cell.clone()), sys.clone());
    let myself = BasicActorRef::new(cell.cell().clone());

    // initialize before any message is dispatched; failures here do not
    // enter supervision
    let started = AssertUnwindSafe(actor.pre_start(&ctx)).catch_unwind().await;
    let failed_start = match started {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(panic) => Some(ActorError::from_panic(panic)),
    };
    if let Some(err) = failed_start {
        error!(sys.log(), "Actor failed to start: {} ({})", myself.path(), err);
        terminate::<A>(None, &cell, &myself, &mut mailbox, &sys).await;
        return;
    }

    cell.cell().set_status(ActorStatus::Running);

    if is_user_actor(myself.path()) {
        sys.publish_event(SystemEvent::ActorCreated(ActorCreated {
            actor: myself.clone(),
        }))
        .await;
    }

    if let Err(panic) = AssertUnwindSafe(actor.post_start(&ctx)).catch_unwind().await {
        let err = ActorError::from_panic(panic);
        if let Flow::Terminate { post_stop } =
            supervise(&mut actor, &props, &cell, &ctx, &myself, &sys, err).await
        {
            let instance = if post_stop { Some(&mut actor) } else { None };
            terminate(instance, &cell, &myself, &mut mailbox, &sys).await;
            return;
        }
    }

    loop {
        let flow = tokio::select! {
            biased;

            sys_msg = mailbox.sys_rx.recv() => match sys_msg {
                Some(env) => {
                    handle_sys_msg(env, &mut actor, &props, &cell, &ctx, &myself, &sys).await
                }
                None => Flow::Terminate { post_stop: true },
            },

            item = mailbox.rx.recv() => match item {
                Some(MailboxItem::Envelope(env)) => {
                    handle_msg(env, &mut actor, &props, &cell, &ctx, &myself, &sys).await
                }
                Some(MailboxItem::PoisonPill) | None => Flow::Terminate { post_stop: true },
            },
        };

        if let Flow::Terminate { post_stop } = flow {
            let instance = if post_stop { Some(&mut actor) } else { None };
            terminate(instance, &cell, &myself, &mut mailbox, &sys).await;
            return;
        }
    }
}

async fn handle_msg<A>(
    env: Envelope<A::Msg>,
    actor: &mut A,
    props: &BoxActorProd<A>,
    cell: &ExtendedCell<A::Msg>,
    ctx: &Context<A::Msg>,
    myself: &BasicActorRef,
    sys: &ActorSystem,
) -> Flow
where
    A: Actor,
{
    ctx.set_ask(env.ask);

    let result = AssertUnwindSafe(actor.recv(ctx, env.msg, env.sender))
        .catch_unwind()
        .await;
    let unanswered = ctx.take_ask();

    let err = match result {
        // an unanswered ask from a successful handler is left to its
        // timeout; an explicit reply is the reply mechanism
        Ok(Ok(())) => return Flow::Continue,
        Ok(Err(err)) => err,
        Err(panic) => ActorError::from_panic(panic),
    };

    if let Some(ask) = unanswered {
        sys.respond_ask(ask, Err(AskError::Failed(err.clone()))).await;
    }

    supervise(actor, props, cell, ctx, myself, sys, err).await
}

async fn handle_sys_msg<A>(
    env: Envelope<SystemMsg>,
    actor: &mut A,
    props: &BoxActorProd<A>,
    cell: &ExtendedCell<A::Msg>,
    ctx: &Context<A::Msg>,
    myself: &BasicActorRef,
    sys: &ActorSystem,
) -> Flow
where
    A: Actor,
{
    match env.msg {
        SystemMsg::Command(SystemCmd::Stop) => {
            initiate_stop(cell, sys).await;
            Flow::Continue
        }
        SystemMsg::Command(SystemCmd::Restart) => {
            let err = ActorError::new("restart requested");
            restart(actor, props, cell, ctx, myself, sys, &err).await
        }
        SystemMsg::Failed {
            actor: failed,
            error,
        } => {
            if cell.cell().is_guardian() {
                error!(
                    sys.log(),
                    "Failure of {} escalated to guardian {}: {}",
                    failed.path(),
                    myself.path(),
                    error
                );
                Flow::Continue
            } else {
                // an escalated failure becomes this actor's own failure
                supervise(actor, props, cell, ctx, myself, sys, error).await
            }
        }
        msg @ SystemMsg::Event(_) => {
            let _ = AssertUnwindSafe(actor.sys_recv(ctx, msg, env.sender))
                .catch_unwind()
                .await;
            Flow::Continue
        }
    }
}

/// The supervision state machine for one failure of this cell.
async fn supervise<A>(
    actor: &mut A,
    props: &BoxActorProd<A>,
    cell: &ExtendedCell<A::Msg>,
    ctx: &Context<A::Msg>,
    myself: &BasicActorRef,
    sys: &ActorSystem,
    err: ActorError,
) -> Flow
where
    A: Actor,
{
    let directive = match cell.cell().strategy().decide(&err) {
        Ok(directive) => directive,
        Err(()) => {
            error!(
                sys.log(),
                "Supervision decider failed for {}; forcing Escalate",
                myself.path()
            );
            Directive::Escalate
        }
    };

    match directive {
        Directive::Resume => {
            debug!(
                sys.log(),
                "Resuming {} after failure: {}",
                myself.path(),
                err
            );
            Flow::Continue
        }
        Directive::Restart => restart(actor, props, cell, ctx, myself, sys, &err).await,
        Directive::Stop => {
            initiate_stop(cell, sys).await;
            Flow::Continue
        }
        Directive::Escalate => {
            warn!(sys.log(), "Escalating failure of {}: {}", myself.path(), err);
            if let Some(parent) = cell.cell().parent_opt() {
                parent.sys_tell(SystemMsg::Failed {
                    actor: myself.clone(),
                    error: err,
                });
            }
            initiate_stop(cell, sys).await;
            Flow::Continue
        }
    }
}

/// Stop sequence: mark requested, stop children (each awaited to
/// `Stopped`), then enqueue the terminal poison pill behind whatever is
/// already queued.
async fn initiate_stop<Msg>(cell: &ExtendedCell<Msg>, sys: &ActorSystem)
where
    Msg: crate::Message,
{
    if cell.cell().swap_stop_requested() {
        return;
    }
    cell.cell().set_status(ActorStatus::Stopping);

    for child in cell.cell().children_refs() {
        child.sys_tell(SystemMsg::Command(SystemCmd::Stop));
        child.await_stopped().await;
    }

    cell.mailbox_sender().enqueue_poison(sys);
}

/// Restart sequence: children are stopped, the failed instance runs
/// `pre_restart` and `post_stop`, a fresh instance is produced from
/// props and initialized. The mailbox and all existing refs survive.
async fn restart<A>(
    actor: &mut A,
    props: &BoxActorProd<A>,
    cell: &ExtendedCell<A::Msg>,
    ctx: &Context<A::Msg>,
    myself: &BasicActorRef,
    sys: &ActorSystem,
    err: &ActorError,
) -> Flow
where
    A: Actor,
{
    cell.cell().set_status(ActorStatus::Restarting);

    for child in cell.cell().children_refs() {
        child.sys_tell(SystemMsg::Command(SystemCmd::Stop));
        child.await_stopped().await;
    }

    let _ = AssertUnwindSafe(actor.pre_restart(ctx, err)).catch_unwind().await;
    let _ = AssertUnwindSafe(actor.post_stop()).catch_unwind().await;

    let fresh = match catch_unwind(AssertUnwindSafe(|| props.produce())) {
        Ok(fresh) => fresh,
        Err(_) => {
            error!(sys.log(), "Actor failed to restart: {}", myself.path());
            return Flow::Terminate { post_stop: false };
        }
    };
    *actor = fresh;

    let started = AssertUnwindSafe(actor.pre_start(ctx)).catch_unwind().await;
    match started {
        Ok(Ok(())) => {}
        _ => {
            error!(
                sys.log(),
                "Actor failed to restart: {} (pre_start failed)",
                myself.path()
            );
            return Flow::Terminate { post_stop: false };
        }
    }

    let _ = AssertUnwindSafe(actor.post_restart(ctx, err)).catch_unwind().await;

    cell.cell().set_status(ActorStatus::Running);
    sys.publish_event(SystemEvent::ActorRestarted(ActorRestarted {
        actor: myself.clone(),
    }))
    .await;

    Flow::Continue
}

/// Finalizes a cell: stop hook, mailbox close and dead-letter flush,
/// registry and hierarchy unlink, termination event. The cell is
/// unregistered only after `post_stop` returns.
async fn terminate<A>(
    actor: Option<&mut A>,
    cell: &ExtendedCell<A::Msg>,
    myself: &BasicActorRef,
    mailbox: &mut Mailbox<A::Msg>,
    sys: &ActorSystem,
) where
    A: Actor,
{
    if let Some(actor) = actor {
        let _ = AssertUnwindSafe(actor.post_stop()).catch_unwind().await;
    }

    mailbox.close();
    flush_to_deadletters(&mut mailbox.rx, myself, sys).await;

    sys.provider().unregister(myself.path());

    if let Some(parent) = cell.cell().parent_opt() {
        parent.cell.remove_child(myself.name());
    }

    sys.publish_event(SystemEvent::ActorTerminated(ActorTerminated {
        actor: myself.clone(),
    }))
    .await;

    if let Some(parent) = cell.cell().parent_opt() {
        parent.sys_tell(SystemMsg::Event(SystemEvent::ActorTerminated(
            ActorTerminated {
                actor: myself.clone(),
            },
        )));
    }

    cell.cell().set_status(ActorStatus::Stopped);
}

fn is_user_actor(path: &ActorPath) -> bool {
    path.as_str() != "/user" && path.is_descendant_of(&ActorPath::new("/user"))
}
