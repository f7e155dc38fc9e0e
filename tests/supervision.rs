use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use lattice::actors::*;

#[derive(Clone)]
pub struct TestProbe<T>(mpsc::UnboundedSender<T>);

impl<T> TestProbe<T> {
    fn event(&self, evt: T) {
        let _ = self.0.send(evt);
    }
}

impl<T> fmt::Debug for TestProbe<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TestProbe")
    }
}

fn probe<T>() -> (TestProbe<T>, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TestProbe(tx), rx)
}

async fn listen_one<T>(listen: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(3), listen.recv())
        .await
        .expect("probe timed out")
        .expect("probe closed")
}

/// Lifecycle counters shared with the test body across restarts.
#[derive(Default)]
pub struct Lifecycle {
    pub pre_start: AtomicUsize,
    pub pre_restart: AtomicUsize,
    pub post_restart: AtomicUsize,
    pub post_stop: AtomicUsize,
}

pub type Counters = Arc<Lifecycle>;

#[derive(Clone, Debug)]
pub enum TestMsg {
    Fail,
    Boom,
    Ping,
}

struct Subject {
    counters: Counters,
    strategy: Strategy,
}

impl Subject {
    fn props(counters: Counters, strategy: Strategy) -> BoxActorProd<Subject> {
        Props::new_args(
            |(counters, strategy)| Subject { counters, strategy },
            (counters, strategy),
        )
    }
}

#[async_trait]
impl Actor for Subject {
    type Msg = TestMsg;

    async fn pre_start(&mut self, _ctx: &Context<Self::Msg>) -> ActorResult {
        self.counters.pre_start.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pre_restart(&mut self, _ctx: &Context<Self::Msg>, _err: &ActorError) {
        self.counters.pre_restart.fetch_add(1, Ordering::SeqCst);
    }

    async fn post_restart(&mut self, _ctx: &Context<Self::Msg>, _err: &ActorError) {
        self.counters.post_restart.fetch_add(1, Ordering::SeqCst);
    }

    async fn post_stop(&mut self) {
        self.counters.post_stop.fetch_add(1, Ordering::SeqCst);
    }

    fn supervisor_strategy(&self) -> Strategy {
        self.strategy.clone()
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, _sender: Sender) -> ActorResult {
        match msg {
            TestMsg::Fail => Err(ActorError::new("induced failure")),
            TestMsg::Boom => panic!("// TEST PANIC // TEST PANIC // TEST PANIC //"),
            TestMsg::Ping => {
                ctx.reply("pong".to_string()).await;
                Ok(())
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_preserves_ref_and_runs_hooks_once() {
    let sys = ActorSystem::new().await.unwrap();

    let counters: Counters = Arc::default();
    let subject = sys
        .actor_of(
            Subject::props(counters.clone(), Strategy::Restart),
            "subject",
        )
        .await
        .unwrap();

    subject.tell(TestMsg::Fail, None).await;

    // the same ref answers after the restart; serial processing means
    // the ask completes strictly after the restart sequence
    let pong: String = subject.ask(TestMsg::Ping, None).await.unwrap();
    assert_eq!(pong, "pong");

    assert_eq!(counters.pre_start.load(Ordering::SeqCst), 2);
    assert_eq!(counters.pre_restart.load(Ordering::SeqCst), 1);
    assert_eq!(counters.post_restart.load(Ordering::SeqCst), 1);
    assert_eq!(counters.post_stop.load(Ordering::SeqCst), 1);

    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn panics_enter_supervision_like_errors() {
    let sys = ActorSystem::new().await.unwrap();

    let counters: Counters = Arc::default();
    let subject = sys
        .actor_of(Subject::props(counters.clone(), Strategy::Restart), "s")
        .await
        .unwrap();

    for _ in 0..10 {
        subject.tell(TestMsg::Boom, None).await;
        let pong: String = subject.ask(TestMsg::Ping, None).await.unwrap();
        assert_eq!(pong, "pong");
    }

    assert_eq!(counters.pre_start.load(Ordering::SeqCst), 11);
    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_keeps_the_instance() {
    let sys = ActorSystem::new().await.unwrap();

    let counters: Counters = Arc::default();
    let subject = sys
        .actor_of(Subject::props(counters.clone(), Strategy::Resume), "s")
        .await
        .unwrap();

    subject.tell(TestMsg::Fail, None).await;

    let pong: String = subject.ask(TestMsg::Ping, None).await.unwrap();
    assert_eq!(pong, "pong");

    // no restart happened
    assert_eq!(counters.pre_start.load(Ordering::SeqCst), 1);
    assert_eq!(counters.pre_restart.load(Ordering::SeqCst), 0);
    assert_eq!(counters.post_stop.load(Ordering::SeqCst), 0);

    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_directive_terminates_the_actor() {
    let sys = ActorSystem::new().await.unwrap();

    let counters: Counters = Arc::default();
    let subject = sys
        .actor_of(Subject::props(counters.clone(), Strategy::Stop), "s")
        .await
        .unwrap();

    subject.tell(TestMsg::Fail, None).await;

    // the ask either finds a closed mailbox or is flushed to dead
    // letters; both reject the waiter
    let result: Result<String, AskError> = subject.ask(TestMsg::Ping, None).await;
    assert!(matches!(result, Err(AskError::Unreachable)));

    assert_eq!(counters.post_stop.load(Ordering::SeqCst), 1);
    sys.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn decider_picks_directive_per_error() {
    let sys = ActorSystem::new().await.unwrap();

    let decider: Strategy = Strategy::Decider(Arc::new(|err| {
        if err.reason().contains("induced") {
            Directive::Resume
        } else {
            Directive::Stop
        }
    }));

    let counters: Counters = Arc::default();
    let subject = sys
        .actor_of(Subject::props(counters.clone(), decider), "s")
        .await
        .unwrap();

    // resumed
    subject.tell(TestMsg::Fail, None).await;
    let pong: String = subject.ask(TestMsg::Ping, None).await.unwrap();
    assert_eq!(pong, "pong");

    // stopped
    subject.tell(TestMsg::Boom, None).await;
    let result: Result<String, AskError> = subject.ask(TestMsg::Ping, None).await;
    assert!(result.is_err());

    sys.shutdown().await;
}

// Escalation: the child stops itself and re-raises the failure as the
// parent's own, whose Restart strategy rebuilds the whole subtree.
#[derive(Clone, Debug)]
pub enum SupMsg {
    FailChild,
    Ping,
}

struct EscalatingChild;

#[async_trait]
impl Actor for EscalatingChild {
    type Msg = TestMsg;

    fn supervisor_strategy(&self) -> Strategy {
        Strategy::Escalate
    }

    async fn recv(&mut self, _ctx: &Context<Self::Msg>, msg: Self::Msg, _sender: Sender) -> ActorResult {
        match msg {
            TestMsg::Fail => Err(ActorError::new("child failure")),
            _ => Ok(()),
        }
    }
}

struct Sup {
    starts: TestProbe<()>,
    child: Option<ActorRef<TestMsg>>,
}

#[async_trait]
impl Actor for Sup {
    type Msg = SupMsg;

    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        self.starts.event(());
        self.child = Some(
            ctx.actor_of(Props::new(|| EscalatingChild), "child")
                .await
                .unwrap(),
        );
        Ok(())
    }

    fn supervisor_strategy(&self) -> Strategy {
        Strategy::Restart
    }

    async fn recv(&mut self, ctx: &Context<Self::Msg>, msg: Self::Msg, _sender: Sender) -> ActorResult {
        match msg {
            SupMsg::FailChild => {
                self.child.as_ref().unwrap().tell(TestMsg::Fail, None).await;
            }
            SupMsg::Ping => {
                ctx.reply("pong".to_string()).await;
            }
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn escalation_restarts_the_parent() {
    let sys = ActorSystem::new().await.unwrap();

    let (starts, mut listen) = probe();
    let sup = sys
        .actor_of(
            Props::new_args(
                |starts| Sup {
                    starts,
                    child: None,
                },
                starts,
            ),
            "sup",
        )
        .await
        .unwrap();

    // initial start
    listen_one(&mut listen).await;

    sup.tell(SupMsg::FailChild, None).await;

    // the parent restarted, which re-created the child subtree
    listen_one(&mut listen).await;

    let pong: String = sup.ask(SupMsg::Ping, None).await.unwrap();
    assert_eq!(pong, "pong");

    sys.shutdown().await;
}
