#![allow(unused_variables)]

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    actor::{
        Actor, ActorPath, ActorRef, ActorRefFactory, ActorResult, BoxActorProd, BoxedTell,
        Context, CreateError, Props, Receive, Sender, Tell,
    },
    system::SystemEvent,
    Message,
};

type Subs<Msg> = HashMap<Topic, Vec<BoxedTell<Msg>>>;

pub type ChannelCtx<Msg> = Context<ChannelMsg<Msg>>;
pub type ChannelRef<Msg> = ActorRef<ChannelMsg<Msg>>;

pub const DEAD_LETTER_TOPIC: &str = "dead_letter";

/// A specialized actor for providing Publish/Subscribe capabilities to
/// users. The system's event stream, dead letters and cluster events
/// ride on channels of this type.
pub struct Channel<Msg: Message> {
    subs: Subs<Msg>,
}

impl<Msg> Channel<Msg>
where
    Msg: Message,
{
    pub fn new() -> Self {
        Channel {
            subs: HashMap::new(),
        }
    }

    pub fn props() -> BoxActorProd<Channel<Msg>> {
        Props::new(Channel::new)
    }
}

impl<Msg: Message> Default for Channel<Msg> {
    fn default() -> Self {
        Channel::new()
    }
}

#[async_trait]
impl<Msg> Actor for Channel<Msg>
where
    Msg: Message,
{
    type Msg = ChannelMsg<Msg>;

    async fn recv(
        &mut self,
        ctx: &ChannelCtx<Msg>,
        msg: ChannelMsg<Msg>,
        sender: Sender,
    ) -> ActorResult {
        match msg {
            ChannelMsg::Publish(p) => self.receive(ctx, p, sender).await,
            ChannelMsg::Subscribe(sub) => self.receive(ctx, sub, sender).await,
            ChannelMsg::Unsubscribe(unsub) => self.receive(ctx, unsub, sender).await,
            ChannelMsg::UnsubscribeAll(unsub) => self.receive(ctx, unsub, sender).await,
        }
    }
}

#[async_trait]
impl<Msg> Receive<Subscribe<Msg>> for Channel<Msg>
where
    Msg: Message,
{
    type Msg = ChannelMsg<Msg>;

    async fn receive(
        &mut self,
        ctx: &ChannelCtx<Msg>,
        msg: Subscribe<Msg>,
        sender: Sender,
    ) -> ActorResult {
        let subs = self.subs.entry(msg.topic).or_default();
        subs.push(msg.actor);
        Ok(())
    }
}

#[async_trait]
impl<Msg> Receive<Unsubscribe<Msg>> for Channel<Msg>
where
    Msg: Message,
{
    type Msg = ChannelMsg<Msg>;

    async fn receive(
        &mut self,
        ctx: &ChannelCtx<Msg>,
        msg: Unsubscribe<Msg>,
        sender: Sender,
    ) -> ActorResult {
        unsubscribe(&mut self.subs, &msg.topic, msg.actor.path());
        Ok(())
    }
}

#[async_trait]
impl<Msg> Receive<UnsubscribeAll<Msg>> for Channel<Msg>
where
    Msg: Message,
{
    type Msg = ChannelMsg<Msg>;

    async fn receive(
        &mut self,
        ctx: &ChannelCtx<Msg>,
        msg: UnsubscribeAll<Msg>,
        sender: Sender,
    ) -> ActorResult {
        let topics: Vec<Topic> = self.subs.keys().cloned().collect();
        for topic in topics {
            unsubscribe(&mut self.subs, &topic, msg.actor.path());
        }
        Ok(())
    }
}

#[async_trait]
impl<Msg> Receive<Publish<Msg>> for Channel<Msg>
where
    Msg: Message,
{
    type Msg = ChannelMsg<Msg>;

    async fn receive(
        &mut self,
        ctx: &ChannelCtx<Msg>,
        msg: Publish<Msg>,
        sender: Sender,
    ) -> ActorResult {
        // send to actors subscribed to all topics
        if let Some(subs) = self.subs.get(&Topic::from(All)) {
            for sub in subs.iter() {
                sub.tell(msg.msg.clone(), sender.clone()).await;
            }
        }

        // send to actors subscribed to the topic
        if let Some(subs) = self.subs.get(&msg.topic) {
            for sub in subs.iter() {
                sub.tell(msg.msg.clone(), sender.clone()).await;
            }
        }

        Ok(())
    }
}

fn unsubscribe<Msg>(subs: &mut Subs<Msg>, topic: &Topic, path: &ActorPath) {
    if let Some(entries) = subs.get_mut(topic) {
        if let Some(pos) = entries.iter().position(|x| x.path() == path) {
            entries.remove(pos);
        }
    }
}

// Deadletter channel implementations
pub type DLChannelMsg = ChannelMsg<DeadLetter>;

#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub msg: String,
    pub sender: Sender,
    pub recipient: ActorPath,
}

#[derive(Debug, Clone)]
pub struct Subscribe<Msg: Message> {
    pub topic: Topic,
    pub actor: BoxedTell<Msg>,
}

#[derive(Debug, Clone)]
pub struct Unsubscribe<Msg: Message> {
    pub topic: Topic,
    pub actor: BoxedTell<Msg>,
}

#[derive(Debug, Clone)]
pub struct UnsubscribeAll<Msg: Message> {
    pub actor: BoxedTell<Msg>,
}

#[derive(Debug, Clone)]
pub struct Publish<Msg: Message> {
    pub topic: Topic,
    pub msg: Msg,
}

#[derive(Debug, Clone)]
pub enum ChannelMsg<Msg: Message> {
    /// Publish message
    Publish(Publish<Msg>),

    /// Subscribe given `ActorRef` to a topic on a channel
    Subscribe(Subscribe<Msg>),

    /// Unsubscribe the given `ActorRef` from a topic on a channel
    Unsubscribe(Unsubscribe<Msg>),

    /// Unsubscribe the given `ActorRef` from all topics on a channel
    UnsubscribeAll(UnsubscribeAll<Msg>),
}

impl<Msg: Message> From<Publish<Msg>> for ChannelMsg<Msg> {
    fn from(msg: Publish<Msg>) -> Self {
        ChannelMsg::Publish(msg)
    }
}

impl<Msg: Message> From<Subscribe<Msg>> for ChannelMsg<Msg> {
    fn from(msg: Subscribe<Msg>) -> Self {
        ChannelMsg::Subscribe(msg)
    }
}

impl<Msg: Message> From<Unsubscribe<Msg>> for ChannelMsg<Msg> {
    fn from(msg: Unsubscribe<Msg>) -> Self {
        ChannelMsg::Unsubscribe(msg)
    }
}

impl<Msg: Message> From<UnsubscribeAll<Msg>> for ChannelMsg<Msg> {
    fn from(msg: UnsubscribeAll<Msg>) -> Self {
        ChannelMsg::UnsubscribeAll(msg)
    }
}

/// Topics allow channel subscribers to filter messages by interest
///
/// When publishing a message to a channel a Topic is provided.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Topic(String);

impl<'a> From<&'a str> for Topic {
    fn from(topic: &str) -> Self {
        Topic(topic.to_string())
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        Topic(topic)
    }
}

impl<'a> From<&'a SystemEvent> for Topic {
    fn from(evt: &SystemEvent) -> Self {
        match *evt {
            SystemEvent::ActorCreated(_) => Topic::from("actor.created"),
            SystemEvent::ActorTerminated(_) => Topic::from("actor.terminated"),
            SystemEvent::ActorRestarted(_) => Topic::from("actor.restarted"),
        }
    }
}

/// A channel topic representing all topics `*`
pub struct All;

impl From<All> for Topic {
    fn from(_all: All) -> Self {
        Topic::from("*")
    }
}

pub async fn channel<Msg>(
    name: &str,
    fact: &impl ActorRefFactory,
) -> Result<ChannelRef<Msg>, CreateError>
where
    Msg: Message,
{
    fact.actor_of(Channel::<Msg>::props(), name).await
}
