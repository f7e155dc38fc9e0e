use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::actor::Actor;

/// Provides instances of `ActorProducer` for use when creating Actors
/// (`actor_of`).
///
/// Actors are not created directly. Instead you provide an
/// `ActorProducer` that allows the `ActorSystem` to start an actor when
/// `actor_of` is used, or when an actor fails and a supervisor requests
/// an actor to be restarted.
///
/// `ActorProducer` can hold values required by the actor's factory
/// method parameters.
pub struct Props;

impl Props {
    /// Creates an `ActorProducer` with no factory method parameters.
    pub fn new<A, F>(creator: F) -> BoxActorProd<A>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Arc::new(ActorProps {
            creator,
            _marker: PhantomData,
        })
    }

    /// Creates an `ActorProducer` with one or more factory method
    /// parameters. Parameters are cloned on each `produce`, including
    /// on restart.
    pub fn new_args<A, Args, F>(creator: F, args: Args) -> BoxActorProd<A>
    where
        A: Actor,
        Args: ActorArgs,
        F: Fn(Args) -> A + Send + Sync + 'static,
    {
        Arc::new(ActorPropsWithArgs {
            creator,
            args,
            _marker: PhantomData,
        })
    }
}

/// A `Clone`, `Send` and `Sync` `ActorProducer`
pub type BoxActorProd<A> = Arc<dyn ActorProducer<Actor = A>>;

/// Represents the underlying factory function for creating instances of
/// `Actor`.
pub trait ActorProducer: Send + Sync + fmt::Debug {
    type Actor: Actor;

    /// Produces an instance of an `Actor`.
    ///
    /// # Panics
    /// If the provided factory method panics the panic is caught by the
    /// system, resulting in an error result returning to `actor_of` (or
    /// a failed restart).
    fn produce(&self) -> Self::Actor;
}

struct ActorProps<A, F> {
    creator: F,
    _marker: PhantomData<fn() -> A>,
}

impl<A, F> ActorProducer for ActorProps<A, F>
where
    A: Actor,
    F: Fn() -> A + Send + Sync + 'static,
{
    type Actor = A;

    fn produce(&self) -> A {
        (self.creator)()
    }
}

impl<A, F> fmt::Debug for ActorProps<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Props")
    }
}

struct ActorPropsWithArgs<A, Args, F> {
    creator: F,
    args: Args,
    _marker: PhantomData<fn() -> A>,
}

impl<A, Args, F> ActorProducer for ActorPropsWithArgs<A, Args, F>
where
    A: Actor,
    Args: ActorArgs,
    F: Fn(Args) -> A + Send + Sync + 'static,
{
    type Actor = A;

    fn produce(&self) -> A {
        (self.creator)(self.args.clone())
    }
}

impl<A, Args, F> fmt::Debug for ActorPropsWithArgs<A, Args, F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Props")
    }
}

pub trait ActorArgs: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> ActorArgs for T {}
