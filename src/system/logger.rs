use async_trait::async_trait;
use slog::{info, o, Drain, Logger};

use crate::{
    actor::{
        Actor, ActorResult, ChannelRef, Context, DeadLetter, Sender, Subscribe, Tell, Topic,
        DEAD_LETTER_TOPIC,
    },
    config::Config,
};

/// Builds the default terminal logger from the system config.
pub(crate) fn default_log(cfg: &Config) -> Logger {
    let level = match cfg.log.level.as_str() {
        "trace" => slog::Level::Trace,
        "debug" => slog::Level::Debug,
        "info" => slog::Level::Info,
        "warning" | "warn" => slog::Level::Warning,
        "error" => slog::Level::Error,
        "critical" => slog::Level::Critical,
        _ => slog::Level::Debug,
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(cfg.log.chan_size)
        .build()
        .fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();

    Logger::root(drain, o!())
}

/// Subscribes to the dead letters channel and logs every entry.
pub(crate) struct DeadLetterLogger {
    dead_letters: ChannelRef<DeadLetter>,
    log: Logger,
}

impl DeadLetterLogger {
    pub(crate) fn new((dead_letters, log): (ChannelRef<DeadLetter>, Logger)) -> Self {
        DeadLetterLogger { dead_letters, log }
    }
}

#[async_trait]
impl Actor for DeadLetterLogger {
    type Msg = DeadLetter;

    async fn pre_start(&mut self, ctx: &Context<Self::Msg>) -> ActorResult {
        let sub = Subscribe {
            topic: Topic::from(DEAD_LETTER_TOPIC),
            actor: Box::new(ctx.myself()),
        };
        self.dead_letters.tell(sub, None).await;
        Ok(())
    }

    async fn recv(&mut self, _: &Context<Self::Msg>, msg: Self::Msg, _: Sender) -> ActorResult {
        info!(
            self.log,
            "DeadLetter: {:?} => {}({:?})", msg.sender, msg.recipient, msg.msg
        );
        Ok(())
    }
}
