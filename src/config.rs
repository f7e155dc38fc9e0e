use std::time::Duration;

use crate::sharding::UnreachablePolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub debug: bool,
    pub log: LoggerConfig,
    pub mailbox: MailboxConfig,
    pub ask: AskConfig,
    pub shutdown: ShutdownConfig,
    pub delivery: DeliveryConfig,
    pub sharding: ShardingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: true,
            log: LoggerConfig::default(),
            mailbox: MailboxConfig::default(),
            ask: AskConfig::default(),
            shutdown: ShutdownConfig::default(),
            delivery: DeliveryConfig::default(),
            sharding: ShardingConfig::default(),
        }
    }
}

impl Config {
    // Option<()> allows using ? for parsing toml values, result ignored
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        if let Some(debug) = v.get("debug").and_then(|d| d.as_bool()) {
            self.debug = debug;
        }
        if let Some(log) = v.get("log") {
            self.log.merge(log);
        }
        if let Some(mailbox) = v.get("mailbox") {
            self.mailbox.merge(mailbox);
        }
        if let Some(ask) = v.get("ask") {
            self.ask.merge(ask);
        }
        if let Some(shutdown) = v.get("shutdown") {
            self.shutdown.merge(shutdown);
        }
        if let Some(delivery) = v.get("delivery") {
            self.delivery.merge(delivery);
        }
        if let Some(sharding) = v.get("sharding") {
            self.sharding.merge(sharding);
        }
        None
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub level: String,
    pub chan_size: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "debug".to_string(),
            chan_size: 512,
        }
    }
}

impl LoggerConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        if let Some(level) = v.get("level").and_then(|l| l.as_str()) {
            self.level = level.to_string();
        }
        if let Some(size) = v.get("chan_size").and_then(|s| s.as_integer()) {
            self.chan_size = size as usize;
        }
        None
    }
}

#[derive(Clone, Debug)]
pub struct MailboxConfig {
    /// Mailbox capacity per actor. `0` means unbounded.
    pub capacity: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig { capacity: 1000 }
    }
}

impl MailboxConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        let capacity = v.get("capacity")?.as_integer()?;
        self.capacity = capacity as usize;
        None
    }
}

#[derive(Clone, Debug)]
pub struct AskConfig {
    pub default_timeout: Duration,
}

impl Default for AskConfig {
    fn default() -> Self {
        AskConfig {
            default_timeout: Duration::from_millis(5000),
        }
    }
}

impl AskConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        let millis = v.get("default_timeout_millis")?.as_integer()?;
        self.default_timeout = Duration::from_millis(millis as u64);
        None
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownConfig {
    /// Budget for each shutdown phase (user tree, then system tree).
    pub phase_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            phase_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ShutdownConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        let millis = v.get("phase_timeout_millis")?.as_integer()?;
        self.phase_timeout = Duration::from_millis(millis as u64);
        None
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub retry_interval: Duration,
    pub max_retries: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            retry_interval: Duration::from_millis(1000),
            max_retries: 5,
        }
    }
}

impl DeliveryConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        if let Some(millis) = v.get("retry_interval_millis").and_then(|m| m.as_integer()) {
            self.retry_interval = Duration::from_millis(millis as u64);
        }
        if let Some(max) = v.get("max_retries").and_then(|m| m.as_integer()) {
            self.max_retries = max as u32;
        }
        None
    }
}

#[derive(Clone, Debug)]
pub struct ShardingConfig {
    pub unreachable_policy: UnreachablePolicy,
    /// Entities idle longer than this are passivated. `None` disables
    /// the passivation timer.
    pub passivation_timeout: Option<Duration>,
    pub coordinator_persistence_id: String,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        ShardingConfig {
            unreachable_policy: UnreachablePolicy::Suspend,
            passivation_timeout: None,
            coordinator_persistence_id: "shard-coordinator".to_string(),
        }
    }
}

impl ShardingConfig {
    fn merge(&mut self, v: &toml::Value) -> Option<()> {
        let v = v.as_table()?;
        if let Some(policy) = v.get("unreachable_policy").and_then(|p| p.as_str()) {
            if let Ok(policy) = policy.parse() {
                self.unreachable_policy = policy;
            }
        }
        if let Some(millis) = v
            .get("passivation_timeout_millis")
            .and_then(|m| m.as_integer())
        {
            self.passivation_timeout = Some(Duration::from_millis(millis as u64));
        }
        if let Some(id) = v
            .get("coordinator_persistence_id")
            .and_then(|i| i.as_str())
        {
            self.coordinator_persistence_id = id.to_string();
        }
        None
    }
}

pub fn load_config() -> Config {
    use std::{
        env,
        fs::File,
        io::{self, Read},
    };

    let mut cfg = Config::default();

    // lattice.toml contains settings for anything related to the actor
    // runtime and its modules
    let path = env::var("LATTICE_CONF").unwrap_or_else(|_| "config/lattice.toml".into());
    let cfg_amendment = File::open(path)
        .and_then(|mut f| {
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            Ok(s)
        })
        .and_then(|s| {
            toml::from_str::<toml::Value>(&s).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        });
    if let Ok(cfg_amendment) = cfg_amendment {
        cfg.merge(&cfg_amendment);
    }

    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_defaults() {
        let amendment: toml::Value = toml::from_str(
            r#"
            debug = false

            [mailbox]
            capacity = 64

            [ask]
            default_timeout_millis = 250

            [delivery]
            retry_interval_millis = 50
            max_retries = 3

            [sharding]
            unreachable_policy = "remove"
            passivation_timeout_millis = 2000
            "#,
        )
        .unwrap();

        let mut cfg = Config::default();
        cfg.merge(&amendment);

        assert!(!cfg.debug);
        assert_eq!(cfg.mailbox.capacity, 64);
        assert_eq!(cfg.ask.default_timeout, Duration::from_millis(250));
        assert_eq!(cfg.delivery.retry_interval, Duration::from_millis(50));
        assert_eq!(cfg.delivery.max_retries, 3);
        assert_eq!(cfg.sharding.unreachable_policy, UnreachablePolicy::Remove);
        assert_eq!(
            cfg.sharding.passivation_timeout,
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn partial_merge_keeps_remaining_defaults() {
        let amendment: toml::Value = toml::from_str("[mailbox]\ncapacity = 8\n").unwrap();

        let mut cfg = Config::default();
        cfg.merge(&amendment);

        assert_eq!(cfg.mailbox.capacity, 8);
        assert_eq!(cfg.ask.default_timeout, Duration::from_millis(5000));
        assert_eq!(
            cfg.sharding.coordinator_persistence_id,
            "shard-coordinator"
        );
    }
}
