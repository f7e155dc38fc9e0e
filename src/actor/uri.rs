use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;

/// A slash separated sequence of non-empty name segments rooted at `/`.
///
/// Uniquely names an actor within a system. Siblings have unique
/// names under the same parent.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorPath(Arc<str>);

impl ActorPath {
    pub fn new(path: &str) -> Self {
        ActorPath(Arc::from(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Builds the path of a child named `name` under this path.
    pub fn child(&self, name: &str) -> ActorPath {
        if self.0.as_ref() == "/" {
            ActorPath::new(&format!("/{}", name))
        } else {
            ActorPath::new(&format!("{}/{}", self.0, name))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.as_ref() == "/"
    }

    /// True if this path lies under (or is) the given ancestor path.
    pub fn is_descendant_of(&self, ancestor: &ActorPath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0.as_ref() == ancestor.0.as_ref()
            || self
                .0
                .starts_with(&format!("{}/", ancestor.0))
    }
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An `ActorUri` represents the location of an actor, including the
/// path and actor system host.
#[derive(Clone)]
pub struct ActorUri {
    pub name: Arc<str>,
    pub path: ActorPath,
    pub host: Arc<str>,
}

impl PartialEq for ActorUri {
    fn eq(&self, other: &ActorUri) -> bool {
        self.path == other.path
    }
}

impl Eq for ActorUri {}

impl Hash for ActorUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for ActorUri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl fmt::Debug for ActorUri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}", self.host, self.path)
    }
}

/// The full address of an actor:
/// `protocol://system@host:port/path/segments`.
///
/// Two addresses refer to the same actor iff all fields are equal.
/// Absence of host and port means local to this system.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ActorAddress {
    pub protocol: Arc<str>,
    pub system: Arc<str>,
    pub host: Option<Arc<str>>,
    pub port: Option<u16>,
    pub path: ActorPath,
}

impl ActorAddress {
    pub fn local(system: &str, path: ActorPath) -> Self {
        ActorAddress {
            protocol: Arc::from("lattice"),
            system: Arc::from(system),
            host: None,
            port: None,
            path,
        }
    }

    pub fn remote(system: &str, host: &str, port: u16, path: ActorPath) -> Self {
        ActorAddress {
            protocol: Arc::from("lattice"),
            system: Arc::from(system),
            host: Some(Arc::from(host)),
            port: Some(port),
            path,
        }
    }

    pub fn is_local(&self) -> bool {
        self.host.is_none() && self.port.is_none()
    }

    /// True if both addresses name the same node (system + host + port),
    /// regardless of path.
    pub fn same_node(&self, other: &ActorAddress) -> bool {
        self.system == other.system && self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => write!(
                f,
                "{}://{}@{}:{}{}",
                self.protocol, self.system, host, port, self.path
            ),
            _ => write!(f, "{}://{}{}", self.protocol, self.system, self.path),
        }
    }
}

impl fmt::Debug for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for ActorAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rgx = Regex::new(
            r"^(?P<proto>[a-zA-Z0-9_-]+)://(?P<system>[a-zA-Z0-9_-]+)(@(?P<host>[a-zA-Z0-9.-]+):(?P<port>\d{1,5}))?(?P<path>(/[a-zA-Z0-9_-]+)+)$",
        )
        .unwrap();

        let caps = rgx.captures(s).ok_or_else(|| InvalidAddress {
            addr: s.to_string(),
        })?;

        let port = match caps.name("port") {
            Some(p) => {
                let port: u32 = p.as_str().parse().map_err(|_| InvalidAddress {
                    addr: s.to_string(),
                })?;
                if port == 0 || port > u16::MAX as u32 {
                    return Err(InvalidAddress {
                        addr: s.to_string(),
                    });
                }
                Some(port as u16)
            }
            None => None,
        };

        Ok(ActorAddress {
            protocol: Arc::from(&caps["proto"]),
            system: Arc::from(&caps["system"]),
            host: caps.name("host").map(|h| Arc::from(h.as_str())),
            port,
            path: ActorPath::new(&caps["path"]),
        })
    }
}

pub struct InvalidAddress {
    pub addr: String,
}

impl Error for InvalidAddress {}

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\". Invalid address. Expected protocol://system@host:port/path",
            self.addr
        )
    }
}

impl fmt::Debug for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_children() {
        let root = ActorPath::new("/");
        let user = root.child("user");
        assert_eq!(user.as_str(), "/user");

        let a = user.child("a");
        assert_eq!(a.as_str(), "/user/a");
        assert_eq!(a.segments().collect::<Vec<_>>(), vec!["user", "a"]);
        assert!(a.is_descendant_of(&user));
        assert!(!user.is_descendant_of(&a));
    }

    #[test]
    fn address_round_trip() {
        let addr: ActorAddress = "lattice://main@10.0.0.1:4435/user/counter-1"
            .parse()
            .unwrap();
        assert_eq!(&*addr.protocol, "lattice");
        assert_eq!(&*addr.system, "main");
        assert_eq!(addr.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(addr.port, Some(4435));
        assert_eq!(addr.path.as_str(), "/user/counter-1");

        let printed = addr.to_string();
        let reparsed: ActorAddress = printed.parse().unwrap();
        assert_eq!(addr, reparsed);
    }

    #[test]
    fn address_local_form() {
        let addr: ActorAddress = "lattice://main/user/a".parse().unwrap();
        assert!(addr.is_local());
        assert_eq!(addr.path.as_str(), "/user/a");
    }

    #[test]
    fn address_rejects_malformed() {
        assert!("lattice://main@host/user/a".parse::<ActorAddress>().is_err());
        assert!("lattice://main@host:0/user/a".parse::<ActorAddress>().is_err());
        assert!("lattice://main@host:99999/user/a"
            .parse::<ActorAddress>()
            .is_err());
        assert!("lattice://ma in/user/a".parse::<ActorAddress>().is_err());
        assert!("lattice://main".parse::<ActorAddress>().is_err());
        assert!("://main/user/a".parse::<ActorAddress>().is_err());
    }

    #[test]
    fn same_node_ignores_path() {
        let a: ActorAddress = "lattice://main@h:1000/user/a".parse().unwrap();
        let b: ActorAddress = "lattice://main@h:1000/user/b".parse().unwrap();
        let c: ActorAddress = "lattice://main@h:1001/user/a".parse().unwrap();
        assert!(a.same_node(&b));
        assert!(!a.same_node(&c));
        assert_ne!(a, b);
    }
}
