//! Relay endpoint identity

use std::fmt;
use std::hash::{Hash, Hasher};

use common::Secret;

/// Anything carrying a human-readable label that grouping can key on.
pub trait Labeled {
    fn label(&self) -> &str;
}

/// A single relay decoded from a subscription.
///
/// Identity is `(server_addr, method, password)`. Two endpoints that differ
/// only in `name` are the same relay, so providers that list one server under
/// several labels collapse to one entry.
#[derive(Clone)]
pub struct Endpoint {
    /// Remote relay address, `host:port`
    pub server_addr: String,
    /// Cipher method, e.g. `aes-256-gcm`
    pub method: String,
    pub password: Secret<String>,
    /// Display label from the subscription; not part of identity
    pub name: String,
}

impl Endpoint {
    pub fn new(
        server_addr: impl Into<String>,
        method: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            method: method.into(),
            password: Secret::new(password.into()),
            name: name.into(),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.server_addr == other.server_addr
            && self.method == other.method
            && self.password == other.password
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.server_addr.hash(state);
        self.method.hash(state);
        self.password.hash(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("server_addr", &self.server_addr)
            .field("method", &self.method)
            .field("password", &self.password)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.server_addr)
    }
}

impl Labeled for Endpoint {
    fn label(&self) -> &str {
        &self.name
    }
}

impl<T: Labeled + ?Sized> Labeled for &T {
    fn label(&self) -> &str {
        (**self).label()
    }
}

impl<T: Labeled + ?Sized> Labeled for std::sync::Arc<T> {
    fn label(&self) -> &str {
        (**self).label()
    }
}
