use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub display_name: String,
    pub email: String,
    pub role: Role,
}

/// Directory collaborator: resolves user ids to display identity and lists
/// the operator audience for broadcast notifications.
///
/// The engine queries it fresh on every emission — no caching — so an
/// implementation backed by an external identity provider stays authoritative.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user(&self, id: Ulid) -> Option<UserInfo>;
    async fn list_operators(&self) -> Vec<UserInfo>;
}

/// In-memory directory. Production embeddings adapt their identity provider
/// behind `UserDirectory`; this one backs tests and single-process setups.
pub struct InMemoryDirectory {
    users: DashMap<Ulid, UserInfo>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    pub fn upsert(&self, user: UserInfo) {
        self.users.insert(user.id, user);
    }

    pub fn remove(&self, id: &Ulid) {
        self.users.remove(id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn user(&self, id: Ulid) -> Option<UserInfo> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    async fn list_operators(&self) -> Vec<UserInfo> {
        self.users
            .iter()
            .filter(|u| u.role == Role::Operator)
            .map(|u| u.value().clone())
            .collect()
    }
}
