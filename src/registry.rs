use std::collections::hash_map::Entry;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use rustc_hash::{FxHashMap, FxHasher};
use tokio::sync::RwLock;
use tracing::{debug, info};
use crate::codec::SessionId;
use crate::session::Session;


/// All live sessions by id. The map is split into shards with a lock each, so the sweeper
///  walking one shard does not stall dispatch for sessions in other shards. Locks are only
///  held for map operations - work on a session happens on the `Arc<Session>` outside the
///  registry.
pub struct SessionRegistry {
    shards: Vec<RwLock<FxHashMap<SessionId, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new(num_shards: usize) -> SessionRegistry {
        SessionRegistry {
            shards: (0..num_shards.max(1))
                .map(|_| RwLock::new(FxHashMap::default()))
                .collect(),
        }
    }

    fn shard(&self, id: &SessionId) -> &RwLock<FxHashMap<SessionId, Arc<Session>>> {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.shard(id).read().await
            .get(id)
            .cloned()
    }

    /// fails if there is a session with this id already - callers must check first
    pub async fn create(&self, id: SessionId, peer_addr: SocketAddr) -> anyhow::Result<Arc<Session>> {
        match self.shard(&id).write().await
            .entry(id.clone())
        {
            Entry::Occupied(_) => {
                Err(anyhow!("session {} exists already", id))
            }
            Entry::Vacant(e) => {
                info!("new session {} for {:?}", id, peer_addr);
                Ok(e.insert(Arc::new(Session::new(id, peer_addr))).clone())
            }
        }
    }

    /// Returns the existing session for this id or creates a new one, atomically. The flag is
    ///  `true` if the session was newly created.
    pub async fn get_or_create(&self, id: &SessionId, peer_addr: SocketAddr) -> (Arc<Session>, bool) {
        match self.shard(id).write().await
            .entry(id.clone())
        {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => {
                info!("new session {} for {:?}", id, peer_addr);
                (e.insert(Arc::new(Session::new(id.clone(), peer_addr))).clone(), true)
            }
        }
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.shard(id).write().await
            .remove(id);
        if removed.is_some() {
            info!("removed session {}", id);
        }
        else {
            debug!("session {} was not registered - nothing to remove", id);
        }
        removed
    }

    /// Removes `session` only if it is still the registered session for its id. A session that
    ///  was closed and re-created under the same id in the meantime is left alone. Returns `true`
    ///  if the session was removed.
    pub async fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        let mut shard = self.shard(session.id()).write().await;

        let is_same = shard.get(session.id())
            .map(|registered| Arc::ptr_eq(registered, session))
            .unwrap_or(false);
        if is_same {
            shard.remove(session.id());
            info!("removed session {}", session.id());
        }
        else {
            debug!("session {} was closed or replaced already - not removing", session.id());
        }
        is_same
    }

    /// A point-in-time list of sessions, collected shard by shard. Sessions created or removed
    ///  concurrently may or may not be included, but no session is included twice. Sessions in
    ///  the result may have been removed from the registry by the time the caller gets to them.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut result = Vec::new();
        for shard in &self.shards {
            result.extend(shard.read().await.values().cloned());
        }
        result
    }

    pub async fn len(&self) -> usize {
        let mut result = 0;
        for shard in &self.shards {
            result += shard.read().await.len();
        }
        result
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
