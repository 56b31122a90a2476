//! In-memory [`DirectoryClient`] for tests across the workspace.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::directory_client::{DirectoryClient, DirectoryError, DirectoryMember};

#[derive(Default)]
pub struct StaticDirectory {
    members: Mutex<Vec<DirectoryMember>>,
    calls: AtomicUsize,
    failing: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StaticDirectory {
    pub fn with(members: Vec<DirectoryMember>) -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(members),
            ..Self::default()
        })
    }

    /// One member linked to both a chat account and, by email, a tracker account.
    pub fn member(id: u64, email: &str, chat_user_id: &str) -> DirectoryMember {
        DirectoryMember {
            id,
            display_name: format!("Member {id}"),
            email: Some(email.to_string()),
            chat_user_id: Some(chat_user_id.to_string()),
            tracker_user_id: None,
        }
    }

    pub fn push(&self, member: DirectoryMember) {
        lock(&self.members).push(member);
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn list_members(&self) -> Result<Vec<DirectoryMember>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.failing) {
            return Err(DirectoryError::Status {
                operation: "list contacts".to_string(),
                status: 503,
                body: String::new(),
            });
        }
        Ok(lock(&self.members).clone())
    }
}
