//! The signed-in user.

use crate::observers::{notify_one, Listener, Observers, SubscriptionId};
use gardensync_engine::UserId;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: UserId,
    pub email: Option<String>,
}

impl User {
    pub fn new(uid: impl Into<UserId>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Current authentication state with change notifications.
#[derive(Debug, Default)]
pub struct AuthState {
    user: RwLock<Option<User>>,
    observers: Observers<Option<User>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn current_user(&self) -> Option<User> {
        match self.user.read() {
            Ok(user) => user.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    pub fn sign_in(&self, user: User) {
        tracing::info!(uid = %user.uid, "signed in");
        self.set(Some(user));
    }

    pub fn sign_out(&self) {
        tracing::info!("signed out");
        self.set(None);
    }

    fn set(&self, user: Option<User>) {
        {
            let mut slot = match self.user.write() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = user.clone();
        }
        self.observers.notify(&user);
    }

    /// Register a listener; it is called immediately with the current user.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Option<User>) + Send + Sync + 'static,
    {
        let listener: Listener<Option<User>> = Arc::new(listener);
        let id = self.observers.subscribe(Arc::clone(&listener));
        notify_one(id, &listener, &self.current_user());
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}
