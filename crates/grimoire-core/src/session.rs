//! Authenticated owner context.

use std::sync::{PoisonError, RwLock};

use crate::models::OwnerId;

/// Holds the currently signed-in owner, if any.
#[derive(Debug, Default)]
pub struct Session {
    owner: RwLock<Option<OwnerId>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(owner: OwnerId) -> Self {
        Self {
            owner: RwLock::new(Some(owner)),
        }
    }

    /// Set the current owner; a blank owner id signs out
    pub fn sign_in(&self, owner: OwnerId) {
        let owner = (!owner.is_empty()).then_some(owner);
        *self.owner.write().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    pub fn sign_out(&self) {
        *self.owner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_and_out() {
        let session = Session::new();
        assert_eq!(session.owner(), None);

        session.sign_in(OwnerId::new("owner-1"));
        assert_eq!(session.owner(), Some(OwnerId::new("owner-1")));

        session.sign_out();
        assert_eq!(session.owner(), None);
    }

    #[test]
    fn blank_owner_is_signed_out() {
        let session = Session::signed_in(OwnerId::new("owner-1"));
        session.sign_in(OwnerId::new("  "));
        assert_eq!(session.owner(), None);
    }
}
