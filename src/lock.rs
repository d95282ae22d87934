//! LFS File Locking API types.
//!
//! See: https://github.com/git-lfs/git-lfs/blob/main/docs/api/locking.md

use serde::{Deserialize, Serialize};

use crate::batch::Ref;

/// Owner of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
}

/// A file lock held on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// String ID of the lock.
    pub id: String,
    /// Path name of the locked file.
    pub path: String,
    /// Creation time as an ISO 8601 string.
    pub locked_at: String,
    /// The user that created the lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<User>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateLockReq {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<Ref>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreateLockRes {
    pub lock: Lock,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LockConflictRes {
    #[serde(default)]
    pub message: String,
    pub lock: Lock,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeleteLockReq {
    /// Set when deleting another user's lock.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<Ref>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LocksRes {
    pub locks: Vec<Lock>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct VerifyLocksReq {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<Ref>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VerifyLocksRes {
    pub ours: Vec<Lock>,
    pub theirs: Vec<Lock>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Locks relevant to a push, split by owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyLocksResult {
    /// Locks held by the current user.
    pub ours: Vec<Lock>,
    /// Locks held by other users.
    pub theirs: Vec<Lock>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_deserialize() {
        let json = r#"{
            "id": "some-uuid",
            "path": "/path/to/file",
            "locked_at": "2016-05-17T15:49:06+00:00",
            "owner": {"name": "Jane Doe"}
        }"#;
        let lock: Lock = serde_json::from_str(json).unwrap();
        assert_eq!(lock.id, "some-uuid");
        assert_eq!(lock.owner.unwrap().name, "Jane Doe");
    }

    #[test]
    fn test_delete_lock_request() {
        let req = DeleteLockReq {
            force: false,
            r#ref: None,
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), "{}");

        let req = DeleteLockReq {
            force: true,
            r#ref: Some(Ref::new("refs/heads/main")),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"force":true,"ref":{"name":"refs/heads/main"}}"#
        );
    }
}
