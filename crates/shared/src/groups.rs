//! Server-side broadcast groups and the hub methods that join or leave them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GroupIdError;

/// Entity scope of a group. The prefix must match the server naming exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupScope {
    Staff,
    User,
}

impl GroupScope {
    pub fn prefix(self) -> &'static str {
        match self {
            GroupScope::Staff => "Staff_",
            GroupScope::User => "User_",
        }
    }
}

/// A group identifier such as `Staff_42` or `User_7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    scope: GroupScope,
    entity_id: String,
}

impl GroupId {
    pub fn new(scope: GroupScope, entity_id: impl Into<String>) -> Self {
        Self {
            scope,
            entity_id: entity_id.into(),
        }
    }

    pub fn staff(staff_id: impl Into<String>) -> Self {
        Self::new(GroupScope::Staff, staff_id)
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(GroupScope::User, user_id)
    }

    pub fn scope(&self) -> GroupScope {
        self.scope
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.scope.prefix(), self.entity_id)
    }
}

impl FromStr for GroupId {
    type Err = GroupIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for scope in [GroupScope::Staff, GroupScope::User] {
            if let Some(entity) = s.strip_prefix(scope.prefix()) {
                if entity.is_empty() {
                    return Err(GroupIdError::EmptyEntity(s.to_string()));
                }
                return Ok(GroupId::new(scope, entity));
            }
        }
        Err(GroupIdError::UnknownScope(s.to_string()))
    }
}

/// Remote method names used to join and leave groups.
///
/// The server exposes no leave method for user groups today, so
/// `user_unsubscribe` defaults to `None`: user groups then live for the whole
/// connection on the server side and are only dropped locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubMethods {
    pub staff_subscribe: String,
    pub staff_unsubscribe: Option<String>,
    pub user_subscribe: String,
    pub user_unsubscribe: Option<String>,
}

impl Default for HubMethods {
    fn default() -> Self {
        Self {
            staff_subscribe: "SubscribeToStaffUpdates".to_string(),
            staff_unsubscribe: Some("UnsubscribeFromStaffUpdates".to_string()),
            user_subscribe: "SubscribeToUserUpdates".to_string(),
            user_unsubscribe: None,
        }
    }
}

impl HubMethods {
    pub fn subscribe_method(&self, scope: GroupScope) -> &str {
        match scope {
            GroupScope::Staff => &self.staff_subscribe,
            GroupScope::User => &self.user_subscribe,
        }
    }

    pub fn unsubscribe_method(&self, scope: GroupScope) -> Option<&str> {
        match scope {
            GroupScope::Staff => self.staff_unsubscribe.as_deref(),
            GroupScope::User => self.user_unsubscribe.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_display() {
        assert_eq!(GroupId::staff("42").to_string(), "Staff_42");
        assert_eq!(GroupId::user("7").to_string(), "User_7");
    }

    #[test]
    fn test_group_parse() {
        let group: GroupId = "Staff_42".parse().unwrap();
        assert_eq!(group.scope(), GroupScope::Staff);
        assert_eq!(group.entity_id(), "42");

        let group: GroupId = "User_abc".parse().unwrap();
        assert_eq!(group, GroupId::user("abc"));
    }

    #[test]
    fn test_group_parse_is_case_sensitive() {
        assert_eq!(
            "staff_42".parse::<GroupId>(),
            Err(GroupIdError::UnknownScope("staff_42".to_string()))
        );
        assert_eq!(
            "Staff_".parse::<GroupId>(),
            Err(GroupIdError::EmptyEntity("Staff_".to_string()))
        );
    }

    #[test]
    fn test_default_hub_methods() {
        let methods = HubMethods::default();
        assert_eq!(methods.subscribe_method(GroupScope::Staff), "SubscribeToStaffUpdates");
        assert_eq!(
            methods.unsubscribe_method(GroupScope::Staff),
            Some("UnsubscribeFromStaffUpdates")
        );
        assert_eq!(methods.subscribe_method(GroupScope::User), "SubscribeToUserUpdates");
        assert_eq!(methods.unsubscribe_method(GroupScope::User), None);
    }
}
