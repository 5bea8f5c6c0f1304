//! Row-level ownership filters for list queries.

use sqlx::{Postgres, QueryBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    OrgId(String),
    UserName(String),
}

/// Conjunction of ownership conditions; empty means every row is visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipFilter {
    conditions: Vec<Condition>,
}

impl OwnershipFilter {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn org(org_id: impl Into<String>) -> Self {
        Self {
            conditions: vec![Condition::OrgId(org_id.into())],
        }
    }

    pub fn user(user_name: impl Into<String>) -> Self {
        Self {
            conditions: vec![Condition::UserName(user_name.into())],
        }
    }

    pub fn and_user(mut self, user_name: impl Into<String>) -> Self {
        self.conditions.push(Condition::UserName(user_name.into()));
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Appends a `WHERE` clause to a query over an ownership-bearing table.
    pub fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            match condition {
                Condition::OrgId(org_id) => {
                    builder.push("org_id = ").push_bind(org_id.clone());
                }
                Condition::UserName(user_name) => {
                    builder.push("user_name = ").push_bind(user_name.clone());
                }
            }
        }
    }

    /// Same predicate evaluated in memory.
    pub fn matches(&self, org_id: &str, user_name: &str) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::OrgId(expected) => expected == org_id,
            Condition::UserName(expected) => expected == user_name,
        })
    }
}
