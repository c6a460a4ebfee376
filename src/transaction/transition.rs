//! Pure mappings from replies to domain values.

use crate::command::{SearchReply, SearchRow, ViewReply};
use crate::error::{Error, Result};
use crate::version::{Version, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    pub username: String,
    #[serde(default, rename = "firstname")]
    pub first_name: String,
    #[serde(default, rename = "lastname")]
    pub last_name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub superuser: bool,
}

/// Map `users/GetAll` rows into users. The row id wins over any id in the
/// value.
pub fn users(reply: &ViewReply) -> Result<Vec<User>> {
    reply
        .rows
        .iter()
        .map(|row| {
            let mut user: User = serde_json::from_value(row.value.clone()).map_err(|e| {
                Error::reply(format!(
                    "User row {} has an unexpected shape: {}",
                    row.id.as_deref().unwrap_or("?"),
                    e
                ))
            })?;
            if let Some(id) = &row.id {
                user.id = id.clone();
            }
            Ok(user)
        })
        .collect()
}

/// Version ids named by search rows. Rows whose id is not a version id are
/// skipped.
pub fn search_version_ids(reply: &SearchReply) -> Vec<VersionId> {
    reply
        .rows
        .iter()
        .filter_map(|row| VersionId::parse(&row.id).ok())
        .collect()
}

/// Keep only rows that are the current version of their resource, in search
/// order.
pub fn current_results(reply: SearchReply, current: &[Version]) -> Vec<SearchRow> {
    let current: HashSet<String> = current.iter().map(|v| v.id.to_string()).collect();
    reply
        .rows
        .into_iter()
        .filter(|row| current.contains(&row.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ViewRow;
    use crate::version::ResourceId;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn row(id: &str, value: Value) -> ViewRow {
        ViewRow {
            id: Some(id.to_string()),
            key: json!(id),
            value,
            doc: None,
        }
    }

    #[test]
    fn test_users_mapping() {
        let reply = ViewReply {
            status: 200,
            total_rows: 1,
            offset: 0,
            rows: vec![row(
                "user-lucas",
                json!({"username": "lucas", "firstname": "Lucas", "groups": ["admins"], "superuser": true}),
            )],
        };
        let users = users(&reply).unwrap();
        assert_eq!(users[0].id, "user-lucas");
        assert_eq!(users[0].first_name, "Lucas");
        assert_eq!(users[0].last_name, "");
        assert!(users[0].superuser);
    }

    #[test]
    fn test_bad_user_row_is_reply_error() {
        let reply = ViewReply {
            status: 200,
            total_rows: 1,
            offset: 0,
            rows: vec![row("u", json!(42))],
        };
        assert!(matches!(users(&reply), Err(Error::ReplyConstruction(_))));
    }

    #[test]
    fn test_current_results_filter() {
        let keep = VersionId::new();
        let stale = VersionId::new();
        let reply = SearchReply {
            status: 200,
            total_rows: 3,
            rows: [stale.to_string(), keep.to_string(), "design-doc".to_string()]
                .into_iter()
                .map(|id| SearchRow {
                    id,
                    score: 1.0,
                    fields: Value::Null,
                    doc: None,
                })
                .collect(),
        };
        assert_eq!(search_version_ids(&reply), vec![stale, keep]);

        let current = vec![Version {
            id: keep,
            resource: ResourceId::new(),
            number: 2,
            created: Utc::now(),
        }];
        let rows = current_results(reply, &current);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, keep.to_string());
    }
}
