use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;

use crate::models::{Issue, IssueChanges, IssueFilter, NewIssue};

const SCHEMA_VERSION: i32 = 1;

const ISSUE_COLUMNS: &str = "id, project, issue_title, issue_text, created_by, assigned_to, status_text, open, created_on, updated_on";

/// SQLite-backed issue store. One handle per process, injected into the API
/// state; the controller never reaches for a global.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM pragma_user_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project TEXT NOT NULL,
                    issue_title TEXT NOT NULL,
                    issue_text TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    assigned_to TEXT NOT NULL DEFAULT '',
                    status_text TEXT NOT NULL DEFAULT '',
                    open INTEGER NOT NULL DEFAULT 1,
                    created_on TEXT NOT NULL,
                    updated_on TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project);
                CREATE INDEX IF NOT EXISTS idx_issues_open ON issues(open);
                "#,
            )?;

            self.conn
                .execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        }

        Ok(())
    }

    /// Insert a validated issue, assigning defaults and both timestamps.
    /// Returns the full stored record including its new id.
    pub fn insert_issue(&self, project: &str, new: &NewIssue) -> Result<Issue> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO issues (project, issue_title, issue_text, created_by, assigned_to, status_text, open, created_on, updated_on)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
            params![
                project,
                new.issue_title,
                new.issue_text,
                new.created_by,
                new.assigned_to,
                new.status_text,
                now.to_rfc3339()
            ],
        )?;

        Ok(Issue {
            id: self.conn.last_insert_rowid(),
            project: project.to_string(),
            issue_title: new.issue_title.clone(),
            issue_text: new.issue_text.clone(),
            created_by: new.created_by.clone(),
            assigned_to: new.assigned_to.clone(),
            status_text: new.status_text.clone(),
            open: true,
            created_on: now,
            updated_on: now,
        })
    }

    /// All issues in `project` matching the coerced filter, in insertion
    /// order. An unsatisfiable filter short-circuits to an empty list.
    pub fn find_issues(&self, project: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        if filter.unsatisfiable {
            return Ok(Vec::new());
        }

        let mut sql = format!("SELECT {} FROM issues WHERE project = ?", ISSUE_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project.to_string())];

        if let Some(id) = filter.id {
            sql.push_str(" AND id = ?");
            params_vec.push(Box::new(id));
        }
        if let Some(open) = filter.open {
            sql.push_str(" AND open = ?");
            params_vec.push(Box::new(open));
        }
        if let Some(created_on) = filter.created_on {
            sql.push_str(" AND created_on = ?");
            params_vec.push(Box::new(created_on.to_rfc3339()));
        }
        if let Some(updated_on) = filter.updated_on {
            sql.push_str(" AND updated_on = ?");
            params_vec.push(Box::new(updated_on.to_rfc3339()));
        }
        for (column, value) in &filter.text_eq {
            sql.push_str(&format!(" AND {} = ?", column));
            params_vec.push(Box::new(value.clone()));
        }

        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let issues = stmt
            .query_map(params_refs.as_slice(), row_to_issue)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(issues)
    }

    pub fn get_issue(&self, project: &str, id: i64) -> Result<Option<Issue>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM issues WHERE id = ?1 AND project = ?2",
            ISSUE_COLUMNS
        ))?;

        let issue = stmt.query_row(params![id, project], row_to_issue).ok();
        Ok(issue)
    }

    /// Overwrite the supplied fields and refresh `updated_on`, matched by id
    /// AND project together. An id that exists under a different project does
    /// not match. Returns false when zero rows matched.
    pub fn update_issue(&self, project: &str, id: i64, changes: &IssueChanges) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let mut updates = vec!["updated_on = ?1".to_string()];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

        if let Some(title) = &changes.issue_title {
            updates.push(format!("issue_title = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(title.clone()));
        }
        if let Some(text) = &changes.issue_text {
            updates.push(format!("issue_text = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(text.clone()));
        }
        if let Some(created_by) = &changes.created_by {
            updates.push(format!("created_by = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(created_by.clone()));
        }
        if let Some(assigned_to) = &changes.assigned_to {
            updates.push(format!("assigned_to = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(assigned_to.clone()));
        }
        if let Some(status_text) = &changes.status_text {
            updates.push(format!("status_text = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(status_text.clone()));
        }
        if let Some(open) = changes.open {
            updates.push(format!("open = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(open));
        }

        params_vec.push(Box::new(id));
        params_vec.push(Box::new(project.to_string()));
        let sql = format!(
            "UPDATE issues SET {} WHERE id = ?{} AND project = ?{}",
            updates.join(", "),
            params_vec.len() - 1,
            params_vec.len()
        );

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = self.conn.execute(&sql, params_refs.as_slice())?;
        Ok(rows > 0)
    }

    /// Physical delete, matched by id AND project. Returns false when
    /// nothing was deleted.
    pub fn delete_issue(&self, project: &str, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM issues WHERE id = ?1 AND project = ?2",
            params![id, project],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        project: row.get(1)?,
        issue_title: row.get(2)?,
        issue_text: row.get(3)?,
        created_by: row.get(4)?,
        assigned_to: row.get(5)?,
        status_text: row.get(6)?,
        open: row.get(7)?,
        created_on: parse_datetime(row.get::<_, String>(8)?),
        updated_on: parse_datetime(row.get::<_, String>(9)?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    fn new_issue(title: &str) -> NewIssue {
        NewIssue {
            issue_title: title.to_string(),
            issue_text: "text".to_string(),
            created_by: "tester".to_string(),
            ..Default::default()
        }
    }

    fn filter_of(pairs: &[(&str, &str)]) -> IssueFilter {
        let params: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IssueFilter::from_params(&params)
    }

    #[test]
    fn test_insert_assigns_defaults_and_timestamps() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("apitest", &new_issue("First")).unwrap();

        assert!(issue.id > 0);
        assert_eq!(issue.project, "apitest");
        assert!(issue.open);
        assert_eq!(issue.assigned_to, "");
        assert_eq!(issue.status_text, "");
        assert_eq!(issue.created_on, issue.updated_on);

        let stored = db.get_issue("apitest", issue.id).unwrap().unwrap();
        assert_eq!(stored.issue_title, "First");
        assert_eq!(stored.created_on, issue.created_on);
    }

    #[test]
    fn test_find_scopes_by_project() {
        let (db, _dir) = setup_test_db();
        db.insert_issue("alpha", &new_issue("A1")).unwrap();
        db.insert_issue("alpha", &new_issue("A2")).unwrap();
        db.insert_issue("beta", &new_issue("B1")).unwrap();

        let alpha = db.find_issues("alpha", &IssueFilter::default()).unwrap();
        assert_eq!(alpha.len(), 2);
        assert!(alpha.iter().all(|i| i.project == "alpha"));

        let beta = db.find_issues("beta", &IssueFilter::default()).unwrap();
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].issue_title, "B1");

        let none = db.find_issues("gamma", &IssueFilter::default()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_find_returns_insertion_order() {
        let (db, _dir) = setup_test_db();
        let first = db.insert_issue("p", &new_issue("one")).unwrap();
        let second = db.insert_issue("p", &new_issue("two")).unwrap();
        let third = db.insert_issue("p", &new_issue("three")).unwrap();

        let ids: Vec<i64> = db
            .find_issues("p", &IssueFilter::default())
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn test_find_combines_filters() {
        let (db, _dir) = setup_test_db();
        let open_match = db.insert_issue("p", &new_issue("target")).unwrap();
        db.insert_issue("p", &new_issue("other")).unwrap();
        let closed = db.insert_issue("p", &new_issue("target")).unwrap();
        db.update_issue(
            "p",
            closed.id,
            &IssueChanges {
                open: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let only_open = db.find_issues("p", &filter_of(&[("open", "true")])).unwrap();
        assert_eq!(only_open.len(), 2);
        assert!(only_open.iter().all(|i| i.open));

        let both = db
            .find_issues("p", &filter_of(&[("open", "true"), ("issue_title", "target")]))
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, open_match.id);
    }

    #[test]
    fn test_find_by_id_filter() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("p", &new_issue("pick me")).unwrap();
        db.insert_issue("p", &new_issue("not me")).unwrap();

        let found = db
            .find_issues("p", &filter_of(&[("_id", &issue.id.to_string())]))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, issue.id);
    }

    #[test]
    fn test_find_by_timestamp_roundtrip() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("p", &new_issue("dated")).unwrap();

        let found = db
            .find_issues("p", &filter_of(&[("created_on", &issue.created_on.to_rfc3339())]))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, issue.id);
    }

    #[test]
    fn test_unsatisfiable_filter_matches_nothing() {
        let (db, _dir) = setup_test_db();
        db.insert_issue("p", &new_issue("exists")).unwrap();

        let found = db
            .find_issues("p", &filter_of(&[("_id", "garbage")]))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_update_refreshes_updated_on_only() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("p", &new_issue("stale")).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let matched = db
            .update_issue(
                "p",
                issue.id,
                &IssueChanges {
                    issue_title: Some("fresh".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matched);

        let stored = db.get_issue("p", issue.id).unwrap().unwrap();
        assert_eq!(stored.issue_title, "fresh");
        assert_eq!(stored.issue_text, "text");
        assert_eq!(stored.created_on, issue.created_on);
        assert!(stored.updated_on > stored.created_on);
    }

    #[test]
    fn test_update_open_flag() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("p", &new_issue("closable")).unwrap();

        db.update_issue(
            "p",
            issue.id,
            &IssueChanges {
                open: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!db.get_issue("p", issue.id).unwrap().unwrap().open);

        db.update_issue(
            "p",
            issue.id,
            &IssueChanges {
                open: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(db.get_issue("p", issue.id).unwrap().unwrap().open);
    }

    #[test]
    fn test_update_wrong_project_does_not_match() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("alpha", &new_issue("mine")).unwrap();

        let matched = db
            .update_issue(
                "beta",
                issue.id,
                &IssueChanges {
                    issue_title: Some("stolen".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!matched);

        let stored = db.get_issue("alpha", issue.id).unwrap().unwrap();
        assert_eq!(stored.issue_title, "mine");
    }

    #[test]
    fn test_update_nonexistent_returns_false() {
        let (db, _dir) = setup_test_db();
        let matched = db
            .update_issue(
                "p",
                99999,
                &IssueChanges {
                    issue_title: Some("ghost".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_delete_is_physical_and_idempotent() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("p", &new_issue("doomed")).unwrap();

        assert!(db.delete_issue("p", issue.id).unwrap());
        assert!(db.get_issue("p", issue.id).unwrap().is_none());
        assert!(db
            .find_issues("p", &filter_of(&[("_id", &issue.id.to_string())]))
            .unwrap()
            .is_empty());

        // Second delete reports no match rather than failing.
        assert!(!db.delete_issue("p", issue.id).unwrap());
    }

    #[test]
    fn test_delete_wrong_project_does_not_match() {
        let (db, _dir) = setup_test_db();
        let issue = db.insert_issue("alpha", &new_issue("kept")).unwrap();

        assert!(!db.delete_issue("beta", issue.id).unwrap());
        assert!(db.get_issue("alpha", issue.id).unwrap().is_some());
    }

    #[test]
    fn test_sql_injection_in_filter_value() {
        let (db, _dir) = setup_test_db();
        db.insert_issue("p", &new_issue("survivor")).unwrap();

        let malicious = "x'; DROP TABLE issues; --";
        let found = db
            .find_issues("p", &filter_of(&[("issue_title", malicious)]))
            .unwrap();
        assert!(found.is_empty());

        // Table intact.
        assert_eq!(db.find_issues("p", &IssueFilter::default()).unwrap().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_insert_then_get_roundtrip(title in "[a-zA-Z0-9 ]{1,40}", text in "[\\p{L}\\p{N} ]{1,80}") {
            let (db, _dir) = setup_test_db();
            let issue = db
                .insert_issue(
                    "prop",
                    &NewIssue {
                        issue_title: title.clone(),
                        issue_text: text.clone(),
                        created_by: "prop".to_string(),
                        ..Default::default()
                    },
                )
                .unwrap();

            let stored = db.get_issue("prop", issue.id).unwrap().unwrap();
            prop_assert_eq!(stored.issue_title, title);
            prop_assert_eq!(stored.issue_text, text);
        }

        #[test]
        fn prop_timestamps_ordered_after_update(title in "[a-zA-Z0-9 ]{1,30}") {
            let (db, _dir) = setup_test_db();
            let issue = db.insert_issue("prop", &new_issue("seed")).unwrap();

            db.update_issue(
                "prop",
                issue.id,
                &IssueChanges {
                    issue_title: Some(title),
                    ..Default::default()
                },
            )
            .unwrap();

            let stored = db.get_issue("prop", issue.id).unwrap().unwrap();
            prop_assert!(stored.created_on <= stored.updated_on);
        }

        #[test]
        fn prop_unknown_id_never_matches(id in 100000i64..1000000) {
            let (db, _dir) = setup_test_db();
            let updated = db.update_issue("prop", id, &IssueChanges {
                issue_title: Some("ghost".to_string()),
                ..Default::default()
            }).unwrap();
            prop_assert!(!updated);
            prop_assert!(!db.delete_issue("prop", id).unwrap());
        }
    }
}
