use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::StoreResult;
use crate::thread_store::{self, ThreadRow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForestViolation {
    DanglingParent { thread: i64, parent: i64 },
    Cycle { thread: i64 },
    RootNotSelf { thread: i64, root: i64 },
    RootMismatch { thread: i64, recorded: i64, actual: i64 },
    MissingMessage { thread: i64, message: i64 },
    CrossFolderLink { thread: i64, parent: i64 },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ForestReport {
    pub threads: usize,
    pub trees: usize,
    pub violations: Vec<ForestViolation>,
}

impl ForestReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Walks every thread node up to its root and checks the forest shape.
pub(crate) async fn verify_forest(conn: &mut SqliteConnection) -> StoreResult<ForestReport> {
    let rows = thread_store::all_threads(conn).await?;
    let missing = sqlx::query_as::<_, (i64, i64)>(
        "SELECT t.id, t.message_id FROM threads t \
         LEFT JOIN messages m ON m.id = t.message_id WHERE m.id IS NULL",
    )
    .fetch_all(&mut *conn)
    .await?;
    let cross_folder = sqlx::query_as::<_, (i64, i64)>(
        "SELECT t.id, p.id FROM threads t \
         JOIN threads p ON p.id = t.parent \
         JOIN messages mt ON mt.id = t.message_id \
         JOIN messages mp ON mp.id = p.message_id \
         WHERE mt.folder_id != mp.folder_id",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut report = check_rows(&rows);
    report.violations.extend(
        missing
            .into_iter()
            .map(|(thread, message)| ForestViolation::MissingMessage { thread, message }),
    );
    report.violations.extend(
        cross_folder
            .into_iter()
            .map(|(thread, parent)| ForestViolation::CrossFolderLink { thread, parent }),
    );
    if !report.is_consistent() {
        warn!(violations = report.violations.len(), "thread forest is inconsistent");
    }
    Ok(report)
}

fn check_rows(rows: &[ThreadRow]) -> ForestReport {
    let by_id: HashMap<i64, &ThreadRow> = rows.iter().map(|row| (row.id, row)).collect();
    let mut resolved: HashMap<i64, i64> = HashMap::new();
    let mut broken: HashSet<i64> = HashSet::new();
    let mut report = ForestReport {
        threads: rows.len(),
        trees: rows.iter().filter(|row| row.is_root()).count(),
        violations: Vec::new(),
    };

    for row in rows {
        if resolved.contains_key(&row.id) || broken.contains(&row.id) {
            continue;
        }
        let mut path: Vec<i64> = Vec::new();
        let mut on_path: HashSet<i64> = HashSet::new();
        let mut cursor = row.id;
        let terminal = loop {
            if let Some(root) = resolved.get(&cursor) {
                break Some(*root);
            }
            if broken.contains(&cursor) {
                break None;
            }
            if !on_path.insert(cursor) {
                report.violations.push(ForestViolation::Cycle { thread: cursor });
                break None;
            }
            path.push(cursor);
            let node = by_id[&cursor];
            match node.parent {
                None => {
                    if node.root != node.id {
                        report.violations.push(ForestViolation::RootNotSelf {
                            thread: node.id,
                            root: node.root,
                        });
                    }
                    break Some(node.id);
                }
                Some(parent) if by_id.contains_key(&parent) => cursor = parent,
                Some(parent) => {
                    report.violations.push(ForestViolation::DanglingParent {
                        thread: node.id,
                        parent,
                    });
                    break None;
                }
            }
        };

        match terminal {
            Some(actual) => {
                for id in path {
                    let recorded = by_id[&id].root;
                    if recorded != actual {
                        report.violations.push(ForestViolation::RootMismatch {
                            thread: id,
                            recorded,
                            actual,
                        });
                    }
                    resolved.insert(id, actual);
                }
            }
            None => broken.extend(path),
        }
    }
    report
}
