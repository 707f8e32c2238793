use serde_json::json;

use super::*;
use crate::{
    expr::{parse_expr, parse_sort},
    lock::compile_lock,
};
use monodoc_common::protocol::{LockContention, LockMode};

const MODERN: ServerVersion = ServerVersion::new(8, 0, 19);

fn books() -> CollectionRef {
    CollectionRef {
        schema: "test".into(),
        name: "books".into(),
    }
}

fn doc(value: serde_json::Value) -> Document {
    match Value::from(value) {
        Value::Object(doc) => doc,
        other => panic!("not an object: {other}"),
    }
}

fn seeded(version: ServerVersion) -> MemoryTransport {
    let transport = MemoryTransport::new(version);
    transport
        .seed(
            &books(),
            [
                doc(json!({"_id": "1", "title": "Book 1", "pages": 20})),
                doc(json!({"_id": "2", "title": "Book 2", "pages": 30})),
                doc(json!({"_id": "3", "title": "Book 3", "pages": 40})),
            ],
        )
        .unwrap();
    transport
}

fn filtered(filter: &str) -> StatementOptions {
    StatementOptions {
        filter: Some(parse_expr(filter).unwrap()),
        ..Default::default()
    }
}

fn find(transport: &MemoryTransport, filter: &str) -> Result<Vec<Value>> {
    find_locked(transport, filter, None)
}

fn find_locked(
    transport: &MemoryTransport,
    filter: &str,
    lock: Option<LockDirective>,
) -> Result<Vec<Value>> {
    match transport.execute(Request::Find {
        target: books(),
        options: filtered(filter),
        lock,
    })? {
        Response::Documents { documents } => Ok(documents),
        other => panic!("unexpected response {other:?}"),
    }
}

fn ids(documents: &[Value]) -> Vec<String> {
    documents
        .iter()
        .filter_map(|d| d.get("_id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn directive(mode: LockMode, contention: LockContention, version: ServerVersion) -> Option<LockDirective> {
    compile_lock(mode, contention, version).unwrap()
}

fn affected(response: Response) -> u64 {
    match response {
        Response::Affected { affected_items } => affected_items,
        other => panic!("unexpected response {other:?}"),
    }
}

mod storage_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn hello_reports_version() {
        let transport = MemoryTransport::new(MODERN);
        let response = transport
            .execute(Request::Hello {
                client_name: "test".into(),
            })
            .unwrap();
        assert_eq!(
            response,
            Response::Welcome {
                server_version: "8.0.19".into()
            }
        );
    }

    #[test]
    fn create_list_and_drop_collections() {
        let transport = seeded(MODERN);
        let err = transport
            .execute(Request::CreateCollection {
                target: books(),
                reuse_existing: false,
            })
            .unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::COLLECTION_EXISTS));

        let names = transport
            .execute(Request::ListCollections {
                schema: "test".into(),
            })
            .unwrap();
        assert_eq!(
            names,
            Response::CollectionList {
                names: vec!["books".into()]
            }
        );

        transport
            .execute(Request::DropCollection { target: books() })
            .unwrap();
        let err = find(&transport, "true").unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::NO_SUCH_COLLECTION));
        assert_eq!(err.message(), "Table 'test.books' doesn't exist");
    }

    #[test]
    fn duplicate_ids_reject_the_whole_insert() {
        let transport = seeded(MODERN);
        let err = transport
            .execute(Request::Insert {
                target: books(),
                documents: vec![
                    Value::from(json!({"_id": "4"})),
                    Value::from(json!({"_id": "1"})),
                ],
                upsert: false,
            })
            .unwrap_err();
        assert!(err.to_string().starts_with("Document contains a field value that is not unique"));
        assert!(matches!(&err, DocError::Server(e) if e.is_uniqueness()));

        let count = transport.execute(Request::Count { target: books() }).unwrap();
        assert_eq!(count, Response::Count { count: 3 });
    }

    #[test]
    fn missing_id_is_rejected() {
        let transport = seeded(MODERN);
        let err = transport
            .execute(Request::Insert {
                target: books(),
                documents: vec![Value::from(json!({"title": "no id"}))],
                upsert: false,
            })
            .unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::MISSING_ID));
    }

    #[test]
    fn upsert_counts_inserts_once_and_replacements_twice() {
        let transport = seeded(MODERN);
        let upsert = |value: serde_json::Value| {
            affected(
                transport
                    .execute(Request::Insert {
                        target: books(),
                        documents: vec![Value::from(value)],
                        upsert: true,
                    })
                    .unwrap(),
            )
        };
        assert_eq!(upsert(json!({"_id": "5", "pages": 60})), 1);
        assert_eq!(upsert(json!({"_id": "1", "pages": 10})), 2);
        assert_eq!(upsert(json!({"_id": "1", "pages": 10})), 0);
        assert_eq!(
            find(&transport, "_id = '1'").unwrap(),
            vec![Value::from(json!({"_id": "1", "pages": 10}))]
        );
    }

    #[test]
    fn updates_and_deletes_honour_sort_and_limit() {
        let transport = seeded(MODERN);
        let options = StatementOptions {
            sort: parse_sort("pages desc").unwrap(),
            limit: Some(2),
            ..filtered("pages > 0")
        };
        let response = transport
            .execute(Request::Update {
                target: books(),
                options: options.clone(),
                operations: vec![UpdateOperation::MergePatch {
                    patch: Value::from(json!({"big": true})),
                }],
            })
            .unwrap();
        assert_eq!(affected(response), 2);
        assert_eq!(ids(&find(&transport, "big = true").unwrap()), vec!["2", "3"]);

        let response = transport
            .execute(Request::Delete {
                target: books(),
                options,
            })
            .unwrap();
        assert_eq!(affected(response), 2);
        assert_eq!(ids(&find(&transport, "true").unwrap()), vec!["1"]);
    }

    #[test]
    fn unbound_placeholders_fail_at_execution() {
        let transport = seeded(MODERN);
        let err = find(&transport, "pages = :pages").unwrap_err();
        assert_eq!(err, DocError::Bind("Placeholder ':pages' has no bound value".into()));
    }
}

mod lock_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn begin(transport: &MemoryTransport) {
        transport.execute(Request::TxBegin).unwrap();
    }

    #[test]
    fn shared_locks_coexist_and_block_exclusive() {
        let first = seeded(MODERN);
        let second = first.new_session();
        begin(&first);
        begin(&second);

        let shared = directive(LockMode::Shared, LockContention::Default, MODERN);
        let exclusive = directive(LockMode::Exclusive, LockContention::Default, MODERN);

        assert_eq!(find_locked(&first, "_id = '1'", shared).unwrap().len(), 1);
        assert_eq!(find_locked(&second, "_id = '1'", shared).unwrap().len(), 1);

        let err = find_locked(&second, "_id = '1'", exclusive).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_WAIT_TIMEOUT));
        assert_eq!(err.message(), "Lock wait timeout exceeded; try restarting transaction");
    }

    #[test]
    fn contention_options_on_modern_servers() {
        let first = seeded(MODERN);
        let second = first.new_session();
        begin(&first);
        begin(&second);

        let exclusive = directive(LockMode::Exclusive, LockContention::Default, MODERN);
        find_locked(&first, "_id = '2'", exclusive).unwrap();

        let nowait = directive(LockMode::Shared, LockContention::NoWait, MODERN);
        let err = find_locked(&second, "_id in ('1', '2')", nowait).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_NOWAIT));

        let skip = directive(LockMode::Exclusive, LockContention::SkipLocked, MODERN);
        let rows = find_locked(&second, "true", skip).unwrap();
        assert_eq!(ids(&rows), vec!["1", "3"]);
    }

    #[test]
    fn older_servers_report_every_conflict_as_timeout() {
        let version = ServerVersion::new(8, 0, 4);
        let first = seeded(version);
        let second = first.new_session();
        begin(&first);
        begin(&second);

        let exclusive = Some(LockDirective {
            row_lock: RowLock::Exclusive,
            options: None,
        });
        find_locked(&first, "_id = '1'", exclusive).unwrap();

        let skip = Some(LockDirective {
            row_lock: RowLock::Shared,
            options: Some(LockOptions::SkipLocked),
        });
        let err = find_locked(&second, "true", skip).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_WAIT_TIMEOUT));
    }

    #[test]
    fn locking_reads_need_row_locking_support() {
        let transport = seeded(ServerVersion::new(8, 0, 2));
        let exclusive = Some(LockDirective {
            row_lock: RowLock::Exclusive,
            options: None,
        });
        let err = find_locked(&transport, "true", exclusive).unwrap_err();
        assert!(matches!(err, DocError::Capability(_)));
    }

    #[test]
    fn locks_are_released_on_commit_and_not_held_outside_transactions() {
        let first = seeded(MODERN);
        let second = first.new_session();
        let exclusive = directive(LockMode::Exclusive, LockContention::NoWait, MODERN);

        // autocommit reads do not keep their locks
        find_locked(&first, "_id = '1'", exclusive).unwrap();
        find_locked(&second, "_id = '1'", exclusive).unwrap();

        begin(&first);
        find_locked(&first, "_id = '1'", exclusive).unwrap();
        assert!(find_locked(&second, "_id = '1'", exclusive).is_err());

        first.execute(Request::TxCommit).unwrap();
        find_locked(&second, "_id = '1'", exclusive).unwrap();
    }

    #[test]
    fn writes_wait_on_rows_locked_by_others() {
        let first = seeded(MODERN);
        let second = first.new_session();
        begin(&first);
        let shared = directive(LockMode::Shared, LockContention::Default, MODERN);
        find_locked(&first, "_id = '1'", shared).unwrap();

        let err = second
            .execute(Request::Delete {
                target: books(),
                options: filtered("_id = '1'"),
            })
            .unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_WAIT_TIMEOUT));
    }

    #[test]
    fn dropping_a_session_releases_its_locks() {
        let first = seeded(MODERN);
        let second = first.new_session();
        begin(&second);
        let exclusive = directive(LockMode::Exclusive, LockContention::NoWait, MODERN);
        find_locked(&second, "_id = '1'", exclusive).unwrap();
        drop(second);
        find_locked(&first, "_id = '1'", exclusive).unwrap();
    }
}

mod transaction_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn rollback_restores_every_write_in_place() {
        let transport = seeded(MODERN);
        transport.execute(Request::TxBegin).unwrap();
        transport
            .execute(Request::Insert {
                target: books(),
                documents: vec![Value::from(json!({"_id": "4", "pages": 50}))],
                upsert: false,
            })
            .unwrap();
        transport
            .execute(Request::Update {
                target: books(),
                options: filtered("_id = '1'"),
                operations: vec![UpdateOperation::MergePatch {
                    patch: Value::from(json!({"pages": 99})),
                }],
            })
            .unwrap();
        transport
            .execute(Request::Delete {
                target: books(),
                options: filtered("_id = '2'"),
            })
            .unwrap();
        assert_eq!(ids(&find(&transport, "true").unwrap()), vec!["1", "3", "4"]);

        transport.execute(Request::TxRollback).unwrap();
        let rows = find(&transport, "true").unwrap();
        assert_eq!(ids(&rows), vec!["1", "2", "3"]);
        assert_eq!(rows[0].get("pages"), Some(&Value::Int(20)));
    }

    #[test]
    fn commit_keeps_writes() {
        let transport = seeded(MODERN);
        transport.execute(Request::TxBegin).unwrap();
        transport
            .execute(Request::Delete {
                target: books(),
                options: filtered("pages > 25"),
            })
            .unwrap();
        transport.execute(Request::TxCommit).unwrap();
        transport.execute(Request::TxRollback).unwrap();
        assert_eq!(ids(&find(&transport, "true").unwrap()), vec!["1"]);
    }
}
