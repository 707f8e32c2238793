use std::sync::Arc;

use monodoc_common::{
    DocError, Value,
    protocol::{LockContention, LockOptions, Request, RowLock, ServerVersion, UpdateOperation},
};

use crate::{collection::Collection, config::ClientConfig, memory::MemoryTransport, session::Session};

async fn collection_on(version: ServerVersion) -> Collection {
    let transport = Arc::new(MemoryTransport::new(version));
    let session = Session::open(transport, &ClientConfig::default())
        .await
        .unwrap();
    session.collection("books")
}

async fn books() -> Collection {
    collection_on(ServerVersion::new(8, 0, 19)).await
}

mod window_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn non_positive_limits_are_range_errors_and_change_nothing() {
        let books = books().await;
        let mut find = books.find("pages > 1").unwrap();
        find.limit(5).unwrap();

        for rows in [0, -1] {
            let err = find.limit(rows).unwrap_err();
            assert_eq!(
                err,
                DocError::Range(format!("Parameter 'rows' must be greater than zero, got {rows}"))
            );
        }
        assert_eq!(find.core().options().limit, Some(5));

        let mut remove = books.remove("true").unwrap();
        assert!(matches!(remove.limit(0), Err(DocError::Range(_))));
        assert_eq!(remove.core().options().limit, None);
    }

    #[tokio::test]
    async fn find_offset_accepts_any_value() {
        let books = books().await;
        let mut find = books.find_all();
        find.offset(-3);
        assert_eq!(find.core().options().offset, Some(-3));
    }

    #[tokio::test]
    async fn offset_after_legacy_window_is_incompatible() {
        let books = books().await;
        let mut modify = books.modify("true").unwrap();
        modify.limit_offset(2, 1).unwrap();
        let err = modify.offset(4).unwrap_err();
        assert!(matches!(err, DocError::Incompatible(_)));
        assert_eq!(modify.core().options().offset, Some(1));

        let mut remove = books.remove("true").unwrap();
        remove.offset(4).unwrap();
        remove.limit_offset(2, 1).unwrap();
        assert_eq!(remove.core().options().limit, Some(2));
    }

    #[tokio::test]
    async fn legacy_window_validates_rows() {
        let books = books().await;
        let mut remove = books.remove("true").unwrap();
        assert!(matches!(remove.limit_offset(0, 1), Err(DocError::Range(_))));
        remove.offset(3).unwrap();
        assert_eq!(remove.core().options().offset, Some(3));
    }
}

mod builder_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn failed_sort_leaves_previous_sort_in_place() {
        let books = books().await;
        let mut find = books.find_all();
        find.sort(["pages desc"]).unwrap();
        assert!(find.sort(["pages", "title sideways"]).is_err());
        assert_eq!(find.core().options().sort.len(), 1);
    }

    #[tokio::test]
    async fn group_by_with_only_none_is_a_no_op() {
        let books = books().await;
        let mut find = books.find_all();
        find.group_by([None::<&str>]).unwrap();
        assert!(find.core().options().group_by.is_empty());

        find.group_by([Some("age"), None]).unwrap();
        assert_eq!(find.core().options().group_by.len(), 1);
    }

    #[tokio::test]
    async fn modify_and_remove_require_a_condition() {
        let books = books().await;
        let err = books.modify("  ").unwrap_err();
        assert_eq!(err, DocError::Bind("Parameter 'condition' cannot be null or empty".into()));
        assert!(matches!(books.remove(""), Err(DocError::Bind(_))));
    }

    #[tokio::test]
    async fn unset_skips_blank_paths_and_is_all_or_nothing() {
        let books = books().await;
        let mut modify = books.modify("true").unwrap();
        modify.unset(["a", " ", "b"]).unwrap();
        assert_eq!(modify.operations().len(), 2);

        assert!(modify.unset(["c", "[bad"]).is_err());
        assert_eq!(modify.operations().len(), 2);
    }

    #[tokio::test]
    async fn patch_rejects_empty_documents() {
        let books = books().await;
        let mut modify = books.modify("true").unwrap();
        let err = modify.patch(serde_json::json!({})).unwrap_err();
        assert_eq!(err, DocError::Bind("Parameter 'document' cannot be null or empty".into()));
    }

    #[tokio::test]
    async fn array_insert_needs_a_trailing_index() {
        let books = books().await;
        let mut modify = books.modify("true").unwrap();
        assert!(matches!(modify.array_insert("tags", 1), Err(DocError::Bind(_))));
        modify.array_insert("tags[0]", 1).unwrap();
        assert!(matches!(
            modify.operations(),
            [UpdateOperation::ArrayInsert { .. }]
        ));
    }
}

mod request_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn options_freeze_on_first_request_and_thaw_on_change() {
        let books = books().await;
        let mut find = books.find("pages = :pages").unwrap();
        assert!(!find.core().is_frozen());

        find.bind("pages", 20);
        find.to_request().unwrap();
        assert!(find.core().is_frozen());

        // rebinding keeps the frozen options
        find.bind("pages", 30);
        let Request::Find { options, .. } = find.to_request().unwrap() else {
            panic!("expected a find request");
        };
        assert!(find.core().is_frozen());
        assert_eq!(options.filter.unwrap().to_string(), "($.pages == 30)");

        find.limit(1).unwrap();
        assert!(!find.core().is_frozen());
    }

    #[tokio::test]
    async fn last_lock_request_wins() {
        let books = books().await;
        let mut find = books.find_all();
        find.lock_shared(LockContention::NoWait)
            .lock_exclusive(LockContention::SkipLocked);

        let Request::Find { lock, .. } = find.to_request().unwrap() else {
            panic!("expected a find request");
        };
        let lock = lock.unwrap();
        assert_eq!(lock.row_lock, RowLock::Exclusive);
        assert_eq!(lock.options, Some(LockOptions::SkipLocked));
        assert_eq!(lock.codes(), (2, Some(2)));
    }

    #[tokio::test]
    async fn locks_on_old_servers_fail_before_dispatch() {
        let books = collection_on(ServerVersion::new(5, 7, 30)).await;
        let mut find = books.find_all();
        find.lock_shared(LockContention::Default);
        let err = find.to_request().unwrap_err();
        assert_eq!(
            err.to_string(),
            "This functionality is only supported from server version 8.0.3 onwards."
        );
    }

    #[tokio::test]
    async fn modify_request_carries_bound_operations() {
        let books = books().await;
        let mut modify = books.modify("_id = :id").unwrap();
        modify.set_expr("pages", "pages + :step").unwrap();
        modify.bind("id", "1").bind("step", 5);

        let Request::Update {
            options,
            operations,
            ..
        } = modify.to_request()
        else {
            panic!("expected an update request");
        };
        assert_eq!(options.filter.unwrap().to_string(), r#"($._id == "1")"#);
        let [UpdateOperation::Set { value, .. }] = operations.as_slice() else {
            panic!("expected one set operation");
        };
        assert_eq!(value.to_string(), "($.pages + 5)");
    }

    #[tokio::test]
    async fn add_generates_ids_once() {
        let books = books().await;
        let mut add = books
            .add(serde_json::json!({"title": "a"}))
            .unwrap();
        add.add(serde_json::json!({"_id": "given"})).unwrap();

        let first = add.to_request();
        let second = add.to_request();
        assert_eq!(first, second);

        let Request::Insert { documents, .. } = first else {
            panic!("expected an insert request");
        };
        let ids: Vec<&Value> = documents.iter().filter_map(|d| d.get("_id")).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], &Value::from("given"));
        assert_eq!(
            ids[0].as_str().map(str::len),
            Some(crate::identity::ID_LEN)
        );
    }
}
