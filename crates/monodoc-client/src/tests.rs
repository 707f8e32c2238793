use std::sync::Arc;

use monodoc_common::ServerError;
use serde_json::json;

use crate::{ClientConfig, Collection, DocError, LockContention, MemoryTransport, ServerVersion, Session, Value};

const CURRENT: ServerVersion = ServerVersion::new(8, 0, 19);

async fn open(transport: MemoryTransport) -> Session {
    Session::open(Arc::new(transport), &ClientConfig::default())
        .await
        .unwrap()
}

async fn books_on(transport: MemoryTransport) -> Collection {
    let session = open(transport).await;
    let books = session.ensure_collection("books").await.unwrap();
    books
        .add_many([
            json!({"_id": "1", "title": "Book 1", "pages": 20, "genre": "drama"}),
            json!({"_id": "2", "title": "Book 2", "pages": 30, "genre": "poetry"}),
            json!({"_id": "3", "title": "Book 3", "pages": 40, "genre": "drama"}),
            json!({"_id": "4", "title": "Book 4", "pages": 50, "genre": "poetry"}),
        ])
        .unwrap()
        .execute()
        .await
        .unwrap();
    books
}

async fn books() -> Collection {
    books_on(MemoryTransport::new(CURRENT)).await
}

fn pages(found: crate::DocResult) -> Vec<Value> {
    found.column("pages")
}

mod find_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn filter_and_sort_descending() {
        let books = books().await;
        let found = books
            .find("pages > 20")
            .unwrap()
            .sort(["pages desc"])
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(pages(found), vec![Value::Int(50), Value::Int(40), Value::Int(30)]);
    }

    #[tokio::test]
    async fn zero_limit_fails_before_dispatch() {
        let books = books().await;
        let mut find = books.find_all();
        let err = find.limit(0).unwrap_err();
        assert!(matches!(err, DocError::Range(_)));
        assert_eq!(find.execute().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn binding_bag_is_case_insensitive() {
        let books = books().await;
        let found = books
            .find("pages = :Pages1 || pages = :Pages2")
            .unwrap()
            .bind_all(json!({"pages1": 30, "pages2": 40}))
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(found.column("_id"), vec![Value::from("2"), Value::from("3")]);
    }

    #[tokio::test]
    async fn overlaps_is_symmetric() {
        let books = books().await;
        books
            .modify("_id in ('1', '3')")
            .unwrap()
            .set("tags", json!(["classic", "long"]))
            .unwrap()
            .execute()
            .await
            .unwrap();

        let mut left = books.find("tags overlaps ['long', 'short']").unwrap();
        let mut right = books.find("['long', 'short'] overlaps tags").unwrap();
        let left = left.execute().await.unwrap().column("_id");
        let right = right.execute().await.unwrap().column("_id");
        assert_eq!(left, vec![Value::from("1"), Value::from("3")]);
        assert_eq!(left, right);
    }

    #[tokio::test]
    async fn projection_group_and_having() {
        let books = books().await;
        let found = books
            .find("true")
            .unwrap()
            .fields(["genre", "sum(pages) as total"])
            .unwrap()
            .group_by([Some("genre")])
            .unwrap()
            .having("total > 70")
            .unwrap()
            .execute()
            .await
            .unwrap()
            .fetch_all();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["genre"], Value::from("poetry"));
        assert_eq!(found[0]["total"], Value::Int(80));
    }

    #[tokio::test]
    async fn grouping_errors_come_from_the_server() {
        let books = books().await;
        let err = books
            .find("true")
            .unwrap()
            .fields(["genre"])
            .unwrap()
            .group_by([Some("nosuch")])
            .unwrap()
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::UNKNOWN_COLUMN));
        assert_eq!(err.message(), "Unknown column 'nosuch' in 'group statement'");

        let err = books
            .find("true")
            .unwrap()
            .fields(["genre"])
            .unwrap()
            .group_by([Some("genre")])
            .unwrap()
            .having("pages > 10")
            .unwrap()
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Invalid expression in grouping criteria");
    }
}

mod identity_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn explicit_ids_are_kept_and_never_reported_as_generated() {
        let session = open(MemoryTransport::new(CURRENT)).await;
        let items = session.ensure_collection("items").await.unwrap();

        let explicit = [
            Value::from(""),
            Value::from(" "),
            Value::Int(0),
            Value::Int(-1),
            Value::Int(i64::MAX),
            Value::from(u64::MAX),
        ];
        let mut add = items.add(json!({"name": "generated"})).unwrap();
        for id in &explicit {
            let mut doc = crate::Document::new();
            doc.insert("_id".to_string(), id.clone());
            add.add(doc).unwrap();
        }
        let result = add.execute().await.unwrap();
        assert_eq!(result.affected_items, 7);
        assert_eq!(result.generated_ids.len(), 1);

        for id in explicit {
            assert!(!result.generated_ids.iter().any(|g| Value::from(g.as_str()) == id));
            let found = items
                .find("_id = :id")
                .unwrap()
                .bind("id", id.clone())
                .execute_one()
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found["_id"], id);
        }

        let by_literal = items
            .find("_id = 18446744073709551615")
            .unwrap()
            .execute_one()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_literal["_id"], Value::UInt(u64::MAX));
    }
}

mod collection_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn get_count_and_remove_one() {
        let books = books().await;
        assert_eq!(books.count().await.unwrap(), 4);

        let book = books.get_one("2").await.unwrap().unwrap();
        assert_eq!(book["title"], Value::from("Book 2"));
        assert_eq!(books.get_one("9").await.unwrap(), None);

        assert_eq!(books.remove_one("2").await.unwrap().affected_items, 1);
        assert_eq!(books.remove_one("2").await.unwrap().affected_items, 0);
        assert_eq!(books.count().await.unwrap(), 3);

        assert!(matches!(books.get_one(" ").await, Err(DocError::Bind(_))));
    }

    #[tokio::test]
    async fn replace_one() {
        let books = books().await;
        let result = books
            .replace_one("1", json!({"title": "Renamed"}))
            .await
            .unwrap();
        assert_eq!(result.affected_items, 1);
        let book = books.get_one("1").await.unwrap().unwrap();
        assert_eq!(
            Value::Object(book),
            Value::from(json!({"_id": "1", "title": "Renamed"}))
        );

        let missing = books.replace_one("9", json!({"title": "x"})).await.unwrap();
        assert_eq!(missing.affected_items, 0);

        let err = books
            .replace_one("1", json!({"_id": "2", "title": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::Bind(_)));
    }

    #[tokio::test]
    async fn add_or_replace_one_counts() {
        let books = books().await;
        let inserted = books
            .add_or_replace_one("5", json!({"title": "Book 5"}))
            .await
            .unwrap();
        assert_eq!(inserted.affected_items, 1);

        let replaced = books
            .add_or_replace_one("5", json!({"title": "Book 5b"}))
            .await
            .unwrap();
        assert_eq!(replaced.affected_items, 2);
        assert_eq!(books.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn add_or_replace_one_needs_a_recent_server() {
        let books = books_on(MemoryTransport::new(ServerVersion::new(8, 0, 2))).await;
        let err = books
            .add_or_replace_one("5", json!({"title": "Book 5"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::Capability(_)));
    }

    #[tokio::test]
    async fn modify_with_sort_and_limit() {
        let books = books().await;
        let result = books
            .modify("genre = 'drama' || genre = 'poetry'")
            .unwrap()
            .set_expr("pages", "pages * 2")
            .unwrap()
            .sort(["pages desc"])
            .unwrap()
            .limit(2)
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(result.affected_items, 2);

        let found = books
            .find_all()
            .sort(["_id"])
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(
            pages(found),
            vec![Value::Int(20), Value::Int(30), Value::Int(80), Value::Int(100)]
        );
    }
}

mod lock_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    async fn contended(version: ServerVersion, contention: LockContention) -> crate::Result<usize> {
        let transport = MemoryTransport::new(version);
        let other = transport.new_session();
        let books = books_on(transport).await;
        books.session().start_transaction().await.unwrap();
        books
            .find("_id = '1'")
            .unwrap()
            .lock_exclusive(LockContention::Default)
            .execute()
            .await
            .unwrap();

        let second = open(other).await.collection("books");
        second.session().start_transaction().await.unwrap();
        let found = second
            .find("pages < 35")
            .unwrap()
            .lock_shared(contention)
            .execute()
            .await?;
        Ok(found.len())
    }

    #[tokio::test]
    async fn contention_outcomes_on_current_servers() {
        let err = contended(CURRENT, LockContention::NoWait).await.unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_NOWAIT));

        let err = contended(CURRENT, LockContention::Default).await.unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_WAIT_TIMEOUT));

        assert_eq!(contended(CURRENT, LockContention::SkipLocked).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn servers_without_contention_options_time_out() {
        let version = ServerVersion::new(8, 0, 4);
        let err = contended(version, LockContention::NoWait).await.unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::LOCK_WAIT_TIMEOUT));
    }
}

mod transaction_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn rollback_discards_changes() {
        let books = books().await;
        let session = books.session();

        session.start_transaction().await.unwrap();
        books.remove_one("1").await.unwrap();
        books
            .add(json!({"_id": "9", "pages": 1}))
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(books.count().await.unwrap(), 4);
        session.rollback().await.unwrap();

        let found = books.find_all().execute().await.unwrap();
        assert_eq!(
            found.column("_id"),
            vec![Value::from("1"), Value::from("2"), Value::from("3"), Value::from("4")]
        );
    }

    #[tokio::test]
    async fn commit_keeps_changes() {
        let books = books().await;
        let session = books.session();
        session.start_transaction().await.unwrap();
        books.remove_one("4").await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(books.count().await.unwrap(), 3);
    }
}
