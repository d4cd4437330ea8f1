#[cfg(test)]
pub mod fixtures {
    use serde_json::json;

    use crate::{query::SCHEMA_COLLECTION, store::MemoryStore};

    pub fn store_with_people() -> MemoryStore {
        MemoryStore::new()
            .with_collection("people", vec![
                json!({ "id": 1, "full_name": "Alice Johnson", "age": 29, "city": "Porto" }),
                json!({ "id": 2, "full_name": "Bruno Martins", "age": 34, "city": "Lisboa" }),
            ])
            .with_collection("orders", vec![
                json!({ "id": 1, "person_id": 1, "status": "new" }),
            ])
    }

    pub fn store_with_sequence(collection: &str, seq: i64) -> MemoryStore {
        MemoryStore::new().with_collection(SCHEMA_COLLECTION, vec![json!({
            "name": collection,
            "auto": { "field_names": ["id"], "seq": seq },
        })])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::{
        ErrorKind, Properties, StoreError,
        compiler::SelectCommand,
        query::{Command, Query, SCHEMA_COLLECTION},
        store::{FindArgs, MemoryStore, StoreCall},
    };

    use super::fixtures::{store_with_people, store_with_sequence};

    fn select_rows(store: &MemoryStore, properties: &mut Properties, sql: &str, params: Vec<Value>) -> Vec<Vec<Value>> {
        let mut query = Query::new(store, properties, sql, params).expect("Failed to compile query");
        query
            .rows()
            .expect("Failed to open rows")
            .collect::<Result<Vec<_>, _>>()
            .expect("Failed to read rows")
    }

    #[test]
    pub fn test_find_end_to_end() {
        let store = store_with_people();
        store.push_result(vec![
            json!({ "c2": "x", "c1": 1 }),
            json!({ "c1": 5, "c2": "y" }),
        ]);
        let mut properties = Properties::new();

        let rows = select_rows(
            &store,
            &mut properties,
            r#"SELECT "t"."c1", "t"."c2" FROM "t" WHERE "t"."c1" <= ?"#,
            vec![json!(5)],
        );
        assert_eq!(rows, vec![vec![json!(1), json!("x")], vec![json!(5), json!("y")]]);

        assert_eq!(store.calls(), vec![StoreCall::Find {
            collection: "t".into(),
            args: FindArgs {
                filter: Some(json!({ "c1": { "$lte": 5 } })),
                projection: vec!["c1".into(), "c2".into()],
                ..FindArgs::default()
            },
        }]);
        assert_eq!(store.closed_cursors(), 1);
    }

    #[test]
    pub fn test_join_end_to_end() {
        let store = MemoryStore::new();
        store.push_result(vec![json!({ "a": "first", "t2": { "x": 2 } })]);
        let mut properties = Properties::new();

        let rows = select_rows(
            &store,
            &mut properties,
            r#"SELECT "t1"."a", "t2"."x" FROM "t1" INNER JOIN "t2" ON ("t1"."id" = "t2"."t1_id") WHERE "t2"."x" IN (?, ?)"#,
            vec![json!(1), json!(2)],
        );
        assert_eq!(rows, vec![vec![json!("first"), json!(2)]]);

        match store.calls().first() {
            Some(StoreCall::Aggregate { collection, pipeline }) => {
                assert_eq!(collection, "t1");
                assert_eq!(pipeline[0], json!({ "$match": { "id": { "$ne": null, "$exists": true } } }));
                assert_eq!(pipeline[3], json!({ "$match": { "t2.x": { "$in": [1, 2] } } }));
            }
            other => panic!("Expected an aggregation, got {other:?}"),
        }
    }

    #[test]
    pub fn test_outer_join_rows_are_null_safe() {
        let store = MemoryStore::new();
        store.push_result(vec![
            json!({ "id": 1, "b": { "name": "kept", "size": 3 } }),
            json!({ "id": 2, "b": { "name": null, "size": null } }),
        ]);
        let mut properties = Properties::with_enforce_schema(true).with_collections(["a", "b"]);

        let rows = select_rows(
            &store,
            &mut properties,
            r#"SELECT "a"."id", "b"."name", "b"."size" FROM "a" LEFT OUTER JOIN "b" ON ("a"."b_id" = "b"."id")"#,
            vec![],
        );
        assert_eq!(rows, vec![
            vec![json!(1), json!("kept"), json!(3)],
            vec![json!(2), json!(null), json!(null)],
        ]);
    }

    #[test]
    pub fn test_delete_end_to_end() {
        let store = MemoryStore::new();
        store.push_count(1);
        let mut properties = Properties::new();

        let mut query = Query::new(&store, &mut properties, r#"DELETE FROM "t" WHERE "t"."k" IN (?)"#, vec![json!("key1")])
            .expect("Failed to compile delete");
        assert_eq!(query.execute().expect("Failed to delete"), 1);
        assert_eq!(store.calls(), vec![StoreCall::DeleteMany {
            collection: "t".into(),
            filter: json!({ "k": { "$in": ["key1"] } }),
        }]);
    }

    #[test]
    pub fn test_insert_end_to_end() {
        let store = MemoryStore::new();
        let mut properties = Properties::new();

        let last_row_id = {
            let mut query = Query::new(
                &store,
                &mut properties,
                r#"INSERT INTO "t" ("a", "b") VALUES (?, ?) VALUES (?, ?)"#,
                vec![json!(1), json!(2), json!(3), json!(4)],
            )
            .expect("Failed to compile insert");
            assert_eq!(query.execute().expect("Failed to insert"), 2);
            query.last_row_id().cloned()
        };

        let documents = store.documents("t");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].get("a"), Some(&json!(1)));
        assert_eq!(documents[1].get("b"), Some(&json!(4)));
        assert_eq!(last_row_id.as_ref(), documents[1].get("_id"));
        assert!(properties.cached_collections.contains("t"));

        match store.calls().last() {
            Some(StoreCall::InsertMany { ordered, .. }) => assert!(!ordered),
            other => panic!("Expected insert_many, got {other:?}"),
        }
    }

    #[test]
    pub fn test_insert_reports_sequence_value() {
        let store = store_with_sequence("people", 41);
        let mut properties = Properties::new();

        let mut query = Query::new(
            &store,
            &mut properties,
            r#"INSERT INTO "people" ("id", "full_name") VALUES (DEFAULT, 'Carla Sousa')"#,
            vec![],
        )
        .expect("Failed to compile insert");
        query.execute().expect("Failed to insert");
        assert_eq!(query.last_row_id(), Some(&json!(42)));

        let schema = store.documents(SCHEMA_COLLECTION);
        assert_eq!(schema[0]["auto"]["seq"], json!(42));
    }

    #[test]
    pub fn test_update_end_to_end() {
        let store = MemoryStore::new();
        store.push_count(2);
        let mut properties = Properties::new();

        let mut query = Query::new(
            &store,
            &mut properties,
            r#"UPDATE "people" SET "age" = "age" + 1 WHERE "people"."city" = 'Porto'"#,
            vec![],
        )
        .expect("Failed to compile update");
        assert_eq!(query.execute().expect("Failed to update"), 2);
        assert_eq!(store.calls(), vec![StoreCall::UpdateMany {
            collection: "people".into(),
            filter: json!({ "city": { "$eq": "Porto" } }),
            update: json!({ "$inc": { "age": 1 } }),
        }]);
    }

    #[test]
    pub fn test_count_and_const_rows() {
        let store = MemoryStore::new();
        let mut properties = Properties::new();

        store.push_result(vec![json!({ "_count": 3 })]);
        let counted = select_rows(&store, &mut properties, r#"SELECT COUNT(*) FROM "people""#, vec![]);
        assert_eq!(counted, vec![vec![json!(3)]]);

        // an empty collection yields no $count document
        let empty = select_rows(&store, &mut properties, r#"SELECT COUNT(*) FROM "people""#, vec![]);
        assert_eq!(empty, vec![vec![json!(0)]]);

        store.push_result(vec![json!({ "_count": 2 })]);
        let constants = select_rows(&store, &mut properties, r#"SELECT 1 FROM "people""#, vec![]);
        assert_eq!(constants, vec![vec![json!(1)], vec![json!(1)]]);

        let none = select_rows(&store, &mut properties, r#"SELECT 1 FROM "people""#, vec![]);
        assert!(none.is_empty());
    }

    #[test]
    pub fn test_grouped_rows_follow_select_order() {
        let store = MemoryStore::new();
        store.push_result(vec![
            json!({ "n": 2, "city": "Porto" }),
            json!({ "city": "Lisboa", "n": 1 }),
        ]);
        let mut properties = Properties::new();

        let rows = select_rows(
            &store,
            &mut properties,
            r#"SELECT "people"."city", COUNT(*) AS n FROM "people" GROUP BY "people"."city" ORDER BY n DESC"#,
            vec![],
        );
        assert_eq!(rows, vec![vec![json!("Porto"), json!(2)], vec![json!("Lisboa"), json!(1)]]);
        assert!(matches!(store.calls().first(), Some(StoreCall::Aggregate { .. })));
    }

    #[test]
    pub fn test_missing_collection_refreshes_cache_once() {
        let store = store_with_people();
        store.push_result(vec![json!({ "age": 29 })]);
        let mut properties = Properties::with_enforce_schema(true);

        let rows = select_rows(&store, &mut properties, r#"SELECT "people"."age" FROM "people""#, vec![]);
        assert_eq!(rows, vec![vec![json!(29)]]);
        assert!(properties.cached_collections.contains("orders"));

        // already cached, no refresh
        store.push_result(vec![]);
        select_rows(&store, &mut properties, r#"SELECT "orders"."id" FROM "orders""#, vec![]);
        let refreshes = store.calls().iter().filter(|call| **call == StoreCall::ListCollectionNames).count();
        assert_eq!(refreshes, 1);

        let mut query = Query::new(&store, &mut properties, r#"SELECT "ghosts"."id" FROM "ghosts""#, vec![])
            .expect("Failed to compile query");
        match query.rows() {
            Err(err) => assert!(matches!(err.kind, ErrorKind::Migration(_))),
            Ok(_) => panic!("Expected a migration error"),
        }
    }

    #[test]
    pub fn test_insert_marks_collection_as_existing() {
        let store = MemoryStore::new();
        let mut properties = Properties::with_enforce_schema(true);

        Query::new(&store, &mut properties, r#"INSERT INTO "fresh" ("a") VALUES (1)"#, vec![])
            .expect("Failed to compile insert")
            .execute()
            .expect("Failed to insert");

        store.push_result(vec![json!({ "a": 1 })]);
        let rows = select_rows(&store, &mut properties, r#"SELECT "fresh"."a" FROM "fresh""#, vec![]);
        assert_eq!(rows, vec![vec![json!(1)]]);
        assert!(!store.calls().contains(&StoreCall::ListCollectionNames));
    }

    #[test]
    pub fn test_store_failure_carries_context() {
        let store = MemoryStore::new();
        store.fail_next(StoreError::new("connection reset"));
        let mut properties = Properties::new();

        let sql = r#"SELECT "t"."a" FROM "t" WHERE "t"."a" = ?"#;
        let mut query = Query::new(&store, &mut properties, sql, vec![json!(7)]).expect("Failed to compile query");
        match query.rows() {
            Err(err) => {
                assert_eq!(err.kind, ErrorKind::Store(StoreError::new("connection reset")));
                assert_eq!(err.sql, sql);
                assert_eq!(err.params, vec![json!(7)]);
                assert_eq!(err.version, env!("CARGO_PKG_VERSION"));
            }
            Ok(_) => panic!("Expected a store error"),
        }
    }

    #[test]
    pub fn test_compile_errors_happen_before_io() {
        let store = MemoryStore::new();
        let mut properties = Properties::new();

        let err = Query::new(&store, &mut properties, r#"SELECT * FROM "t""#, vec![])
            .err()
            .expect("Failed to reject SELECT *");
        assert!(matches!(err.kind, ErrorKind::NotSupported(_)));

        let err = Query::new(&store, &mut properties, r#"SELECT "t"."a" FROM "t" WHERE "t"."a" = ?"#, vec![])
            .err()
            .expect("Failed to reject a missing parameter");
        assert!(matches!(err.kind, ErrorKind::Decode(_)));
        assert!(store.calls().is_empty());
    }

    #[test]
    pub fn test_parameter_count_must_match_placeholders() {
        let store = MemoryStore::new();
        let mut properties = Properties::new();

        let sql = r#"SELECT "t"."a" FROM "t" WHERE "t"."a" = %s"#;
        let err = Query::new(&store, &mut properties, sql, vec![json!(1), json!(2), json!(3)])
            .err()
            .expect("Failed to reject extra parameters");
        assert!(matches!(err.kind, ErrorKind::Decode(_)));
        assert_eq!(err.params.len(), 3);

        let sql = r#"SELECT "t"."a" FROM "t" WHERE "t"."a" = %(1)s"#;
        let err = Query::new(&store, &mut properties, sql, vec![json!(1)])
            .err()
            .expect("Failed to reject a short parameter list");
        assert!(matches!(err.kind, ErrorKind::Decode(_)));
        assert!(store.calls().is_empty());
    }

    #[test]
    pub fn test_schema_hint_is_a_no_op() {
        let store = MemoryStore::new();
        let mut properties = Properties::new();

        let mut query = Query::new(&store, &mut properties, r#"ALTER TABLE "t" ADD CONSTRAINT "t_a_uniq" UNIQUE ("a")"#, vec![])
            .expect("Failed to compile hint");
        assert!(matches!(query.command(), Command::Schema(_)));
        assert_eq!(query.execute().expect("Failed to run hint"), 0);
        assert!(store.calls().is_empty());

        let err = Query::new(&store, &mut properties, r#"CREATE TABLE "t" ("a" int)"#, vec![])
            .err()
            .expect("Failed to reject CREATE TABLE");
        assert!(matches!(err.kind, ErrorKind::NotSupported(_)));
    }

    #[test]
    pub fn test_rows_only_for_select() {
        let store = MemoryStore::new();
        let mut properties = Properties::new();

        let mut query = Query::new(&store, &mut properties, r#"SELECT "t"."a" FROM "t""#, vec![])
            .expect("Failed to compile query");
        assert!(matches!(query.command(), Command::Select { command: SelectCommand::Find { .. }, .. }));
        assert!(matches!(query.execute(), Err(ref err) if matches!(err.kind, ErrorKind::Decode(_))));
        assert!(store.calls().is_empty());
    }
}
