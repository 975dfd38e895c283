//! SQL construction, observed through dry-run sessions.

mod support;

use ormkit::clause::{ColumnRef, Expr};
use ormkit::{vars, Session};
use support::*;

fn dry(db: &ormkit::Db) -> ormkit::Db {
    db.session(Session {
        dry_run: true,
        skip_default_transaction: true,
        ..Default::default()
    })
}

#[tokio::test]
async fn where_merge_is_conjunctive() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .where_("age > ?", vars![10])
        .where_("name = ?", vars!["x"])
        .find()
        .await
        .unwrap();

    let (sql, bound) = db.last_sql().unwrap();
    assert_eq!(sql, "SELECT * FROM \"users\" WHERE age > ? AND name = ?");
    assert_eq!(bound, vars![10, "x"]);
}

#[tokio::test]
async fn to_sql_renders_literals() {
    let (db, _state) = open_test_db().await;
    let sql = db
        .to_sql(|tx| async move {
            tx.model::<User>()
                .where_record(&User {
                    name: "foo".to_string(),
                    age: 20,
                    ..Default::default()
                })
                .order("name ASC")
                .limit(10)
                .offset(5)
                .find::<User>()
                .await
        })
        .await
        .unwrap();

    assert_eq!(
        sql,
        "SELECT * FROM \"users\" WHERE \"users\".\"name\" = 'foo' AND \"users\".\"age\" = 20 \
         ORDER BY name ASC LIMIT 10 OFFSET 5"
    );
}

#[tokio::test]
async fn relationship_joins_generate_nested_aliases() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .joins("Company.Manager")
        .find()
        .await
        .unwrap();

    let (sql, _) = db.last_sql().unwrap();
    assert!(
        sql.contains(
            "LEFT JOIN \"companies\" \"Company\" ON \"users\".\"company_id\" = \"Company\".\"id\""
        ),
        "missing first-level join: {sql}"
    );
    assert!(
        sql.contains(
            "LEFT JOIN \"managers\" \"Company__Manager\" \
             ON \"Company\".\"manager_id\" = \"Company__Manager\".\"id\""
        ),
        "missing nested join: {sql}"
    );
    assert!(
        sql.contains("\"Company__Manager\".\"name\" AS \"Company__Manager__name\""),
        "missing nested select alias: {sql}"
    );
    // Base columns are qualified once joins are present.
    assert!(sql.contains("\"users\".\"id\""), "unqualified base: {sql}");
}

#[tokio::test]
async fn duplicate_join_paths_are_deduplicated() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .joins("Company")
        .joins("Company.Manager")
        .find()
        .await
        .unwrap();

    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(
        sql.matches("LEFT JOIN \"companies\"").count(),
        1,
        "join not deduplicated: {sql}"
    );
}

#[tokio::test]
async fn raw_join_passes_through() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .joins_with(
            ormkit::clause::JoinType::Left,
            "LEFT JOIN orders o ON o.user_id = users.id AND o.total > ?",
            vars![100],
        )
        .find()
        .await
        .unwrap();

    let (sql, bound) = db.last_sql().unwrap();
    assert!(sql.contains("LEFT JOIN orders o ON o.user_id = users.id AND o.total > ?"));
    assert_eq!(bound, vars![100]);
}

#[tokio::test]
async fn empty_in_condition_is_skipped() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .where_expr(Expr::in_list(ColumnRef::new("id"), vec![]))
        .find()
        .await
        .unwrap();

    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(sql, "SELECT * FROM \"users\"");
    assert!(!sql.contains("IN ()"));
}

#[tokio::test]
async fn cloned_builders_are_independent() {
    let (db, _state) = open_test_db().await;
    let base = dry(&db).model::<User>();

    let _: Vec<User> = base
        .clone()
        .where_("age > ?", vars![18])
        .find()
        .await
        .unwrap();
    let (sql_a, _) = db.last_sql().unwrap();

    let _: Vec<User> = base.where_("name = ?", vars!["ada"]).find().await.unwrap();
    let (sql_b, _) = db.last_sql().unwrap();

    assert_eq!(sql_a, "SELECT * FROM \"users\" WHERE age > ?");
    assert_eq!(sql_b, "SELECT * FROM \"users\" WHERE name = ?");
}

#[tokio::test]
async fn or_groups_parenthesize() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .where_("age > ?", vars![18])
        .or_("name = ?", vars!["root"])
        .find()
        .await
        .unwrap();

    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM \"users\" WHERE age > ? OR name = ?"
    );
}

#[tokio::test]
async fn select_and_omit_compose_column_lists() {
    let (db, _state) = open_test_db().await;

    let _: Vec<User> = dry(&db)
        .model::<User>()
        .select(&["name", "count(*)"])
        .find()
        .await
        .unwrap();
    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(sql, "SELECT \"name\",count(*) FROM \"users\"");

    let _: Vec<User> = dry(&db).model::<User>().omit(&["age"]).find().await.unwrap();
    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT \"users\".\"id\",\"users\".\"name\",\"users\".\"company_id\" FROM \"users\""
    );
}

#[tokio::test]
async fn smaller_destination_selects_its_fields() {
    let (db, _state) = open_test_db().await;
    // Post is narrower than the User model: only Post's columns are read.
    let _: Vec<Post> = dry(&db).model::<User>().find().await.unwrap();
    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT \"users\".\"id\",\"users\".\"user_id\",\"users\".\"title\" FROM \"users\""
    );
}

#[tokio::test]
async fn first_orders_by_primary_key_and_limits() {
    let (db, _state) = open_test_db().await;
    let result = dry(&db).model::<User>().first::<User>().await;
    // Dry run scans nothing, so the finisher reports not-found.
    assert!(result.unwrap_err().is_record_not_found());

    let (sql, bound) = db.last_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM \"users\" ORDER BY \"users\".\"id\" LIMIT ?"
    );
    assert_eq!(bound, vars![1_i64]);
}

#[tokio::test]
async fn distinct_prefixes_column_list() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .distinct()
        .select(&["name"])
        .find()
        .await
        .unwrap();
    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(sql, "SELECT DISTINCT \"name\" FROM \"users\"");
}

#[tokio::test]
async fn group_having_and_locking_emit_in_declared_order() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .group("company_id")
        .having("count(*) > ?", vars![3])
        .lock_for_update()
        .find()
        .await
        .unwrap();

    let (sql, _) = db.last_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM \"users\" GROUP BY \"company_id\" HAVING count(*) > ? FOR UPDATE"
    );
}

#[tokio::test]
async fn placeholder_count_always_matches_bind_count() {
    let (db, _state) = open_test_db().await;
    let _: Vec<User> = dry(&db)
        .model::<User>()
        .where_("age BETWEEN ? AND ?", vars![18, 65])
        .where_expr(Expr::in_list(
            ColumnRef::new("company_id"),
            vars![1, 2, 3],
        ))
        .limit(10)
        .offset(20)
        .find()
        .await
        .unwrap();

    let (sql, bound) = db.last_sql().unwrap();
    assert_eq!(sql.matches('?').count(), bound.len());
}
