mod common;

use std::ops::ControlFlow;

use anyhow::Result;
use common::{memory_db, seed, GroupUser, RecordingExecutor, User};
use monk_orm::{query, Executor, JoinKind, Row, SortDirection};
use serde_json::json;

fn ages(users: &[User]) -> Vec<i32> {
    users.iter().map(|u| u.age).collect()
}

#[tokio::test]
async fn ordering_accepts_dash_prefix() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    assert_eq!(ages(&query::<User>()?.order_by("-age").find(&db).await?), vec![19, 18, 17]);
    assert_eq!(ages(&query::<User>()?.order_by("age").find(&db).await?), vec![17, 18, 19]);
    assert_eq!(ages(&query::<User>()?.desc(&["age"]).find(&db).await?), vec![19, 18, 17]);

    let mut youngest = User::default();
    query::<User>()?.asc(&["age"]).get(&db, &mut youngest).await?;
    assert_eq!(youngest.name, "bulabula");
    Ok(())
}

#[tokio::test]
async fn conditions_combine_left_to_right() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    let and = query::<User>()?.filter("age = ?", [18]).and("gender = ?", ["女"]).find(&db).await?;
    assert_eq!(ages(&and), vec![18]);

    let or = query::<User>()?.filter("age = ?", [17]).or("gender = ?", ["女"]).order_by("age").find(&db).await?;
    assert_eq!(ages(&or), vec![17, 18, 19]);

    let both = query::<User>()?.filter("age = ? and gender = ?", vec![json!(19), json!("女")]).find(&db).await?;
    assert_eq!(ages(&both), vec![19]);
    Ok(())
}

#[tokio::test]
async fn limit_offset_and_in() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    let page = query::<User>()?.order_by("age").limit(2, 1).find(&db).await?;
    assert_eq!(ages(&page), vec![18, 19]);

    let picked = query::<User>()?.in_values("id", vec![1, 3]).order_by("id").find(&db).await?;
    assert_eq!(ages(&picked), vec![17, 19]);

    let none = query::<User>()?.in_values("id", Vec::<i64>::new()).find(&db).await?;
    assert!(none.is_empty());
    Ok(())
}

#[tokio::test]
async fn projections_distinct_and_grouping() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;
    seed(&db).await?;

    let partial = query::<User>()?.cols(&["name", "age"]).order_by("age").find(&db).await?;
    assert_eq!(partial[0].name, "bulabula");
    assert_eq!(partial[0].id, 0, "unselected columns stay at their defaults");

    let distinct = query::<User>()?.distinct(&["age"]).order_by("age").find(&db).await?;
    assert_eq!(ages(&distinct), vec![17, 18, 19]);

    let grouped = query::<User>()?.group_by(&["gender"]).order_by("gender").find(&db).await?;
    assert_eq!(grouped.len(), 2);
    assert!(grouped.iter().all(|u| u.age == 0 && !u.gender.is_empty()));

    let having = query::<User>()?.group_by(&["user_name", "age"]).having("age = 17").find(&db).await?;
    assert_eq!(having.len(), 1);
    assert_eq!(having[0].name, "bulabula");
    Ok(())
}

#[tokio::test]
async fn join_maps_columns_from_both_tables() -> Result<()> {
    let db = memory_db().await?;
    let users = seed(&db).await?;

    let q = query::<GroupUser>()?
        .join(JoinKind::Inner, "group", "\"group\".\"id\" = \"user\".\"group_id\"")
        .order_by("user.id");
    assert_eq!(
        q.compile()?.query,
        "SELECT * FROM \"user\" INNER JOIN \"group\" ON \"group\".\"id\" = \"user\".\"group_id\" \
         WHERE \"user\".\"delete_time\" IS NULL ORDER BY \"user\".\"id\" ASC"
    );

    let joined = q.find(&db).await?;
    assert_eq!(joined.len(), 3);
    assert_eq!(joined[0].id, users[0].id, "the first id column wins");
    assert_eq!(joined[0].name, "bulabula");
    assert_eq!(joined[0].group_name, "man");
    assert_eq!(joined[2].group_name, "woman");
    Ok(())
}

#[tokio::test]
async fn count_and_sums() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    assert_eq!(query::<User>()?.filter("gender = '女'", ()).count(&db).await?, 2);

    let q = query::<User>()?;
    assert_eq!(q.sum(&db, "age").await?, 54.0);
    assert_eq!(q.sum_int(&db, "age").await?, 54);
    assert_eq!(q.sums(&db, &["age", "id"]).await?, vec![54.0, 6.0]);
    assert_eq!(q.sums_int(&db, &["age", "id"]).await?, vec![54, 6]);

    let empty = query::<User>()?.filter("age > ?", [100]);
    assert_eq!(empty.sum_int(&db, "age").await?, 0);
    assert_eq!(empty.count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn rows_isolate_undecodable_rows() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;
    db.execute("UPDATE \"user\" SET other = $1 WHERE id = $2", &[json!("{not json").into(), json!(2).into()]).await?;

    let rows = query::<User>()?.order_by("id").rows(&db).await?;
    assert_eq!(rows.len(), 3);
    assert!(rows[0].is_ok());
    assert!(rows[1].is_err());
    assert!(rows[2].is_ok());

    let err = query::<User>()?.find(&db).await.unwrap_err();
    assert_eq!(err.error_code(), "MAPPING_ERROR");
    Ok(())
}

#[tokio::test]
async fn iterate_stops_when_asked() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    let mut seen = vec![];
    let visited = query::<User>()?
        .order_by("age")
        .iterate(&db, |i, user| {
            seen.push((i, user.map(|u| u.age).ok()));
            if i == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await?;
    assert_eq!(visited, 2);
    assert_eq!(seen, vec![(0, Some(17)), (1, Some(18))]);
    Ok(())
}

#[tokio::test]
async fn compile_is_repeatable_and_matches_execution() -> Result<()> {
    let rec = RecordingExecutor::returning(vec![Row::new(vec![("id".into(), json!(1)), ("age".into(), json!(17))])]);
    let q = query::<User>()?.filter("age > ?", [10]).or("gender = ?", ["女"]).desc(&["age"]).limit(5, 0);

    let first = q.compile()?;
    assert_eq!(first, q.compile()?);
    assert_eq!(
        first.query,
        "SELECT * FROM \"user\" WHERE \"delete_time\" IS NULL AND ((age > $1) OR (gender = $2)) ORDER BY \"age\" DESC LIMIT 5"
    );

    let found = q.find(&rec).await?;
    assert_eq!(found[0].age, 17);
    let (sql, params) = rec.statements().remove(0);
    assert_eq!(sql, first.query);
    assert_eq!(params, first.params);
    Ok(())
}

#[tokio::test]
async fn get_honours_the_offset() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    let q = query::<User>()?.order_by("age").limit(1, 2);
    assert_eq!(ages(&q.find(&db).await?), vec![19]);

    let mut third = User::default();
    assert!(q.get(&db, &mut third).await?);
    assert_eq!(third.age, 19);
    Ok(())
}

#[tokio::test]
async fn order_takes_an_explicit_direction() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;

    let q = query::<User>()?.order("name", SortDirection::Desc);
    assert_eq!(q.compile()?.query, "SELECT * FROM \"user\" WHERE \"delete_time\" IS NULL ORDER BY \"user_name\" DESC");
    assert_eq!(ages(&q.find(&db).await?), vec![19, 18, 17]);
    Ok(())
}

#[tokio::test]
async fn count_respects_distinct_and_grouping() -> Result<()> {
    let db = memory_db().await?;
    seed(&db).await?;
    seed(&db).await?;

    assert_eq!(query::<User>()?.count(&db).await?, 6);
    assert_eq!(query::<User>()?.distinct(&["age"]).count(&db).await?, 3);
    assert_eq!(query::<User>()?.group_by(&["gender"]).count(&db).await?, 2);
    Ok(())
}
