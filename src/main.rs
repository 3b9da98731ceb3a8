use std::collections::BTreeMap;
use std::ops::ControlFlow;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use monk_orm::{mapper, query, ColumnType, Database, Entity, Executor, JoinKind, SchemaBuilder};

#[derive(Parser)]
#[command(name = "monk-orm")]
#[command(about = "Scripted walk through the monk-orm query and write API")]
#[command(version)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,

    #[arg(long, help = "Log every statement with its parameters")]
    show_sql: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
    age: i32,
    gender: String,
    other: BTreeMap<String, String>,
    create_time: Option<DateTime<Utc>>,
    delete_time: Option<DateTime<Utc>>,
    update_time: Option<DateTime<Utc>>,
    group_id: i64,
    version: i64,
}

impl Entity for User {
    fn schema(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .table("user")
            .primary_key("id", ColumnType::Integer)
            .field("name", ColumnType::Text)
            .column_name("user_name")
            .field("age", ColumnType::Integer)
            .field("gender", ColumnType::Text)
            .json("other")
            .created("create_time")
            .deleted("delete_time")
            .updated("update_time")
            .field("group_id", ColumnType::Integer)
            .version("version")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Group {
    id: i64,
    name: String,
}

impl Entity for Group {
    fn schema(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .table("group")
            .primary_key("id", ColumnType::Integer)
            .field("name", ColumnType::Text)
    }
}

/// A user row joined with its group; the first `id` in the row is the user's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GroupUser {
    id: i64,
    name: String,
    age: i32,
    group_id: i64,
    group_name: String,
    delete_time: Option<DateTime<Utc>>,
}

impl Entity for GroupUser {
    fn schema(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .table("user")
            .primary_key("id", ColumnType::Integer)
            .field("name", ColumnType::Text)
            .column_name("user_name")
            .field("age", ColumnType::Integer)
            .field("group_id", ColumnType::Integer)
            .field("group_name", ColumnType::Text)
            .column_name("name")
            .deleted("delete_time")
    }
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS "group" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT ''
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "user" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_name TEXT NOT NULL DEFAULT '',
        age INTEGER NOT NULL DEFAULT 0,
        gender TEXT NOT NULL DEFAULT '男',
        other TEXT,
        create_time TEXT,
        delete_time TEXT,
        update_time TEXT,
        group_id INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 0
    )"#,
];

const POSTGRES_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS "group" (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL DEFAULT ''
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "user" (
        id BIGSERIAL PRIMARY KEY,
        user_name VARCHAR(32) NOT NULL DEFAULT '',
        age BIGINT NOT NULL DEFAULT 0,
        gender VARCHAR(8) NOT NULL DEFAULT '男',
        other TEXT,
        create_time TIMESTAMPTZ,
        delete_time TIMESTAMPTZ,
        update_time TIMESTAMPTZ,
        group_id BIGINT NOT NULL DEFAULT 0,
        version BIGINT NOT NULL DEFAULT 0
    )"#,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL and ORM_ENV can live there
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.show_sql { "info,monk_orm=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
    tracing::info!("Starting monk-orm demo in {:?} mode", monk_orm::config::config().environment);

    let db = Database::connect(&cli.database_url).await.context("connecting to the database")?;
    db.ping().await?;
    println!("db connect ok");

    let result = run(&db).await;
    db.close().await;
    result
}

async fn run(db: &Database) -> anyhow::Result<()> {
    println!("== sync schema");
    let ddl = match db {
        Database::Postgres(_) => POSTGRES_SCHEMA,
        Database::Sqlite(_) => SQLITE_SCHEMA,
    };
    for statement in ddl {
        db.execute(statement, &[]).await?;
    }
    init_groups(db).await?;

    println!("== clear users");
    let cleared = db.execute("DELETE FROM \"user\"", &[]).await?;
    println!("-> {} row(s)", cleared.rows_affected);

    println!("== insert");
    println!("-> inserted {}", insert_users(db).await?);

    println!("== get the first row");
    let mut user = User::default();
    let found = query::<User>()?.get(db, &mut user).await?;
    println!("-> {} {:?}", found, user);

    println!("== get using the values already set on the entity");
    let mut user = User { name: user.name, ..Default::default() };
    let found = query::<User>()?.get(db, &mut user).await?;
    println!("-> {} {:?}", found, user);

    println!("== find everything");
    println!("-> {:?}", query::<User>()?.find(db).await?);

    println!("== single column into a plain vector");
    let ids: Vec<i64> = query::<User>()?.table("user").cols(&["id"]).find_column(db, "id").await?;
    println!("-> {:?}", ids);

    println!("== conditions");
    let conditions = [
        query::<User>()?.filter("age = ? and gender = ?", vec![json!(18), json!("女")]),
        query::<User>()?.filter("age = ?", [18]).and("gender = ?", ["女"]),
        query::<User>()?.filter("age = ?", [18]).or("gender = ?", ["女"]),
    ];
    for q in &conditions {
        let mut user = User::default();
        let found = q.get(db, &mut user).await?;
        println!("{} -> {} {:?}", q.compile()?.query, found, user);
    }

    println!("== entity values as conditions");
    let mut user = User { id: 2, ..Default::default() };
    println!("-> {} {:?}", query::<User>()?.get(db, &mut user).await?, user);

    println!("== ordering");
    let orderings = [
        query::<User>()?.asc(&["age"]),
        query::<User>()?.order_by("age"),
        query::<User>()?.desc(&["age"]),
        query::<User>()?.order_by("-age"),
    ];
    for q in &orderings {
        let mut user = User::default();
        q.get(db, &mut user).await?;
        println!("{} -> {:?}", q.compile()?.query, user);
    }

    println!("== by primary key");
    let mut user = User::default();
    println!("-> {} {:?}", query::<User>()?.id(1).get(db, &mut user).await?, user);

    println!("== selected columns");
    let mut user = User::default();
    query::<User>()?.cols(&["user_name", "age"]).id(1).get(db, &mut user).await?;
    println!("-> {:?}", user);

    println!("== raw sql");
    let rows = db.query("SELECT * FROM \"user\" WHERE id = $1", &[json!(2).into()]).await?;
    let descriptor = monk_orm::describe::<User>()?;
    let mut user = User::default();
    if let Some(row) = rows.first() {
        mapper::to_entity(row, &descriptor, &mut user)?;
    }
    println!("-> {:?}", user);

    println!("== in");
    println!("-> {:?}", query::<User>()?.in_values("id", vec![1, 2, 3]).find(db).await?);

    println!("== cols on select");
    let mut user = User::default();
    query::<User>()?.cols(&["age", "user_name"]).get(db, &mut user).await?;
    println!("-> {:?}", user);

    println!("== cols on update");
    // Updates need the stored version, so start from a full row
    let mut user = User::default();
    query::<User>()?.desc(&["age"]).get(db, &mut user).await?;
    user.name = "haha".to_string();
    let affected = query::<User>()?.id(user.id).cols(&["user_name", "age"]).update(db, &mut user).await?;
    println!("-> {} {:?}", affected, user);

    println!("== all columns on update");
    let affected = query::<User>()?.filter("id = ?", [user.id]).all_cols().update(db, &mut user).await?;
    println!("-> {} {:?}", affected, user);

    println!("== must columns on update");
    user.age = 0;
    let affected = query::<User>()?.id(user.id).must_cols(&["age"]).update(db, &mut user).await?;
    println!("-> {} {:?}", affected, user);

    println!("== optimistic lock");
    let mut first = User::default();
    query::<User>()?.desc(&["age"]).get(db, &mut first).await?;
    let mut second = first.clone();
    first.age += 1;
    second.age += 2;
    query::<User>()?.cols(&["age"]).update(db, &mut first).await?;
    match query::<User>()?.cols(&["age"]).update(db, &mut second).await {
        Err(e) if e.is_optimistic_lock() => println!("-> second writer rejected: {}", e),
        other => println!("-> unexpected: {:?}", other),
    }

    insert_users(db).await?;
    insert_users(db).await?;

    println!("== distinct");
    println!("-> {:?}", query::<User>()?.distinct(&["age", "user_name"]).find(db).await?);

    println!("== explicit table");
    let mut user = User::default();
    query::<User>()?.table("user").get(db, &mut user).await?;
    println!("-> {:?}", user);

    println!("== limit 3 from offset 1");
    println!("-> {:?}", query::<User>()?.filter("age = 17", ()).limit(3, 1).find(db).await?);

    println!("== group by");
    println!("-> {:?}", query::<User>()?.group_by(&["user_name", "age"]).find(db).await?);

    println!("== having");
    let q = query::<User>()?.group_by(&["user_name", "age"]).having("age = 17");
    println!("-> {:?}", q.find(db).await?);

    println!("== join");
    let q = query::<GroupUser>()?.join(JoinKind::Inner, "group", "\"group\".\"id\" = \"user\".\"group_id\"");
    println!("{}", q.compile()?.query);
    println!("-> {:?}", q.find(db).await?);

    println!("== iterate");
    query::<User>()?
        .filter("age = 17", ())
        .iterate(db, |i, user| {
            println!("-> {} {:?}", i, user);
            ControlFlow::Continue(())
        })
        .await?;

    println!("== rows");
    for user in query::<User>()?.filter("age = 17", ()).rows(db).await? {
        println!("-> {:?}", user);
    }

    println!("== count");
    println!("-> {}", query::<User>()?.filter("gender = '女'", ()).count(db).await?);

    println!("== sums");
    let q = query::<User>()?;
    println!("sum -> {}", q.sum(db, "age").await?);
    println!("sum_int -> {}", q.sum_int(db, "age").await?);
    println!("sums -> {:?}", q.sums(db, &["age", "id"]).await?);
    println!("sums_int -> {:?}", q.sums_int(db, &["age", "id"]).await?);

    println!("== soft delete");
    let mut user = User::default();
    q.get(db, &mut user).await?;
    let target = User { id: user.id, ..Default::default() };
    println!("-> {}", q.delete(db, &target).await?);
    println!("visible {} / stored {}", q.count(db).await?, q.clone().unscoped().count(db).await?);

    Ok(())
}

async fn init_groups(db: &Database) -> anyhow::Result<()> {
    for name in ["man", "woman"] {
        let mut group = Group::default();
        if !query::<Group>()?.filter("name = ?", [name]).get(db, &mut group).await? {
            group.name = name.to_string();
            query::<Group>()?.insert(db, std::slice::from_mut(&mut group)).await?;
        }
    }
    Ok(())
}

async fn insert_users(db: &Database) -> anyhow::Result<u64> {
    let mut man = Group::default();
    let mut woman = Group::default();
    query::<Group>()?.filter("name = 'man'", ()).get(db, &mut man).await?;
    query::<Group>()?.filter("name = 'woman'", ()).get(db, &mut woman).await?;

    let mut other = BTreeMap::new();
    other.insert("bula".to_string(), "didi".to_string());
    other.insert("didi".to_string(), "bula".to_string());

    let mut users = vec![
        User { name: "bulabula".into(), age: 17, gender: "男".into(), other: other.clone(), group_id: man.id, ..Default::default() },
        User { name: "didadida".into(), age: 18, gender: "女".into(), other, group_id: woman.id, ..Default::default() },
    ];
    let mut inserted = query::<User>()?.insert(db, &mut users).await?;

    let mut again = users[1].clone();
    again.id = 0;
    again.age = 19;
    inserted += query::<User>()?.insert(db, std::slice::from_mut(&mut again)).await?;
    Ok(inserted)
}
