#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use monk_orm::{query, ColumnType, Entity, ExecResult, ExecutionError, Executor, Param, Row, SchemaBuilder};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub other: BTreeMap<String, String>,
    pub create_time: Option<DateTime<Utc>>,
    pub delete_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub group_id: i64,
    pub version: i64,
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

impl Entity for Group {
    fn schema(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .table("group")
            .primary_key("id", ColumnType::Integer)
            .field("name", ColumnType::Text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUser {
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    pub group_name: String,
    pub delete_time: Option<DateTime<Utc>>,
}

impl Entity for GroupUser {
    fn schema(schema: SchemaBuilder) -> SchemaBuilder {
        schema
            .table("user")
            .primary_key("id", ColumnType::Integer)
            .field("name", ColumnType::Text)
            .column_name("user_name")
            .field("group_id", ColumnType::Integer)
            .field("group_name", ColumnType::Text)
            .column_name("name")
            .deleted("delete_time")
    }
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE "group" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT ''
    )"#,
    r#"CREATE TABLE "user" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_name TEXT NOT NULL DEFAULT '',
        age INTEGER NOT NULL DEFAULT 0,
        gender TEXT NOT NULL DEFAULT '',
        other TEXT,
        create_time TEXT,
        delete_time TEXT,
        update_time TEXT,
        group_id INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 0
    )"#,
];

/// Fresh in-memory database with the `user` and `group` tables.
pub async fn memory_db() -> Result<SqlitePool> {
    // One connection: every connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }
    Ok(pool)
}

pub fn user(name: &str, age: i32, gender: &str) -> User {
    let mut other = BTreeMap::new();
    other.insert("bula".to_string(), "didi".to_string());
    User { name: name.to_string(), age, gender: gender.to_string(), other, ..Default::default() }
}

/// Two groups and three users (ages 17, 18, 19); returns the users as stored.
pub async fn seed(db: &SqlitePool) -> Result<Vec<User>> {
    let mut groups = vec![
        Group { name: "man".into(), ..Default::default() },
        Group { name: "woman".into(), ..Default::default() },
    ];
    query::<Group>()?.insert(db, &mut groups).await?;

    let mut users = vec![user("bulabula", 17, "男"), user("didadida", 18, "女"), user("haha", 19, "女")];
    users[0].group_id = groups[0].id;
    users[1].group_id = groups[1].id;
    users[2].group_id = groups[1].id;
    query::<User>()?.insert(db, &mut users).await?;
    Ok(users)
}

/// Records every statement and answers with canned results.
#[derive(Default)]
pub struct RecordingExecutor {
    pub statements: Mutex<Vec<(String, Vec<Param>)>>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl RecordingExecutor {
    pub fn affecting(rows_affected: u64) -> Self {
        Self { rows_affected, ..Default::default() }
    }

    pub fn returning(rows: Vec<Row>) -> Self {
        Self { rows, ..Default::default() }
    }

    pub fn statements(&self) -> Vec<(String, Vec<Param>)> {
        self.statements.lock().unwrap().clone()
    }

    pub fn last_sql(&self) -> String {
        self.statements().last().map(|(sql, _)| sql.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecResult, ExecutionError> {
        self.statements.lock().unwrap().push((sql.to_string(), params.to_vec()));
        Ok(ExecResult { rows_affected: self.rows_affected, last_insert_id: None })
    }

    async fn query(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, ExecutionError> {
        self.statements.lock().unwrap().push((sql.to_string(), params.to_vec()));
        Ok(self.rows.clone())
    }
}
