//! Persons and phones: a small schema used to exercise the adapter.
//!
//! Nothing here enforces invariants. Primary keys, uniqueness and the
//! phone → person cascade are declared in the SQL and enforced by SQLite
//! (the cascade only when `foreign_keys` is enabled in [`crate::SqliteConfig`]).

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sqlite::AsyncSqlite;
use crate::types::Params;

pub const CREATE_PERSON_TABLE: &str = r#"
CREATE TABLE person (
    govId     TEXT PRIMARY KEY,
    firstName TEXT NOT NULL UNIQUE,
    lastName  TEXT,
    age       INTEGER,
    sex       TEXT
) WITHOUT ROWID
"#;

pub const CREATE_PHONE_TABLE: &str = r#"
CREATE TABLE phone (
    personId TEXT,
    number   TEXT NOT NULL UNIQUE,
    FOREIGN KEY (personId)
        REFERENCES person (govId)
            ON DELETE CASCADE
            ON UPDATE NO ACTION
)
"#;

pub const GET_PERSON_SQL: &str = "SELECT * FROM person WHERE govId=?";
pub const GET_PHONE_SQL: &str = "SELECT * FROM phone WHERE personId=?";
pub const INSERT_PERSON_SQL: &str = "INSERT INTO person VALUES (?, ?, ?, ?, ?)";
pub const INSERT_PHONE_SQL: &str = "INSERT INTO phone VALUES (?, ?)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub gov_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<i64>,
    pub sex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phone {
    pub person_id: String,
    pub number: String,
}

/// Person fields without the government id
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPerson {
    pub first_name: &'static str,
    pub last_name: Option<&'static str>,
    pub age: Option<i64>,
    pub sex: Option<&'static str>,
}

impl RawPerson {
    pub fn with_gov_id(&self, gov_id: &str) -> Person {
        Person {
            gov_id: gov_id.to_string(),
            first_name: self.first_name.to_string(),
            last_name: self.last_name.map(str::to_string),
            age: self.age,
            sex: self.sex.map(str::to_string),
        }
    }
}

const fn raw(
    first_name: &'static str,
    last_name: Option<&'static str>,
    age: Option<i64>,
    sex: Option<&'static str>,
) -> RawPerson {
    RawPerson {
        first_name,
        last_name,
        age,
        sex,
    }
}

pub const PERSONS: [RawPerson; 6] = [
    raw("Nuradil", Some("Khoishin"), Some(25), Some("man")),
    raw("Asem", Some("Abdulina"), Some(22), Some("woman")),
    raw("Artem", Some("Nesterov"), Some(45), Some("man")),
    raw("Jake", None, Some(45), None),
    raw("Ibrakhim", Some("Kunaev"), Some(18), Some("man")),
    raw("Elizaveta", Some("Muhina"), None, Some("woman")),
];

/// String of `count` random decimal digits
pub fn random_digits(count: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

pub async fn create_tables(db: &AsyncSqlite) -> Result<()> {
    db.run(CREATE_PERSON_TABLE, ()).await?;
    db.run(CREATE_PHONE_TABLE, ()).await?;
    Ok(())
}

/// Insert a person under a random 12-digit government id and return the id.
pub async fn add_person(db: &AsyncSqlite, person: &RawPerson) -> Result<String> {
    let gov_id = random_digits(12);
    let params = Params::new()
        .with(&gov_id)
        .with(person.first_name)
        .with(person.last_name)
        .with(person.age)
        .with(person.sex);
    db.run(INSERT_PERSON_SQL, params).await?;
    Ok(gov_id)
}

/// Insert a random `+7XXXXXXXXXX` number for `person_id` and return it.
pub async fn add_phone(db: &AsyncSqlite, person_id: &str) -> Result<String> {
    let number = format!("+7{}", random_digits(10));
    db.run(INSERT_PHONE_SQL, [person_id, number.as_str()]).await?;
    Ok(number)
}
