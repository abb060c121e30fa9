use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgPool};

use crate::error::{LibError, Result};
use crate::models::{
    Gender, NewBackground, NewPerson, Person, PersonBackground, PersonId, Relation, RelationId,
    UnorderedPair,
};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_graph_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct PersonRow {
    id: i32,
    name: String,
    description: Option<String>,
    gender: String,
    created_at: chrono::NaiveDateTime,
}

impl From<PersonRow> for Person {
    fn from(value: PersonRow) -> Self {
        Self {
            id: PersonId(value.id),
            name: value.name,
            description: value.description,
            gender: Gender::from_db_value(&value.gender).unwrap_or_default(),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct RelationRow {
    id: i32,
    from_person_id: i32,
    to_person_id: i32,
    source: Option<String>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl From<RelationRow> for Relation {
    fn from(value: RelationRow) -> Self {
        Self {
            id: RelationId(value.id),
            from_person_id: PersonId(value.from_person_id),
            to_person_id: PersonId(value.to_person_id),
            source: value.source,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct BackgroundRow {
    id: i32,
    person_id: i32,
    birth_year: Option<i32>,
    body: Option<String>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl From<BackgroundRow> for PersonBackground {
    fn from(value: BackgroundRow) -> Self {
        Self {
            id: value.id,
            person_id: PersonId(value.person_id),
            birth_year: value.birth_year,
            body: value.body,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

pub async fn insert_person(pool: &PgPool, person: &NewPerson) -> Result<Person> {
    let row = sqlx::query_as::<_, PersonRow>(
        r#"
        INSERT INTO persons (name, description, gender)
        VALUES ($1, $2, $3)
        RETURNING id, name, description, gender, created_at
        "#,
    )
    .bind(&person.name)
    .bind(&person.description)
    .bind(person.gender.as_db_value())
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to create person", err))?;

    Ok(row.into())
}

pub async fn find_person_by_name(pool: &PgPool, name: &str) -> Result<Option<Person>> {
    let row = sqlx::query_as::<_, PersonRow>(
        r#"
        SELECT id, name, description, gender, created_at
        FROM persons
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query person", err))?;

    Ok(row.map(Person::from))
}

pub async fn get_person(pool: &PgPool, person_id: PersonId) -> Result<Option<Person>> {
    let row = sqlx::query_as::<_, PersonRow>(
        r#"
        SELECT id, name, description, gender, created_at
        FROM persons
        WHERE id = $1
        "#,
    )
    .bind(person_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query person", err))?;

    Ok(row.map(Person::from))
}

pub async fn list_persons(pool: &PgPool) -> Result<Vec<Person>> {
    let rows = sqlx::query_as::<_, PersonRow>(
        r#"
        SELECT id, name, description, gender, created_at
        FROM persons
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list persons", err))?;

    Ok(rows.into_iter().map(Person::from).collect())
}

pub async fn get_persons_by_ids(pool: &PgPool, ids: &[PersonId]) -> Result<Vec<Person>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let raw_ids: Vec<i32> = ids.iter().map(|id| id.0).collect();

    let rows = sqlx::query_as::<_, PersonRow>(
        r#"
        SELECT id, name, description, gender, created_at
        FROM persons
        WHERE id = ANY($1)
        ORDER BY id ASC
        "#,
    )
    .bind(&raw_ids)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query persons", err))?;

    Ok(rows.into_iter().map(Person::from).collect())
}

pub async fn list_relations(pool: &PgPool) -> Result<Vec<Relation>> {
    let rows = sqlx::query_as::<_, RelationRow>(
        r#"
        SELECT id, from_person_id, to_person_id, source, created_at, updated_at
        FROM relations
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list relations", err))?;

    Ok(rows.into_iter().map(Relation::from).collect())
}

/// Looks up the relation matching the unordered pair, whichever
/// direction the row was stored with.
pub async fn find_relation_by_pair(
    pool: &PgPool,
    pair: UnorderedPair,
) -> Result<Option<Relation>> {
    let row = sqlx::query_as::<_, RelationRow>(
        r#"
        SELECT id, from_person_id, to_person_id, source, created_at, updated_at
        FROM relations
        WHERE (from_person_id = $1 AND to_person_id = $2)
           OR (from_person_id = $2 AND to_person_id = $1)
        LIMIT 1
        "#,
    )
    .bind(pair.lo().0)
    .bind(pair.hi().0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query relation", err))?;

    Ok(row.map(Relation::from))
}

pub async fn insert_relation(
    pool: &PgPool,
    from: PersonId,
    to: PersonId,
    source: Option<&str>,
) -> Result<Relation> {
    let row = sqlx::query_as::<_, RelationRow>(
        r#"
        INSERT INTO relations (from_person_id, to_person_id, source)
        VALUES ($1, $2, $3)
        RETURNING id, from_person_id, to_person_id, source, created_at, updated_at
        "#,
    )
    .bind(from.0)
    .bind(to.0)
    .bind(source)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to create relation", err))?;

    Ok(row.into())
}

pub async fn update_relation_source(
    pool: &PgPool,
    relation_id: RelationId,
    source: Option<&str>,
) -> Result<Relation> {
    let row = sqlx::query_as::<_, RelationRow>(
        r#"
        UPDATE relations
        SET source = $2,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        RETURNING id, from_person_id, to_person_id, source, created_at, updated_at
        "#,
    )
    .bind(relation_id.0)
    .bind(source)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to update relation", err))?;

    Ok(row.into())
}

/// Deletes the relation matching the unordered pair. Returns the
/// deleted row's ID, or `None` when no row matched.
pub async fn delete_relation_by_pair(
    pool: &PgPool,
    pair: UnorderedPair,
) -> Result<Option<RelationId>> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        DELETE FROM relations
        WHERE (from_person_id = $1 AND to_person_id = $2)
           OR (from_person_id = $2 AND to_person_id = $1)
        RETURNING id
        "#,
    )
    .bind(pair.lo().0)
    .bind(pair.hi().0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to delete relation", err))?;

    Ok(row.map(|(id,)| RelationId(id)))
}

pub async fn relations_touching(pool: &PgPool, person_id: PersonId) -> Result<Vec<Relation>> {
    let rows = sqlx::query_as::<_, RelationRow>(
        r#"
        SELECT id, from_person_id, to_person_id, source, created_at, updated_at
        FROM relations
        WHERE from_person_id = $1
           OR to_person_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(person_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query relations", err))?;

    Ok(rows.into_iter().map(Relation::from).collect())
}

pub async fn upsert_background(
    pool: &PgPool,
    background: &NewBackground,
) -> Result<PersonBackground> {
    let row = sqlx::query_as::<_, BackgroundRow>(
        r#"
        INSERT INTO person_backgrounds (person_id, birth_year, body)
        VALUES ($1, $2, $3)
        ON CONFLICT (person_id) DO UPDATE
        SET birth_year = EXCLUDED.birth_year,
            body = EXCLUDED.body,
            updated_at = CURRENT_TIMESTAMP
        RETURNING id, person_id, birth_year, body, created_at, updated_at
        "#,
    )
    .bind(background.person_id.0)
    .bind(background.birth_year)
    .bind(&background.body)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to write background", err))?;

    Ok(row.into())
}

pub async fn get_background(
    pool: &PgPool,
    person_id: PersonId,
) -> Result<Option<PersonBackground>> {
    let row = sqlx::query_as::<_, BackgroundRow>(
        r#"
        SELECT id, person_id, birth_year, body, created_at, updated_at
        FROM person_backgrounds
        WHERE person_id = $1
        "#,
    )
    .bind(person_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query background", err))?;

    Ok(row.map(PersonBackground::from))
}
