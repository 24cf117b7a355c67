use anyhow::{bail, Context, Result};
use growflow_engine::StoredPlant;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One row of the `plants` table. `state_json` is the serialized
/// [`StoredPlant`], left unparsed so the caller decides how to ingest it.
#[derive(Debug, Clone)]
pub struct PlantRow {
    pub plant_id: String,
    pub name: String,
    pub strain: Option<String>,
    pub state_json: String,
    pub updated_at: String,
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format timestamp")
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/growflow/growflow.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to ":memory:" is its own database, so the pool
        // must hold exactly one connection for the whole process lifetime.
        let in_memory = db_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Plants
    // ----------------------------

    pub async fn plant_exists(&self, plant_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM plants WHERE plant_id = ?")
            .bind(plant_id)
            .fetch_optional(&self.pool)
            .await
            .context("plant_exists failed")?;
        Ok(row.is_some())
    }

    pub async fn plant_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT plant_id FROM plants ORDER BY plant_id")
            .fetch_all(&self.pool)
            .await
            .context("plant_ids failed")?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("plant_id").context("plant_ids: bad row"))
            .collect()
    }

    pub async fn insert_plant(
        &self,
        name: &str,
        strain: Option<&str>,
        state: &StoredPlant,
    ) -> Result<()> {
        let state_json =
            serde_json::to_string(state).context("failed to serialize plant state")?;
        sqlx::query(
            r#"
            INSERT INTO plants (plant_id, name, strain, state_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&state.plant_id)
        .bind(name)
        .bind(strain)
        .bind(state_json)
        .bind(now_rfc3339()?)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert_plant failed for '{}'", state.plant_id))?;
        Ok(())
    }

    /// Refresh display metadata from config without touching the state blob.
    /// A `None` strain keeps the stored one, which may have been set at
    /// runtime.
    pub async fn update_plant_metadata(
        &self,
        plant_id: &str,
        name: &str,
        strain: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE plants SET name = ?, strain = COALESCE(?, strain) WHERE plant_id = ?")
            .bind(name)
            .bind(strain)
            .bind(plant_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update_plant_metadata failed for '{plant_id}'"))?;
        Ok(())
    }

    pub async fn update_plant_strain(&self, plant_id: &str, strain: &str) -> Result<()> {
        let result = sqlx::query("UPDATE plants SET strain = ? WHERE plant_id = ?")
            .bind(strain)
            .bind(plant_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update_plant_strain failed for '{plant_id}'"))?;

        if result.rows_affected() == 0 {
            bail!("update_plant_strain: no stored plant '{plant_id}'");
        }
        Ok(())
    }

    /// Rewrite the full state blob of an existing plant.
    pub async fn save_plant(&self, state: &StoredPlant) -> Result<()> {
        let state_json =
            serde_json::to_string(state).context("failed to serialize plant state")?;
        let result = sqlx::query(
            r#"
            UPDATE plants
            SET state_json = ?, updated_at = ?
            WHERE plant_id = ?
            "#,
        )
        .bind(state_json)
        .bind(now_rfc3339()?)
        .bind(&state.plant_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("save_plant failed for '{}'", state.plant_id))?;

        if result.rows_affected() == 0 {
            bail!("save_plant: no stored plant '{}'", state.plant_id);
        }
        Ok(())
    }

    pub async fn delete_plant(&self, plant_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM plants WHERE plant_id = ?")
            .bind(plant_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete_plant failed for '{plant_id}'"))?;
        Ok(())
    }

    pub async fn load_plants(&self) -> Result<Vec<PlantRow>> {
        let rows = sqlx::query(
            r#"
            SELECT plant_id, name, strain, state_json, updated_at
            FROM plants
            ORDER BY plant_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_plants failed")?;

        rows.iter()
            .map(plant_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("load_plants: bad row")
    }

    pub async fn get_plant(&self, plant_id: &str) -> Result<Option<PlantRow>> {
        let row = sqlx::query(
            r#"
            SELECT plant_id, name, strain, state_json, updated_at
            FROM plants
            WHERE plant_id = ?
            "#,
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_plant failed")?;

        row.as_ref()
            .map(plant_row)
            .transpose()
            .context("get_plant: bad row")
    }
}

fn plant_row(r: &SqliteRow) -> Result<PlantRow, sqlx::Error> {
    Ok(PlantRow {
        plant_id: r.try_get("plant_id")?,
        name: r.try_get("name")?,
        strain: r.try_get("strain")?,
        state_json: r.try_get("state_json")?,
        updated_at: r.try_get("updated_at")?,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
