use anyhow::{Result, anyhow};
use regex::Regex;
use rusqlite::{OptionalExtension, params};
use std::sync::LazyLock;

use super::Store;
use super::types::{AgentPatch, AgentRecord, AgentRemoval, NewAgent};
use crate::core::execution::schema::validate_schema;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,62}[a-z0-9])?$").expect("slug regex"));

static ENGINE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-/]{0,199}$").expect("engine ref regex"));

const AGENT_COLUMNS: &str = "id, slug, name, description, price_cents, currency, engine_ref, \
     input_schema, required_providers, is_active, created_at, updated_at";

fn agent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let schema_json: String = row.get(7)?;
    let providers_json: String = row.get(8)?;
    let parse_err = |idx: usize, e: serde_json::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(AgentRecord {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        price_cents: row.get(4)?,
        currency: row.get(5)?,
        engine_ref: row.get(6)?,
        input_schema: serde_json::from_str(&schema_json).map_err(|e| parse_err(7, e))?,
        required_providers: serde_json::from_str(&providers_json).map_err(|e| parse_err(8, e))?,
        is_active: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Field-level checks shared by create and update. Returns all problems.
fn validate_agent_fields(
    slug: Option<&str>,
    name: Option<&str>,
    engine_ref: Option<&str>,
    price_cents: Option<i64>,
    currency: Option<&str>,
    schema: Option<&[crate::core::execution::schema::InputField]>,
) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if let Some(slug) = slug
        && !SLUG_RE.is_match(slug)
    {
        errors.push(
            "slug must be 1-64 lowercase letters, digits or '-', not starting or ending with '-'"
                .to_string(),
        );
    }
    if let Some(name) = name
        && name.trim().is_empty()
    {
        errors.push("name must not be empty".to_string());
    }
    if let Some(engine_ref) = engine_ref
        && (!ENGINE_REF_RE.is_match(engine_ref) || engine_ref.contains(".."))
    {
        errors.push("engine_ref must be a relative workflow path".to_string());
    }
    if let Some(price) = price_cents
        && price < 0
    {
        errors.push("price_cents must not be negative".to_string());
    }
    if let Some(currency) = currency
        && (currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()))
    {
        errors.push("currency must be a 3-letter ISO code".to_string());
    }
    if let Some(schema) = schema
        && let Err(mut schema_errors) = validate_schema(schema)
    {
        errors.append(&mut schema_errors);
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

impl NewAgent {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        validate_agent_fields(
            Some(&self.slug),
            Some(&self.name),
            Some(&self.engine_ref),
            Some(self.price_cents),
            Some(&self.currency),
            Some(&self.input_schema),
        )
    }
}

impl AgentPatch {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        validate_agent_fields(
            None,
            self.name.as_deref(),
            self.engine_ref.as_deref(),
            self.price_cents,
            self.currency.as_deref(),
            self.input_schema.as_deref(),
        )
    }
}

impl Store {
    pub async fn create_agent(&self, agent: &NewAgent) -> Result<AgentRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let schema = serde_json::to_string(&agent.input_schema)?;
        let providers = serde_json::to_string(&agent.required_providers)?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (id, slug, name, description, price_cents, currency, engine_ref,
                                 input_schema, required_providers, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                agent.slug,
                agent.name.trim(),
                agent.description,
                agent.price_cents,
                agent.currency,
                agent.engine_ref,
                schema,
                providers,
                agent.is_active as i64
            ],
        )?;
        let record = db.query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
            params![id],
            agent_from_row,
        )?;
        Ok(record)
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
                params![id],
                agent_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn get_agent_by_slug(&self, slug: &str) -> Result<Option<AgentRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!("SELECT {} FROM agents WHERE slug = ?1", AGENT_COLUMNS),
                params![slug],
                agent_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Look an agent up by id first, then by slug.
    pub async fn find_agent(&self, id_or_slug: &str) -> Result<Option<AgentRecord>> {
        if let Some(agent) = self.get_agent(id_or_slug).await? {
            return Ok(Some(agent));
        }
        self.get_agent_by_slug(id_or_slug).await
    }

    pub async fn list_agents(&self, active_only: bool) -> Result<Vec<AgentRecord>> {
        let db = self.db.lock().await;
        let sql = if active_only {
            format!(
                "SELECT {} FROM agents WHERE is_active = 1 ORDER BY name",
                AGENT_COLUMNS
            )
        } else {
            format!("SELECT {} FROM agents ORDER BY name", AGENT_COLUMNS)
        };
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], agent_from_row)?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    pub async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<Option<AgentRecord>> {
        let Some(current) = self.get_agent(id).await? else {
            return Ok(None);
        };

        let schema = serde_json::to_string(patch.input_schema.as_ref().unwrap_or(&current.input_schema))?;
        let providers = serde_json::to_string(
            patch
                .required_providers
                .as_ref()
                .unwrap_or(&current.required_providers),
        )?;

        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE agents SET name = ?1, description = ?2, price_cents = ?3, currency = ?4,
                engine_ref = ?5, input_schema = ?6, required_providers = ?7, is_active = ?8,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ?9",
            params![
                patch.name.as_deref().map(str::trim).unwrap_or(current.name.as_str()),
                patch.description.as_ref().unwrap_or(&current.description),
                patch.price_cents.unwrap_or(current.price_cents),
                patch.currency.as_ref().unwrap_or(&current.currency),
                patch.engine_ref.as_ref().unwrap_or(&current.engine_ref),
                schema,
                providers,
                patch.is_active.unwrap_or(current.is_active) as i64,
                id
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("agent {} disappeared during update", id));
        }
        let record = db.query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
            params![id],
            agent_from_row,
        )?;
        Ok(Some(record))
    }

    /// Agents with execution history are deactivated rather than deleted so
    /// the log keeps pointing at a real listing.
    pub async fn delete_agent(&self, id: &str) -> Result<AgentRemoval> {
        let db = self.db.lock().await;
        let exists: bool = db
            .query_row("SELECT 1 FROM agents WHERE id = ?1", params![id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Ok(AgentRemoval::NotFound);
        }

        let history: i64 = db.query_row(
            "SELECT COUNT(*) FROM workflow_executions WHERE agent_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if history > 0 {
            db.execute(
                "UPDATE agents SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                params![id],
            )?;
            return Ok(AgentRemoval::Deactivated);
        }

        db.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(AgentRemoval::Deleted)
    }
}

#[cfg(test)]
pub(crate) fn sample_agent(slug: &str, price_cents: i64) -> NewAgent {
    serde_json::from_value(serde_json::json!({
        "slug": slug,
        "name": format!("Agent {}", slug),
        "description": "Writes things",
        "price_cents": price_cents,
        "engine_ref": format!("flows/{}", slug),
        "input_schema": [
            { "name": "topic", "type": "text", "required": true }
        ],
        "required_providers": ["openai"]
    }))
    .expect("sample agent")
}
