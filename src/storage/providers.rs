//! Provider credential store.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::model::Provider;

use super::database::{Database, DatabaseError};

fn provider_from_row(row: &SqliteRow) -> Provider {
    Provider {
        id: Some(row.get("id")),
        name: row.get("name"),
        api_key: row.get("api_key"),
        api_url: row.get("api_url"),
    }
}

impl Database {
    pub async fn add_provider(&self, provider: &Provider) -> Result<Provider, DatabaseError> {
        if self.get_provider(&provider.name).await?.is_some() {
            return Err(DatabaseError::AlreadyExists(format!(
                "provider '{}'",
                provider.name
            )));
        }

        let id = sqlx::query("INSERT INTO provider (name, api_key, api_url) VALUES (?1, ?2, ?3)")
            .bind(&provider.name)
            .bind(&provider.api_key)
            .bind(&provider.api_url)
            .execute(self.pool())
            .await?
            .last_insert_rowid();

        Ok(Provider {
            id: Some(id),
            ..provider.clone()
        })
    }

    /// Updates the key and/or URL of an existing provider.
    pub async fn update_provider(
        &self,
        name: &str,
        api_key: Option<&str>,
        api_url: Option<&str>,
    ) -> Result<Provider, DatabaseError> {
        let mut provider = self
            .get_provider(name)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("provider '{}'", name)))?;

        if let Some(key) = api_key {
            provider.api_key = key.to_string();
        }
        if let Some(url) = api_url {
            provider.api_url = Some(url.to_string());
        }

        sqlx::query("UPDATE provider SET api_key = ?1, api_url = ?2 WHERE name = ?3")
            .bind(&provider.api_key)
            .bind(&provider.api_url)
            .bind(name)
            .execute(self.pool())
            .await?;

        Ok(provider)
    }

    pub async fn delete_provider(&self, name: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM provider WHERE name = ?1")
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("provider '{}'", name)));
        }
        Ok(())
    }

    pub async fn get_provider(&self, name: &str) -> Result<Option<Provider>, DatabaseError> {
        let row = sqlx::query("SELECT id, name, api_key, api_url FROM provider WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(provider_from_row))
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>, DatabaseError> {
        let rows = sqlx::query("SELECT id, name, api_key, api_url FROM provider ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(provider_from_row).collect())
    }

    /// Names from `names` that have no stored provider, sorted.
    pub async fn missing_providers<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>, DatabaseError> {
        let known: std::collections::HashSet<String> = self
            .list_providers()
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();

        let mut missing: Vec<String> = names
            .into_iter()
            .filter(|name| !known.contains(*name))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_database;

    #[tokio::test]
    async fn test_provider_crud() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;

        let added = db.add_provider(&Provider::new("openai", "sk-1")).await.unwrap();
        assert!(added.id.is_some());

        assert!(matches!(
            db.add_provider(&Provider::new("openai", "sk-2")).await,
            Err(DatabaseError::AlreadyExists(_))
        ));

        let updated = db
            .update_provider("openai", None, Some("http://localhost:4000/v1"))
            .await
            .unwrap();
        assert_eq!(updated.api_key, "sk-1");
        assert_eq!(updated.api_url.as_deref(), Some("http://localhost:4000/v1"));

        db.delete_provider("openai").await.unwrap();
        assert!(db.get_provider("openai").await.unwrap().is_none());
        assert!(matches!(
            db.delete_provider("openai").await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_providers() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;
        db.add_provider(&Provider::new("mistral", "key")).await.unwrap();

        let missing = db
            .missing_providers(["openai", "mistral", "openai"])
            .await
            .unwrap();
        assert_eq!(missing, vec!["openai".to_string()]);
    }
}
