//! Reference plant checklist (USDA PLANTS)
//!
//! Imported once from the USDA CSV export into `reference_plants`. Only
//! accepted names are kept: rows carrying a `Synonym Symbol` are skipped.
//! Names are stored both with the author stripped and in normalized form.

use crate::ensemble::normalize_name;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// One accepted taxon from the reference dataset
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ReferencePlant {
    pub symbol: String,
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub family: Option<String>,
}

/// Authoritative lookup by scientific name
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// `Ok(None)` is "not in the dataset", `Err` is "dataset unreachable"
    async fn lookup(&self, scientific_name: &str) -> Result<Option<ReferencePlant>>;

    /// Number of accepted taxa
    async fn count(&self) -> Result<i64>;
}

/// Drop the authority from a USDA name
///
/// Keeps the genus and the following tokens up to the first one that starts
/// uppercase or with `(`. Hybrid epithets (`×damascena`) are kept.
///
/// # Examples
///
/// ```
/// use flora_id::verification::reference::strip_author;
///
/// assert_eq!(strip_author("Rosa canina L."), "Rosa canina");
/// assert_eq!(strip_author("Acer rubrum L. var. drummondii (Hook. & Arn. ex Nutt.) Sarg."),
///            "Acer rubrum");
/// assert_eq!(strip_author("Rosa ×damascena Herrm."), "Rosa ×damascena");
/// ```
pub fn strip_author(name: &str) -> String {
    let mut tokens = name.split_whitespace();
    let mut kept: Vec<&str> = match tokens.next() {
        Some(genus) => vec![genus],
        None => return String::new(),
    };
    for token in tokens {
        let first = token.chars().next().unwrap_or(' ');
        if first.is_lowercase() || first == '×' {
            kept.push(token);
        } else {
            break;
        }
    }
    kept.join(" ")
}

#[derive(Debug, Deserialize)]
struct ChecklistRow {
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "Synonym Symbol", default)]
    synonym_symbol: String,
    #[serde(rename = "Scientific Name with Author")]
    scientific_name: String,
    #[serde(rename = "Common Name", default)]
    common_name: String,
    #[serde(rename = "Family", default)]
    family: String,
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Reference dataset stored in the service database
pub struct SqliteReferenceDataset {
    pool: SqlitePool,
}

impl SqliteReferenceDataset {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Import a USDA checklist CSV file
    pub async fn import_csv(&self, path: &Path) -> Result<usize> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open reference checklist {}", path.display()))?;
        let imported = self.import_reader(file).await?;
        info!("Imported {} reference plants from {}", imported, path.display());
        Ok(imported)
    }

    /// Import checklist rows from any CSV reader
    ///
    /// # Returns
    /// * Number of newly inserted accepted taxa
    pub async fn import_reader<R: Read>(&self, reader: R) -> Result<usize> {
        let rows = parse_checklist(reader)?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for plant in rows {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO reference_plants
                    (symbol, scientific_name, normalized_name, common_name, family)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&plant.symbol)
            .bind(&plant.scientific_name)
            .bind(normalize_name(&plant.scientific_name))
            .bind(&plant.common_name)
            .bind(&plant.family)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn find(&self, normalized: &str) -> Result<Option<ReferencePlant>> {
        let plant = sqlx::query_as::<_, ReferencePlant>(
            r#"
            SELECT symbol, scientific_name, common_name, family
            FROM reference_plants
            WHERE normalized_name = ?
            "#,
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plant)
    }
}

fn parse_checklist<R: Read>(reader: R) -> Result<Vec<ReferencePlant>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut rows = Vec::new();
    for record in csv_reader.deserialize::<ChecklistRow>() {
        let row = record.context("Malformed reference checklist row")?;
        if !row.synonym_symbol.trim().is_empty() {
            continue;
        }
        let name = strip_author(&row.scientific_name);
        if name.is_empty() {
            continue;
        }
        rows.push(row_with_name(row, name));
    }
    Ok(rows)
}

fn row_with_name(row: ChecklistRow, scientific_name: String) -> ReferencePlant {
    ReferencePlant {
        symbol: row.symbol.trim().to_string(),
        scientific_name,
        common_name: non_blank(row.common_name),
        family: non_blank(row.family),
    }
}

#[async_trait]
impl ReferenceLookup for SqliteReferenceDataset {
    async fn lookup(&self, scientific_name: &str) -> Result<Option<ReferencePlant>> {
        let exact = normalize_name(scientific_name);
        if let Some(plant) = self.find(&exact).await? {
            return Ok(Some(plant));
        }

        let normalized = normalize_name(&strip_author(scientific_name));
        if normalized != exact {
            if let Some(plant) = self.find(&normalized).await? {
                return Ok(Some(plant));
            }
        }

        // Fall back to the bare binomial for infraspecific names
        let binomial: Vec<&str> = normalized.split(' ').take(2).collect();
        if binomial.len() == 2 && normalized.split(' ').count() > 2 {
            debug!(name = %scientific_name, "Retrying reference lookup with binomial");
            return self.find(&binomial.join(" ")).await;
        }
        Ok(None)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reference_plants")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
