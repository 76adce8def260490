use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::expression::VariantExpression;
use super::schema::{self, VariantDocument, COLUMNS};
use super::{DatabaseController, GroupField, GroupedVariants, SortOrder, VariantFilter};
use crate::error::{Result, VariantStoreError};
use crate::input::VariantIterator;
use crate::resources::SCHEMA_FILE;
use crate::task::CancelToken;

pub const DB_FILE: &str = "variants.sqlite";

/// Reference backend: an embedded SQLite database, one row per document.
///
/// The connection is shared by all workers; each operation holds it only
/// for the statements it runs, so draining input files happens outside the
/// lock.
#[derive(Default)]
pub struct SqliteController {
    conn: Mutex<Option<Connection>>,
}

impl SqliteController {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| VariantStoreError::BackendUnavailable("connection is closed".to_string()))?;
        f(conn)
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<VariantDocument> {
    let alts: String = row.get(5)?;
    Ok(VariantDocument {
        individual_id: row.get(0)?,
        is_public: row.get(1)?,
        chrom: row.get(2)?,
        pos: row.get(3)?,
        reference: row.get(4)?,
        alts: VariantDocument::alts_from_text(&alts),
        genotype: row.get(6)?,
        gene: row.get(7)?,
        gene_effect: row.get(8)?,
        exac_af: row.get(9)?,
        quality: row.get(10)?,
        filter: row.get(11)?,
        scores: [row.get(12)?, row.get(13)?, row.get(14)?, row.get(15)?],
    })
}

fn group_value(doc: &VariantDocument, group_by: GroupField) -> &str {
    match group_by {
        GroupField::Individual => &doc.individual_id,
        GroupField::Chromosome => &doc.chrom,
        GroupField::Gene => &doc.gene,
        GroupField::GeneEffect => &doc.gene_effect,
        GroupField::Filter => &doc.filter,
    }
}

/// Build the SELECT for `filter`; rows come back ordered by group value first.
fn select_sql(filter: &VariantFilter, group_by: GroupField) -> (String, Vec<SqlValue>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    match &filter.individual {
        Some(id) => {
            clauses.push(format!("{} = ?", schema::INDIVIDUAL_ID));
            values.push(SqlValue::Text(id.clone()));
        }
        None => clauses.push(format!("{} = 1", schema::IS_PUBLIC)),
    }
    for (column, value) in [
        (schema::CHROM, &filter.chromosome),
        (schema::GENE, &filter.gene),
        (schema::GENE_EFFECT, &filter.gene_effect),
    ] {
        if let Some(v) = value {
            clauses.push(format!("{} = ?", column));
            values.push(SqlValue::Text(v.clone()));
        }
    }
    if let Some(af) = filter.max_exac_af {
        clauses.push(format!("({0} IS NULL OR {0} <= ?)", schema::EXAC_AF));
        values.push(SqlValue::Real(af));
    }
    if let Some(score) = filter.min_variant_score {
        clauses.push(format!("{} >= ?", schema::EXOMISER_VARIANT_SCORE));
        values.push(SqlValue::Real(score));
    }

    let order = match filter.order {
        SortOrder::Position => format!("{}, {}, rowid", schema::CHROM, schema::POS),
        SortOrder::VariantScoreDesc => format!(
            "{0} IS NULL, {0} DESC, {1}, {2}",
            schema::EXOMISER_VARIANT_SCORE,
            schema::CHROM,
            schema::POS
        ),
    };
    let sql = format!(
        "SELECT {} FROM variants WHERE {} ORDER BY {}, {}",
        COLUMNS.join(", "),
        clauses.join(" AND "),
        group_by.column(),
        order
    );
    (sql, values)
}

impl DatabaseController for SqliteController {
    fn init(&self, path: &Path) -> Result<()> {
        let mut guard = self.conn.lock();
        if guard.is_some() {
            debug!("backend already open");
            return Ok(());
        }
        let schema = fs::read_to_string(path.join(SCHEMA_FILE))
            .map_err(|e| VariantStoreError::provisioning(path, format!("reading schema: {}", e)))?;
        let db_path = path.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| VariantStoreError::provisioning(&db_path, e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .and_then(|_| conn.execute_batch(&schema))
            .map_err(|e| VariantStoreError::provisioning(&db_path, e.to_string()))?;
        info!("opened backend at {}", db_path.display());
        *guard = Some(conn);
        Ok(())
    }

    fn add_individual(&self, variants: &mut dyn VariantIterator, cancel: &CancelToken) -> Result<usize> {
        let header = variants.header().clone();
        let id = header.individual_id.clone();

        let mut documents = Vec::new();
        while let Some(record) = variants.next() {
            if cancel.is_cancelled() {
                info!("ingestion of {} cancelled after {} variants", id, documents.len());
                return Err(VariantStoreError::Cancelled(id));
            }
            documents.push(VariantDocument::from_record(&header, &record?)?);
        }
        if cancel.is_cancelled() {
            return Err(VariantStoreError::Cancelled(id));
        }
        debug!("drained {} variants for {}", documents.len(), id);

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let replaced = tx.execute("DELETE FROM variants WHERE individual_id = ?1", params![id])?;
            if replaced > 0 {
                warn!("replacing {} stored variants of {}", replaced, id);
            }
            tx.execute("DELETE FROM individuals WHERE id = ?1", params![id])?;
            {
                let placeholders = (1..=COLUMNS.len())
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO variants ({}) VALUES ({})",
                    COLUMNS.join(", "),
                    placeholders
                ))?;
                for doc in &documents {
                    stmt.execute(params![
                        doc.individual_id,
                        doc.is_public,
                        doc.chrom,
                        doc.pos,
                        doc.reference,
                        doc.alts_text(),
                        doc.genotype,
                        doc.gene,
                        doc.gene_effect,
                        doc.exac_af,
                        doc.quality,
                        doc.filter,
                        doc.scores[0],
                        doc.scores[1],
                        doc.scores[2],
                        doc.scores[3],
                    ])?;
                }
            }
            tx.execute(
                "INSERT INTO individuals (id, is_public, format, variant_count) VALUES (?1, ?2, ?3, ?4)",
                params![id, header.is_public, header.format.as_str(), documents.len() as i64],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        info!("committed {} variants for {}", documents.len(), id);
        Ok(documents.len())
    }

    fn remove_individual(&self, id: &str) -> Result<usize> {
        let removed = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM variants WHERE individual_id = ?1", params![id])?;
            tx.execute("DELETE FROM individuals WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(removed)
        })?;
        info!("removed {} variants of {}", removed, id);
        Ok(removed)
    }

    fn query(&self, filter: &VariantFilter, group_by: GroupField) -> Result<GroupedVariants> {
        let expression = filter
            .expression
            .as_deref()
            .map(VariantExpression::compile)
            .transpose()?;
        let (sql, values) = select_sql(filter, group_by);
        debug!("query: {}", sql);

        let documents = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), document_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        let mut grouped = GroupedVariants::new();
        for doc in documents {
            let key = group_value(&doc, group_by).to_string();
            if let (Some(limit), Some(group)) = (filter.limit_per_group, grouped.get(&key)) {
                if group.len() >= limit {
                    continue;
                }
            }
            let mut record = doc.into_record()?;
            if let Some(expr) = &expression {
                let (keep, r) = expr.matches(record)?;
                if !keep {
                    continue;
                }
                record = r;
            }
            if filter.limit_per_group == Some(0) {
                continue;
            }
            grouped.entry(key).or_default().push(record);
        }
        Ok(grouped)
    }

    fn list_individuals(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM individuals ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    fn contains_individual(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM individuals WHERE id = ?1)",
                params![id],
                |row| row.get::<_, bool>(0),
            )?)
        })
    }

    fn stop(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close()
                .map_err(|(_, e)| VariantStoreError::BackendUnavailable(e.to_string()))?;
            info!("backend closed");
        }
        Ok(())
    }
}
