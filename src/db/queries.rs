use super::models::StoreStats;
use super::{Database, DbError, FingerprintStore, Result};
use crate::fingerprint::{self, StructureFingerprint};
use rusqlite::{OptionalExtension, params};

impl FingerprintStore for Database {
    fn get(&self, song_id: &str) -> Result<Option<StructureFingerprint>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM fingerprints WHERE song_id = ?1",
                params![song_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the fingerprint for its song id. Last write wins.
    fn upsert(&mut self, fp: StructureFingerprint) -> Result<()> {
        let payload = serde_json::to_string(&fp)?;
        let archetype = fingerprint::infer_archetype(&fp);

        self.conn.execute(
            "INSERT INTO fingerprints (
                song_id, tempo, meter, archetype, duration,
                chorus_count, chorus_ratio, structure, payload,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                datetime('now')
            )
            ON CONFLICT(song_id) DO UPDATE SET
                tempo = excluded.tempo,
                meter = excluded.meter,
                archetype = excluded.archetype,
                duration = excluded.duration,
                chorus_count = excluded.chorus_count,
                chorus_ratio = excluded.chorus_ratio,
                structure = excluded.structure,
                payload = excluded.payload,
                updated_at = datetime('now')
            ",
            params![
                fp.song_id, fp.tempo, fp.meter.as_str(), archetype.as_str(), fp.duration,
                fp.chorus_count as i64, fp.chorus_ratio, fp.structure_string(), payload,
            ],
        )?;

        log::debug!("Stored fingerprint for {}", fp.song_id);
        Ok(())
    }

    fn all(&self) -> Result<Vec<StructureFingerprint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM fingerprints ORDER BY song_id")?;
        let payloads: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|json| serde_json::from_str(json).map_err(DbError::from))
            .collect()
    }
}

impl Database {
    /// Get fingerprint store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let fingerprints: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fingerprints",
            [],
            |row| row.get(0),
        )?;

        let total_duration_hours: f64 = self.conn.query_row(
            "SELECT COALESCE(SUM(duration), 0.0) / 3600.0 FROM fingerprints",
            [],
            |row| row.get(0),
        )?;

        let mean_tempo: Option<f64> = self.conn.query_row(
            "SELECT AVG(tempo) FROM fingerprints",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            fingerprints,
            total_duration_hours,
            mean_tempo,
            archetypes: self.histogram("archetype", None)?,
            meters: self.histogram("meter", None)?,
            forms: self.histogram("structure", Some(10))?,
        })
    }

    /// Value counts for one summary column, most common first.
    fn histogram(&self, column: &str, limit: Option<usize>) -> Result<Vec<(String, i64)>> {
        let limit = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {col}, COUNT(*) FROM fingerprints GROUP BY {col} ORDER BY COUNT(*) DESC, {col}{limit}",
            col = column,
            limit = limit,
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
