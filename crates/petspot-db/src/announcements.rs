use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use petspot_crypto::PasswordHasher;
use rusqlite::{Connection, Row, Transaction};
use uuid::Uuid;

use crate::Database;
use crate::models::{AnnouncementRow, LocationFilter, NewAnnouncement};

const COLUMNS: &str = "id, pet_name, species, breed, sex, age, description, microchip_number,
    location_latitude, location_longitude, last_seen_date, email, phone, photo_url, status,
    reward, management_password_hash, created_at, updated_at";

impl Database {
    /// Announcements that already have a photo. With a filter, only those
    /// strictly closer than `range_km`, nearest first; otherwise newest first.
    pub fn find_announcements(&self, filter: Option<LocationFilter>) -> Result<Vec<AnnouncementRow>> {
        self.with_conn(|conn| match filter {
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM announcement
                     WHERE photo_url IS NOT NULL
                     ORDER BY created_at DESC, id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            }
            Some(filter) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM (
                        SELECT *, haversine_km(?1, ?2, location_latitude, location_longitude) AS distance
                        FROM announcement
                        WHERE photo_url IS NOT NULL
                     )
                     WHERE distance < ?3
                     ORDER BY distance ASC, id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![filter.lat, filter.lng, filter.range_km],
                        map_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            }
        })
    }

    pub fn find_announcement(&self, id: &str) -> Result<Option<AnnouncementRow>> {
        self.with_conn(|conn| query_announcement(conn, id))
    }

    pub fn microchip_exists(&self, microchip_number: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM announcement WHERE microchip_number = ?1)",
                [microchip_number],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Insert a new announcement without a photo. The management password
    /// is hashed before the connection is taken.
    pub fn create_announcement(
        &self,
        data: &NewAnnouncement,
        management_password: &str,
        hasher: &PasswordHasher,
    ) -> Result<AnnouncementRow> {
        let password_hash = hasher.hash(management_password)?;
        let id = Uuid::new_v4().to_string();
        let now = timestamp();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO announcement (
                    id, pet_name, species, breed, sex, age, description, microchip_number,
                    location_latitude, location_longitude, last_seen_date, email, phone,
                    photo_url, status, reward, management_password_hash, created_at, updated_at
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    NULL, ?14, ?15, ?16, ?17, ?17
                 )",
                rusqlite::params![
                    &id,
                    data.pet_name,
                    data.species,
                    data.breed,
                    data.sex,
                    data.age,
                    data.description,
                    data.microchip_number,
                    data.location_latitude,
                    data.location_longitude,
                    data.last_seen_date,
                    data.email,
                    data.phone,
                    data.status,
                    data.reward,
                    password_hash,
                    now,
                ],
            )?;

            query_announcement(conn, &id)?
                .ok_or_else(|| anyhow!("Announcement {} vanished after insert", id))
        })
    }

    /// Point an announcement at a new photo. Only callable inside a
    /// transaction so the caller can couple it with the file write.
    pub fn update_photo_url(tx: &Transaction<'_>, id: &str, photo_url: &str) -> Result<bool> {
        let changed = tx.execute(
            "UPDATE announcement SET photo_url = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![photo_url, timestamp(), id],
        )?;
        Ok(changed == 1)
    }

    pub fn delete_announcement(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM announcement WHERE id = ?1", [id])?;
            Ok(deleted == 1)
        })
    }

    /// `(id, photo_url)` for every announcement that references a photo.
    pub fn find_photo_urls(&self) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, photo_url FROM announcement WHERE photo_url IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Null out `photo_url`, but only if it still holds `expected`.
    pub fn clear_photo_url(&self, id: &str, expected: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE announcement SET photo_url = NULL, updated_at = ?1
                 WHERE id = ?2 AND photo_url = ?3",
                rusqlite::params![timestamp(), id, expected],
            )?;
            Ok(changed == 1)
        })
    }
}

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn query_announcement(conn: &Connection, id: &str) -> Result<Option<AnnouncementRow>> {
    let sql = format!("SELECT {COLUMNS} FROM announcement WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([id], map_row)?;
    Ok(rows.next().transpose()?)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<AnnouncementRow> {
    Ok(AnnouncementRow {
        id: row.get(0)?,
        pet_name: row.get(1)?,
        species: row.get(2)?,
        breed: row.get(3)?,
        sex: row.get(4)?,
        age: row.get(5)?,
        description: row.get(6)?,
        microchip_number: row.get(7)?,
        location_latitude: row.get(8)?,
        location_longitude: row.get(9)?,
        last_seen_date: row.get(10)?,
        email: row.get(11)?,
        phone: row.get(12)?,
        photo_url: row.get(13)?,
        status: row.get(14)?,
        reward: row.get(15)?,
        management_password_hash: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}
