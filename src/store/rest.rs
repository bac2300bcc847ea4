use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

use super::RecordStore;
use crate::config::StoreConfig;
use crate::error::{LiveError, Result};
use crate::model::{ParticipantId, ParticipantRecord, RoomId, RoomRecord};

const ROOMS_TABLE: &str = "live_rooms";
const PARTICIPANTS_TABLE: &str = "live_participants";

/// Record store backed by the hosted backend's REST tables (PostgREST dialect).
pub struct RestRecordStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestRecordStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| LiveError::InvalidConfiguration("STORE_URL is not set".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let apikey = HeaderValue::from_str(key)
                .map_err(|e| LiveError::InvalidConfiguration(format!("Invalid STORE_API_KEY: {}", e)))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| LiveError::InvalidConfiguration(format!("Invalid STORE_API_KEY: {}", e)))?;
            headers.insert("apikey", apikey);
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LiveError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn table_url(&self, table: &str, filters: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}", self.base_url, table);
        for (i, (column, value)) in filters.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(column);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LiveError::store(format!("GET {} failed ({}): {}", url, status, body)));
        }
        Ok(response.json().await?)
    }

    async fn insert<T>(&self, table: &str, row: &T) -> Result<Vec<T>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let url = self.table_url(table, &[]);
        let response = self
            .client
            .post(&url)
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(row)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LiveError::store(format!("Insert into {} failed ({}): {}", table, status, body)));
        }
        Ok(response.json().await?)
    }

    async fn patch(&self, table: &str, id: &str, body: &serde_json::Value) -> Result<()> {
        let url = self.table_url(table, &[("id", format!("eq.{}", id))]);
        let response = self.client.patch(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LiveError::store(format!("Update of {} {} failed ({}): {}", table, id, status, text)));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        let url = self.table_url(ROOMS_TABLE, &[("id", format!("eq.{}", room_id))]);
        Ok(self.fetch(&url).await?.into_iter().next())
    }

    async fn latest_room_for_lesson(&self, lesson_id: &str) -> Result<Option<RoomRecord>> {
        let url = self.table_url(
            ROOMS_TABLE,
            &[
                ("lesson_id", format!("eq.{}", lesson_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", "1".to_string()),
            ],
        );
        Ok(self.fetch(&url).await?.into_iter().next())
    }

    async fn insert_room(&self, room: &RoomRecord) -> Result<RoomRecord> {
        let inserted = self.insert(ROOMS_TABLE, room).await?;
        match inserted.into_iter().next() {
            Some(row) => Ok(row),
            // Duplicate ignored: read back what is stored
            None => self
                .get_room(&room.id)
                .await?
                .ok_or_else(|| LiveError::store(format!("Room {} missing after insert", room.id))),
        }
    }

    async fn update_room(&self, room: &RoomRecord) -> Result<()> {
        let body = serde_json::to_value(room)?;
        self.patch(ROOMS_TABLE, room.id.as_str(), &body).await
    }

    async fn insert_participant(&self, participant: &ParticipantRecord) -> Result<ParticipantRecord> {
        let inserted = self.insert(PARTICIPANTS_TABLE, participant).await?;
        Ok(inserted.into_iter().next().unwrap_or_else(|| participant.clone()))
    }

    async fn update_participant(&self, participant: &ParticipantRecord) -> Result<()> {
        let body = serde_json::to_value(participant)?;
        self.patch(PARTICIPANTS_TABLE, participant.id.as_str(), &body).await
    }

    async fn close_participant(&self, participant_id: &ParticipantId, left_at: u64) -> Result<()> {
        // Only open rows are touched, so the first close wins
        let url = self.table_url(
            PARTICIPANTS_TABLE,
            &[
                ("id", format!("eq.{}", participant_id)),
                ("left_at", "is.null".to_string()),
            ],
        );
        let response = self
            .client
            .patch(&url)
            .json(&serde_json::json!({ "left_at": left_at }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LiveError::store(format!(
                "Closing participant {} failed ({})",
                participant_id, status
            )));
        }
        Ok(())
    }

    async fn open_participants(&self, room_id: &RoomId) -> Result<Vec<ParticipantRecord>> {
        let url = self.table_url(
            PARTICIPANTS_TABLE,
            &[
                ("room_id", format!("eq.{}", room_id)),
                ("left_at", "is.null".to_string()),
            ],
        );
        self.fetch(&url).await
    }
}
