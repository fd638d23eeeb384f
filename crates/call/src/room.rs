//! Rooms: identifiers, meeting links and the room API

use crate::{Error, Result};
use reqwest::{Client as HttpClient, ClientBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Path of the room-creation endpoint, relative to the API base URL
pub const CREATE_ROOM_PATH: &str = "web-rtc/create-room";

/// Opaque room identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Accept a bare id or a meeting link carrying a `room` query parameter
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidRoom("room id is empty".to_string()));
        }

        if input.contains("://") {
            let link = Url::parse(input)
                .map_err(|e| Error::InvalidRoom(format!("invalid meeting link: {}", e)))?;
            let room = link
                .query_pairs()
                .find(|(key, _)| key == "room")
                .map(|(_, value)| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    Error::InvalidRoom(format!("meeting link has no room parameter: {}", input))
                })?;
            return Ok(Self(room));
        }

        if input.chars().any(char::is_whitespace) {
            return Err(Error::InvalidRoom(format!(
                "room id contains whitespace: {}",
                input
            )));
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response of the room-creation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub room_id: String,
    /// Meeting link to share with the other participant
    pub url: String,
}

/// Client of the REST backend that mints rooms
#[derive(Debug, Clone)]
pub struct RoomApiClient {
    base: Url,
    http: HttpClient,
    auth_token: Option<String>,
}

impl RoomApiClient {
    pub fn new(api_base_url: &str, auth_token: Option<&str>) -> Result<Self> {
        let mut base = Url::parse(api_base_url)
            .map_err(|e| Error::InvalidConfig(format!("invalid api_base_url: {}", e)))?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("rtc-call/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base,
            http,
            auth_token: auth_token.map(str::to_string),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `POST {base}/web-rtc/create-room`
    pub async fn create_room(&self) -> Result<CreatedRoom> {
        let url = self
            .base
            .join(CREATE_ROOM_PATH)
            .map_err(|e| Error::InvalidConfig(format!("invalid room endpoint: {}", e)))?;
        debug!("Creating room via {}", url);

        let mut request = self.http.post(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = check_status(request.send().await?, "create room").await?;

        let room: CreatedRoom = response
            .json()
            .await
            .map_err(|e| Error::RoomApiError(format!("create room: malformed response: {}", e)))?;
        if room.room_id.is_empty() {
            return Err(Error::RoomApiError(
                "create room: response has an empty roomId".to_string(),
            ));
        }

        info!("Created room {}", room.room_id);
        Ok(room)
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::RoomApiError(format!(
        "{}: HTTP {}: {}",
        what,
        status,
        body.trim()
    )))
}
