use crate::config::MatrixConfig;
use crate::room_backend::{CreateRoomRequest, RoomBackend};
use crate::types::AudioMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

/// ログインレスポンス
#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
}

/// ルームID を返すレスポンス (alias 解決・ルーム作成)
#[derive(Debug, Deserialize)]
struct RoomIdResponse {
    room_id: String,
}

/// アップロードレスポンス
#[derive(Debug, Deserialize)]
struct UploadResponse {
    content_uri: String,
}

/// Matrix エラーレスポンス
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

/// Matrix Client-Server API バックエンド
pub struct MatrixBackend {
    base_url: Url,
    client: reqwest::Client,
    access_token: String,
    user_id: String,
    /// 送信トランザクションID用の連番
    txn_counter: AtomicU64,
}

impl MatrixBackend {
    /// パスワードでログインしてバックエンドを作成
    pub async fn login(config: &MatrixConfig) -> Result<Self> {
        let base_url = Url::parse(&config.homeserver_url)
            .with_context(|| format!("ホームサーバーURLが不正: {}", config.homeserver_url))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Matrix HTTPクライアント作成失敗")?;

        let url = endpoint(&base_url, &["_matrix", "client", "v3", "login"])?;
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": config.user },
            "password": config.password,
            "initial_device_display_name": "airband-relay",
        });

        let response = client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("Matrix ログインリクエスト失敗")?;
        let login: LoginResponse = parse_response(response)
            .await
            .context("Matrix ログイン失敗")?;

        log::info!("Matrix にログインしました: {}", login.user_id);

        Ok(Self {
            base_url,
            client,
            access_token: login.access_token,
            user_id: login.user_id,
            txn_counter: AtomicU64::new(0),
        })
    }

    /// ログイン中のユーザーID
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn next_txn_id(&self) -> String {
        let seq = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("airband-{}-{}", chrono::Utc::now().timestamp_millis(), seq)
    }
}

/// ベースURLにパスセグメントを追加 (各セグメントはエスケープされる)
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("ベースURLにパスを追加できません: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// 成功レスポンスをパース、失敗なら Matrix のエラーを含めて返す
async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(err) => anyhow::bail!("Matrix API エラー: {} - {}: {}", status, err.errcode, err.error),
            Err(_) => anyhow::bail!("Matrix API エラー: {} - {}", status, text),
        }
    }
    response
        .json::<T>()
        .await
        .context("Matrix API レスポンスパース失敗")
}

#[async_trait]
impl RoomBackend for MatrixBackend {
    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        let url = endpoint(
            &self.base_url,
            &["_matrix", "client", "v3", "directory", "room", alias],
        )?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("エイリアス解決リクエスト失敗: {}", alias))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resolved: RoomIdResponse = parse_response(response).await?;
        Ok(Some(resolved.room_id))
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> Result<String> {
        let url = endpoint(&self.base_url, &["_matrix", "client", "v3", "createRoom"])?;
        let body = json!({
            "room_alias_name": request.alias_local_part,
            "name": request.name,
            "topic": request.topic,
            "visibility": request.visibility,
        });
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("ルーム作成リクエスト失敗")?;
        let created: RoomIdResponse = parse_response(response).await?;
        Ok(created.room_id)
    }

    async fn upload(&self, data: Vec<u8>, mime_type: &str, filename: &str) -> Result<String> {
        let url = endpoint(&self.base_url, &["_matrix", "media", "v3", "upload"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .query(&[("filename", filename)])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(data)
            .send()
            .await
            .with_context(|| format!("アップロードリクエスト失敗: {}", filename))?;
        let uploaded: UploadResponse = parse_response(response).await?;
        Ok(uploaded.content_uri)
    }

    async fn send_message(&self, room_id: &str, message: &AudioMessage) -> Result<()> {
        let txn_id = self.next_txn_id();
        let url = endpoint(
            &self.base_url,
            &[
                "_matrix",
                "client",
                "v3",
                "rooms",
                room_id,
                "send",
                "m.room.message",
                &txn_id,
            ],
        )?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(message)
            .send()
            .await
            .with_context(|| format!("メッセージ送信リクエスト失敗: {}", room_id))?;
        let _: serde_json::Value = parse_response(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let url = endpoint(&self.base_url, &["_matrix", "client", "v3", "logout"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({}))
            .send()
            .await
            .context("ログアウトリクエスト失敗")?;
        let _: serde_json::Value = parse_response(response).await?;
        log::info!("Matrix からログアウトしました");
        Ok(())
    }
}
