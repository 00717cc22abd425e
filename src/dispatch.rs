use crate::config::RoomVisibility;
use crate::frequency::frequency_label;
use crate::room_backend::{CreateRoomRequest, RoomBackend};
use crate::types::Frequency;
use anyhow::{Context, Result};
use std::collections::HashMap;

/// 周波数 → ルームID の対応表
///
/// 起動時に一度だけ構築し、以降は読み取り専用。
/// 実行中に更新されないのでロックは不要。
#[derive(Debug, Clone, Default)]
pub struct DispatchCache {
    rooms: HashMap<Frequency, String>,
}

impl DispatchCache {
    /// チャンネル一覧から対応表を構築
    ///
    /// 周波数毎にエイリアス `#<ラベル>:<domain>` を解決し、存在しなければ
    /// ルームを作成する。同じ周波数が複数回現れても問い合わせは1回だけ。
    ///
    /// # Errors
    ///
    /// ルームの解決・作成に1つでも失敗したらエラーを返す（部分的な対応表は返さない）。
    pub async fn build(
        backend: &dyn RoomBackend,
        frequencies: &[Frequency],
        domain: &str,
        visibility: RoomVisibility,
    ) -> Result<Self> {
        let mut rooms = HashMap::with_capacity(frequencies.len());

        for &frequency in frequencies {
            if rooms.contains_key(&frequency) {
                log::debug!("周波数 {} Hz は対応済み", frequency);
                continue;
            }

            let room_id = get_or_create_room(backend, frequency, domain, visibility)
                .await
                .with_context(|| format!("周波数 {} Hz のルームを用意できません", frequency))?;
            log::info!("周波数 {} Hz をルーム {} に対応付けました", frequency, room_id);
            rooms.insert(frequency, room_id);
        }

        Ok(Self { rooms })
    }

    /// 既存の対応表から作成
    pub fn from_map(rooms: HashMap<Frequency, String>) -> Self {
        Self { rooms }
    }

    /// 周波数に対応するルームID
    pub fn get(&self, frequency: Frequency) -> Option<&str> {
        self.rooms.get(&frequency).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// ルームのエイリアス (例: `#145.500MHz:example.org`)
pub fn room_alias(frequency: Frequency, domain: &str) -> String {
    format!("#{}:{}", frequency_label(frequency), domain)
}

/// ルーム作成リクエストを組み立て
pub fn create_room_request(frequency: Frequency, visibility: RoomVisibility) -> CreateRoomRequest {
    let label = frequency_label(frequency);
    CreateRoomRequest {
        name: format!("Recordings for {}", label),
        topic: format!("Audio recordings for frequency {}", label),
        alias_local_part: label,
        visibility: visibility.as_str().to_string(),
    }
}

/// エイリアスを解決し、なければルームを作成
pub async fn get_or_create_room(
    backend: &dyn RoomBackend,
    frequency: Frequency,
    domain: &str,
    visibility: RoomVisibility,
) -> Result<String> {
    let alias = room_alias(frequency, domain);

    if let Some(room_id) = backend.resolve_alias(&alias).await? {
        log::debug!("既存のルームを使用: {} → {}", alias, room_id);
        return Ok(room_id);
    }

    log::info!("ルームを作成します: {}", alias);
    let request = create_room_request(frequency, visibility);
    backend
        .create_room(&request)
        .await
        .with_context(|| format!("ルーム作成に失敗: {}", alias))
}
