use crate::types::AudioMessage;
use anyhow::Result;
use async_trait::async_trait;

/// ルーム作成リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoomRequest {
    /// エイリアスのローカル部 (例: `145.500MHz`)
    pub alias_local_part: String,
    /// 表示名
    pub name: String,
    /// トピック
    pub topic: String,
    /// "public" / "private"
    pub visibility: String,
}

/// メッセージングサーバーとの通信を抽象化する共通トレイト
///
/// ルームの解決・作成、メディアのアップロード、メッセージ送信を行う。
/// リトライやタイムアウトは実装側の責務。
#[async_trait]
pub trait RoomBackend: Send + Sync {
    /// エイリアス (例: `#145.500MHz:example.org`) をルームIDに解決
    ///
    /// # Returns
    /// 存在しない場合は `Ok(None)`
    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>>;

    /// ルームを作成してルームIDを返す
    async fn create_room(&self, request: &CreateRoomRequest) -> Result<String>;

    /// バイナリをアップロードしてコンテンツURI (mxc://...) を返す
    async fn upload(&self, data: Vec<u8>, mime_type: &str, filename: &str) -> Result<String>;

    /// ルームにメッセージを送信
    async fn send_message(&self, room_id: &str, message: &AudioMessage) -> Result<()>;

    /// 接続を閉じる
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 呼び出し記録
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Resolve(String),
        Create(CreateRoomRequest),
        Upload {
            mime_type: String,
            filename: String,
            size: usize,
        },
        Send {
            room_id: String,
            body: String,
            duration_ms: u64,
            waveform_len: usize,
        },
        Close,
    }

    /// テスト用のインメモリ実装
    #[derive(Default)]
    pub struct MockBackend {
        /// 既存のエイリアス → ルームID
        pub existing: Mutex<HashMap<String, String>>,
        pub calls: Mutex<Vec<Call>>,
        pub fail_create: bool,
        pub fail_upload: bool,
        pub fail_send: bool,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_room(self, alias: &str, room_id: &str) -> Self {
            self.existing
                .lock()
                .unwrap()
                .insert(alias.to_string(), room_id.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl RoomBackend for MockBackend {
        async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
            self.record(Call::Resolve(alias.to_string()));
            Ok(self.existing.lock().unwrap().get(alias).cloned())
        }

        async fn create_room(&self, request: &CreateRoomRequest) -> Result<String> {
            self.record(Call::Create(request.clone()));
            if self.fail_create {
                anyhow::bail!("M_ROOM_IN_USE: Room alias already taken");
            }
            Ok(format!("!{}:test", request.alias_local_part))
        }

        async fn upload(&self, data: Vec<u8>, mime_type: &str, filename: &str) -> Result<String> {
            self.record(Call::Upload {
                mime_type: mime_type.to_string(),
                filename: filename.to_string(),
                size: data.len(),
            });
            if self.fail_upload {
                anyhow::bail!("M_TOO_LARGE: file too large");
            }
            Ok(format!("mxc://test/{}", filename))
        }

        async fn send_message(&self, room_id: &str, message: &AudioMessage) -> Result<()> {
            self.record(Call::Send {
                room_id: room_id.to_string(),
                body: message.body.clone(),
                duration_ms: message.audio.duration,
                waveform_len: message.audio.waveform.len(),
            });
            if self.fail_send {
                anyhow::bail!("M_FORBIDDEN: not in room");
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.record(Call::Close);
            Ok(())
        }
    }
}
