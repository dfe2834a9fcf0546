//! 鍵導出
//!
//! 共有シークレット → AuthKey → 方向別のフレーム鍵、という 2 段階の導出。
//! いずれも HKDF-SHA256。

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::exchange::SharedSecret;
use crate::sensitive::Sensitive;
use crate::Role;

/// シークレット未指定時に使う既定値
pub const DEFAULT_SECRET: &str = "SETECASTRONOMY";

/// plain_kdf の salt（プロトコル固定値）
const KDF_SALT: &[u8] = b"arcan-a12 plain kdf salt v1";

/// AuthKey の長さ
pub const AUTH_KEY_LEN: usize = 64;

/// 1 方向分のフレーム鍵（AES-256）
pub type CipherKey = Sensitive<[u8; 32]>;

/// どの段階の鍵を導出するか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStage {
    /// ハンドシェイク最初のフレーム（AuthKey のみ）
    Preauth,
    /// 一時鍵の DH 結果から導出
    Ephemeral,
    /// identity 鍵の DH 結果から導出
    Session,
}

impl KeyStage {
    fn label(&self) -> &'static [u8] {
        match self {
            KeyStage::Preauth => b"a12 preauth",
            KeyStage::Ephemeral => b"a12 ephemeral",
            KeyStage::Session => b"a12 session",
        }
    }
}

/// 送信・受信の 2 方向分の鍵
#[derive(Debug, Clone)]
pub struct DirectionKeys {
    /// 自分 → 相手
    pub send: CipherKey,
    /// 相手 → 自分
    pub recv: CipherKey,
}

/// 共有シークレットから導出した認証鍵
///
/// 最初の鍵交換を認証するためだけに使う。
#[derive(Debug, Clone)]
pub struct AuthKey(Sensitive<[u8; AUTH_KEY_LEN]>);

/// 低エントロピーの共有シークレットから AuthKey を導出する
///
/// `secret` が `None` の場合は [`DEFAULT_SECRET`] を使う。
pub fn plain_kdf(secret: Option<&str>) -> Result<AuthKey, CryptoError> {
    let secret = secret.unwrap_or(DEFAULT_SECRET);
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());

    let mut key = Sensitive::<[u8; AUTH_KEY_LEN]>::zeroed();
    hk.expand(b"a12 authk", key.expose_mut())
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(AuthKey(key))
}

impl AuthKey {
    /// 生の 64 バイトから構築する（鍵ストアから読み戻した場合など）
    pub fn from_bytes(bytes: [u8; AUTH_KEY_LEN]) -> Self {
        AuthKey(Sensitive::new(bytes))
    }

    /// 鍵素材への参照
    pub fn expose(&self) -> &[u8; AUTH_KEY_LEN] {
        self.0.expose()
    }

    /// ハンドシェイク前のフレーム鍵を導出する
    pub fn preauth_keys(&self, role: Role) -> Result<DirectionKeys, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, &self.0.expose()[..]);
        split_directions(&hk, KeyStage::Preauth, role)
    }

    /// DH 共有値からフレーム鍵を導出する
    ///
    /// AuthKey を salt に使うため、共有シークレットを知らない中間者は
    /// DH 値を知っていても同じ鍵に到達できない。
    pub fn derive_keys(
        &self,
        stage: KeyStage,
        shared: &SharedSecret,
        role: Role,
    ) -> Result<DirectionKeys, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(&self.0.expose()[..]), shared.as_bytes());
        split_directions(&hk, stage, role)
    }
}

/// i2r / r2i の 2 つの鍵を展開し、役割に応じて send/recv に割り当てる
fn split_directions(
    hk: &Hkdf<Sha256>,
    stage: KeyStage,
    role: Role,
) -> Result<DirectionKeys, CryptoError> {
    let i2r = expand_key(hk, stage, b" i2r")?;
    let r2i = expand_key(hk, stage, b" r2i")?;

    Ok(match role {
        Role::Initiator => DirectionKeys { send: i2r, recv: r2i },
        Role::Responder => DirectionKeys { send: r2i, recv: i2r },
    })
}

fn expand_key(hk: &Hkdf<Sha256>, stage: KeyStage, suffix: &[u8]) -> Result<CipherKey, CryptoError> {
    let mut key = CipherKey::zeroed();
    hk.expand_multi_info(&[stage.label(), suffix], key.expose_mut())
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(key)
}
