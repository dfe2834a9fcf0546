//! 鍵交換ハンドシェイク
//!
//! ```text
//! Initiator                                   Responder
//!   Hello(Ephemeral, I_eph)  ── preauth ──>
//!                            <── preauth ──   Hello(Ephemeral, R_eph)
//!   (両側: ephemeral 鍵へ切り替え)
//!   Hello(Identity, I_id)    ── ephemeral ─>  pk_lookup(I_id)
//!                            <─ ephemeral ──  Hello(Identity, R_id)
//!   (両側: session 鍵へ切り替え)
//! ```
//!
//! `disable_ephemeral_k` では最初の往復を省き、Identity を preauth 鍵のまま送る。
//! 相手の鍵を拒否した場合は偽の Identity を返し、以後のフレームは開封しない。

use alloc::boxed::Box;

use a12_crypto::{
    random_u32, AuthKey, CryptoSession, KeyPair, KeyStage, PublicKey, Role, Sensitive,
};
use a12_proto::{encode_message, Hello, HelloPhase};
use a12_transport::FrameClass;

use crate::error::SessionError;
use crate::options::{PkLookup, PkResponse};
use crate::output::OutputQueue;

/// 拒否した相手から受け取り続けるバイト数の下限
const UNTRUSTED_BASE: usize = 16 * 1024;

/// 同、乱数で上乗せする幅
const UNTRUSTED_SPAN: usize = 112 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeProgress {
    Pending,
    Complete,
    /// 鍵を拒否した。指定バイト数だけ読み捨てたあと切断する
    Untrusted(usize),
}

enum Stage {
    AwaitEphemeralReply { ephemeral: KeyPair, identity: KeyPair },
    AwaitIdentityReply { identity: KeyPair },
    AwaitEphemeral,
    AwaitIdentity,
    Complete,
    Untrusted,
    Failed,
}

pub(crate) struct Handshake {
    role: Role,
    authk: AuthKey,
    ephemeral: bool,
    pk_lookup: Option<Box<dyn PkLookup>>,
    local_key: Option<Sensitive<[u8; 32]>>,
    stage: Stage,
    peer_key: Option<PublicKey>,
}

impl Handshake {
    pub fn new(
        role: Role,
        authk: AuthKey,
        ephemeral: bool,
        pk_lookup: Option<Box<dyn PkLookup>>,
        local_key: Option<Sensitive<[u8; 32]>>,
    ) -> Self {
        Handshake {
            role,
            authk,
            ephemeral,
            // 接続側は照会しない
            pk_lookup: if role == Role::Responder { pk_lookup } else { None },
            local_key,
            stage: Stage::Failed,
            peer_key: None,
        }
    }

    /// 最初のフレームを送る（接続側のみ）
    pub fn begin(&mut self, crypto: &mut CryptoSession, out: &mut OutputQueue) -> Result<(), SessionError> {
        self.stage = match self.role {
            Role::Initiator => {
                let identity = self.identity_key()?;
                if self.ephemeral {
                    let ephemeral = KeyPair::generate()?;
                    send_hello(crypto, out, HelloPhase::Ephemeral, &ephemeral.public())?;
                    Stage::AwaitEphemeralReply { ephemeral, identity }
                } else {
                    send_hello(crypto, out, HelloPhase::Identity, &identity.public())?;
                    Stage::AwaitIdentityReply { identity }
                }
            }
            Role::Responder if self.ephemeral => Stage::AwaitEphemeral,
            Role::Responder => Stage::AwaitIdentity,
        };
        Ok(())
    }

    /// ハンドシェイクフレームを 1 つ処理する
    ///
    /// 鍵の切り替えはこの中で行う。呼び出し側は次のフレームを
    /// 切り替え後の受信鍵で開封すること。
    pub fn on_frame(
        &mut self,
        body: &[u8],
        crypto: &mut CryptoSession,
        out: &mut OutputQueue,
    ) -> Result<HandshakeProgress, SessionError> {
        let hello = Hello::decode_from_bytes(body)?;
        let peer = PublicKey::from_slice(&hello.public_key)?;

        match (core::mem::replace(&mut self.stage, Stage::Failed), hello.hello_phase()) {
            (Stage::AwaitEphemeralReply { ephemeral, identity }, HelloPhase::Ephemeral) => {
                let keys = self
                    .authk
                    .derive_keys(KeyStage::Ephemeral, &ephemeral.agree(&peer), Role::Initiator)?;
                crypto.rekey(&keys);
                send_hello(crypto, out, HelloPhase::Identity, &identity.public())?;
                self.stage = Stage::AwaitIdentityReply { identity };
                Ok(HandshakeProgress::Pending)
            }
            (Stage::AwaitIdentityReply { identity }, HelloPhase::Identity) => {
                let keys = self
                    .authk
                    .derive_keys(KeyStage::Session, &identity.agree(&peer), Role::Initiator)?;
                crypto.rekey(&keys);
                self.finish(peer)
            }
            (Stage::AwaitEphemeral, HelloPhase::Ephemeral) => {
                let ephemeral = KeyPair::generate()?;
                send_hello(crypto, out, HelloPhase::Ephemeral, &ephemeral.public())?;
                let keys = self
                    .authk
                    .derive_keys(KeyStage::Ephemeral, &ephemeral.agree(&peer), Role::Responder)?;
                crypto.rekey(&keys);
                self.stage = Stage::AwaitIdentity;
                Ok(HandshakeProgress::Pending)
            }
            (Stage::AwaitIdentity, HelloPhase::Identity) => self.on_identity(peer, crypto, out),
            _ => Err(SessionError::Handshake("unexpected hello")),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::Complete)
    }

    /// 相手の identity 公開鍵（完了後）
    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer_key.as_ref()
    }

    /// 受け入れ側: 相手の identity 鍵を照会して応答する
    fn on_identity(
        &mut self,
        peer: PublicKey,
        crypto: &mut CryptoSession,
        out: &mut OutputQueue,
    ) -> Result<HandshakeProgress, SessionError> {
        let identity = match self.pk_lookup.as_mut().map(|lookup| lookup.lookup(&peer)) {
            Some(PkResponse::Reject) => {
                let decoy = KeyPair::generate()?;
                send_hello(crypto, out, HelloPhase::Identity, &decoy.public())?;
                self.stage = Stage::Untrusted;
                let budget = UNTRUSTED_BASE + random_u32()? as usize % UNTRUSTED_SPAN;
                return Ok(HandshakeProgress::Untrusted(budget));
            }
            Some(PkResponse::Accept(secret)) => KeyPair::from_secret(secret.expose()),
            None => self.identity_key()?,
        };

        send_hello(crypto, out, HelloPhase::Identity, &identity.public())?;
        let keys = self
            .authk
            .derive_keys(KeyStage::Session, &identity.agree(&peer), Role::Responder)?;
        crypto.rekey(&keys);
        self.finish(peer)
    }

    fn finish(&mut self, peer: PublicKey) -> Result<HandshakeProgress, SessionError> {
        self.peer_key = Some(peer);
        self.stage = Stage::Complete;
        Ok(HandshakeProgress::Complete)
    }

    fn identity_key(&self) -> Result<KeyPair, SessionError> {
        match &self.local_key {
            Some(secret) => Ok(KeyPair::from_secret(secret.expose())),
            None => Ok(KeyPair::generate()?),
        }
    }
}

fn send_hello(
    crypto: &mut CryptoSession,
    out: &mut OutputQueue,
    phase: HelloPhase,
    key: &PublicKey,
) -> Result<(), SessionError> {
    let body = encode_message(&Hello::new(phase, key.as_bytes()));
    out.push_sealed(crypto.send(), FrameClass::Handshake, 0, &body)?;
    Ok(())
}
