use crate::domain::phone::Msisdn;
use crate::domain::pin::{Pin, PinCheck, PinRecord};
use crate::domain::ports::{CredentialVerifier, PinRecordStoreHandle};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

const SALT_BYTES: usize = 16;

/// PIN verification with attempt counting and a timed lockout, over any
/// `PinRecordStore`.
pub struct PinVault {
    store: PinRecordStoreHandle,
    max_attempts: u32,
    lockout: Duration,
}

impl PinVault {
    pub fn new(store: PinRecordStoreHandle, max_attempts: u32, lockout: Duration) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            lockout,
        }
    }

    fn digest(salt: &str, pin: &Pin) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(pin.expose().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn fresh_record(pin: &Pin) -> PinRecord {
        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        PinRecord {
            hash: Self::digest(&salt, pin),
            salt,
            attempts: 0,
            locked_until: None,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl CredentialVerifier for PinVault {
    async fn verify(&self, phone: &Msisdn, pin: &Pin) -> Result<PinCheck> {
        let Some(mut record) = self.store.load(phone).await? else {
            return Ok(PinCheck::NotSet);
        };
        let now = Utc::now();
        if record.is_locked(now) {
            return Ok(PinCheck::Locked);
        }

        if Self::digest(&record.salt, pin) == record.hash {
            if record.attempts > 0 || record.locked_until.is_some() {
                record.attempts = 0;
                record.locked_until = None;
                record.updated_at = now;
                self.store.save(phone, record).await?;
            }
            return Ok(PinCheck::Valid);
        }

        // A lock that has run out starts a new round of attempts.
        if record.locked_until.take().is_some() {
            record.attempts = 0;
        }
        record.attempts += 1;
        record.updated_at = now;
        let check = if record.attempts >= self.max_attempts {
            record.locked_until = Some(now + self.lockout);
            warn!(%phone, attempts = record.attempts, "PIN locked");
            PinCheck::Locked
        } else {
            PinCheck::Invalid
        };
        self.store.save(phone, record).await?;
        Ok(check)
    }

    async fn set(&self, phone: &Msisdn, pin: &Pin) -> Result<()> {
        self.store.save(phone, Self::fresh_record(pin)).await?;
        info!(%phone, "PIN set");
        Ok(())
    }

    async fn change(&self, phone: &Msisdn, pin: &Pin) -> Result<()> {
        self.store.save(phone, Self::fresh_record(pin)).await?;
        info!(%phone, "PIN changed");
        Ok(())
    }
}
