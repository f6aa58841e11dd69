use parking_lot::Mutex;

use crate::driver::ConfigError;

/// A credential picked from the pool
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Position in the pool, safe to log and to key buckets on
    pub slot: usize,
    /// Value of the `Authorization` header
    pub authorization: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("slot", &self.slot)
            .field("authorization", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
struct Cursor {
    credential: usize,
    channel: usize,
}

/// Round-robins requests over the credential and channel pools
///  so load and rate-limit exposure are spread evenly.
/// Both cursors sit behind one lock, held only for the increment.
pub struct Rotator {
    credentials: Vec<String>,
    channels: Vec<String>,
    cursor: Mutex<Cursor>,
}

impl std::fmt::Debug for Rotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotator")
            .field("credentials", &self.credentials.len())
            .field("channels", &self.channels)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Rotator {
    pub fn new(credentials: Vec<String>, channels: Vec<String>) -> Result<Self, ConfigError> {
        if credentials.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        if channels.is_empty() {
            return Err(ConfigError::MissingChannels);
        }
        Ok(Self {
            credentials,
            channels,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    pub fn next_credential(&self) -> Credential {
        let mut cursor = self.cursor.lock();
        let slot = cursor.credential;
        cursor.credential = (slot + 1) % self.credentials.len();
        Credential {
            slot,
            authorization: self.credentials[slot].clone(),
        }
    }

    pub fn next_channel(&self) -> String {
        let mut cursor = self.cursor.lock();
        let channel = self.channels[cursor.channel].clone();
        cursor.channel = (cursor.channel + 1) % self.channels.len();
        channel
    }

    pub fn credentials(&self) -> usize {
        self.credentials.len()
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }
}
