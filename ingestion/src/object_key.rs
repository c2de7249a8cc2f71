use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::media::probe::AspectClass;

const KEY_BYTES: usize = 32;
const THUMBNAIL_PREFIX: &str = "thumbnails";

#[derive(Debug, thiserror::Error)]
#[error("random source failed: {0}")]
pub struct KeyError(#[from] rand::rand_core::OsError);

/// Bucket key of an uploaded artifact: `<prefix>/<43 url-safe base64 chars>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn for_video(class: AspectClass) -> Result<Self, KeyError> {
        Ok(ObjectKey(format!("{}/{}.mp4", class.as_str(), random_token()?)))
    }

    pub fn for_thumbnail(extension: &str) -> Result<Self, KeyError> {
        Ok(ObjectKey(format!("{}/{}.{}", THUMBNAIL_PREFIX, random_token()?, extension)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public URL of the object under the given base.
    pub fn url(&self, public_base_url: &str) -> String {
        format!("{}/{}", public_base_url.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_token() -> Result<String, KeyError> {
    let mut key = [0u8; KEY_BYTES];
    OsRng.try_fill_bytes(&mut key)?;
    Ok(URL_SAFE_NO_PAD.encode(key))
}
