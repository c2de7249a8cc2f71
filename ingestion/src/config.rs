use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 4096 * 1024 * 1024; // 4gb

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub s3_bucket: String,
    /// CDN or bucket base that public video URLs are built from.
    pub public_base_url: String,
    pub use_path_style_buckets: bool,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    /// When set, responses carry presigned GET URLs valid for this long.
    pub presign_expiry: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let use_path_style_buckets = match lookup("USE_PATH_STYLE_BUCKETS") {
            Some(var) => match var.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "USE_PATH_STYLE_BUCKETS",
                        value: var,
                    })
                }
            },
            None => false,
        };

        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(var) => var.parse().map_err(|_| ConfigError::Invalid {
                name: "MAX_UPLOAD_BYTES",
                value: var,
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let presign_expiry = match lookup("S3_PRESIGN_EXPIRY_SECS").filter(|var| !var.is_empty()) {
            Some(var) => match var.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "S3_PRESIGN_EXPIRY_SECS",
                        value: var,
                    })
                }
            },
            None => None,
        };

        Ok(Config {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_issuer: lookup("JWT_ISSUER").filter(|issuer| !issuer.is_empty()),
            s3_bucket: required("S3_BUCKET")?,
            public_base_url: required("S3_PUBLIC_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            use_path_style_buckets,
            upload_dir: lookup("UPLOAD_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            max_upload_bytes,
            ffprobe_path: lookup("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()),
            ffmpeg_path: lookup("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            presign_expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("DATABASE_URL", "postgres://localhost/tubely"),
        ("JWT_SECRET", "secret"),
        ("S3_BUCKET", "tubely-videos"),
        ("S3_PUBLIC_BASE_URL", "https://cdn.example.com/"),
    ];

    #[test]
    fn defaults_are_applied() {
        let config = Config::from_lookup(lookup_from(&REQUIRED)).unwrap();

        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.public_base_url, "https://cdn.example.com");
        assert!(!config.use_path_style_buckets);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.ffprobe_path, "ffprobe");
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.jwt_issuer, None);
        assert_eq!(config.presign_expiry, None);
    }

    #[test]
    fn missing_secret_is_reported() {
        let vars: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != "JWT_SECRET").collect();
        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();

        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("USE_PATH_STYLE_BUCKETS", "TRUE"),
            ("MAX_UPLOAD_BYTES", "1048576"),
            ("UPLOAD_TEMP_DIR", "/var/tmp/tubely"),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("S3_PRESIGN_EXPIRY_SECS", "900"),
        ]);
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();

        assert!(config.use_path_style_buckets);
        assert_eq!(config.max_upload_bytes, 1048576);
        assert_eq!(config.upload_dir, PathBuf::from("/var/tmp/tubely"));
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.presign_expiry, Some(Duration::from_secs(900)));
    }

    #[test]
    fn malformed_size_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("MAX_UPLOAD_BYTES", "lots"));

        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_UPLOAD_BYTES", .. }));

        let mut vars = REQUIRED.to_vec();
        vars.push(("S3_PRESIGN_EXPIRY_SECS", "0"));
        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "S3_PRESIGN_EXPIRY_SECS", .. }));
    }
}
