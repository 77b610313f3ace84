use std::env;
use std::fmt::Display;
use std::str::FromStr;

use url::Url;

use crate::{
    AvatarError, Result, DEFAULT_BACKEND_URL, DEFAULT_BUCKET,
    DEFAULT_MAX_DIMENSION, DEFAULT_PROBE_CONCURRENCY, MAX_UPLOAD_BYTES,
};

/// Settings shared by the storage client, the presence sources and the
/// avatar service.
#[derive(Debug, Clone)]
pub struct AvatarConfig {
    /// Supabase project URL
    pub supabase_url: Url,
    /// Service role or anon key
    pub api_key: String,
    pub bucket: String,
    /// Base of the personalities backend API
    pub backend_url: Url,
    pub max_dimension: u32,
    pub max_upload_bytes: u64,
    pub probe_concurrency: usize,
}

impl AvatarConfig {
    pub fn new(supabase_url: Url, api_key: String) -> Result<Self> {
        Ok(Self {
            supabase_url,
            api_key,
            bucket: DEFAULT_BUCKET.to_owned(),
            backend_url: Url::parse(DEFAULT_BACKEND_URL)?,
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
        })
    }

    /// Read the configuration from the process environment.
    ///
    /// `SUPABASE_URL` and one of `SUPABASE_SERVICE_ROLE_KEY` /
    /// `SUPABASE_ANON_KEY` are required, everything else has a default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = required(&lookup, "SUPABASE_URL")?;
        let api_key = lookup("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| lookup("SUPABASE_ANON_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AvatarError::Config(
                    "missing SUPABASE_SERVICE_ROLE_KEY or SUPABASE_ANON_KEY"
                        .to_owned(),
                )
            })?;

        let mut config = Self::new(supabase_url, api_key)?;
        if let Some(bucket) = lookup("AVATAR_BUCKET") {
            config.bucket = bucket;
        }
        config.backend_url =
            optional(&lookup, "BACKEND_URL", config.backend_url)?;
        config.max_dimension =
            optional(&lookup, "AVATAR_MAX_DIMENSION", config.max_dimension)?;
        config.max_upload_bytes = optional(
            &lookup,
            "AVATAR_MAX_UPLOAD_BYTES",
            config.max_upload_bytes,
        )?;
        config.probe_concurrency = optional(
            &lookup,
            "AVATAR_PROBE_CONCURRENCY",
            config.probe_concurrency,
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() || self.bucket.contains('/') {
            return Err(AvatarError::Config(format!(
                "invalid bucket name '{}'",
                self.bucket
            )));
        }
        if self.max_dimension == 0 {
            return Err(AvatarError::Config(
                "AVATAR_MAX_DIMENSION must be positive".to_owned(),
            ));
        }
        if self.probe_concurrency == 0 {
            return Err(AvatarError::Config(
                "AVATAR_PROBE_CONCURRENCY must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Public read location of the bucket,
    /// `{supabase_url}/storage/v1/object/public/{bucket}`.
    pub fn public_base_url(&self) -> Result<Url> {
        let mut url = self.supabase_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AvatarError::Config(format!(
                    "{} cannot be used as a base URL",
                    self.supabase_url
                ))
            })?
            .pop_if_empty()
            .extend(["storage", "v1", "object", "public"])
            .push(&self.bucket);
        Ok(url)
    }
}

fn required<F, T>(lookup: &F, key: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key)
        .ok_or_else(|| AvatarError::Config(format!("missing {}", key)))?;
    raw.trim()
        .parse()
        .map_err(|e| AvatarError::Config(format!("invalid {}: {}", key, e)))
}

fn optional<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(_) => required(lookup, key),
        None => {
            log::debug!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
