use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::{
    BucketInfo, BucketOptions, ListOptions, ObjectEntry, ObjectStore,
    PutOptions,
};
use crate::{AvatarError, Result};

const BUCKET_NOT_FOUND: &str = "Bucket not found";

/// [`ObjectStore`] backed by the Supabase Storage REST API.
pub struct SupabaseStorage {
    client: Client,
    base_url: Url,
    bucket: String,
}

#[derive(Debug, Default, Deserialize)]
struct StorageErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct SortBy<'a> {
    column: &'a str,
    order: &'a str,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
    #[serde(rename = "sortBy", skip_serializing_if = "Option::is_none")]
    sort_by: Option<SortBy<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<&'a str>,
}

impl SupabaseStorage {
    /// `base_url` is the project URL (`https://<ref>.supabase.co`),
    /// `api_key` is sent both as `apikey` and as bearer token.
    pub fn new<S: Into<String>>(
        base_url: Url,
        api_key: &str,
        bucket: S,
    ) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(AvatarError::Config(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        let bearer = format!("Bearer {}", api_key);
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(api_key)?);
        headers.insert(AUTHORIZATION, header_value(&bearer)?);
        let client = Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            bucket: bucket.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // checked for cannot-be-a-base in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["storage", "v1"]);
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        url
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body, &self.bucket))
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        AvatarError::Config("API key is not a valid header value".to_owned())
    })
}

/// Map an unsuccessful storage response onto the crate's error taxonomy.
fn classify_error(status: StatusCode, body: &str, bucket: &str) -> AvatarError {
    let parsed: StorageErrorBody =
        serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.to_owned()
            }
        });

    if message.contains(BUCKET_NOT_FOUND) {
        return AvatarError::BucketNotFound(bucket.to_owned());
    }
    AvatarError::Store(format!("{} (status {})", message, status.as_u16()))
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(
        &self,
        prefix: &str,
        options: &ListOptions,
    ) -> Result<Vec<ObjectEntry>> {
        let request = ListRequest {
            prefix: prefix.trim_matches('/'),
            limit: options.limit,
            offset: options.offset,
            sort_by: options.sort_by_name.then_some(SortBy {
                column: "name",
                order: "asc",
            }),
            search: options.search.as_deref(),
        };
        log::debug!(
            "storage/{}: listing prefix '{}'",
            self.bucket,
            request.prefix
        );

        let response = self
            .client
            .post(self.endpoint(&["object", "list", &self.bucket]))
            .json(&request)
            .send()
            .await?;
        let entries = self
            .check(response)
            .await?
            .json::<Vec<ObjectEntry>>()
            .await?;
        Ok(entries)
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        options: &PutOptions,
    ) -> Result<()> {
        log::debug!(
            "storage/{}: uploading {} bytes to {}",
            self.bucket,
            bytes.len(),
            key
        );
        let response = self
            .client
            .post(self.endpoint(&["object", &self.bucket, key]))
            .header("content-type", options.content_type.as_str())
            .header(
                "cache-control",
                format!("max-age={}", options.cache_control),
            )
            .header("x-upsert", options.upsert.to_string())
            .body(bytes)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        log::debug!("storage/{}: deleting {}", self.bucket, key);
        let response = self
            .client
            .delete(self.endpoint(&["object", &self.bucket]))
            .json(&json!({ "prefixes": [key] }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self
            .client
            .get(self.endpoint(&["bucket"]))
            .send()
            .await?;
        let buckets = self
            .check(response)
            .await?
            .json::<Vec<BucketInfo>>()
            .await?;
        Ok(buckets)
    }

    async fn create_bucket(&self, options: &BucketOptions) -> Result<()> {
        log::info!("storage: creating bucket {}", options.name);
        let response = self
            .client
            .post(self.endpoint(&["bucket"]))
            .json(&json!({
                "id": options.name,
                "name": options.name,
                "public": options.public,
                "allowed_mime_types": options.allowed_mime_types,
                "file_size_limit": options.file_size_limit,
            }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}
