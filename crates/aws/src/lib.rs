use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::Client;
use serde::{Serialize, Deserialize};

use bucketscan_core::{ObjectPage, StorageApi, StorageError};
use bucketscan_policy::{Acl, Grant, Grantee};

const NO_SUCH_BUCKET_POLICY: &str = "NoSuchBucketPolicy";

/// Where and as whom to reach S3. Unset fields fall back to the SDK default chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Settings {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    /// Custom endpoint such as LocalStack; switches to path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl S3Settings {
    /// Fields set in `other` win.
    pub fn merge(self, other: S3Settings) -> Self {
        Self {
            region: other.region.or(self.region),
            profile: other.profile.or(self.profile),
            endpoint_url: other.endpoint_url.or(self.endpoint_url),
        }
    }
}

pub async fn create_client(settings: &S3Settings) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &settings.region { loader = loader.region(Region::new(region.clone())); }
    if let Some(endpoint) = &settings.endpoint_url { loader = loader.endpoint_url(endpoint); }
    if let Some(profile) = &settings.profile { loader = loader.profile_name(profile); }
    let shared = loader.load().await;

    let conf = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(settings.endpoint_url.is_some())
        .build();
    Client::from_conf(conf)
}

/// `StorageApi` over the S3 control and data plane.
#[derive(Debug, Clone)]
pub struct S3Storage { client: Client }

impl S3Storage {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn connect(settings: &S3Settings) -> Self { Self::new(create_client(settings).await) }
}

fn service_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_owned);
    let message = err.message().map(str::to_owned)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    StorageError::service(operation, code, message)
}

fn policy_error(bucket: &str, err: StorageError) -> StorageError {
    match err {
        StorageError::Service { code: Some(code), .. } if code == NO_SUCH_BUCKET_POLICY =>
            StorageError::NoBucketPolicy { bucket: bucket.to_string() },
        other => other,
    }
}

fn to_acl(grants: &[aws_sdk_s3::types::Grant]) -> Acl {
    Acl {
        grants: grants.iter().map(|g| Grant {
            grantee: g.grantee().map(|ge| Grantee {
                kind: Some(ge.r#type().as_str().to_string()),
                id: ge.id().map(str::to_owned),
                display_name: ge.display_name().map(str::to_owned),
                uri: ge.uri().map(str::to_owned),
            }).unwrap_or_default(),
            permission: g.permission().map(|p| p.as_str().to_string()),
        }).collect(),
    }
}

fn to_page(out: &ListObjectsV2Output) -> ObjectPage {
    ObjectPage {
        keys: out.contents().iter().filter_map(|o| o.key()).map(str::to_owned).collect(),
        next: if out.is_truncated().unwrap_or(false) {
            out.next_continuation_token().map(str::to_owned)
        } else {
            None
        },
    }
}

#[async_trait]
impl StorageApi for S3Storage {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let out = self.client.list_buckets().send().await
            .map_err(|e| service_error("ListBuckets", e))?;
        Ok(out.buckets().iter().filter_map(|b| b.name()).map(str::to_owned).collect())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<String, StorageError> {
        let out = self.client.get_bucket_policy().bucket(bucket).send().await
            .map_err(|e| policy_error(bucket, service_error("GetBucketPolicy", e)))?;
        out.policy
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| StorageError::NoBucketPolicy { bucket: bucket.to_string() })
    }

    async fn get_bucket_acl(&self, bucket: &str) -> Result<Acl, StorageError> {
        let out = self.client.get_bucket_acl().bucket(bucket).send().await
            .map_err(|e| service_error("GetBucketAcl", e))?;
        Ok(to_acl(out.grants()))
    }

    async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage, StorageError> {
        let out = self.client.list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation)
            .send().await
            .map_err(|e| service_error("ListObjectsV2", e))?;
        Ok(to_page(&out))
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Acl, StorageError> {
        let out = self.client.get_object_acl().bucket(bucket).key(key).send().await
            .map_err(|e| service_error("GetObjectAcl", e))?;
        Ok(to_acl(out.grants()))
    }
}
