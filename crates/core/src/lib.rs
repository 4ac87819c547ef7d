use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use thiserror::Error;

use bucketscan_policy::Acl;

mod scanner;
pub use scanner::Scanner;

pub const FIX_POLICY: &str = "Restrict bucket policy to specific IAM principals.";
pub const FIX_BUCKET_ACL: &str = "Remove public grants from bucket ACL.";

pub fn fix_object_acl(key: &str) -> String { format!("Restrict object {key} ACL.") }

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFinding {
    #[serde(rename="Bucket")]
    pub bucket_name: String,
    #[serde(rename="PublicPolicy")]
    pub public_policy: bool,
    #[serde(rename="PublicACL")]
    pub public_acl: bool,
    #[serde(rename="ObjectsPublic")]
    pub objects_public: bool,
    #[serde(rename="FixSuggestion")]
    pub fix_suggestions: Vec<String>,
}

impl BucketFinding {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self { bucket_name: bucket_name.into(), ..Default::default() }
    }

    pub fn is_exposed(&self) -> bool { self.public_policy || self.public_acl || self.objects_public }

    /// Suggestions with duplicates removed, first occurrence wins.
    pub fn unique_suggestions(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.fix_suggestions.iter()
            .map(String::as_str)
            .filter(|s| seen.insert(*s))
            .collect()
    }
}

/// Findings in bucket listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanReport { pub findings: Vec<BucketFinding> }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub buckets: usize,
    pub public_policy: usize,
    pub public_acl: usize,
    pub objects_public: usize,
}

impl ScanReport {
    pub fn summary(&self) -> ScanSummary {
        self.findings.iter().fold(ScanSummary { buckets: self.findings.len(), ..Default::default() }, |mut s, f| {
            s.public_policy += f.public_policy as usize;
            s.public_acl += f.public_acl as usize;
            s.objects_public += f.objects_public as usize;
            s
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("bucket {bucket} has no policy")]
    NoBucketPolicy { bucket: String },
    #[error("{operation} failed: {}: {message}", .code.as_deref().unwrap_or("Unknown"))]
    Service { operation: &'static str, code: Option<String>, message: String },
}

impl StorageError {
    pub fn service(operation: &'static str, code: Option<String>, message: impl Into<String>) -> Self {
        StorageError::Service { operation, code, message: message.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Continuation token for the next page, `None` on the last page.
    pub next: Option<String>,
}

/// The object storage service, reduced to the calls a scan makes.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError>;
    /// Raw policy JSON, or `StorageError::NoBucketPolicy` when none is attached.
    async fn get_bucket_policy(&self, bucket: &str) -> Result<String, StorageError>;
    async fn get_bucket_acl(&self, bucket: &str) -> Result<Acl, StorageError>;
    async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage, StorageError>;
    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Acl, StorageError>;
}

/// Result of one exposure check on a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// `key` names the offending object for object checks.
    Public { key: Option<String> },
    Private,
    /// Nothing to check, e.g. no bucket policy attached.
    NotApplicable,
    Failed(StorageError),
}

impl CheckOutcome {
    pub fn is_public(&self) -> bool { matches!(self, CheckOutcome::Public { .. }) }
}
