use tracing::{debug, error, info, info_span, warn, Instrument};

use bucketscan_policy::{is_acl_public, is_policy_text_public};

use crate::{fix_object_acl, BucketFinding, CheckOutcome, ScanReport, StorageApi, StorageError, FIX_BUCKET_ACL, FIX_POLICY};

/// Walks every visible bucket one at a time and classifies its exposure.
pub struct Scanner<S> { api: S }

impl<S: StorageApi> Scanner<S> {
    pub fn new(api: S) -> Self { Self { api } }

    /// A failure to list buckets ends the scan with no findings; per-bucket
    /// failures only cost the check that failed.
    pub async fn scan(&self) -> ScanReport {
        async {
            let mut report = ScanReport::default();
            let buckets = match self.api.list_buckets().await {
                Ok(b) => b,
                Err(e) => { error!(error = %e, "error listing buckets"); return report; }
            };
            for bucket in buckets {
                let finding = self.scan_bucket(&bucket)
                    .instrument(info_span!("bucket", bucket = %bucket))
                    .await;
                report.findings.push(finding);
            }
            report
        }
        .instrument(info_span!("scan"))
        .await
    }

    pub async fn scan_bucket(&self, bucket: &str) -> BucketFinding {
        info!(bucket = %bucket, "scanning bucket");
        let mut finding = BucketFinding::new(bucket);

        match self.check_policy(bucket).await {
            CheckOutcome::Public { .. } => {
                finding.public_policy = true;
                finding.fix_suggestions.push(FIX_POLICY.to_string());
            }
            CheckOutcome::Failed(e) => warn!(bucket = %bucket, error = %e, "error getting policy"),
            CheckOutcome::Private | CheckOutcome::NotApplicable => {}
        }

        match self.check_bucket_acl(bucket).await {
            CheckOutcome::Public { .. } => {
                finding.public_acl = true;
                finding.fix_suggestions.push(FIX_BUCKET_ACL.to_string());
            }
            CheckOutcome::Failed(e) => warn!(bucket = %bucket, error = %e, "error getting bucket acl"),
            CheckOutcome::Private | CheckOutcome::NotApplicable => {}
        }

        match self.check_objects(bucket).await {
            CheckOutcome::Public { key } => {
                finding.objects_public = true;
                finding.fix_suggestions.push(fix_object_acl(key.as_deref().unwrap_or_default()));
            }
            CheckOutcome::Failed(e) => warn!(bucket = %bucket, error = %e, "error listing objects"),
            CheckOutcome::Private | CheckOutcome::NotApplicable => {}
        }

        finding
    }

    pub async fn check_policy(&self, bucket: &str) -> CheckOutcome {
        match self.api.get_bucket_policy(bucket).await {
            Ok(raw) if is_policy_text_public(&raw) => CheckOutcome::Public { key: None },
            Ok(_) => CheckOutcome::Private,
            Err(StorageError::NoBucketPolicy { .. }) => {
                debug!(bucket = %bucket, "no bucket policy");
                CheckOutcome::NotApplicable
            }
            Err(e) => CheckOutcome::Failed(e),
        }
    }

    pub async fn check_bucket_acl(&self, bucket: &str) -> CheckOutcome {
        match self.api.get_bucket_acl(bucket).await {
            Ok(acl) if is_acl_public(&acl) => CheckOutcome::Public { key: None },
            Ok(_) => CheckOutcome::Private,
            Err(e) => CheckOutcome::Failed(e),
        }
    }

    /// Pages through the bucket and stops at the first object with a public
    /// ACL. An unreadable object ACL ends the check for the bucket.
    pub async fn check_objects(&self, bucket: &str) -> CheckOutcome {
        let mut continuation = None;
        loop {
            let page = match self.api.list_objects(bucket, continuation.take()).await {
                Ok(p) => p,
                Err(e) => return CheckOutcome::Failed(e),
            };
            for key in page.keys {
                match self.api.get_object_acl(bucket, &key).await {
                    Ok(acl) if is_acl_public(&acl) => return CheckOutcome::Public { key: Some(key) },
                    Ok(_) => {}
                    Err(e) => {
                        debug!(bucket = %bucket, key = %key, "object acl unreadable");
                        return CheckOutcome::Failed(e);
                    }
                }
            }
            match page.next {
                Some(token) => continuation = Some(token),
                None => return CheckOutcome::Private,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bucketscan_policy::{Acl, Grant, Grantee, PublicGroup};
    use crate::ObjectPage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PUBLIC_POLICY: &str = r#"{"Statement":[{"Effect":"Allow","Principal":"*","Condition":{}}]}"#;
    const PRIVATE_POLICY: &str = r#"{"Statement":[{"Effect":"Allow","Principal":{"AWS":"arn:aws:iam::123456789012:root"}}]}"#;

    fn private_acl() -> Acl {
        Acl { grants: vec![Grant { grantee: Grantee::account("owner"), permission: Some("FULL_CONTROL".into()) }] }
    }

    fn public_acl(group: PublicGroup) -> Acl {
        let mut acl = private_acl();
        acl.grants.push(Grant { grantee: Grantee::group(group.uri()), permission: Some("READ".into()) });
        acl
    }

    fn denied(op: &'static str) -> StorageError {
        StorageError::service(op, Some("AccessDenied".into()), "Access Denied")
    }

    #[derive(Default)]
    struct FakeBucket {
        policy: Option<Result<String, StorageError>>,
        acl: Option<Result<Acl, StorageError>>,
        pages: Vec<Vec<(String, Result<Acl, StorageError>)>>,
        list_error: Option<StorageError>,
    }

    #[derive(Default)]
    struct FakeStorage {
        buckets: Vec<String>,
        list_denied: bool,
        by_name: HashMap<String, FakeBucket>,
        object_acl_calls: Mutex<Vec<String>>,
    }

    impl FakeStorage {
        fn with(mut self, name: &str, bucket: FakeBucket) -> Self {
            self.buckets.push(name.to_string());
            self.by_name.insert(name.to_string(), bucket);
            self
        }
        fn bucket(&self, name: &str) -> &FakeBucket { &self.by_name[name] }
        fn acl_calls(&self) -> Vec<String> { self.object_acl_calls.lock().unwrap().clone() }
    }

    #[async_trait]
    impl StorageApi for FakeStorage {
        async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
            if self.list_denied { return Err(denied("ListBuckets")); }
            Ok(self.buckets.clone())
        }
        async fn get_bucket_policy(&self, bucket: &str) -> Result<String, StorageError> {
            self.bucket(bucket).policy.clone()
                .unwrap_or_else(|| Err(StorageError::NoBucketPolicy { bucket: bucket.to_string() }))
        }
        async fn get_bucket_acl(&self, bucket: &str) -> Result<Acl, StorageError> {
            self.bucket(bucket).acl.clone().unwrap_or_else(|| Ok(private_acl()))
        }
        async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage, StorageError> {
            let b = self.bucket(bucket);
            if let Some(e) = &b.list_error { return Err(e.clone()); }
            let ix: usize = continuation.map(|t| t.parse().unwrap()).unwrap_or(0);
            let keys: Vec<String> = b.pages.get(ix).map(|p| p.iter().map(|(k, _)| k.clone()).collect()).unwrap_or_default();
            let next = (ix + 1 < b.pages.len()).then(|| (ix + 1).to_string());
            Ok(ObjectPage { keys, next })
        }
        async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Acl, StorageError> {
            self.object_acl_calls.lock().unwrap().push(key.to_string());
            self.bucket(bucket).pages.iter().flatten()
                .find(|(k, _)| k == key)
                .map(|(_, acl)| acl.clone())
                .unwrap_or_else(|| Ok(private_acl()))
        }
    }

    fn objects(keys: &[(&str, bool)]) -> Vec<(String, Result<Acl, StorageError>)> {
        keys.iter().map(|(k, public)| {
            let acl = if *public { public_acl(PublicGroup::AllUsers) } else { private_acl() };
            (k.to_string(), Ok(acl))
        }).collect()
    }

    #[tokio::test]
    async fn public_policy_is_flagged() {
        let api = FakeStorage::default().with("alpha", FakeBucket {
            policy: Some(Ok(PUBLIC_POLICY.into())),
            pages: vec![objects(&[("a.txt", false), ("b.txt", false)])],
            ..Default::default()
        });
        let report = Scanner::new(api).scan().await;
        assert_eq!(report.findings, vec![BucketFinding {
            bucket_name: "alpha".into(),
            public_policy: true,
            public_acl: false,
            objects_public: false,
            fix_suggestions: vec![FIX_POLICY.into()],
        }]);
    }

    #[tokio::test]
    async fn missing_policy_with_public_acl() {
        let api = FakeStorage::default().with("beta", FakeBucket {
            acl: Some(Ok(public_acl(PublicGroup::AllUsers))),
            ..Default::default()
        });
        let scanner = Scanner::new(api);
        assert_eq!(scanner.check_policy("beta").await, CheckOutcome::NotApplicable);
        let f = scanner.scan_bucket("beta").await;
        assert!(!f.public_policy);
        assert!(f.public_acl);
        assert!(!f.objects_public);
        assert_eq!(f.fix_suggestions, vec![FIX_BUCKET_ACL.to_string()]);
    }

    #[tokio::test]
    async fn first_public_object_stops_enumeration() {
        let api = FakeStorage::default().with("gamma", FakeBucket {
            policy: Some(Ok(PRIVATE_POLICY.into())),
            pages: vec![
                objects(&[("readme.md", false)]),
                objects(&[("secret.txt", true), ("later.txt", true)]),
                objects(&[("never.txt", false)]),
            ],
            ..Default::default()
        });
        let scanner = Scanner::new(api);
        let f = scanner.scan_bucket("gamma").await;
        assert!(!f.public_policy && !f.public_acl);
        assert!(f.objects_public);
        assert_eq!(f.fix_suggestions, vec!["Restrict object secret.txt ACL.".to_string()]);
        assert_eq!(scanner.api.acl_calls(), vec!["readme.md", "secret.txt"]);
    }

    #[tokio::test]
    async fn bucket_listing_failure_yields_empty_report() {
        let api = FakeStorage { list_denied: true, ..Default::default() }.with("hidden", FakeBucket::default());
        assert!(Scanner::new(api).scan().await.findings.is_empty());
    }

    #[tokio::test]
    async fn findings_follow_listing_order() {
        let api = FakeStorage::default()
            .with("zeta", FakeBucket::default())
            .with("alpha", FakeBucket::default())
            .with("mu", FakeBucket::default());
        let names: Vec<_> = Scanner::new(api).scan().await.findings.into_iter().map(|f| f.bucket_name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mu"]);
    }

    #[tokio::test]
    async fn per_check_failures_do_not_abort_bucket_or_scan() {
        let api = FakeStorage::default()
            .with("broken", FakeBucket {
                policy: Some(Err(denied("GetBucketPolicy"))),
                acl: Some(Err(denied("GetBucketAcl"))),
                list_error: Some(denied("ListObjectsV2")),
                ..Default::default()
            })
            .with("open", FakeBucket {
                acl: Some(Ok(public_acl(PublicGroup::AuthenticatedUsers))),
                ..Default::default()
            });
        let scanner = Scanner::new(api);
        assert_eq!(scanner.check_policy("broken").await, CheckOutcome::Failed(denied("GetBucketPolicy")));
        assert_eq!(scanner.check_objects("broken").await, CheckOutcome::Failed(denied("ListObjectsV2")));
        let report = scanner.scan().await;
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0], BucketFinding::new("broken"));
        assert!(report.findings[1].public_acl);
    }

    #[tokio::test]
    async fn unreadable_object_acl_ends_object_check() {
        let api = FakeStorage::default().with("delta", FakeBucket {
            pages: vec![
                vec![
                    ("notes.txt".to_string(), Ok(private_acl())),
                    ("locked.bin".to_string(), Err(denied("GetObjectAcl"))),
                    ("open.bin".to_string(), Ok(public_acl(PublicGroup::AuthenticatedUsers))),
                ],
                objects(&[("later.txt", true)]),
            ],
            ..Default::default()
        });
        let scanner = Scanner::new(api);
        assert_eq!(scanner.check_objects("delta").await, CheckOutcome::Failed(denied("GetObjectAcl")));
        assert_eq!(scanner.api.acl_calls(), vec!["notes.txt", "locked.bin"]);

        let f = scanner.scan_bucket("delta").await;
        assert!(!f.objects_public);
        assert!(f.fix_suggestions.is_empty());
    }

    #[tokio::test]
    async fn malformed_policy_is_private() {
        let api = FakeStorage::default().with("eps", FakeBucket {
            policy: Some(Ok("{\"Statement\": 7".into())),
            ..Default::default()
        });
        assert_eq!(Scanner::new(api).check_policy("eps").await, CheckOutcome::Private);
    }

    #[tokio::test]
    async fn rescanning_unchanged_buckets_is_stable() {
        let api = FakeStorage::default()
            .with("alpha", FakeBucket { policy: Some(Ok(PUBLIC_POLICY.into())), ..Default::default() })
            .with("gamma", FakeBucket { pages: vec![objects(&[("secret.txt", true)])], ..Default::default() });
        let scanner = Scanner::new(api);
        assert_eq!(scanner.scan().await, scanner.scan().await);
    }
}
