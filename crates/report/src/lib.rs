use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::path::{Path, PathBuf};

use bucketscan_core::{BucketFinding, ScanReport};

pub const JSON_FILE: &str = "s3_report.json";
pub const CSV_FILE: &str = "s3_report.csv";
pub const CSV_HEADER: [&str; 5] = ["Bucket", "PublicPolicy", "PublicACL", "ObjectsPublic", "FixSuggestion"];

#[derive(Debug, Clone)]
pub struct ReportPaths { pub json: PathBuf, pub csv: PathBuf }

/// Writes both report files into `out`, creating it if needed and replacing
/// earlier reports.
pub fn write_report(report: &ScanReport, out: &Path) -> Result<ReportPaths> {
    std::fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    let paths = ReportPaths { json: out.join(JSON_FILE), csv: out.join(CSV_FILE) };
    std::fs::write(&paths.json, to_json(report)?)
        .with_context(|| format!("write {}", paths.json.display()))?;
    write_csv(report, &paths.csv)?;
    Ok(paths)
}

pub fn to_json(report: &ScanReport) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    report.serialize(&mut ser)?;
    Ok(buf)
}

fn csv_row(f: &BucketFinding) -> [String; 5] {
    [
        f.bucket_name.clone(),
        f.public_policy.to_string(),
        f.public_acl.to_string(),
        f.objects_public.to_string(),
        f.unique_suggestions().join("; "),
    ]
}

fn write_csv(report: &ScanReport, path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("open {}", path.display()))?;
    w.write_record(CSV_HEADER)?;
    for f in &report.findings { w.write_record(csv_row(f))?; }
    w.flush()?;
    Ok(())
}
