use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value};

use crate::table::HostSnapshot;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ReportFormat {
    /// Tab-separated, one host per line.
    #[default]
    Text,
    /// A single JSON document per report.
    Json,
}

pub fn render(format: ReportFormat, hosts: &[HostSnapshot], at: DateTime<Utc>) -> String {
    match format {
        ReportFormat::Text => render_text(hosts, at),
        ReportFormat::Json => render_json(hosts, at).to_string(),
    }
}

/// Renders hosts in table order:
/// `MAC  IP  down/s  up/s  down_total  up_total  device`.
pub fn render_text(hosts: &[HostSnapshot], at: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(64 * (hosts.len() + 1));
    let _ = writeln!(
        out,
        "# {} hosts={}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        hosts.len()
    );
    for host in hosts {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            host.mac,
            host.ip,
            host.download_speed,
            host.upload_speed,
            host.download_total,
            host.upload_total,
            host.device
        );
    }
    out
}

pub fn render_json(hosts: &[HostSnapshot], at: DateTime<Utc>) -> Value {
    let entries = hosts.iter().map(host_to_json).collect();

    let mut doc = JsonMap::new();
    doc.insert(
        "timestamp".to_string(),
        Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    doc.insert("hosts".to_string(), Value::Array(entries));
    Value::Object(doc)
}

fn host_to_json(host: &HostSnapshot) -> Value {
    let mut obj = JsonMap::new();
    obj.insert("mac".to_string(), Value::String(host.mac.to_string()));
    obj.insert("ip".to_string(), Value::String(host.ip.to_string()));
    obj.insert("download_speed".to_string(), number(host.download_speed));
    obj.insert("upload_speed".to_string(), number(host.upload_speed));
    obj.insert("download_total".to_string(), number(host.download_total));
    obj.insert("upload_total".to_string(), number(host.upload_total));
    obj.insert(
        "device".to_string(),
        Value::String(host.device.as_str().to_string()),
    );
    obj.insert(
        "last_seen".to_string(),
        Value::String(host.last_seen.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Value::Object(obj)
}

fn number(n: u64) -> Value {
    Value::Number(JsonNumber::from(n))
}

/// Replaces `path` with `contents` via a sibling temp file and a rename, so a
/// reader never sees a half-written report.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use chrono::TimeZone;
    use host_traffic_common::{Direction, MacAddr};

    use super::*;
    use crate::table::{HostTable, Observation};

    fn sample() -> (Vec<HostSnapshot>, DateTime<Utc>) {
        let table = HostTable::new(4).unwrap();
        let mac = MacAddr([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
        table.observe(Observation {
            mac: &mac.0,
            ip: Ipv4Addr::new(192, 168, 1, 20),
            device: "eth1",
            direction: Direction::Inbound,
            bytes: 1514,
        });
        table.tick();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        (table.snapshot(), at)
    }

    #[test]
    fn text_lists_hosts_tab_separated() {
        let (hosts, at) = sample();
        let text = render_text(&hosts, at);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# 2024-05-01T12:00:00Z hosts=1"));
        assert_eq!(
            lines.next(),
            Some("00:1A:2B:3C:4D:5E\t192.168.1.20\t1514\t0\t1514\t0\teth1")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn json_carries_every_field() {
        let (hosts, at) = sample();
        let doc = render_json(&hosts, at);
        assert_eq!(doc["timestamp"], "2024-05-01T12:00:00Z");
        let host = &doc["hosts"][0];
        assert_eq!(host["mac"], "00:1A:2B:3C:4D:5E");
        assert_eq!(host["ip"], "192.168.1.20");
        assert_eq!(host["download_speed"], 1514);
        assert_eq!(host["upload_speed"], 0);
        assert_eq!(host["download_total"], 1514);
        assert_eq!(host["upload_total"], 0);
        assert_eq!(host["device"], "eth1");
        assert!(host["last_seen"].is_string());
    }

    #[test]
    fn empty_table_renders_header_only() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(render_text(&[], at), "# 2024-05-01T12:00:00Z hosts=0\n");
        let doc = render(ReportFormat::Json, &[], at);
        assert_eq!(doc, r#"{"hosts":[],"timestamp":"2024-05-01T12:00:00Z"}"#);
    }

    #[test]
    fn write_atomic_replaces_file() {
        let dir = std::env::temp_dir().join(format!("host-traffic-report-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hosts");
        write_atomic(&path, "first\n").unwrap();
        write_atomic(&path, "second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert!(!tmp_path(&path).exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
