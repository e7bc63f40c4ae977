//! Prometheus text exposition of the rolling log.
//!
//! Rendering walks the log newest first. Every entry younger than the
//! backlog window is shown; older entries are only shown if they belong to
//! the most recent event of their identity. Nothing older than the max age
//! is ever shown, compacted or not.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::config::RelayConfig;
use crate::identity::{IdValue, Identity};
use crate::store::{LogEntry, LogSnapshot};

/// Content type of a rendered snapshot.
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Renders log snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRenderer {
    pub max_age_secs: f64,
    pub backlog_secs: f64,
    pub export_timestamps: bool,
}

impl Default for MetricsRenderer {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl MetricsRenderer {
    pub fn new(max_age_secs: f64, backlog_secs: f64, export_timestamps: bool) -> Self {
        Self {
            max_age_secs,
            backlog_secs,
            export_timestamps,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.max_age_secs,
            config.backlog_secs,
            config.export_timestamps,
        )
    }

    /// Entries to emit at `now`, newest first.
    ///
    /// Without timestamps several samples of one series cannot be told
    /// apart, so only the latest event per identity is selected and each
    /// series appears once.
    pub fn select<'a>(&self, log: &'a LogSnapshot, now: f64) -> Vec<&'a LogEntry> {
        let mut latest: HashMap<&Identity, f64> = HashMap::new();
        let mut emitted_series: HashSet<(&str, &Identity)> = HashSet::new();
        let mut selected = Vec::new();

        for entry in log.iter().rev() {
            let age = now - entry.timestamp;
            if age >= self.max_age_secs {
                break;
            }

            let newest = *latest
                .entry(&*entry.identity)
                .or_insert(entry.timestamp);
            let is_latest = entry.timestamp >= newest;

            if self.export_timestamps {
                if age <= self.backlog_secs || is_latest {
                    selected.push(entry);
                }
            } else if is_latest
                && emitted_series.insert((&*entry.variable, &*entry.identity))
            {
                selected.push(entry);
            }
        }

        selected
    }

    /// Render the snapshot at `now`.
    pub fn render(&self, log: &LogSnapshot, now: f64) -> String {
        let selected = self.select(log, now);

        let mut groups: BTreeMap<Cow<'_, str>, Vec<&LogEntry>> = BTreeMap::new();
        for entry in selected {
            groups
                .entry(sanitize_metric_name(&entry.variable))
                .or_default()
                .push(entry);
        }

        Exposition {
            groups: &groups,
            export_timestamps: self.export_timestamps,
        }
        .to_string()
    }
}

struct Exposition<'a> {
    groups: &'a BTreeMap<Cow<'a, str>, Vec<&'a LogEntry>>,
    export_timestamps: bool,
}

impl fmt::Display for Exposition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels: HashMap<&Identity, String> = HashMap::new();

        for (name, entries) in self.groups {
            for entry in entries {
                let tags = labels
                    .entry(&*entry.identity)
                    .or_insert_with(|| label_set(&entry.identity));

                write!(f, "{}{{{}}} {}", name, tags, format_value(entry.value))?;
                if self.export_timestamps {
                    write!(f, " {}", (entry.timestamp * 1000.0) as i64)?;
                }
                f.write_str("\n")?;
            }
        }
        Ok(())
    }
}

/// `name="value"` pairs for the non-absent identity fields.
pub fn label_set(identity: &Identity) -> String {
    identity
        .present()
        .map(|(name, value)| {
            let text = match value {
                IdValue::Text(s) => escape_label_value(s).into_owned(),
                other => other.to_string(),
            };
            format!("{}=\"{}\"", name, text)
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Map a field name onto the metric name alphabet `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn sanitize_metric_name(name: &str) -> Cow<'_, str> {
    let valid = |i: usize, c: char| {
        c.is_ascii_alphabetic() || c == '_' || c == ':' || (i > 0 && c.is_ascii_digit())
    };

    if !name.is_empty() && name.chars().enumerate().all(|(i, c)| valid(i, c)) {
        return Cow::Borrowed(name);
    }

    let mut out = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) || name.is_empty() {
        out.push('_');
    }
    for (i, c) in name.chars().enumerate() {
        out.push(if valid(i, c) || c.is_ascii_digit() { c } else { '_' });
    }
    Cow::Owned(out)
}

/// Escape `\`, `"` and newlines in a label value.
pub fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| matches!(c, '\\' | '"' | '\n')) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Sample value in exposition syntax.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RollingLog;
    use std::sync::Arc;

    fn acme(id: i64) -> Arc<Identity> {
        Arc::new(Identity::default().with_text("model", "Acme-T1").with_int("id", id))
    }

    fn log_with(entries: &[(f64, &Arc<Identity>, &str, f64)]) -> RollingLog {
        let mut log = RollingLog::new();
        for (ts, id, var, value) in entries {
            log.append(vec![LogEntry::new(*ts, Arc::clone(id), *var, *value)]);
        }
        log
    }

    #[test]
    fn test_render_backlog_burst() {
        let id = acme(7);
        let log = log_with(&[
            (1000.0, &id, "temperature_C", 21.5),
            (1005.0, &id, "temperature_C", 21.7),
        ]);

        let out = MetricsRenderer::default().render(&log.snapshot(), 1006.0);
        assert_eq!(
            out,
            "temperature_C{model=\"Acme-T1\",id=\"7\"} 21.7 1005000\n\
             temperature_C{model=\"Acme-T1\",id=\"7\"} 21.5 1000000\n"
        );
    }

    #[test]
    fn test_render_only_latest_outside_backlog() {
        let id = acme(7);
        let log = log_with(&[
            (1000.0, &id, "temperature_C", 20.0),
            (1010.0, &id, "temperature_C", 21.0),
        ]);

        // Both are older than the 60s backlog: only the latest remains.
        let snapshot = log.snapshot();
        let selected = MetricsRenderer::default().select(&snapshot, 1200.0);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].value, 21.0);
    }

    #[test]
    fn test_render_latest_event_keeps_all_fields() {
        let id = acme(7);
        let mut log = RollingLog::new();
        log.append(vec![
            LogEntry::new(1000.0, Arc::clone(&id), "temperature_C", 20.0),
            LogEntry::new(1000.0, Arc::clone(&id), "humidity", 40.0),
        ]);

        let out = MetricsRenderer::default().render(&log.snapshot(), 1200.0);
        assert!(out.contains("humidity{"));
        assert!(out.contains("temperature_C{"));
    }

    #[test]
    fn test_render_max_age_cutoff() {
        let id = acme(7);
        let log = log_with(&[(1000.0, &id, "temperature_C", 20.0)]);
        let renderer = MetricsRenderer::default();

        assert_eq!(renderer.select(&log.snapshot(), 1299.0).len(), 1);
        assert!(renderer.render(&log.snapshot(), 1300.5).is_empty());
    }

    #[test]
    fn test_render_window_is_half_open() {
        let id = acme(7);
        let log = log_with(&[(1000.0, &id, "temperature_C", 21.5)]);
        let renderer = MetricsRenderer::default();

        assert_eq!(renderer.select(&log.snapshot(), 1000.0).len(), 1);
        assert_eq!(renderer.select(&log.snapshot(), 1299.999).len(), 1);
        assert!(renderer.render(&log.snapshot(), 1300.0).is_empty());
    }

    #[test]
    fn test_render_groups_by_variable() {
        let a = acme(1);
        let b = acme(2);
        let log = log_with(&[
            (1000.0, &a, "temperature_C", 20.0),
            (1001.0, &b, "humidity", 50.0),
            (1002.0, &b, "temperature_C", 22.0),
        ]);

        let out = MetricsRenderer::default().render(&log.snapshot(), 1003.0);
        let names: Vec<_> = out
            .lines()
            .map(|line| line.split('{').next().unwrap())
            .collect();
        assert_eq!(names, ["humidity", "temperature_C", "temperature_C"]);
    }

    #[test]
    fn test_render_without_timestamps() {
        let id = acme(7);
        let log = log_with(&[
            (1000.0, &id, "temperature_C", 21.5),
            (1005.0, &id, "temperature_C", 21.7),
        ]);

        let renderer = MetricsRenderer::new(300.0, 60.0, false);
        let out = renderer.render(&log.snapshot(), 1006.0);
        assert_eq!(out, "temperature_C{model=\"Acme-T1\",id=\"7\"} 21.7\n");
    }

    #[test]
    fn test_render_does_not_mutate() {
        let id = acme(7);
        let log = log_with(&[(1.0, &id, "temperature_C", 21.5)]);
        let _ = MetricsRenderer::default().render(&log.snapshot(), 10_000.0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_label_set_escaping() {
        let id = Identity::default().with_text("model", "a\"b\\c").with_int("channel", 2);
        assert_eq!(label_set(&id), "model=\"a\\\"b\\\\c\",channel=\"2\"");
        assert_eq!(label_set(&Identity::default()), "");
    }

    #[test]
    fn test_sanitize_metric_name() {
        assert_eq!(sanitize_metric_name("temperature_C"), "temperature_C");
        assert_eq!(sanitize_metric_name("wind-dir deg"), "wind_dir_deg");
        assert_eq!(sanitize_metric_name("1st"), "_1st");
        assert_eq!(sanitize_metric_name(""), "_");
        assert!(matches!(sanitize_metric_name("ok"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(21.5), "21.5");
        assert_eq!(format_value(7.0), "7");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
