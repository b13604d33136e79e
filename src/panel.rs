/// Rendering surfaces for the latency label.
///
/// The supervisor only ever calls [`Panel::set_label`] and [`Panel::set_tooltip`];
/// everything about how a label is shown lives behind this trait.
use crate::parser::Sample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Receives display text from the supervisor.
pub trait Panel: Send + Sync {
    fn set_label(&self, text: &str);
    fn set_tooltip(&self, text: &str);
}

impl<P: Panel + ?Sized> Panel for Arc<P> {
    fn set_label(&self, text: &str) {
        (**self).set_label(text);
    }

    fn set_tooltip(&self, text: &str) {
        (**self).set_tooltip(text);
    }
}

/// Render a sample as panel text: `"{title} {value} ms"` or `"{title}N/A"`.
///
/// The separating space is only emitted for a non-empty title.
pub fn format_label(title: &str, sample: Sample) -> String {
    match sample {
        Sample::Latency(ms) if title.is_empty() => format!("{ms} ms"),
        Sample::Latency(ms) => format!("{title} {ms} ms"),
        Sample::Unresolved => format!("{title}N/A"),
    }
}

/// Prints each label on its own stdout line.
pub struct TerminalPanel {
    quiet: bool,
}

impl TerminalPanel {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Panel for TerminalPanel {
    fn set_label(&self, text: &str) {
        if !self.quiet {
            println!("{text}");
        }
    }

    fn set_tooltip(&self, text: &str) {
        tracing::info!(tooltip = %text, "panel tooltip updated");
    }
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct PanelStatus {
    pub pid: u32,
    pub label: String,
    pub tooltip: String,
    pub last_update: DateTime<Utc>,
}

/// Mirrors the current label and tooltip into a JSON file.
///
/// Uses atomic write pattern: write to temp file then rename.
pub struct StatusFilePanel {
    path: PathBuf,
    state: Mutex<(String, String)>,
}

impl StatusFilePanel {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new((String::new(), String::new())),
        }
    }

    /// Path to the status file.
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, label: Option<&str>, tooltip: Option<&str>) {
        // Held across the write so the last snapshot taken is the last one renamed.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(label) = label {
            state.0 = label.to_string();
        }
        if let Some(tooltip) = tooltip {
            state.1 = tooltip.to_string();
        }
        let data = PanelStatus {
            pid: std::process::id(),
            label: state.0.clone(),
            tooltip: state.1.clone(),
            last_update: Utc::now(),
        };

        if let Err(e) = self.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Write to a temporary file in the same directory, then rename so
    /// readers never see a partial write.
    fn write(&self, data: &PanelStatus) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".pingwatch.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Panel for StatusFilePanel {
    fn set_label(&self, text: &str) {
        self.update(Some(text), None);
    }

    fn set_tooltip(&self, text: &str) {
        self.update(None, Some(text));
    }
}

/// Fans every update out to several panels.
#[derive(Default)]
pub struct PanelSet {
    panels: Vec<Box<dyn Panel>>,
}

impl PanelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, panel: Box<dyn Panel>) {
        self.panels.push(panel);
    }
}

impl Panel for PanelSet {
    fn set_label(&self, text: &str) {
        for panel in &self.panels {
            panel.set_label(text);
        }
    }

    fn set_tooltip(&self, text: &str) {
        for panel in &self.panels {
            panel.set_tooltip(text);
        }
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => {
                write!(f, "failed to serialize panel status: {}", source)
            }
            StatusError::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            StatusError::Rename { from, to, source } => write!(
                f,
                "failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                source
            ),
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
