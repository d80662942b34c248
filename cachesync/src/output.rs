//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use cachesync_core::{ObjectId, ObjectType, PrefetchReport, RunReport, TypeReport, TypeUsage};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `update` command.
#[derive(Debug, Serialize)]
pub struct UpdateOutput {
    pub success: bool,
    pub result_code: u8,
    pub cache_dir: String,
    #[serde(flatten)]
    pub report: RunReport,
}

impl UpdateOutput {
    pub fn text(&self) -> String {
        let mut out = String::new();
        for t in &self.report.types {
            let _ = writeln!(out, "{}", type_line(t));
        }
        if let Some(p) = &self.report.prefetch {
            let _ = writeln!(out, "{}", prefetch_line(p));
        }
        out
    }
}

fn type_line(t: &TypeReport) -> String {
    format!(
        "{}: {} listed, {} already cached, {} validated, {} evicted ({} bytes freed), {} saved",
        t.object_type,
        t.listed,
        t.already_cached,
        t.validated,
        t.evicted,
        t.bytes_freed,
        t.saved
    )
}

fn prefetch_line(p: &PrefetchReport) -> String {
    format!(
        "tree packs: {} in index, {} already cached, {} fetched",
        p.tree_packs, p.already_cached, p.fetched
    )
}

/// Output for `stat` command.
#[derive(Debug, Serialize)]
pub struct StatOutput {
    pub success: bool,
    pub result_code: u8,
    pub cache_dir: String,
    pub usage: Vec<TypeUsage>,
}

impl StatOutput {
    pub fn text(&self) -> String {
        let mut out = format!("Cache: {}\n", self.cache_dir);
        for u in &self.usage {
            let _ = writeln!(
                out,
                "{:<9} {:>8} entries {:>14} bytes",
                u.object_type, u.entries, u.bytes
            );
        }
        out
    }
}

/// Output for `ls` command.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub object_type: ObjectType,
    pub ids: Vec<ObjectId>,
}

impl LsOutput {
    pub fn text(&self) -> String {
        self.ids.iter().map(|id| format!("{}\n", id)).collect()
    }
}

/// Output for `clear` command.
#[derive(Debug, Serialize)]
pub struct ClearOutput {
    pub success: bool,
    pub result_code: u8,
    pub object_type: ObjectType,
    pub objects_deleted: usize,
    pub bytes_freed: u64,
}

impl ClearOutput {
    pub fn text(&self) -> String {
        format!(
            "Deleted {} {} entries\nFreed {} bytes\n",
            self.objects_deleted, self.object_type, self.bytes_freed
        )
    }
}
