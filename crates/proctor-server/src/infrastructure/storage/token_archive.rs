//! Plain-text archive of token lists.
//!
//! Every hosting round writes one file the proctor can print and hand out:
//!
//! ```text
//! tokens/tokens_20261017-081500_4AHIT.txt
//!
//! Ada Lovelace;7;042917
//! Alan Turing;8;913004
//! ```
//!
//! Existing lists are never overwritten: a second round for the same class
//! within the same second gets a `_2`, `_3`, ... suffix.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::application::ports::{TokenArchive, TokenListEntry};

/// Writes token lists into a directory, one file per round.
#[derive(Debug, Clone)]
pub struct FileTokenArchive {
    dir: PathBuf,
}

impl FileTokenArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TokenArchive for FileTokenArchive {
    fn archive(&self, class_name: &str, entries: &[TokenListEntry]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let stem = format!(
            "tokens_{}_{}",
            Local::now().format("%Y%m%d-%H%M%S"),
            sanitize(class_name)
        );
        let (path, file) = create_unique(&self.dir, &stem)?;

        let mut file = std::io::BufWriter::new(file);
        for entry in entries {
            writeln!(file, "{};{};{}", entry.student_name, entry.student_id, entry.token)?;
        }
        file.flush()?;

        info!("archived {} token(s) to {}", entries.len(), path.display());
        Ok(path)
    }
}

/// Creates `<stem>.txt`, or the first free `<stem>_N.txt`.
fn create_unique(dir: &Path, stem: &str) -> std::io::Result<(PathBuf, File)> {
    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 {
            format!("{stem}.txt")
        } else {
            format!("{stem}_{attempt}.txt")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 1000 => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Keeps a class name usable as a file-name component on every platform.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "class".to_string()
    } else {
        cleaned
    }
}
