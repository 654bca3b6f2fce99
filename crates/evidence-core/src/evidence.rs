//! Evidence records: the typed view over an evidence entity's fields.
//!
//! Intake fingerprints the item's content with SHA-256; later content checks
//! re-hash the item and compare against that digest. Email messages also
//! carry their envelope headers.

use std::{
  fs::File,
  io::{self, BufRead, BufReader, Read},
  path::Path,
  str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result, entity::Fields};

// ─── Tier ────────────────────────────────────────────────────────────────────

/// Provenance tier of an evidence item, used to break weight ties between
/// contradicting facts.
///
/// Variants are declared weakest first so the derived `Ord` ranks
/// `Government` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceTier {
  Contested,
  Unverified,
  Witness,
  VerifiedThirdParty,
  Government,
}

impl EvidenceTier {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Contested => "contested",
      Self::Unverified => "unverified",
      Self::Witness => "witness",
      Self::VerifiedThirdParty => "verified_third_party",
      Self::Government => "government",
    }
  }

  /// Read the tier from an evidence entity's fields, if present and valid.
  pub fn from_fields(fields: &Fields) -> Option<Self> {
    fields.get("evidence_tier")?.as_str()?.parse().ok()
  }
}

impl FromStr for EvidenceTier {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "contested" => Ok(Self::Contested),
      "unverified" => Ok(Self::Unverified),
      "witness" => Ok(Self::Witness),
      "verified_third_party" => Ok(Self::VerifiedThirdParty),
      "government" => Ok(Self::Government),
      other => Err(Error::UnknownVariant { what: "evidence tier", value: other.to_owned() }),
    }
  }
}

// ─── Document type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
  Email,
  Pdf,
  Text,
  #[default]
  Unknown,
}

/// Extensions picked up by a directory scan.
const INTAKE_EXTENSIONS: [&str; 5] = ["eml", "msg", "pdf", "txt", "docx"];

fn extension(path: &Path) -> Option<String> {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase)
}

/// Whether a directory scan should take in the file at `path`.
pub fn is_intake_candidate(path: &Path) -> bool {
  extension(path).is_some_and(|ext| INTAKE_EXTENSIONS.contains(&ext.as_str()))
}

impl DocumentType {
  /// Classify by file extension (case-insensitive).
  pub fn from_path(path: &Path) -> Self {
    match extension(path).as_deref() {
      Some("eml" | "msg") => Self::Email,
      Some("pdf") => Self::Pdf,
      Some("txt") => Self::Text,
      _ => Self::Unknown,
    }
  }
}

// ─── Email headers ───────────────────────────────────────────────────────────

/// Envelope headers of an RFC 5322 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailHeaders {
  pub from:    Option<String>,
  pub to:      Option<String>,
  pub subject: Option<String>,
  pub date:    Option<String>,
}

impl EmailHeaders {
  /// Read the header block, which ends at the first blank line. Folded
  /// headers are unfolded and the first occurrence of each header wins.
  /// Invalid UTF-8 is replaced rather than rejected.
  pub fn read(mut reader: impl BufRead) -> io::Result<Self> {
    let mut headers = Self::default();
    let mut pending: Option<String> = None;
    let mut line = Vec::new();

    loop {
      line.clear();
      if reader.read_until(b'\n', &mut line)? == 0 {
        break;
      }
      let text = String::from_utf8_lossy(&line);
      let text = text.trim_end_matches(['\r', '\n']);
      if text.is_empty() {
        break;
      }
      if text.starts_with([' ', '\t']) {
        if let Some(header) = pending.as_mut() {
          header.push(' ');
          header.push_str(text.trim());
        }
        continue;
      }
      if let Some(header) = pending.replace(text.to_owned()) {
        headers.take(&header);
      }
    }
    if let Some(header) = pending {
      headers.take(&header);
    }
    Ok(headers)
  }

  fn take(&mut self, header: &str) {
    let Some((name, value)) = header.split_once(':') else {
      return;
    };
    let slot = match name.trim().to_ascii_lowercase().as_str() {
      "from" => &mut self.from,
      "to" => &mut self.to,
      "subject" => &mut self.subject,
      "date" => &mut self.date,
      _ => return,
    };
    let value = value.trim();
    if slot.is_none() && !value.is_empty() {
      *slot = Some(value.to_owned());
    }
  }
}

// ─── Minting ─────────────────────────────────────────────────────────────────

/// State of the external anchoring collaborator. The ledger only stores it;
/// it never feeds into hash-chain computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MintingStatus {
  #[default]
  Pending,
  Minted,
  Failed,
}

// ─── EvidenceRecord ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
  pub filename:         String,
  pub original_path:    Option<String>,
  /// SHA-256 hex digest of the content at intake.
  pub file_hash:        String,
  pub file_size:        u64,
  #[serde(default)]
  pub document_type:    DocumentType,
  pub evidence_tier:    EvidenceTier,
  #[serde(default)]
  pub minting_status:   MintingStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub block_number:     Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub transaction_hash: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub case_id:          Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email_from:       Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email_to:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email_subject:    Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email_date:       Option<String>,
}

impl EvidenceRecord {
  /// Fingerprint the file at `path` and build an intake record for it.
  /// An `.eml` message also has its envelope headers read.
  pub fn from_path(path: &Path, tier: EvidenceTier) -> Result<Self> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let file_hash = content_digest(file)?;
    let filename = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or(Error::EmptyField("filename"))?;
    let email = if extension(path).as_deref() == Some("eml") {
      EmailHeaders::read(BufReader::new(File::open(path)?))?
    } else {
      EmailHeaders::default()
    };

    Ok(Self {
      filename,
      original_path: Some(path.to_string_lossy().into_owned()),
      file_hash,
      file_size,
      document_type: DocumentType::from_path(path),
      evidence_tier: tier,
      minting_status: MintingStatus::default(),
      block_number: None,
      transaction_hash: None,
      case_id: None,
      email_from: email.from,
      email_to: email.to,
      email_subject: email.subject,
      email_date: email.date,
    })
  }

  pub fn to_fields(&self) -> Result<Fields> {
    match serde_json::to_value(self)? {
      serde_json::Value::Object(map) => Ok(map),
      _ => Err(Error::EmptyField("evidence record")),
    }
  }

  pub fn from_fields(fields: &Fields) -> Result<Self> {
    Ok(serde_json::from_value(serde_json::Value::Object(fields.clone()))?)
  }
}

/// Stream `reader` through SHA-256 and return the lowercase hex digest.
pub fn content_digest(mut reader: impl Read) -> io::Result<String> {
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 8192];
  loop {
    let n = reader.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hex::encode(hasher.finalize()))
}
