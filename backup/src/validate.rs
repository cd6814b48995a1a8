//! Restore validation gate.
//!
//! The checks run in a strict order; the first failure aborts the whole
//! restore with a specific error kind. Content checks operate on the
//! decrypted script text: deny-listed destructive/administrative keywords
//! outside comment lines, and tenant-discriminator literals belonging to a
//! foreign tenant.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BackupError, BackupResult};
use crate::model::{BackupRecord, BackupStatus, RestoreRequest, TenantId};
use crate::scoping::TENANT_DISCRIMINATOR;

/// Destructive or administrative statements never expected inside a
/// data-only tenant restore script.
static DENY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b drop \s+ (table|schema|database|owned|role|user) \b
        | \b truncate \b
        | \b alter \s+ (role|user|system|database) \b
        | \b create \s+ (role|user|database) \b
        | \b grant \b
        | \b revoke \b
        | \b dblink \b
        | \\connect \b
        | \\c \s
        ",
    )
    .expect("deny pattern is valid")
});

/// `institution_id = <n>` occurrences outside insert column lists.
static DISCRIMINATOR_EQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{TENANT_DISCRIMINATOR}\b\s*=\s*(\d+)"))
        .expect("discriminator pattern is valid")
});

/// Row inserts as emitted by the dump utility (one statement per line).
static INSERT_STMT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*INSERT\s+INTO\s+([A-Za-z0-9_."]+)\s*\(([^)]*)\)\s*VALUES\s*\((.*)\)\s*;?\s*$"#)
        .expect("insert pattern is valid")
});

fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with("--")
}

/// Blank out single-quoted string contents so literal scans cannot match
/// inside data values. `''` escapes are handled.
fn mask_quoted(line: &str) -> String {
    let mut masked = String::with_capacity(line.len());
    let mut in_quote = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quote && chars.peek() == Some(&'\'') => {
                chars.next();
            }
            '\'' => {
                in_quote = !in_quote;
                masked.push('\'');
            }
            _ if in_quote => {}
            _ => masked.push(c),
        }
    }
    masked
}

/// Step 1: restores require an explicit confirmation flag.
pub fn ensure_confirmed(request: &RestoreRequest) -> BackupResult<()> {
    if !request.confirm {
        return Err(BackupError::Validation(
            "restore requires explicit confirmation".to_string(),
        ));
    }
    Ok(())
}

/// Step 2: the record must belong to the acting tenant. Checked before any
/// other record property; a mismatch is always a hard denial.
pub fn ensure_ownership(record: &BackupRecord, tenant_id: TenantId) -> BackupResult<()> {
    if record.tenant_id != tenant_id {
        return Err(BackupError::AccessDenied(format!(
            "backup {} does not belong to institution {}",
            record.id, tenant_id
        )));
    }
    Ok(())
}

/// Step 3: only completed records are restorable.
pub fn ensure_completed(record: &BackupRecord) -> BackupResult<()> {
    if record.status != BackupStatus::Completed {
        return Err(BackupError::Validation(format!(
            "backup {} has status {:?}, only completed backups can be restored",
            record.id, record.status
        )));
    }
    Ok(())
}

/// Step 4: a record without a content digest is an insecure legacy
/// artifact and is rejected outright.
pub fn ensure_digest(record: &BackupRecord) -> BackupResult<String> {
    record.sha256.clone().ok_or_else(|| {
        BackupError::Validation(format!(
            "backup {} carries no content digest and is treated as insecure",
            record.id
        ))
    })
}

/// Step 7: non-empty script, no deny-listed keyword outside comment lines.
pub fn check_script_safety(script: &str) -> BackupResult<()> {
    if script.trim().is_empty() {
        return Err(BackupError::UnsafeContent(
            "restore script is empty".to_string(),
        ));
    }
    for (idx, line) in script.lines().enumerate() {
        if is_comment_or_blank(line) {
            continue;
        }
        let masked = mask_quoted(line);
        if let Some(found) = DENY_PATTERN.find(&masked) {
            return Err(BackupError::UnsafeContent(format!(
                "restore script line {} contains denied statement '{}'",
                idx + 1,
                found.as_str().trim()
            )));
        }
    }
    Ok(())
}

/// Step 8: every tenant-discriminator literal in the script must name the
/// acting tenant.
pub fn check_tenant_literals(script: &str, tenant_id: TenantId) -> BackupResult<()> {
    for (idx, line) in script.lines().enumerate() {
        if is_comment_or_blank(line) {
            continue;
        }

        let masked = mask_quoted(line);
        for capture in DISCRIMINATOR_EQ.captures_iter(&masked) {
            check_literal(&capture[1], tenant_id, idx)?;
        }

        if let Some(capture) = INSERT_STMT.captures(line) {
            let columns: Vec<String> = capture[2]
                .split(',')
                .map(|c| c.trim().trim_matches('"').to_lowercase())
                .collect();
            let Some(position) = columns.iter().position(|c| c == TENANT_DISCRIMINATOR) else {
                continue;
            };
            let values = split_tuple(&capture[3]);
            if let Some(value) = values.get(position) {
                check_literal(value.trim().trim_matches('\''), tenant_id, idx)?;
            }
        }
    }
    Ok(())
}

fn check_literal(raw: &str, tenant_id: TenantId, line_idx: usize) -> BackupResult<()> {
    match raw.parse::<TenantId>() {
        Ok(found) if found == tenant_id => Ok(()),
        Ok(found) => Err(BackupError::UnsafeContent(format!(
            "restore script line {} references institution {} instead of {}",
            line_idx + 1,
            found,
            tenant_id
        ))),
        // Non-numeric discriminator values are left to the storage engine.
        Err(_) => Ok(()),
    }
}

/// Split a VALUES tuple body on top-level commas, honoring single-quoted
/// strings (with `''` escapes) and nested parentheses.
fn split_tuple(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth: u32 = 0;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quote && chars.peek() == Some(&'\'') => {
                current.push(c);
                current.push('\'');
                chars.next();
            }
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
