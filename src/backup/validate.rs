//! Validation functions for configuration values.
//!
//! Used through `#[validate(custom(function = ...))]` on task configuration.

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use regex::RegexBuilder;
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub fn validate_path_not_empty<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    if path.as_ref().as_os_str().is_empty() {
        return Err(ValidationError::new("EmptyPath").with_message("path must not be empty".into()));
    }

    Ok(())
}

/// The pattern must be a valid strftime pattern producing a usable file name.
pub fn validate_file_name_pattern<S: AsRef<str>>(pattern: S) -> Result<(), ValidationError> {
    let pattern = pattern.as_ref();
    if pattern.is_empty() {
        return Err(ValidationError::new("InvalidFileNamePattern")
            .with_message("file name pattern must not be empty".into()));
    }

    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ValidationError::new("InvalidFileNamePattern")
            .with_message(format!("Invalid strftime pattern: {pattern:?}").into()));
    }

    let sample = Local::now().format(pattern).to_string();
    if !is_sanitized(&sample) {
        return Err(ValidationError::new("InvalidFileNamePattern").with_message(
            format!(
                "Pattern {:?} produces invalid file name {:?}, try sanitizing like {:?}",
                pattern,
                sample,
                sanitize(&sample)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_regex<S: AsRef<str>>(pattern: S) -> Result<(), ValidationError> {
    let pattern = pattern.as_ref();
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|_| ())
        .map_err(|e| {
            ValidationError::new("InvalidRegex")
                .with_message(format!("Invalid filter {pattern:?}: {e}").into())
        })
}
