use crate::backup::result_error::result::Result;

use regex::{Regex, RegexBuilder};

use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::str::FromStr;

/// Case-insensitive regular expression selecting files to exclude.
///
/// The pattern is searched (not anchored) in the full file path, so `.*\.log`
/// excludes every log file at any depth. An empty pattern excludes nothing.
#[derive(Clone)]
pub struct FileFilter {
    regex: Option<Regex>,
}

impl FileFilter {
    pub fn new<S: AsRef<str>>(pattern: S) -> Result<Self> {
        let pattern = pattern.as_ref();
        if pattern.is_empty() {
            return Ok(Self::none());
        }

        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn none() -> Self {
        Self { regex: None }
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_ref().map(Regex::as_str).unwrap_or_default()
    }

    pub fn is_excluded<P: AsRef<Path>>(&self, path: P) -> bool {
        match &self.regex {
            None => false,
            Some(regex) => regex.is_match(&path.as_ref().to_string_lossy()),
        }
    }
}

impl Debug for FileFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileFilter({:?})", self.pattern())
    }
}

impl Display for FileFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.pattern())
    }
}

impl PartialEq for FileFilter {
    fn eq(&self, other: &Self) -> bool {
        self.pattern() == other.pattern()
    }
}

impl Eq for FileFilter {}

impl FromStr for FileFilter {
    type Err = crate::backup::result_error::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
