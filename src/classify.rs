use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::AppError;

/// The two buckets an uploaded file can land in. `Yaml` is the catch-all
/// bucket; the name is historical and says nothing about the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Yaml,
    Apworld,
}

impl FileCategory {
    pub const ALL: [FileCategory; 2] = [FileCategory::Yaml, FileCategory::Apworld];

    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Yaml => "yaml",
            FileCategory::Apworld => "apworld",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" => Ok(FileCategory::Yaml),
            "apworld" => Ok(FileCategory::Apworld),
            other => Err(AppError::BadRequest(format!("Invalid file type: {other}"))),
        }
    }
}

/// Route a filename to its category. Case-insensitive match on the one
/// reserved extension; everything else, including extensionless names,
/// is general.
pub fn classify(filename: &str) -> FileCategory {
    match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("apworld") => FileCategory::Apworld,
        _ => FileCategory::Yaml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apworld_extension_is_case_insensitive() {
        assert_eq!(classify("x.apworld"), FileCategory::Apworld);
        assert_eq!(classify("x.APWORLD"), FileCategory::Apworld);
        assert_eq!(classify("x.ApWorld"), FileCategory::Apworld);
    }

    #[test]
    fn everything_else_is_general() {
        assert_eq!(classify("x.yaml"), FileCategory::Yaml);
        assert_eq!(classify("x.zip"), FileCategory::Yaml);
        assert_eq!(classify("x"), FileCategory::Yaml);
        assert_eq!(classify(".apworld"), FileCategory::Yaml); // no stem, no extension
        assert_eq!(classify("x.apworld.txt"), FileCategory::Yaml);
    }

    #[test]
    fn category_round_trips_through_str() {
        for category in FileCategory::ALL {
            assert_eq!(category.as_str().parse::<FileCategory>().unwrap(), category);
        }
        assert!("exe".parse::<FileCategory>().is_err());
    }
}
