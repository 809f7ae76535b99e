//! Output destination handling for the CLI

use butterfly_access::{Error, Result};
use std::io::Write;
use std::path::Path;

/// Output destination types
#[derive(Debug, PartialEq)]
pub enum OutputDestination {
    File(String),
    Stdout,
}

/// Resolve output destination from CLI arguments
pub fn resolve_output(region: &str, output: &str) -> OutputDestination {
    if output == "-" {
        OutputDestination::Stdout
    } else if output.is_empty() {
        // Auto-generate filename from the region name
        let name: String = region
            .trim()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let name = if name.is_empty() { "region".to_string() } else { name };
        OutputDestination::File(format!("{name}-eta.csv"))
    } else {
        OutputDestination::File(output.to_string())
    }
}

/// Behavior when the output file already exists
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum OverwriteBehavior {
    /// Prompt user for confirmation (default)
    #[default]
    Prompt,
    /// Force overwrite without prompting
    Force,
    /// Never overwrite, fail if file exists
    NeverOverwrite,
}

impl OverwriteBehavior {
    pub fn from_flags(force: bool, no_clobber: bool) -> Self {
        if force {
            Self::Force
        } else if no_clobber {
            Self::NeverOverwrite
        } else {
            Self::Prompt
        }
    }
}

/// Check if destination file exists and handle overwrite behavior
pub fn check_overwrite_permission(file_path: &str, behavior: OverwriteBehavior) -> Result<()> {
    if !Path::new(file_path).exists() {
        return Ok(());
    }

    match behavior {
        OverwriteBehavior::Force => {
            eprintln!("⚠️  Overwriting existing file: {file_path}");
            Ok(())
        }
        OverwriteBehavior::NeverOverwrite => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("File already exists: {file_path} (use --force to overwrite)"),
        ))),
        OverwriteBehavior::Prompt => {
            eprintln!("⚠️  File already exists: {file_path}");
            eprint!("Overwrite? [y/N]: ");
            std::io::stderr().flush()?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            match input.trim().to_lowercase().as_str() {
                "y" | "yes" => {
                    eprintln!("✅ Overwriting file");
                    Ok(())
                }
                _ => {
                    eprintln!("❌ Calculation cancelled");
                    Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "Calculation cancelled by user",
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_resolve_output_auto() {
        assert_eq!(
            resolve_output("Bahia Sul", ""),
            OutputDestination::File("bahia_sul-eta.csv".to_string())
        );
        assert_eq!(
            resolve_output("", ""),
            OutputDestination::File("region-eta.csv".to_string())
        );
    }

    #[test]
    fn test_resolve_output_stdout() {
        assert_eq!(resolve_output("Bahia", "-"), OutputDestination::Stdout);
    }

    #[test]
    fn test_resolve_output_custom_file() {
        assert_eq!(
            resolve_output("Bahia", "out/bahia.csv"),
            OutputDestination::File("out/bahia.csv".to_string())
        );
    }

    #[test]
    fn test_overwrite_flags() {
        assert_eq!(OverwriteBehavior::from_flags(true, false), OverwriteBehavior::Force);
        assert_eq!(OverwriteBehavior::from_flags(false, true), OverwriteBehavior::NeverOverwrite);
        assert_eq!(OverwriteBehavior::from_flags(false, false), OverwriteBehavior::Prompt);
    }

    #[test]
    fn test_existing_file_handling() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert!(check_overwrite_permission(path, OverwriteBehavior::Force).is_ok());
        assert!(check_overwrite_permission(path, OverwriteBehavior::NeverOverwrite).is_err());
        assert!(check_overwrite_permission("/nonexistent/out.csv", OverwriteBehavior::NeverOverwrite).is_ok());
    }
}
