//! Paths into the block tree and the identifier grammars they are built from.
//!
//! A path is `[mri, field, sub_field, ...]`. Its string form joins the
//! components with dots, which is why dots are illegal inside identifiers.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref CAMEL_RE: Regex = Regex::new(r"^[a-z][a-zA-Z0-9]*$").unwrap();
    static ref PART_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();
    static ref MRI_RE: Regex = Regex::new(r"^[A-Za-z0-9_\-:]+$").unwrap();
    static ref COMPONENT_RE: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*|[0-9]+)$").unwrap();
}

/// Errors related to path parsing and identifier validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// A path component is not a valid identifier.
    #[error("invalid path component '{component}' at position {position}: {message}")]
    InvalidComponent {
        component: String,
        position: usize,
        message: String,
    },
    /// The path as a whole is invalid.
    #[error("invalid path: {message}")]
    InvalidPath { message: String },
}

/// Check a field name is camelCase: `[a-z][a-zA-Z0-9]*`.
pub fn validate_field_name(name: &str) -> Result<(), PathError> {
    if CAMEL_RE.is_match(name) {
        Ok(())
    } else {
        Err(PathError::InvalidComponent {
            component: name.to_string(),
            position: 1,
            message: "field names must be camelCase".to_string(),
        })
    }
}

/// Check a part name: letters, digits, `_` and `-`.
pub fn validate_part_name(name: &str) -> Result<(), PathError> {
    if PART_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(PathError::InvalidComponent {
            component: name.to_string(),
            position: 0,
            message: "part names may only contain letters, digits, '_' and '-'".to_string(),
        })
    }
}

/// Check an MRI: letters, digits, `_`, `-` and `:`.
pub fn validate_mri(mri: &str) -> Result<(), PathError> {
    if MRI_RE.is_match(mri) {
        Ok(())
    } else {
        Err(PathError::InvalidComponent {
            component: mri.to_string(),
            position: 0,
            message: "MRIs may only contain letters, digits, '_', '-' and ':'".to_string(),
        })
    }
}

/// Turn a camelCase name into a Title Case label.
///
/// ```rust
/// use malcolm_core::camel_to_title;
///
/// assert_eq!(camel_to_title("completedSteps"), "Completed Steps");
/// assert_eq!(camel_to_title("axesToMove"), "Axes To Move");
/// ```
pub fn camel_to_title(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else {
            if c.is_uppercase() {
                out.push(' ');
            }
            out.push(c);
        }
    }
    out
}

/// A validated path into the block tree.
///
/// The first component is an MRI; the rest are field or model member names
/// (or numeric strings for array indexing).
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Path {
    pub components: Vec<String>,
}

impl Path {
    /// Path to a whole block.
    pub fn block(mri: &str) -> Result<Self, PathError> {
        validate_mri(mri)?;
        Ok(Path {
            components: vec![mri.to_string()],
        })
    }

    /// Parse a dot-separated path string.
    ///
    /// ```rust
    /// use malcolm_core::Path;
    ///
    /// let path = Path::parse("TEST:BLOCK.completedSteps.value").unwrap();
    /// assert_eq!(path.mri(), "TEST:BLOCK");
    /// assert_eq!(path.len(), 3);
    /// ```
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::InvalidPath {
                message: "a path needs at least an MRI".to_string(),
            });
        }
        Self::try_from_components(s.split('.').map(str::to_string).collect())
    }

    /// Try to create a path from components, validating each.
    pub fn try_from_components(components: Vec<String>) -> Result<Self, PathError> {
        let Some(mri) = components.first() else {
            return Err(PathError::InvalidPath {
                message: "a path needs at least an MRI".to_string(),
            });
        };
        validate_mri(mri)?;
        for (i, component) in components.iter().enumerate().skip(1) {
            Self::validate_component(component, i)?;
        }
        Ok(Path { components })
    }

    fn validate_component(component: &str, position: usize) -> Result<(), PathError> {
        if COMPONENT_RE.is_match(component) {
            Ok(())
        } else {
            Err(PathError::InvalidComponent {
                component: component.to_string(),
                position,
                message: "must be an identifier or an array index".to_string(),
            })
        }
    }

    /// The MRI this path starts with.
    pub fn mri(&self) -> &str {
        &self.components[0]
    }

    /// The endpoint name, if the path goes below the block.
    pub fn endpoint(&self) -> Option<&str> {
        self.components.get(1).map(String::as_str)
    }

    /// Everything after the MRI.
    pub fn tail(&self) -> &[String] {
        &self.components[1..]
    }

    /// Get the number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// A validated path is never empty; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Iterate over components.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.components.iter()
    }

    /// Append one component.
    #[must_use]
    pub fn child(&self, name: &str) -> Path {
        let mut components = self.components.clone();
        components.push(name.to_string());
        Path { components }
    }

    /// Check if this path has the given prefix.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        prefix.components.len() <= self.components.len()
            && prefix.components == self.components[..prefix.components.len()]
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("."))
    }
}

impl std::ops::Index<usize> for Path {
    type Output = String;

    fn index(&self, i: usize) -> &Self::Output {
        &self.components[i]
    }
}

impl TryFrom<Vec<String>> for Path {
    type Error = PathError;

    fn try_from(components: Vec<String>) -> Result<Self, Self::Error> {
        Path::try_from_components(components)
    }
}

impl TryFrom<&[&str]> for Path {
    type Error = PathError;

    fn try_from(components: &[&str]) -> Result<Self, Self::Error> {
        Path::try_from_components(components.iter().map(|s| s.to_string()).collect())
    }
}

/// Macro for creating paths from literals.
///
/// ```rust
/// use malcolm_core::path;
///
/// let p = path!("BLOCK.attr.value");
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! path {
    ($s:expr) => {
        $crate::Path::parse($s).expect("invalid path literal")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_paths() {
        assert_eq!(Path::parse("blk").unwrap().len(), 1);
        assert_eq!(Path::parse("blk.attr").unwrap().len(), 2);
        assert_eq!(Path::parse("blk.attr.value").unwrap().len(), 3);
        assert!(Path::parse("").is_err());
    }

    #[test]
    fn mri_allows_dash_underscore_colon() {
        let p = Path::parse("BL45P-ML-SCAN_01:DET.state").unwrap();
        assert_eq!(p.mri(), "BL45P-ML-SCAN_01:DET");
        assert_eq!(p.endpoint(), Some("state"));
    }

    #[test]
    fn invalid_components_rejected() {
        assert!(Path::parse("blk..attr").is_err());
        assert!(Path::parse("blk.bad-name").is_err());
        assert!(Path::parse("blk.has space").is_err());
        assert!(Path::parse("bad mri.attr").is_err());
    }

    #[test]
    fn field_names_are_camel_case() {
        assert!(validate_field_name("completedSteps").is_ok());
        assert!(validate_field_name("x2").is_ok());
        assert!(validate_field_name("CompletedSteps").is_err());
        assert!(validate_field_name("completed_steps").is_err());
        assert!(validate_field_name("a.b").is_err());
        assert!(validate_field_name("").is_err());
    }

    #[test]
    fn part_names_forbid_dots() {
        assert!(validate_part_name("DET-1_x").is_ok());
        assert!(validate_part_name("DET.1").is_err());
    }

    #[test]
    fn display_joins_with_dots() {
        let p = path!("blk.attr.value");
        assert_eq!(p.to_string(), "blk.attr.value");
        assert_eq!(p.tail(), &["attr".to_string(), "value".to_string()]);
    }

    #[test]
    fn has_prefix_works() {
        let p = path!("blk.attr.value");
        assert!(p.has_prefix(&path!("blk")));
        assert!(p.has_prefix(&path!("blk.attr")));
        assert!(!p.has_prefix(&path!("blk.other")));
        assert_eq!(path!("blk").child("attr"), path!("blk.attr"));
    }

    #[test]
    fn camel_to_title_splits_words() {
        assert_eq!(camel_to_title("x"), "X");
        assert_eq!(camel_to_title("totalSteps"), "Total Steps");
    }
}
