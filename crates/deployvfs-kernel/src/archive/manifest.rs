//! `META-INF/MANIFEST.MF` parsing.
//!
//! The format is a list of `Name: value` lines. A line starting with a
//! single space continues the previous value. A blank line ends a section;
//! the first section holds the main attributes and every later section
//! starts with a `Name:` header naming the entry it describes.

use crate::vfs::{VfsError, VfsResult};

/// Location of the manifest inside an archive.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

const SECTION_NAME: &str = "Name";

/// Ordered attribute list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    /// Value of the first attribute named `name`, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: Attributes,
    sections: Vec<(String, Attributes)>,
}

impl Manifest {
    pub fn main_attributes(&self) -> &Attributes {
        &self.main
    }

    /// Main attribute lookup, e.g. `Manifest-Version` or `Class-Path`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.main.get(name)
    }

    /// Attributes of the section for entry `name`.
    pub fn section(&self, name: &str) -> Option<&Attributes> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, attrs)| attrs)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Attributes)> {
        self.sections.iter().map(|(n, a)| (n.as_str(), a))
    }

    /// Space-separated `Class-Path` entries.
    pub fn class_path(&self) -> Vec<&str> {
        self.get("Class-Path")
            .map(|cp| cp.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Split on `\r\n`, `\n` or a lone `\r`.
fn lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find(['\r', '\n']) {
            Some(idx) => {
                let line = &rest[..idx];
                let skip = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[idx + skip..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

fn valid_header(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

struct Parser {
    manifest: Manifest,
    current: Vec<(String, String)>,
    seen_main: bool,
}

impl Parser {
    fn end_section(&mut self, line_no: usize) -> VfsResult<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.current);
        if !self.seen_main {
            self.seen_main = true;
            self.manifest.main = Attributes { entries };
            return Ok(());
        }
        let mut entries = entries.into_iter();
        match entries.next() {
            Some((key, name)) if key.eq_ignore_ascii_case(SECTION_NAME) => {
                self.manifest.sections.push((
                    name,
                    Attributes {
                        entries: entries.collect(),
                    },
                ));
                Ok(())
            }
            _ => Err(VfsError::archive_malformed(format!(
                "manifest section ending at line {} has no Name header",
                line_no
            ))),
        }
    }
}

/// Parse manifest bytes. A missing final newline is accepted.
pub fn read_manifest(bytes: &[u8]) -> VfsResult<Manifest> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| VfsError::archive_malformed(format!("manifest is not UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut parser = Parser {
        manifest: Manifest::default(),
        current: Vec::new(),
        seen_main: false,
    };
    let mut line_no = 0;
    for line in lines(text) {
        line_no += 1;
        if line.is_empty() {
            parser.end_section(line_no)?;
            // An empty main section still counts as the main section.
            parser.seen_main = true;
            continue;
        }
        if let Some(more) = line.strip_prefix(' ') {
            match parser.current.last_mut() {
                Some((_, value)) => value.push_str(more),
                None => {
                    return Err(VfsError::archive_malformed(format!(
                        "manifest line {} continues nothing",
                        line_no
                    )));
                }
            }
            continue;
        }
        match line.split_once(": ") {
            Some((name, value)) if valid_header(name) => {
                parser.current.push((name.to_string(), value.to_string()));
            }
            _ => {
                return Err(VfsError::archive_malformed(format!(
                    "manifest line {} is not a header: {:?}",
                    line_no, line
                )));
            }
        }
    }
    parser.end_section(line_no + 1)?;
    Ok(parser.manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_attributes() {
        let manifest = read_manifest(
            b"Manifest-Version: 1.0\r\nCreated-By: 17 (Acme)\r\nClass-Path: lib/a.jar lib/b.jar\r\n\r\n",
        )
        .unwrap();
        assert_eq!(manifest.get("manifest-version"), Some("1.0"));
        assert_eq!(manifest.get("Created-By"), Some("17 (Acme)"));
        assert_eq!(manifest.class_path(), vec!["lib/a.jar", "lib/b.jar"]);
        assert_eq!(manifest.main_attributes().len(), 3);
        assert_eq!(manifest.sections().count(), 0);
    }

    #[test]
    fn test_continuation_and_sections() {
        let text = "Manifest-Version: 1.0\n\
                    Implementation-Title: a very long ti\n \
                    tle\n\
                    \n\
                    Name: com/acme/\n\
                    Sealed: true\n\
                    \n\
                    Name: com/acme/Main.class\n\
                    SHA-256-Digest: abc=";
        let manifest = read_manifest(text.as_bytes()).unwrap();
        assert_eq!(manifest.get("Implementation-Title"), Some("a very long title"));
        assert_eq!(manifest.section("com/acme/").unwrap().get("sealed"), Some("true"));
        assert_eq!(
            manifest.section("com/acme/Main.class").unwrap().get("SHA-256-Digest"),
            Some("abc=")
        );
        let names: Vec<&str> = manifest.sections().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["com/acme/", "com/acme/Main.class"]);
    }

    #[test]
    fn test_bare_cr_line_endings() {
        let manifest = read_manifest(b"Manifest-Version: 1.0\rMain-Class: app.Main\r").unwrap();
        assert_eq!(manifest.get("Main-Class"), Some("app.Main"));
    }

    #[test]
    fn test_empty() {
        let manifest = read_manifest(b"").unwrap();
        assert!(manifest.main_attributes().is_empty());
        assert!(manifest.get("Manifest-Version").is_none());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            read_manifest(b"Manifest-Version 1.0\n"),
            Err(VfsError::ArchiveMalformed(_))
        ));
        assert!(read_manifest(b" leading continuation\n").is_err());
        assert!(read_manifest(b"Manifest-Version: 1.0\n\nSealed: true\n").is_err());
        assert!(read_manifest(b"Bad Name: x\n").is_err());
        assert!(read_manifest(&[0xff, 0xfe, b'\n']).is_err());
    }
}
