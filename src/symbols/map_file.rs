//! MAP-file based symbol resolution.
//!
//! A MAP file starts with the image name on its own line, followed by one
//! `<hex address> <symbol name>` entry per line. Addresses are image
//! relative. Lookup picks the nearest symbol at or before the queried
//! offset.

use super::SymbolResolver;
use crate::trace::ImageFileInfo;
use crate::utils::error::MapFileError;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;

/// Parsed symbol table for one image
///
/// **Public** - aggregated by MapFileResolver
#[derive(Debug, Clone)]
pub struct MapFile {
    /// Image file name this MAP file describes
    pub image_name: String,

    /// (offset, symbol) entries sorted by offset
    symbols: Vec<(u32, String)>,
}

impl MapFile {
    /// Parse a MAP file from disk
    ///
    /// **Public** - main entry point for MAP parsing
    ///
    /// # Errors
    /// * `MapFileError::EmptyFile` - no image-name header line
    /// * `MapFileError::MalformedEntry` - entry line without a valid hex address
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapFileError> {
        let path = path.as_ref();
        debug!("Parsing MAP file: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut lines = content.lines().enumerate();

        let image_name = lines
            .by_ref()
            .map(|(_, line)| line.trim())
            .find(|line| !line.is_empty())
            .ok_or_else(|| MapFileError::EmptyFile(path.display().to_string()))?
            .to_string();

        let mut symbols = Vec::new();
        for (number, line) in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (address, name) = line.split_once(char::is_whitespace).ok_or_else(|| {
                MapFileError::MalformedEntry {
                    line: number + 1,
                    content: line.to_string(),
                }
            })?;

            let address = address.trim_start_matches("0x");
            let offset = u32::from_str_radix(address, 16).map_err(|_| {
                MapFileError::MalformedEntry {
                    line: number + 1,
                    content: line.to_string(),
                }
            })?;

            symbols.push((offset, name.trim().to_string()));
        }

        symbols.sort_by_key(|(offset, _)| *offset);

        debug!("MAP file for '{}': {} symbols", image_name, symbols.len());

        Ok(Self {
            image_name,
            symbols,
        })
    }

    /// Find the nearest symbol at or before `offset`
    ///
    /// **Public** - used by format_address
    pub fn lookup(&self, offset: u32) -> Option<(&str, u32)> {
        let index = match self.symbols.binary_search_by_key(&offset, |(o, _)| *o) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let (base, name) = &self.symbols[index];
        Some((name.as_str(), offset - base))
    }
}

/// Resolver backed by a set of MAP files, keyed by image name
///
/// **Public** - selected by the analyze command when MAP files are configured
pub struct MapFileResolver {
    maps: HashMap<String, MapFile>,
}

impl MapFileResolver {
    /// Build a resolver from already-parsed MAP files
    ///
    /// **Public** - constructor
    pub fn new(maps: impl IntoIterator<Item = MapFile>) -> Self {
        let maps: HashMap<String, MapFile> = maps
            .into_iter()
            .map(|map| (map.image_name.clone(), map))
            .collect();

        if maps.is_empty() {
            info!("No MAP files loaded; addresses will render as raw offsets");
        }

        Self { maps }
    }

    /// Load every given MAP file path
    ///
    /// **Public** - convenience loader for the analyze command
    pub fn from_paths<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, MapFileError> {
        let mut maps = Vec::new();
        for path in paths {
            maps.push(MapFile::load(path)?);
        }
        Ok(Self::new(maps))
    }
}

impl SymbolResolver for MapFileResolver {
    fn format_address(&self, image: &ImageFileInfo, offset: u32) -> String {
        if let Some(map) = self.maps.get(&image.name) {
            if let Some((symbol, delta)) = map.lookup(offset) {
                return format!("{}!{}+0x{:x}", image.name, symbol, delta);
            }
        }
        format!("{}+0x{:x}", image.name, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_map(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_and_lookup() {
        let file = write_map("libcrypto.so\n0 _start\n100 aes_encrypt\n200 aes_decrypt\n");
        let map = MapFile::load(file.path()).unwrap();

        assert_eq!(map.image_name, "libcrypto.so");
        assert_eq!(map.lookup(0x100), Some(("aes_encrypt", 0)));
        assert_eq!(map.lookup(0x1ff), Some(("aes_encrypt", 0xff)));
        assert_eq!(map.lookup(0x250), Some(("aes_decrypt", 0x50)));
    }

    #[test]
    fn test_lookup_before_first_symbol() {
        let file = write_map("a.so\n100 entry\n");
        let map = MapFile::load(file.path()).unwrap();
        assert_eq!(map.lookup(0x50), None);
    }

    #[test]
    fn test_malformed_entry_is_rejected() {
        let file = write_map("a.so\nnot-an-address entry\n");
        assert!(MapFile::load(file.path()).is_err());
    }

    #[test]
    fn test_resolver_formats_through_map() {
        let file = write_map("target.so\n100 f\n");
        let resolver = MapFileResolver::from_paths([file.path()]).unwrap();

        let image = ImageFileInfo {
            id: 0,
            low: 0,
            high: 0,
            name: "target.so".to_string(),
        };
        assert_eq!(resolver.format_address(&image, 0x104), "target.so!f+0x4");

        let unknown = ImageFileInfo {
            id: 1,
            low: 0,
            high: 0,
            name: "other.so".to_string(),
        };
        assert_eq!(resolver.format_address(&unknown, 0x10), "other.so+0x10");
    }
}
