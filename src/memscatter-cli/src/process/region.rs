//! Memory Region Types
//!
//! Data structures for representing memory regions from /proc/pid/maps.

use std::fs;
use std::io;

/// A memory region from /proc/pid/maps
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_writable(&self) -> bool {
        self.perms.chars().nth(1) == Some('w')
    }

    /// True if `[address, address + len)` lies inside this region
    pub fn contains_range(&self, address: u64, len: usize) -> bool {
        address >= self.start
            && address
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.end)
    }

    /// File name of the mapped path. Handles Wine-style `\` separators.
    pub fn file_name(&self) -> Option<&str> {
        self.path
            .as_deref()
            .and_then(|p| p.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
    }
}

/// Read and parse /proc/pid/maps
pub fn parse_maps(pid: u32) -> io::Result<Vec<MemoryRegion>> {
    let contents = fs::read_to_string(format!("/proc/{}/maps", pid))?;
    Ok(parse_maps_str(&contents))
}

/// Parse the text of a maps file. Malformed lines are skipped.
pub fn parse_maps_str(contents: &str) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();

    for line in contents.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((start, end)) = parts.first().and_then(|range| range.split_once('-')) else {
            continue;
        };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };

        let perms = parts.get(1).unwrap_or(&"").to_string();
        // Paths may contain spaces
        let path = (parts.len() > 5).then(|| parts[5..].join(" "));

        regions.push(MemoryRegion {
            start,
            end,
            perms,
            path,
        });
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
140000000-140001000 r--p 00000000 00:2f 1234    /games/DungeonCrawler/DungeonCrawler.exe
140001000-147000000 r-xp 00001000 00:2f 1234    /games/DungeonCrawler/DungeonCrawler.exe
7f0000000000-7f0000021000 rw-p 00000000 00:00 0
7f1000000000-7f1000010000 r--p 00000000 00:2f 99    /home/user/My Games/steam_api64.dll
garbage line
7ffc00000000-7ffc00021000 rw-p 00000000 00:00 0    [stack]
";

    #[test]
    fn test_parse_maps_str() {
        let regions = parse_maps_str(MAPS);
        assert_eq!(regions.len(), 5);
        assert_eq!(regions[0].start, 0x140000000);
        assert_eq!(regions[0].size(), 0x1000);
        assert_eq!(regions[1].perms, "r-xp");
        assert!(regions[2].path.is_none());
        assert_eq!(
            regions[3].path.as_deref(),
            Some("/home/user/My Games/steam_api64.dll")
        );
    }

    #[test]
    fn test_region_file_name() {
        let regions = parse_maps_str(MAPS);
        assert_eq!(regions[0].file_name(), Some("DungeonCrawler.exe"));
        assert_eq!(regions[3].file_name(), Some("steam_api64.dll"));
        assert_eq!(regions[4].file_name(), Some("[stack]"));

        let wine = MemoryRegion {
            start: 0,
            end: 0x1000,
            perms: "r--p".to_string(),
            path: Some("C:\\Games\\Game.exe".to_string()),
        };
        assert_eq!(wine.file_name(), Some("Game.exe"));
    }

    #[test]
    fn test_region_permissions() {
        let regions = parse_maps_str(MAPS);
        assert!(!regions[0].is_writable());
        assert!(regions[2].is_writable());
    }

    #[test]
    fn test_region_contains_range() {
        let region = MemoryRegion {
            start: 0x1000,
            end: 0x2000,
            perms: "rw-p".to_string(),
            path: None,
        };
        assert!(region.contains_range(0x1000, 0x1000));
        assert!(region.contains_range(0x1FF8, 8));
        assert!(!region.contains_range(0x1FFC, 8));
        assert!(!region.contains_range(0xFFF, 1));
        assert!(!region.contains_range(u64::MAX, 2));
    }
}
