//! The jmod index: a map from internal class name to the JDK archive file
//! that contains it. Built once by walking the `jmods` directory of the JDK
//! named by `JAVA_HOME`, then cached as JSON under `KAVA_HOME` so later runs
//! skip the walk.
//!
//! A .jmod file is a zip archive behind a 4-byte magic header; only entry
//! names are needed here, so the reader walks the central directory and
//! never inflates anything.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::globals;

const CACHE_FILE: &str = "jmodmap.json";

const EOCD_SIG: u32 = 0x0605_4b50;
const CDIR_SIG: u32 = 0x0201_4b50;

#[derive(Default, Serialize, Deserialize)]
struct JmodMap {
    entries: HashMap<String, String>,
    #[serde(skip)]
    found_cache: bool,
}

fn map_cell() -> &'static Mutex<JmodMap> {
    static MAP: OnceLock<Mutex<JmodMap>> = OnceLock::new();
    MAP.get_or_init(|| Mutex::new(JmodMap::default()))
}

fn cache_path() -> Option<PathBuf> {
    let glob = globals::get_global();
    let base = glob
        .kava_home
        .clone()
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".kava")))?;
    Some(base.join(CACHE_FILE))
}

fn jmods_dir() -> Option<PathBuf> {
    let java_home = std::env::var_os("JAVA_HOME")?;
    let dir = PathBuf::from(java_home).join("jmods");
    dir.is_dir().then_some(dir)
}

/// Entry names from one zip archive's central directory. Tolerates the jmod
/// magic prefix by locating the end-of-central-directory record from the
/// back of the file.
fn zip_entry_names(data: &[u8]) -> Option<Vec<String>> {
    if data.len() < 22 {
        return None;
    }
    // the EOCD record is at least 22 bytes and ends with a variable comment
    let mut eocd = None;
    let scan_floor = data.len().saturating_sub(22 + 0xFFFF);
    for pos in (scan_floor..=data.len() - 22).rev() {
        if u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) == EOCD_SIG
        {
            eocd = Some(pos);
            break;
        }
    }
    let eocd = eocd?;

    let mut rdr = Cursor::new(&data[eocd + 4..]);
    let _disk = rdr.read_u16::<LittleEndian>().ok()?;
    let _cd_disk = rdr.read_u16::<LittleEndian>().ok()?;
    let _entries_on_disk = rdr.read_u16::<LittleEndian>().ok()?;
    let total_entries = rdr.read_u16::<LittleEndian>().ok()?;
    let _cd_size = rdr.read_u32::<LittleEndian>().ok()?;
    let cd_offset = rdr.read_u32::<LittleEndian>().ok()? as usize;

    // jmod archives place the zip body after a 4-byte magic, so central
    // directory offsets are shifted; resync on the first entry signature.
    let mut pos = cd_offset;
    if data.len() > pos + 4
        && u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) != CDIR_SIG
    {
        pos += 4;
    }

    let mut names = Vec::with_capacity(total_entries as usize);
    for _ in 0..total_entries {
        if data.len() < pos + 46 {
            break;
        }
        if u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) != CDIR_SIG
        {
            break;
        }
        let mut rdr = Cursor::new(&data[pos + 28..pos + 46]);
        let name_len = rdr.read_u16::<LittleEndian>().ok()? as usize;
        let extra_len = rdr.read_u16::<LittleEndian>().ok()? as usize;
        let comment_len = rdr.read_u16::<LittleEndian>().ok()? as usize;
        let name_start = pos + 46;
        if data.len() < name_start + name_len {
            break;
        }
        names.push(String::from_utf8_lossy(&data[name_start..name_start + name_len]).into_owned());
        pos = name_start + name_len + extra_len + comment_len;
    }
    Some(names)
}

fn walk_jmods(map: &mut JmodMap) {
    let Some(dir) = jmods_dir() else {
        warn!("JAVA_HOME does not name a JDK with a jmods directory; jmod map is empty");
        return;
    };
    let Ok(listing) = fs::read_dir(&dir) else {
        return;
    };
    for entry in listing.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jmod") {
            continue;
        }
        let Some(jmod_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let Ok(data) = fs::read(&path) else {
            continue;
        };
        let Some(names) = zip_entry_names(&data) else {
            warn!("could not read archive directory of {jmod_name}");
            continue;
        };
        for name in names {
            if let Some(class) = name
                .strip_prefix("classes/")
                .and_then(|n| n.strip_suffix(".class"))
            {
                if class != "module-info" {
                    map.entries.insert(class.to_string(), jmod_name.clone());
                }
            }
        }
        debug!("indexed {jmod_name}");
    }
}

/// Builds the class-to-archive index: from the cache blob when one exists
/// under `KAVA_HOME`, otherwise by walking the JDK's jmods and persisting
/// the result.
pub fn map_init() {
    let mut map = map_cell().lock().unwrap();
    map.entries.clear();
    map.found_cache = false;

    if let Some(path) = cache_path() {
        if let Ok(text) = fs::read_to_string(&path) {
            if let Ok(cached) = serde_json::from_str::<JmodMap>(&text) {
                info!("jmod map restored from {} ({} entries)", path.display(), cached.entries.len());
                map.entries = cached.entries;
                map.found_cache = true;
                return;
            }
        }
    }

    walk_jmods(&mut map);
    info!("jmod map built: {} classes", map.entries.len());

    if map.entries.is_empty() {
        return;
    }
    if let Some(path) = cache_path() {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string(&*map) {
            Ok(text) => {
                if let Err(e) = fs::write(&path, text) {
                    warn!("could not persist jmod map to {}: {e}", path.display());
                }
            }
            Err(e) => warn!("could not serialize jmod map: {e}"),
        }
    }
}

/// The archive holding `key` (slash-form class name), or `""`.
pub fn map_fetch(key: &str) -> String {
    map_cell()
        .lock()
        .unwrap()
        .entries
        .get(key)
        .cloned()
        .unwrap_or_default()
}

pub fn map_size() -> usize {
    map_cell().lock().unwrap().entries.len()
}

/// Whether the last `map_init` was satisfied from the persisted cache blob.
pub fn map_found_cache() -> bool {
    map_cell().lock().unwrap().found_cache
}
