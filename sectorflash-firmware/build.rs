//! Build script for sectorflash-firmware
//!
//! - Sets up linker search paths for memory.x
//! - Validates sectorflash.toml and generates its constants

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Erase block size of the on-board flash
const ERASE_SIZE: i64 = 4096;

/// Total flash size in erase blocks (2 MiB)
const FLASH_BLOCKS: i64 = 512;

/// Blocks reserved for the firmware image by memory.x (1 MiB)
const FIRMWARE_BLOCKS: i64 = 256;

fn main() {
    setup_linker();
    let config = load_config();
    let errors = validate_store(&config)
        .into_iter()
        .chain(validate_sensors(&config))
        .collect::<Vec<_>>();
    if !errors.is_empty() {
        fail("Invalid sectorflash.toml", &errors);
    }
    generate_consts(&config);
    println!("cargo:warning=sectorflash.toml validated successfully");
}

/// Set up linker search paths for memory.x
fn setup_linker() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let memory_x = include_bytes!("memory.x");
    let mut f = File::create(out_dir.join("memory.x")).unwrap();
    f.write_all(memory_x).unwrap();

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}

fn load_config() -> toml::Value {
    println!("cargo:rerun-if-changed=sectorflash.toml");

    let config_path = Path::new("sectorflash.toml");
    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => fail(
            "Failed to read sectorflash.toml",
            &[format!("{e}"), "The firmware requires it next to Cargo.toml".into()],
        ),
    };

    match toml::from_str(&content) {
        Ok(value) => value,
        Err(e) => fail(
            "Invalid TOML syntax in sectorflash.toml",
            &e.to_string().lines().map(str::to_string).collect::<Vec<_>>(),
        ),
    }
}

fn integer(table: &toml::Table, section: &str, key: &str, errors: &mut Vec<String>) -> Option<i64> {
    match table.get(key) {
        Some(toml::Value::Integer(v)) => Some(*v),
        Some(_) => {
            errors.push(format!("[{section}] '{key}' must be an integer"));
            None
        }
        None => {
            errors.push(format!("[{section}] missing '{key}'"));
            None
        }
    }
}

fn section<'a>(config: &'a toml::Value, name: &str, errors: &mut Vec<String>) -> Option<&'a toml::Table> {
    match config.get(name) {
        Some(toml::Value::Table(t)) => Some(t),
        Some(_) => {
            errors.push(format!("[{name}] must be a table"));
            None
        }
        None => {
            errors.push(format!("Missing [{name}] section"));
            None
        }
    }
}

/// Validate the store window against the flash layout
fn validate_store(config: &toml::Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(store) = section(config, "store", &mut errors) else {
        return errors;
    };

    let lower = integer(store, "store", "lower_bound", &mut errors);
    let count = integer(store, "store", "logical_sectors", &mut errors);
    let group_by = integer(store, "store", "group_by", &mut errors);

    if let Some(g) = group_by {
        if ![1, 8, 16, 64].contains(&g) {
            errors.push("[store] group_by must be 1, 8, 16 or 64".into());
        }
    }
    if let Some(c) = count {
        if !(1..=i64::from(u16::MAX)).contains(&c) {
            errors.push(format!("[store] logical_sectors must be 1-{}", u16::MAX));
        }
    }
    if let Some(l) = lower {
        if l < FIRMWARE_BLOCKS {
            errors.push(format!(
                "[store] lower_bound overlaps the firmware (first free block is {FIRMWARE_BLOCKS})"
            ));
        }
    }
    if let (Some(l), Some(c), Some(g)) = (lower, count, group_by) {
        if c > 0 && l + c * g > FLASH_BLOCKS {
            errors.push(format!(
                "[store] window ends at block {} but flash has {FLASH_BLOCKS} ({} KiB)",
                l + c * g,
                FLASH_BLOCKS * ERASE_SIZE / 1024
            ));
        }
    }

    match store.get("mode") {
        Some(toml::Value::String(m)) if m == "mount" || m == "init" => {}
        Some(_) => errors.push("[store] mode must be 'mount' or 'init'".into()),
        None => {}
    }

    errors
}

fn validate_sensors(config: &toml::Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(sensors) = section(config, "sensors", &mut errors) else {
        return errors;
    };

    if let Some(ms) = integer(sensors, "sensors", "poll_interval_ms", &mut errors) {
        // AHT21 needs 80 ms per conversion
        if !(100..=3_600_000).contains(&ms) {
            errors.push("[sensors] poll_interval_ms must be 100-3600000".into());
        }
    }
    if let Some(samples) = integer(sensors, "sensors", "mux_samples", &mut errors) {
        if !(1..=255).contains(&samples) {
            errors.push("[sensors] mux_samples must be 1-255".into());
        }
    }
    match sensors.get("extra_precision") {
        Some(toml::Value::Boolean(_)) | None => {}
        Some(_) => errors.push("[sensors] extra_precision must be a boolean".into()),
    }

    errors
}

/// Write the validated values as Rust constants
fn generate_consts(config: &toml::Value) {
    let get = |section: &str, key: &str| config.get(section).and_then(|s| s.get(key));
    let int = |section: &str, key: &str| get(section, key).and_then(toml::Value::as_integer).unwrap();

    let group_by = match int("store", "group_by") {
        1 => "One",
        8 => "Eight",
        16 => "Sixteen",
        _ => "SixtyFour",
    };
    let init = get("store", "mode").and_then(toml::Value::as_str) == Some("init");
    let extra_precision = get("sensors", "extra_precision")
        .and_then(toml::Value::as_bool)
        .unwrap_or(false);

    let generated = format!(
        "// Generated from sectorflash.toml by build.rs\n\
         pub const LOWER_BOUND: u32 = {};\n\
         pub const LOGICAL_SECTORS: u16 = {};\n\
         pub const GROUP_BY: sectorflash_core::GroupBy = sectorflash_core::GroupBy::{};\n\
         pub const INIT_ALL: bool = {};\n\
         pub const POLL_INTERVAL_MS: u64 = {};\n\
         pub const MUX_SAMPLES: u8 = {};\n\
         pub const EXTRA_PRECISION: bool = {};\n",
        int("store", "lower_bound"),
        int("store", "logical_sectors"),
        group_by,
        init,
        int("sensors", "poll_interval_ms"),
        int("sensors", "mux_samples"),
        extra_precision,
    );

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::write(out_dir.join("sectorflash_config.rs"), generated).unwrap();
}

/// Abort the build with a boxed error listing
fn fail(title: &str, lines: &[String]) -> ! {
    panic!(
        "\n\
        ╔══════════════════════════════════════════════════════════════════╗\n\
        ║  ERROR: {:<56} ║\n\
        ╠══════════════════════════════════════════════════════════════════╣\n\
        {}\n\
        ╚══════════════════════════════════════════════════════════════════╝\n",
        title,
        lines
            .iter()
            .map(|line| format!("║  • {:<62} ║", truncate_line(line, 62)))
            .collect::<Vec<_>>()
            .join("\n")
    );
}

/// Shorten `line` to at most `width` characters, marking the cut with "..."
fn truncate_line(line: &str, width: usize) -> String {
    if line.chars().count() > width {
        let kept: String = line.chars().take(width - 3).collect();
        format!("{}...", kept)
    } else {
        line.to_string()
    }
}
