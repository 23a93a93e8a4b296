//! # Command Handler
//!
//! Parses and executes the commands of the `zwnvm` binary against an open
//! store.
//!
//! ## Supported Commands
//!
//! | Command                               | Description                        |
//! |---------------------------------------|------------------------------------|
//! | `info`                                | image geometry and section state   |
//! | `dump`                                | every live key with its value      |
//! | `get <key>`                           | one value as hex                   |
//! | `set <key> <hex>`                     | write a value                      |
//! | `delete <key>`                        | write a tombstone                  |
//! | `erase [--page-size N] [--shared]`    | format the whole image             |
//!
//! Keys are accepted as `0x`-prefixed hex or as decimal numbers.

use crate::config::EraseOptions;
use crate::error::{NvmError, Result};
use crate::nvm3::Nvm3;
use crate::storage::NvmIo;

use super::table::TableFormatter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    Dump,
    Get(u32),
    Set(u32, Vec<u8>),
    Delete(u32),
    Erase(EraseOptions),
}

impl Command {
    /// Whether the command writes to the image.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::Set(..) | Command::Delete(_) | Command::Erase(_))
    }

    pub fn parse(args: &[&str]) -> Result<Self> {
        let Some((name, args)) = args.split_first() else {
            return Err(NvmError::Argument("missing command".into()));
        };

        match (name.to_lowercase().as_str(), args) {
            ("info", []) => Ok(Command::Info),
            ("dump", []) => Ok(Command::Dump),
            ("get", [key]) => Ok(Command::Get(parse_key(key)?)),
            ("set", [key, data]) => Ok(Command::Set(parse_key(key)?, parse_hex(data)?)),
            ("delete", [key]) => Ok(Command::Delete(parse_key(key)?)),
            ("erase", options) => Ok(Command::Erase(parse_erase_options(options)?)),
            (name @ ("info" | "dump" | "get" | "set" | "delete"), _) => Err(NvmError::Argument(
                format!("wrong number of arguments for '{}'", name),
            )),
            (name, _) => Err(NvmError::Argument(format!("unknown command '{}'", name))),
        }
    }
}

pub fn parse_key(input: &str) -> Result<u32> {
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| NvmError::Argument(format!("invalid key '{}'", input)))
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    hex::decode(input).map_err(|e| NvmError::Argument(format!("invalid hex data '{}': {}", input, e)))
}

fn parse_erase_options(args: &[&str]) -> Result<EraseOptions> {
    let mut options = EraseOptions::default();
    let mut page_size = None;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--shared" => options = options.shared_file_system(true),
            "--page-size" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(NvmError::Argument("--page-size needs a value".into()));
                };
                let size = value
                    .parse()
                    .map_err(|_| NvmError::Argument(format!("invalid page size '{}'", value)))?;
                page_size = Some(size);
                i += 1;
            }
            other => return Err(NvmError::Argument(format!("unknown erase option '{}'", other))),
        }
        i += 1;
    }
    if let Some(size) = page_size {
        options = options.page_size(size);
    }
    Ok(options)
}

/// Runs `command` and returns the text to print.
pub fn execute<IO: NvmIo>(nvm: &mut Nvm3<IO>, command: &Command) -> Result<String> {
    match command {
        Command::Info => info(nvm),
        Command::Dump => dump(nvm),
        Command::Get(key) => Ok(hex::encode(nvm.require(*key)?)),
        Command::Set(key, data) => {
            nvm.set(*key, data.clone())?;
            Ok(format!("wrote {} bytes to {:#07x}", data.len(), key))
        }
        Command::Delete(key) => {
            nvm.delete(*key)?;
            Ok(format!("deleted {:#07x}", key))
        }
        Command::Erase(options) => {
            nvm.erase(options)?;
            let meta = nvm.meta()?;
            Ok(format!(
                "erased NVM: page size {}, {} layout",
                meta.page_size,
                if meta.shared_file_system { "shared" } else { "split" }
            ))
        }
    }
}

fn info<IO: NvmIo>(nvm: &mut Nvm3<IO>) -> Result<String> {
    let meta = nvm.meta()?;
    let mut output = format!(
        "layout:        {}\npage size:     {}\ndevice family: {:#05x}\nwrite size:    {:?}\nmemory mapped: {}\n",
        if meta.shared_file_system { "shared" } else { "split" },
        meta.page_size,
        meta.device_family,
        meta.write_size,
        meta.memory_mapped
    );

    let headers = ["section", "pages", "current", "offset", "keys", "max erase"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows = nvm
        .sections()?
        .into_iter()
        .map(|section| {
            let max_erase = section.pages().iter().map(|p| p.header.erase_count).max();
            vec![
                section.name().to_string(),
                section.pages().len().to_string(),
                section.current_page().to_string(),
                section.offset().to_string(),
                section.keys().len().to_string(),
                max_erase.map_or_else(|| "-".to_string(), |count| count.to_string()),
            ]
        })
        .collect();
    output.push_str(&TableFormatter::new(headers, rows).render());
    Ok(output)
}

fn dump<IO: NvmIo>(nvm: &mut Nvm3<IO>) -> Result<String> {
    let mut rows = Vec::new();
    for key in nvm.keys()? {
        let Some(data) = nvm.get(key)? else {
            continue;
        };
        rows.push(vec![format!("{:#07x}", key), data.len().to_string(), hex::encode(&data)]);
    }

    let headers = vec!["key".to_string(), "size".to_string(), "data".to_string()];
    let formatter = TableFormatter::new(headers, rows);
    let count = formatter.row_count();
    Ok(format!(
        "{}{} object{}\n",
        formatter.render(),
        count,
        if count == 1 { "" } else { "s" }
    ))
}
