//! OpenNebula template rendering.
//!
//! Turns a [`VmDescriptor`] into template text. Rendering is pure: the same
//! descriptor always produces the same text.

use std::fmt::Write;

use crate::error::{Error, Result};
use crate::mapper::VmDescriptor;
pub use crate::quoting::quote;
use crate::quoting::is_decimal;

/// Names made of plain identifier characters are written bare, anything else
/// is quoted.
fn name_value(name: &str) -> String {
    let bare = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if bare {
        name.to_string()
    } else {
        quote(name)
    }
}

fn require<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(Error::render(format!("{} is empty", field)))
    } else {
        Ok(value)
    }
}

/// CPU and MEMORY are written unquoted, so they must be plain numbers.
fn require_number<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = require(value, field)?.trim();
    if is_decimal(value) {
        Ok(value)
    } else {
        Err(Error::render(format!("{} is not a number: {:?}", field, value)))
    }
}

/// Render the template text for a virtual machine.
///
/// Sections are written in a fixed order: name, cpu, memory, one line per
/// disk, one line per nic, and the raw section.
pub fn render(vm: &VmDescriptor) -> Result<String> {
    let name = require(&vm.name, "NAME")?;
    let cpu = require_number(&vm.capacity.cpu, "CPU")?;
    let memory = require_number(&vm.capacity.memory, "MEMORY")?;

    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "NAME={}", name_value(name));
    let _ = writeln!(out, "CPU={}", cpu);
    let _ = writeln!(out, "MEMORY={}", memory);

    for disk in &vm.disks {
        let _ = writeln!(
            out,
            "DISK=[IMAGE_ID={}, TARGET={}]",
            quote(&disk.image_id),
            quote(&disk.target())
        );
    }

    for nic in &vm.nics {
        match &nic.model {
            Some(model) => {
                let _ = writeln!(
                    out,
                    "NIC=[NETWORK={}, MODEL={}]",
                    quote(&nic.network),
                    quote(model)
                );
            }
            None => {
                let _ = writeln!(out, "NIC=[NETWORK={}]", quote(&nic.network));
            }
        }
    }

    let _ = writeln!(out, "{}", vm.raw);
    Ok(out)
}
